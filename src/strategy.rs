//! Lifetime strategies: where instances live, per lifetime.
//!
//! Selecting a strategy is the resolver's first step after finding a
//! binding. Singleton reads and writes the root scope, Scoped the current
//! child scope, Transient nothing at all.

use crate::error::Result;
use crate::id::{Lifetime, ServiceId};
use crate::model::Instance;
use crate::scope::{InstanceMeta, ScopeHandle, ScopeManager};

pub(crate) enum Strategy<'a> {
    Singleton {
        manager: &'a ScopeManager,
    },
    Scoped {
        manager: &'a ScopeManager,
        scope: &'a ScopeHandle,
    },
    Transient,
}

impl<'a> Strategy<'a> {
    pub(crate) fn select(
        lifetime: Lifetime,
        manager: &'a ScopeManager,
        scope: &'a ScopeHandle,
    ) -> Self {
        match lifetime {
            Lifetime::Singleton => Strategy::Singleton { manager },
            Lifetime::Scoped => Strategy::Scoped { manager, scope },
            Lifetime::Transient => Strategy::Transient,
        }
    }

    pub(crate) fn store(
        &self,
        id: &ServiceId,
        instance: Instance,
        meta: InstanceMeta,
    ) -> Result<()> {
        match self {
            Strategy::Singleton { manager } => {
                manager.store_with_meta(manager.root(), id, instance, meta)
            }
            Strategy::Scoped { manager, scope } => {
                manager.store_with_meta(scope, id, instance, meta)
            }
            Strategy::Transient => Ok(()),
        }
    }

    pub(crate) fn has(&self, id: &ServiceId) -> bool {
        match self {
            Strategy::Singleton { manager } => manager.has(manager.root(), id),
            Strategy::Scoped { manager, scope } => manager.has(scope, id),
            Strategy::Transient => false,
        }
    }

    pub(crate) fn retrieve(&self, id: &ServiceId) -> Result<Option<(Instance, InstanceMeta)>> {
        match self {
            Strategy::Singleton { manager } => manager.retrieve_with_meta(manager.root(), id),
            Strategy::Scoped { manager, scope } => manager.retrieve_with_meta(scope, id),
            Strategy::Transient => Ok(None),
        }
    }

    /// Part of the strategy surface for tooling; the facade reaches the
    /// same behavior through `ScopeManager::flush_scope`.
    #[allow(dead_code)]
    pub(crate) fn clear(&self) {
        match self {
            Strategy::Singleton { .. } => {}
            Strategy::Scoped { manager, scope } => manager.flush_scope(scope),
            Strategy::Transient => {}
        }
    }

    /// Key for the per-construction lock table, or none for transients.
    pub(crate) fn lock_key(&self, id: &ServiceId) -> Option<(u64, ServiceId)> {
        match self {
            Strategy::Singleton { manager } => Some((manager.root().id(), id.clone())),
            Strategy::Scoped { scope, .. } => Some((scope.id(), id.clone())),
            Strategy::Transient => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(s: &str) -> ServiceId {
        ServiceId::new(s).unwrap()
    }

    #[test]
    fn test_singleton_targets_root_scope() {
        let manager = ScopeManager::new();
        let child = manager.begin_scope("request");
        let strategy = Strategy::select(Lifetime::Singleton, &manager, &child);

        strategy
            .store(&id("db"), Arc::new(1u32), InstanceMeta::default())
            .unwrap();
        assert!(manager.has(manager.root(), &id("db")));
        assert!(!manager.has(&child, &id("db")));
        assert!(strategy.has(&id("db")));
    }

    #[test]
    fn test_scoped_targets_child_scope() {
        let manager = ScopeManager::new();
        let child = manager.begin_scope("request");
        let strategy = Strategy::select(Lifetime::Scoped, &manager, &child);

        strategy
            .store(&id("ctx"), Arc::new(1u32), InstanceMeta::default())
            .unwrap();
        assert!(manager.has(&child, &id("ctx")));
        assert!(!manager.has(manager.root(), &id("ctx")));
    }

    #[test]
    fn test_transient_stores_nothing() {
        let manager = ScopeManager::new();
        let child = manager.begin_scope("request");
        let strategy = Strategy::select(Lifetime::Transient, &manager, &child);

        strategy
            .store(&id("x"), Arc::new(1u32), InstanceMeta::default())
            .unwrap();
        assert!(!strategy.has(&id("x")));
        assert!(strategy.retrieve(&id("x")).unwrap().is_none());
        assert!(strategy.lock_key(&id("x")).is_none());
    }

    #[test]
    fn test_scoped_clear_flushes_only_that_scope() {
        let manager = ScopeManager::new();
        let child = manager.begin_scope("request");
        manager.store(manager.root(), &id("db"), Arc::new(1u32)).unwrap();
        manager.store(&child, &id("ctx"), Arc::new(2u32)).unwrap();

        Strategy::select(Lifetime::Scoped, &manager, &child).clear();
        assert!(!manager.has(&child, &id("ctx")));
        assert!(manager.has(manager.root(), &id("db")));

        // Singleton clear is a no-op
        Strategy::select(Lifetime::Singleton, &manager, &child).clear();
        assert!(manager.has(manager.root(), &id("db")));
    }
}

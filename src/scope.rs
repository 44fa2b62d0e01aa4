//! Scope lifecycle and instance storage.
//!
//! The container owns exactly one root scope (singleton storage) and any
//! number of named child scopes. A scope is `Active` until ended; ending
//! releases its instances in reverse insertion order, invoking registered
//! dispose hooks, and is idempotent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use ahash::RandomState;
use dashmap::DashMap;

use crate::definitions::DisposeFn;
use crate::error::{DiError, DisposeFailure, Result};
use crate::id::ServiceId;
use crate::model::Instance;
use crate::telemetry::{NullSink, TelemetrySink};

#[cfg(feature = "logging")]
use tracing::debug;

/// How many resolving callbacks and decorators have been applied to a
/// cached instance. Lets late-registered hooks apply exactly once on the
/// next retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct InstanceMeta {
    pub global_callbacks_applied: usize,
    pub callbacks_applied: usize,
    pub decorators_applied: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeStatus {
    Active,
    Ended,
}

struct ScopeState {
    status: ScopeStatus,
    /// Insertion-ordered instance entries; the index keeps at most one
    /// entry per id
    entries: Vec<(ServiceId, Instance, InstanceMeta)>,
    index: HashMap<ServiceId, usize, RandomState>,
}

impl ScopeState {
    fn new() -> Self {
        Self {
            status: ScopeStatus::Active,
            entries: Vec::new(),
            index: HashMap::with_hasher(RandomState::new()),
        }
    }
}

struct ScopeInner {
    id: u64,
    name: String,
    root: bool,
    state: RwLock<ScopeState>,
}

/// A cloneable handle to one scope.
///
/// Handles stay valid after the scope ends; operations through an ended
/// handle fail with [`DiError::ScopeEnded`].
#[derive(Clone)]
pub struct ScopeHandle {
    inner: Arc<ScopeInner>,
}

impl ScopeHandle {
    fn new(id: u64, name: String, root: bool) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id,
                name,
                root,
                state: RwLock::new(ScopeState::new()),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.inner.root
    }

    pub fn is_ended(&self) -> bool {
        self.read().status == ScopeStatus::Ended
    }

    /// Number of instances currently held.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ScopeState> {
        self.inner.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ScopeState> {
        self.inner.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn ended_error(&self) -> DiError {
        DiError::ScopeEnded {
            scope: self.inner.name.clone(),
        }
    }
}

impl std::fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("root", &self.inner.root)
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Storage for singleton and scoped instances with explicit lifecycle.
pub struct ScopeManager {
    root: ScopeHandle,
    children: DashMap<u64, ScopeHandle, RandomState>,
    counter: AtomicU64,
    sink: Arc<dyn TelemetrySink>,
}

impl ScopeManager {
    pub fn new() -> Self {
        Self::with_sink(Arc::new(NullSink))
    }

    /// Route `scope.begin` / `scope.end` counters through `sink`.
    pub fn with_sink(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            root: ScopeHandle::new(0, "root".to_string(), true),
            children: DashMap::with_hasher(RandomState::new()),
            counter: AtomicU64::new(1),
            sink,
        }
    }

    /// The root scope holding singletons.
    #[inline]
    pub fn root(&self) -> &ScopeHandle {
        &self.root
    }

    /// Open a named child scope.
    pub fn begin_scope(&self, name: &str) -> ScopeHandle {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let handle = ScopeHandle::new(id, name.to_string(), false);
        self.children.insert(id, handle.clone());
        self.sink.increment("scope.begin", 1);

        #[cfg(feature = "logging")]
        debug!(
            target: "blueprint_di",
            scope = name,
            scope_id = id,
            "Scope started"
        );

        handle
    }

    /// End a scope without dispose hooks. Idempotent.
    pub fn end_scope(&self, handle: &ScopeHandle) -> Result<()> {
        self.end_scope_with(handle, &|_| None)
    }

    /// End a scope, releasing instances in reverse insertion order and
    /// calling each instance's dispose hook. All disposals are attempted;
    /// failures are aggregated into [`DiError::ScopeEndErrors`].
    pub fn end_scope_with(
        &self,
        handle: &ScopeHandle,
        dispose_for: &dyn Fn(&ServiceId) -> Option<DisposeFn>,
    ) -> Result<()> {
        if handle.is_root() {
            return Err(DiError::RootScopeEnd);
        }

        let drained = {
            let mut state = handle.write();
            if state.status == ScopeStatus::Ended {
                return Ok(());
            }
            state.status = ScopeStatus::Ended;
            state.index.clear();
            std::mem::take(&mut state.entries)
        };

        self.children.remove(&handle.id());
        self.sink.increment("scope.end", 1);

        #[cfg(feature = "logging")]
        debug!(
            target: "blueprint_di",
            scope = handle.name(),
            scope_id = handle.id(),
            instances = drained.len(),
            "Scope ended"
        );

        let mut failures = Vec::new();
        for (id, instance, _) in drained.into_iter().rev() {
            if let Some(hook) = dispose_for(&id) {
                if let Err(message) = hook(instance) {
                    failures.push(DisposeFailure {
                        id: id.to_string(),
                        message,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DiError::ScopeEndErrors { errors: failures })
        }
    }

    /// Clear a scope's instances without ending it. No-op on an ended scope.
    pub fn flush_scope(&self, handle: &ScopeHandle) {
        let mut state = handle.write();
        if state.status == ScopeStatus::Ended {
            return;
        }
        state.entries.clear();
        state.index.clear();
    }

    /// Store an instance under `(scope, id)`. At most one instance per
    /// pair; a replacement keeps the original insertion slot.
    pub fn store(&self, handle: &ScopeHandle, id: &ServiceId, instance: Instance) -> Result<()> {
        self.store_with_meta(handle, id, instance, InstanceMeta::default())
    }

    pub(crate) fn store_with_meta(
        &self,
        handle: &ScopeHandle,
        id: &ServiceId,
        instance: Instance,
        meta: InstanceMeta,
    ) -> Result<()> {
        let mut state = handle.write();
        if state.status == ScopeStatus::Ended {
            return Err(handle.ended_error());
        }
        if let Some(&pos) = state.index.get(id) {
            state.entries[pos] = (id.clone(), instance, meta);
        } else {
            state.entries.push((id.clone(), instance, meta));
            let pos = state.entries.len() - 1;
            state.index.insert(id.clone(), pos);
        }
        Ok(())
    }

    /// Retrieve the instance stored under `(scope, id)`, if any.
    pub fn retrieve(&self, handle: &ScopeHandle, id: &ServiceId) -> Result<Option<Instance>> {
        Ok(self
            .retrieve_with_meta(handle, id)?
            .map(|(instance, _)| instance))
    }

    pub(crate) fn retrieve_with_meta(
        &self,
        handle: &ScopeHandle,
        id: &ServiceId,
    ) -> Result<Option<(Instance, InstanceMeta)>> {
        let state = handle.read();
        if state.status == ScopeStatus::Ended {
            return Err(handle.ended_error());
        }
        Ok(state.index.get(id).map(|&pos| {
            let (_, instance, meta) = &state.entries[pos];
            (Arc::clone(instance), *meta)
        }))
    }

    /// Whether `(scope, id)` holds an instance. False on ended scopes.
    pub fn has(&self, handle: &ScopeHandle, id: &ServiceId) -> bool {
        let state = handle.read();
        state.status == ScopeStatus::Active && state.index.contains_key(id)
    }

    /// Number of child scopes that have not ended.
    pub fn active_children(&self) -> usize {
        self.children.len()
    }
}

impl Default for ScopeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScopeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeManager")
            .field("root_instances", &self.root.len())
            .field("active_children", &self.children.len())
            .finish()
    }
}

//! Service definitions, bindings, and the definition store.
//!
//! The [`DefinitionStore`] is the registry's backbone: it maps service ids
//! to bindings and holds the satellite channels (aliases, tags, contextual
//! overrides, decorators, resolving callbacks). After sealing it is
//! read-mostly; reads take no locks beyond the sharded map's own.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::RandomState;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::container::Container;
use crate::error::{DiError, Result};
use crate::id::{Environment, Lifetime, ServiceId};
use crate::model::{ArgValue, Instance};

#[cfg(feature = "logging")]
use tracing::debug;

/// A user factory: receives the container and the per-call overrides.
pub type FactoryFn = Arc<dyn Fn(&Container, &Overrides) -> Result<Instance> + Send + Sync>;

/// A decorator: consumes the instance, returns its replacement.
pub type DecoratorFn = Arc<dyn Fn(Instance, &Container) -> Result<Instance> + Send + Sync>;

/// A resolving callback: inspects the instance before decoration.
pub type ResolvingFn = Arc<dyn Fn(&Instance, &Container) -> Result<()> + Send + Sync>;

/// A dispose hook invoked when a scope releases the instance.
pub type DisposeFn = Arc<dyn Fn(Instance) -> std::result::Result<(), String> + Send + Sync>;

/// Per-call parameter overrides, keyed by parameter name.
///
/// An override beats both contextual overrides and the declared resolution
/// policy of the parameter.
#[derive(Default, Clone)]
pub struct Overrides {
    values: BTreeMap<String, ArgValue>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override a parameter with a plain value.
    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), ArgValue::Value(value));
        self
    }

    /// Override a parameter with an already-built instance.
    pub fn with_service<T: Send + Sync + 'static>(mut self, name: impl Into<String>, service: T) -> Self {
        self.values
            .insert(name.into(), ArgValue::Service(Arc::new(service)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for Overrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overrides")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// How a service is produced: an analyzable type, a factory, or a value.
///
/// Instance bindings are implicitly singleton and bypass analysis.
#[derive(Clone)]
pub enum Concrete {
    /// A type identifier the analyzer can inspect
    Type(String),
    /// A user factory receiving the container
    Factory(FactoryFn),
    /// A pre-built instance
    Instance(Instance),
}

impl Concrete {
    /// Produce by analyzing and constructing the named type.
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Concrete::Type(type_name.into())
    }

    /// Produce through a factory receiving the container and overrides.
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&Container, &Overrides) -> Result<Instance> + Send + Sync + 'static,
    {
        Concrete::Factory(Arc::new(f))
    }

    /// Produce through a typed factory ignoring overrides.
    pub fn factory_of<T, F>(f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<T> + Send + Sync + 'static,
    {
        Concrete::Factory(Arc::new(move |container, _| {
            Ok(Arc::new(f(container)?) as Instance)
        }))
    }

    /// Wrap a pre-built value.
    pub fn instance<T: Send + Sync + 'static>(value: T) -> Self {
        Concrete::Instance(Arc::new(value))
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Concrete::Type(_) => "type",
            Concrete::Factory(_) => "factory",
            Concrete::Instance(_) => "instance",
        }
    }
}

impl std::fmt::Debug for Concrete {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Concrete::Type(name) => write!(f, "Type({name})"),
            Concrete::Factory(_) => f.write_str("Factory(..)"),
            Concrete::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

/// The registered contract for one service id.
///
/// Pure data; the runtime producer lives on the [`Binding`]. Definitions
/// are what the validator inspects and what an external definition source
/// supplies rows of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: ServiceId,
    /// Concrete type identifier, or none for factory/instance bindings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default)]
    pub lifetime: Lifetime,
    /// Deduplicated, insertion-ordered
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional environment constraint; the validator checks membership
    /// in the closed set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Service ids this definition explicitly declares it needs
    #[serde(default)]
    pub dependencies: Vec<ServiceId>,
    /// Opaque configuration; the validator scans keys for secret-like names
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    /// Derived at analysis time; 0 until the type has been analyzed
    #[serde(default)]
    pub complexity_score: u32,
}

impl ServiceDefinition {
    pub fn new(id: ServiceId) -> Self {
        Self {
            id,
            class: None,
            lifetime: Lifetime::default(),
            tags: Vec::new(),
            environment: None,
            dependencies: Vec::new(),
            config: BTreeMap::new(),
            complexity_score: 0,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Add a tag; re-tagging is idempotent.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment.as_str().to_string());
        self
    }

    /// Set the environment from a raw string, e.g. a row loaded from an
    /// external definition source. Membership in the closed set is the
    /// validator's job.
    pub fn with_environment_name(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_dependency(mut self, id: ServiceId) -> Self {
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    pub fn with_config_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// A definition plus its runtime producer and hooks.
#[derive(Clone)]
pub struct Binding {
    pub definition: ServiceDefinition,
    pub(crate) concrete: Concrete,
    pub(crate) dispose: Option<DisposeFn>,
}

impl Binding {
    pub fn new(definition: ServiceDefinition, concrete: Concrete) -> Self {
        Self {
            definition,
            concrete,
            dispose: None,
        }
    }

    pub fn id(&self) -> &ServiceId {
        &self.definition.id
    }

    pub fn lifetime(&self) -> Lifetime {
        self.definition.lifetime
    }

    /// The producer variant, for diagnostics.
    pub fn concrete_kind(&self) -> &'static str {
        self.concrete.kind()
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.definition.id)
            .field("lifetime", &self.definition.lifetime)
            .field("concrete", &self.concrete.kind())
            .finish()
    }
}

/// Registry of bindings and their satellite channels.
pub struct DefinitionStore {
    bindings: DashMap<ServiceId, Arc<Binding>, RandomState>,
    aliases: DashMap<ServiceId, ServiceId, RandomState>,
    /// tag -> ids, insertion-ordered and deduplicated
    tags: DashMap<String, Vec<ServiceId>, RandomState>,
    /// (consumer, dependency) -> override producer
    contextual: DashMap<(ServiceId, ServiceId), Concrete, RandomState>,
    decorators: DashMap<ServiceId, Vec<DecoratorFn>, RandomState>,
    callbacks: DashMap<ServiceId, Vec<ResolvingFn>, RandomState>,
    global_callbacks: RwLock<Vec<ResolvingFn>>,
    sealed: AtomicBool,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::with_hasher(RandomState::new()),
            aliases: DashMap::with_hasher(RandomState::new()),
            tags: DashMap::with_hasher(RandomState::new()),
            contextual: DashMap::with_hasher(RandomState::new()),
            decorators: DashMap::with_hasher(RandomState::new()),
            callbacks: DashMap::with_hasher(RandomState::new()),
            global_callbacks: RwLock::new(Vec::new()),
            sealed: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Bindings
    // =========================================================================

    /// Register a binding. Replaces an existing binding for the same id
    /// only when the lifetime is unchanged.
    pub fn register(&self, binding: Binding) -> Result<()> {
        self.check_not_sealed()?;

        let id = binding.definition.id.clone();
        if let Some(existing) = self.bindings.get(&id) {
            if existing.definition.lifetime != binding.definition.lifetime {
                return Err(DiError::LifetimeImmutability {
                    id: id.to_string(),
                    existing: existing.definition.lifetime,
                    requested: binding.definition.lifetime,
                });
            }
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "blueprint_di",
            service = %id,
            lifetime = binding.definition.lifetime.as_str(),
            concrete = binding.concrete.kind(),
            "Registering service binding"
        );

        self.bindings.insert(id, Arc::new(binding));
        Ok(())
    }

    /// Remove a binding before sealing. The only path to re-registering
    /// an id with a different lifetime.
    pub fn forget(&self, id: &ServiceId) -> Result<bool> {
        self.check_not_sealed()?;
        Ok(self.bindings.remove(id).is_some())
    }

    /// Exact lookup, no alias expansion.
    pub fn get(&self, id: &ServiceId) -> Option<Arc<Binding>> {
        self.bindings.get(id).map(|b| Arc::clone(&b))
    }

    /// Expand aliases, then look up the binding.
    pub fn lookup(&self, id: &ServiceId) -> Option<(ServiceId, Arc<Binding>)> {
        let canonical = self.canonical(id);
        let binding = self.get(&canonical)?;
        Some((canonical, binding))
    }

    /// Follow the alias chain to its end.
    pub fn canonical(&self, id: &ServiceId) -> ServiceId {
        let mut current = id.clone();
        // Cycles are rejected at registration; the loop always terminates
        while let Some(target) = self.aliases.get(&current) {
            current = target.clone();
        }
        current
    }

    pub fn contains(&self, id: &ServiceId) -> bool {
        self.lookup(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Every registered id, unordered.
    pub fn ids(&self) -> Vec<ServiceId> {
        self.bindings.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of every definition, ordered by id for determinism.
    pub fn all_definitions(&self) -> Vec<ServiceDefinition> {
        let mut defs: Vec<ServiceDefinition> = self
            .bindings
            .iter()
            .map(|e| e.value().definition.clone())
            .collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    /// Ids whose definitions declare a dependency on `id`.
    pub fn dependents_of(&self, id: &ServiceId) -> Vec<ServiceId> {
        let mut out: Vec<ServiceId> = self
            .bindings
            .iter()
            .filter(|e| e.value().definition.dependencies.contains(id))
            .map(|e| e.key().clone())
            .collect();
        out.sort();
        out
    }

    /// Overwrite a definition's complexity score after analysis.
    pub(crate) fn set_complexity(&self, id: &ServiceId, score: u32) {
        if let Some(mut entry) = self.bindings.get_mut(id) {
            let mut binding = (**entry).clone();
            binding.definition.complexity_score = score;
            *entry = Arc::new(binding);
        }
    }

    /// Attach a dispose hook to an existing binding.
    pub(crate) fn set_dispose(&self, id: &ServiceId, hook: DisposeFn) {
        if let Some(mut entry) = self.bindings.get_mut(id) {
            let mut binding = (**entry).clone();
            binding.dispose = Some(hook);
            *entry = Arc::new(binding);
        }
    }

    pub(crate) fn dispose_for(&self, id: &ServiceId) -> Option<DisposeFn> {
        self.bindings.get(id).and_then(|b| b.dispose.clone())
    }

    // =========================================================================
    // Aliases
    // =========================================================================

    /// Register `alias -> target`. Chains are allowed; cycles are rejected.
    pub fn alias(&self, alias: ServiceId, target: ServiceId) -> Result<()> {
        self.check_not_sealed()?;

        // Walk from the target; reaching the alias again means a cycle
        let mut path = vec![alias.to_string(), target.to_string()];
        let mut current = target.clone();
        loop {
            if current == alias {
                return Err(DiError::AliasCycle { path });
            }
            match self.aliases.get(&current) {
                Some(next) => {
                    path.push(next.to_string());
                    current = next.clone();
                }
                None => break,
            }
        }

        self.aliases.insert(alias, target);
        Ok(())
    }

    // =========================================================================
    // Tags
    // =========================================================================

    /// Tag ids; insertion order is preserved and re-tagging is idempotent.
    pub fn add_tag(&self, tag: &str, ids: &[ServiceId]) -> Result<()> {
        self.check_not_sealed()?;
        let mut entry = self.tags.entry(tag.to_string()).or_default();
        for id in ids {
            if !entry.contains(id) {
                entry.push(id.clone());
            }
        }
        Ok(())
    }

    /// Ids carrying a tag, in registration order.
    pub fn tagged(&self, tag: &str) -> Vec<ServiceId> {
        self.tags.get(tag).map(|v| v.clone()).unwrap_or_default()
    }

    // =========================================================================
    // Contextual overrides
    // =========================================================================

    /// When `consumer` is constructed and needs `dependency`, produce
    /// through `concrete` instead of the default binding.
    pub fn add_contextual(
        &self,
        consumer: ServiceId,
        dependency: ServiceId,
        concrete: Concrete,
    ) -> Result<()> {
        self.check_not_sealed()?;
        self.contextual.insert((consumer, dependency), concrete);
        Ok(())
    }

    pub fn contextual_for(&self, consumer: &ServiceId, dependency: &ServiceId) -> Option<Concrete> {
        self.contextual
            .get(&(consumer.clone(), dependency.clone()))
            .map(|c| c.clone())
    }

    // =========================================================================
    // Decorators and resolving callbacks
    // =========================================================================
    //
    // These stay writable after sealing: they do not change the binding
    // graph, and late `extend` is applied to cached instances on the next
    // retrieval.

    pub fn add_decorator(&self, id: ServiceId, decorator: DecoratorFn) {
        self.decorators.entry(id).or_default().push(decorator);
    }

    pub fn decorators_for(&self, id: &ServiceId) -> Vec<DecoratorFn> {
        self.decorators.get(id).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn add_callback(&self, id: ServiceId, callback: ResolvingFn) {
        self.callbacks.entry(id).or_default().push(callback);
    }

    pub fn add_global_callback(&self, callback: ResolvingFn) {
        self.global_callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    /// Global callbacks, then per-id callbacks, each in registration order.
    pub fn callbacks_for(&self, id: &ServiceId) -> (Vec<ResolvingFn>, Vec<ResolvingFn>) {
        let global = self
            .global_callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let local = self.callbacks.get(id).map(|v| v.clone()).unwrap_or_default();
        (global, local)
    }

    // =========================================================================
    // Sealing
    // =========================================================================

    /// Flip to the read-mostly operation phase.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);

        #[cfg(feature = "logging")]
        debug!(
            target: "blueprint_di",
            services = self.bindings.len(),
            "Definition store sealed"
        );
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    fn check_not_sealed(&self) -> Result<()> {
        if self.is_sealed() {
            Err(DiError::ContainerSealed)
        } else {
            Ok(())
        }
    }
}

impl Default for DefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DefinitionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionStore")
            .field("bindings", &self.bindings.len())
            .field("aliases", &self.aliases.len())
            .field("tags", &self.tags.len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ServiceId {
        ServiceId::new(s).unwrap()
    }

    fn binding(s: &str, lifetime: Lifetime) -> Binding {
        Binding::new(
            ServiceDefinition::new(id(s)).with_lifetime(lifetime),
            Concrete::instance(s.to_string()),
        )
    }

    #[test]
    fn test_register_and_lookup() {
        let store = DefinitionStore::new();
        store.register(binding("db", Lifetime::Singleton)).unwrap();

        let (canonical, found) = store.lookup(&id("db")).unwrap();
        assert_eq!(canonical, id("db"));
        assert_eq!(found.lifetime(), Lifetime::Singleton);
    }

    #[test]
    fn test_reregistration_same_lifetime_replaces() {
        let store = DefinitionStore::new();
        store.register(binding("db", Lifetime::Singleton)).unwrap();
        store.register(binding("db", Lifetime::Singleton)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reregistration_new_lifetime_rejected() {
        let store = DefinitionStore::new();
        store.register(binding("db", Lifetime::Singleton)).unwrap();

        let err = store.register(binding("db", Lifetime::Transient)).unwrap_err();
        assert!(matches!(err, DiError::LifetimeImmutability { .. }));

        // forget + re-register is the sanctioned path
        assert!(store.forget(&id("db")).unwrap());
        store.register(binding("db", Lifetime::Transient)).unwrap();
    }

    #[test]
    fn test_alias_chain_resolves() {
        let store = DefinitionStore::new();
        store.register(binding("concrete", Lifetime::Singleton)).unwrap();
        store.alias(id("b"), id("concrete")).unwrap();
        store.alias(id("a"), id("b")).unwrap();

        let (canonical, _) = store.lookup(&id("a")).unwrap();
        assert_eq!(canonical, id("concrete"));
    }

    #[test]
    fn test_alias_cycle_rejected() {
        let store = DefinitionStore::new();
        store.alias(id("a"), id("b")).unwrap();
        store.alias(id("b"), id("c")).unwrap();

        let err = store.alias(id("c"), id("a")).unwrap_err();
        assert!(matches!(err, DiError::AliasCycle { .. }));
    }

    #[test]
    fn test_self_alias_rejected() {
        let store = DefinitionStore::new();
        let err = store.alias(id("a"), id("a")).unwrap_err();
        assert!(matches!(err, DiError::AliasCycle { .. }));
    }

    #[test]
    fn test_dangling_alias_fails_lookup() {
        let store = DefinitionStore::new();
        store.alias(id("a"), id("ghost")).unwrap();
        assert!(store.lookup(&id("a")).is_none());
    }

    #[test]
    fn test_tags_ordered_and_idempotent() {
        let store = DefinitionStore::new();
        store.add_tag("handlers", &[id("h1"), id("h2")]).unwrap();
        store.add_tag("handlers", &[id("h2"), id("h3")]).unwrap();

        assert_eq!(store.tagged("handlers"), vec![id("h1"), id("h2"), id("h3")]);
        assert!(store.tagged("missing").is_empty());
    }

    #[test]
    fn test_sealed_rejects_writes() {
        let store = DefinitionStore::new();
        store.register(binding("db", Lifetime::Singleton)).unwrap();
        store.seal();

        assert!(matches!(
            store.register(binding("late", Lifetime::Transient)),
            Err(DiError::ContainerSealed)
        ));
        assert!(matches!(
            store.alias(id("x"), id("db")),
            Err(DiError::ContainerSealed)
        ));
        assert!(matches!(
            store.add_tag("t", &[id("db")]),
            Err(DiError::ContainerSealed)
        ));

        // Reads still work
        assert!(store.contains(&id("db")));
    }

    #[test]
    fn test_dependents_of() {
        let store = DefinitionStore::new();
        store.register(binding("logger", Lifetime::Singleton)).unwrap();
        store
            .register(Binding::new(
                ServiceDefinition::new(id("svc-a")).with_dependency(id("logger")),
                Concrete::instance(1u32),
            ))
            .unwrap();
        store
            .register(Binding::new(
                ServiceDefinition::new(id("svc-b")).with_dependency(id("logger")),
                Concrete::instance(2u32),
            ))
            .unwrap();

        assert_eq!(store.dependents_of(&id("logger")), vec![id("svc-a"), id("svc-b")]);
    }

    #[test]
    fn test_definition_tags_deduplicate() {
        let def = ServiceDefinition::new(id("x"))
            .with_tag("a")
            .with_tag("a")
            .with_tag("b");
        assert_eq!(def.tags, vec!["a".to_string(), "b".to_string()]);
    }
}

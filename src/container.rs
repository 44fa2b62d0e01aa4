//! The container facade: registration DSL and resolution entry points.
//!
//! A `Container` bundles the definition store, the scope manager, the
//! model registry, and the prototype cache behind the user-facing surface:
//! `bind` / `singleton` / `scoped` / `instance` for registration,
//! `when(..).needs(..).give(..)` for contextual overrides, `extend` and
//! `resolving` for post-construction hooks, and the `resolve*` family for
//! lookups. Clones share the same underlying state.

use std::sync::{Arc, Mutex};

use ahash::RandomState;
use dashmap::DashMap;
use serde_json::Value;

use crate::analyzer::{Analyzer, ModelRegistry};
use crate::bootstrap::{Profile, TelemetryConfig};
use crate::definitions::{Binding, Concrete, DefinitionStore, DisposeFn, ServiceDefinition};
use crate::error::{DiError, Result};
use crate::id::{Environment, Lifetime, ServiceId, TypedKey};
use crate::lazy::{Lazy, LazyTyped};
use crate::model::{Instance, TypeModel};
use crate::prototype_cache::PrototypeCache;
use crate::scope::{ScopeHandle, ScopeManager};
use crate::telemetry::{NullSink, SamplingCollector, TelemetrySink};
use crate::validator::{ValidationPolicy, ValidationReport, Validator};

#[cfg(feature = "logging")]
use tracing::debug;

pub(crate) type LockTable = DashMap<(u64, ServiceId), Arc<Mutex<()>>, RandomState>;

/// The dependency-injection container.
///
/// # Examples
///
/// ```rust
/// use blueprint_di::{Concrete, Container};
///
/// struct Logger {
///     prefix: String,
/// }
///
/// let container = Container::new();
/// container
///     .singleton(
///         "app.logger",
///         Concrete::factory_of(|_| Ok(Logger { prefix: "app".into() })),
///     )
///     .unwrap();
///
/// let a = container.resolve_typed::<Logger>("app.logger").unwrap();
/// let b = container.resolve_typed::<Logger>("app.logger").unwrap();
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
/// assert_eq!(a.prefix, "app");
/// ```
#[derive(Clone)]
pub struct Container {
    pub(crate) store: Arc<DefinitionStore>,
    pub(crate) scopes: Arc<ScopeManager>,
    pub(crate) models: Arc<ModelRegistry>,
    pub(crate) prototypes: Arc<PrototypeCache>,
    pub(crate) sink: Arc<dyn TelemetrySink>,
    pub(crate) profile: Arc<Profile>,
    pub(crate) locks: Arc<LockTable>,
}

impl Container {
    /// A container with the default profile and no telemetry exporter.
    pub fn new() -> Self {
        Self::with_profile_and_sink(Profile::default(), Arc::new(NullSink))
            .expect("default profile has no cache dir")
    }

    /// A container honoring `profile`, without a telemetry exporter.
    pub fn with_profile(profile: Profile) -> Result<Self> {
        Self::with_profile_and_sink(profile, Arc::new(NullSink))
    }

    /// A container honoring `profile`, emitting telemetry into `sink`.
    ///
    /// The sink is wrapped in a [`SamplingCollector`] applying the
    /// profile's sampling rate; a disabled telemetry config silences it
    /// entirely.
    pub fn with_profile_and_sink(profile: Profile, sink: Arc<dyn TelemetrySink>) -> Result<Self> {
        let sink: Arc<dyn TelemetrySink> = if profile.telemetry.enabled {
            Arc::new(SamplingCollector::new(sink, profile.telemetry.sampling_rate))
        } else {
            Arc::new(NullSink)
        };

        let prototypes = match &profile.container.cache_dir {
            Some(dir) => PrototypeCache::with_dir(dir)?,
            None => PrototypeCache::new(),
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "blueprint_di",
            strict = profile.container.strict,
            debug_mode = profile.container.debug,
            max_depth = profile.container.max_resolution_depth,
            "Creating container"
        );

        Ok(Self {
            store: Arc::new(DefinitionStore::new()),
            scopes: Arc::new(ScopeManager::with_sink(Arc::clone(&sink))),
            models: Arc::new(ModelRegistry::new()),
            prototypes: Arc::new(prototypes),
            sink,
            profile: Arc::new(profile),
            locks: Arc::new(DashMap::with_hasher(RandomState::new())),
        })
    }

    // =========================================================================
    // Think-layer registration
    // =========================================================================

    /// Register a type model so the analyzer can inspect the type.
    pub fn register_model(&self, model: TypeModel) {
        self.models.register(model);
    }

    pub(crate) fn analyzer(&self) -> Analyzer {
        Analyzer::new(Arc::clone(&self.models))
            .with_sink(Arc::clone(&self.sink))
            .with_strict_injection(self.profile.container.strict_injection)
    }

    // =========================================================================
    // Registration DSL
    // =========================================================================

    /// Start a binding for `id`. The lifetime defaults to transient
    /// (scoped when the profile sets `lazy_default`); finish with
    /// [`BindingBuilder::register`].
    pub fn bind(&self, id: &str, concrete: Concrete) -> Result<BindingBuilder<'_>> {
        let id = ServiceId::new(id)?;
        let default_lifetime = if self.profile.container.lazy_default {
            Lifetime::Scoped
        } else {
            Lifetime::Transient
        };
        let mut definition = ServiceDefinition::new(id).with_lifetime(default_lifetime);
        if let Concrete::Type(type_name) = &concrete {
            definition.class = Some(type_name.clone());
        }
        Ok(BindingBuilder {
            container: self,
            definition,
            concrete,
            dispose: None,
        })
    }

    /// Register `id` as a singleton.
    pub fn singleton(&self, id: &str, concrete: Concrete) -> Result<()> {
        self.bind(id, concrete)?.lifetime(Lifetime::Singleton).register()
    }

    /// Register `id` as scoped.
    pub fn scoped(&self, id: &str, concrete: Concrete) -> Result<()> {
        self.bind(id, concrete)?.lifetime(Lifetime::Scoped).register()
    }

    /// Register `id` as transient.
    pub fn transient(&self, id: &str, concrete: Concrete) -> Result<()> {
        self.bind(id, concrete)?.lifetime(Lifetime::Transient).register()
    }

    /// Register a pre-built value. Instance bindings are implicitly
    /// singleton and bypass analysis.
    pub fn instance<T: Send + Sync + 'static>(&self, id: &str, value: T) -> Result<()> {
        self.bind(id, Concrete::instance(value))?
            .lifetime(Lifetime::Singleton)
            .register()
    }

    /// Append a decorator for `id`. Decorators run after resolving
    /// callbacks, in registration order; the last decorator's output is
    /// what callers receive.
    pub fn extend<F>(&self, id: &str, decorator: F) -> Result<()>
    where
        F: Fn(Instance, &Container) -> Result<Instance> + Send + Sync + 'static,
    {
        let id = self.store.canonical(&ServiceId::new(id)?);
        self.store.add_decorator(id, Arc::new(decorator));
        Ok(())
    }

    /// Append a resolving callback for `id`, run before decorators.
    pub fn resolving<F>(&self, id: &str, callback: F) -> Result<()>
    where
        F: Fn(&Instance, &Container) -> Result<()> + Send + Sync + 'static,
    {
        let id = self.store.canonical(&ServiceId::new(id)?);
        self.store.add_callback(id, Arc::new(callback));
        Ok(())
    }

    /// Append a resolving callback applied to every service.
    pub fn resolving_global<F>(&self, callback: F)
    where
        F: Fn(&Instance, &Container) -> Result<()> + Send + Sync + 'static,
    {
        self.store.add_global_callback(Arc::new(callback));
    }

    /// Attach a dispose hook to an already-registered binding. The hook
    /// runs when a scope releases the instance.
    pub fn on_dispose<F>(&self, id: &str, hook: F) -> Result<()>
    where
        F: Fn(Instance) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        let id = self.store.canonical(&ServiceId::new(id)?);
        self.store.set_dispose(&id, Arc::new(hook));
        Ok(())
    }

    /// Start a contextual override: when `consumer` is constructed,
    /// redirect one of its dependencies.
    pub fn when(&self, consumer: &str) -> Result<ContextualBuilder<'_>> {
        Ok(ContextualBuilder {
            container: self,
            consumer: ServiceId::new(consumer)?,
        })
    }

    /// Register `alias` for `target`. Chains are fine; cycles are
    /// rejected at registration.
    pub fn alias(&self, alias: &str, target: &str) -> Result<()> {
        self.store
            .alias(ServiceId::new(alias)?, ServiceId::new(target)?)
    }

    /// Tag services for group discovery via [`tagged`](Self::tagged).
    pub fn tag(&self, tag: &str, ids: &[&str]) -> Result<()> {
        let ids = ids
            .iter()
            .map(ServiceId::new)
            .collect::<Result<Vec<_>>>()?;
        self.store.add_tag(tag, &ids)
    }

    /// Ids carrying `tag`, in registration order.
    pub fn tagged(&self, tag: &str) -> Vec<ServiceId> {
        self.store.tagged(tag)
    }

    /// Whether a binding (or alias to one) exists for `id`.
    pub fn has(&self, id: &str) -> bool {
        ServiceId::new(id)
            .map(|id| self.store.contains(&id))
            .unwrap_or(false)
    }

    /// Remove a binding before sealing. Required before re-registering
    /// an id under a different lifetime.
    pub fn forget(&self, id: &str) -> Result<bool> {
        self.store.forget(&ServiceId::new(id)?)
    }

    // =========================================================================
    // Escape hatches for tooling
    // =========================================================================

    /// Direct access to the definition store.
    pub fn definitions(&self) -> Arc<DefinitionStore> {
        Arc::clone(&self.store)
    }

    /// Direct access to the scope manager.
    pub fn scopes(&self) -> Arc<ScopeManager> {
        Arc::clone(&self.scopes)
    }

    /// Direct access to the prototype cache.
    pub fn prototypes(&self) -> Arc<PrototypeCache> {
        Arc::clone(&self.prototypes)
    }

    /// The profile this container was built from.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub(crate) fn telemetry_config(&self) -> &TelemetryConfig {
        &self.profile.telemetry
    }

    // =========================================================================
    // Sealing and validation
    // =========================================================================

    /// Run the validator and, when the report is clean, seal the store.
    ///
    /// The report is returned either way; a sealed container rejects
    /// further binding registrations with [`DiError::ContainerSealed`].
    pub fn seal(&self) -> ValidationReport {
        self.seal_with(ValidationPolicy::default())
    }

    /// [`seal`](Self::seal) with an explicit rule policy.
    pub fn seal_with(&self, policy: ValidationPolicy) -> ValidationReport {
        let report = Validator::new(policy).validate_store(&self.store);
        if report.is_valid() {
            self.store.seal();
        }
        report
    }

    /// Whether the container has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.store.is_sealed()
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    /// Open a named child scope for scoped lifetimes.
    pub fn begin_scope(&self, name: &str) -> ScopeHandle {
        self.scopes.begin_scope(name)
    }

    /// End a child scope, disposing its instances in reverse insertion
    /// order through any registered dispose hooks.
    pub fn end_scope(&self, handle: &ScopeHandle) -> Result<()> {
        let store = Arc::clone(&self.store);
        self.scopes
            .end_scope_with(handle, &move |id| store.dispose_for(id))
    }

    // =========================================================================
    // Lazy handles
    // =========================================================================

    /// A handle that defers resolution of `id` to first use.
    pub fn lazy(&self, id: &str) -> Result<Lazy> {
        Ok(Lazy::new(self.clone(), ServiceId::new(id)?))
    }

    /// A typed handle that defers resolution of `key` to first use.
    pub fn lazy_typed<T: Send + Sync + 'static>(&self, key: &TypedKey<T>) -> LazyTyped<T> {
        LazyTyped::new(self.clone(), key.clone())
    }

    // =========================================================================
    // Typed retrieval helpers (the resolve* family lives in resolver.rs)
    // =========================================================================

    /// Resolve and downcast to `T`.
    pub fn resolve_typed<T: Send + Sync + 'static>(&self, id: &str) -> Result<Arc<T>> {
        self.resolve(id)?
            .downcast::<T>()
            .map_err(|_| DiError::type_mismatch::<T>())
    }

    /// Resolve through a typed key.
    pub fn get<T: Send + Sync + 'static>(&self, key: &TypedKey<T>) -> Result<Arc<T>> {
        self.resolve_typed(key.id().as_str())
    }

    /// Resolve within a scope and downcast to `T`.
    pub fn resolve_in_typed<T: Send + Sync + 'static>(
        &self,
        scope: &ScopeHandle,
        id: &str,
    ) -> Result<Arc<T>> {
        self.resolve_in(scope, id)?
            .downcast::<T>()
            .map_err(|_| DiError::type_mismatch::<T>())
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("services", &self.store.len())
            .field("models", &self.models.len())
            .field("sealed", &self.store.is_sealed())
            .field("active_scopes", &self.scopes.active_children())
            .finish()
    }
}

/// Fluent refinement of a pending binding; finish with
/// [`register`](Self::register).
#[must_use = "a binding builder does nothing until register() is called"]
pub struct BindingBuilder<'c> {
    container: &'c Container,
    definition: ServiceDefinition,
    concrete: Concrete,
    dispose: Option<DisposeFn>,
}

impl BindingBuilder<'_> {
    /// Set the lifetime. Immutable after registration.
    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.definition.lifetime = lifetime;
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.definition = self.definition.with_tag(tag);
        self
    }

    /// Constrain to a deployment environment.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.definition = self.definition.with_environment(environment);
        self
    }

    /// Declare an explicit dependency edge for the validator.
    pub fn depends_on(mut self, id: &str) -> Result<Self> {
        self.definition = self.definition.with_dependency(ServiceId::new(id)?);
        Ok(self)
    }

    /// Attach an opaque configuration value.
    pub fn config_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.definition.config.insert(key.into(), value);
        self
    }

    /// Run `hook` on the instance when its scope ends.
    pub fn on_dispose<F>(mut self, hook: F) -> Self
    where
        F: Fn(Instance) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.dispose = Some(Arc::new(hook));
        self
    }

    /// Register the binding.
    pub fn register(self) -> Result<()> {
        let mut definition = self.definition;

        // Instance bindings are implicitly singleton
        if matches!(self.concrete, Concrete::Instance(_)) {
            definition.lifetime = Lifetime::Singleton;
        }

        // Derive the complexity score when the type is already analyzable;
        // types modeled later are scored on first resolution
        if let Concrete::Type(type_name) = &self.concrete {
            if self.container.models.contains(type_name) {
                let analyzer = self.container.analyzer();
                if let Ok(proto) = self
                    .container
                    .prototypes
                    .get_or_analyze(type_name, || analyzer.analyze(type_name))
                {
                    definition.complexity_score = proto.complexity_score();
                }
            }
        }

        let mut binding = Binding::new(definition, self.concrete);
        binding.dispose = self.dispose;
        self.container.store.register(binding)
    }
}

/// First half of a contextual override: the consumer being constructed.
pub struct ContextualBuilder<'c> {
    container: &'c Container,
    consumer: ServiceId,
}

impl<'c> ContextualBuilder<'c> {
    /// The dependency to redirect.
    pub fn needs(self, dependency: &str) -> Result<ContextualNeed<'c>> {
        Ok(ContextualNeed {
            container: self.container,
            consumer: self.consumer,
            dependency: ServiceId::new(dependency)?,
        })
    }
}

/// Second half of a contextual override: what to produce instead.
pub struct ContextualNeed<'c> {
    container: &'c Container,
    consumer: ServiceId,
    dependency: ServiceId,
}

impl ContextualNeed<'_> {
    /// Register the override producer.
    pub fn give(self, concrete: Concrete) -> Result<()> {
        let dependency = self.container.store.canonical(&self.dependency);
        self.container
            .store
            .add_contextual(self.consumer, dependency, concrete)
    }
}

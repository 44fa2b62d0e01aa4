//! The resolution kernel.
//!
//! Walks bindings to instances: alias expansion, cycle and depth guards,
//! lifetime cache checks, contextual overrides, prototype-driven
//! construction with property and method injection, then resolving
//! callbacks and decorators before publication.
//!
//! The resolution stack lives in thread-local storage so that factories
//! calling back into the container participate in the same stack: a cycle
//! that crosses a factory boundary is still detected, and a frame already
//! on the stack never reaches the (non-reentrant) construction lock.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::container::Container;
use crate::definitions::{Binding, Concrete, Overrides};
use crate::error::{DiError, Result};
use crate::id::ServiceId;
use crate::model::{ArgBag, ArgValue, Instance};
use crate::prototype::{ParameterPrototype, PropertyPrototype};
use crate::scope::{InstanceMeta, ScopeHandle};
use crate::strategy::Strategy;

#[cfg(feature = "logging")]
use tracing::trace;

/// Options for one resolution: per-call parameter overrides, the target
/// scope, and an optional deadline.
#[derive(Default)]
pub struct ResolveOptions {
    pub overrides: Overrides,
    pub scope: Option<ScopeHandle>,
    pub deadline: Option<Instant>,
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn in_scope(mut self, scope: ScopeHandle) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

// =============================================================================
// Thread-local resolution state
// =============================================================================

struct ResolutionTls {
    stack: Vec<ServiceId>,
    entries: usize,
    max_depth: usize,
    deadline: Option<Instant>,
    started: Option<Instant>,
}

impl ResolutionTls {
    const fn new() -> Self {
        Self {
            stack: Vec::new(),
            entries: 0,
            max_depth: 50,
            deadline: None,
            started: None,
        }
    }
}

thread_local! {
    static RESOLUTION: RefCell<ResolutionTls> = const { RefCell::new(ResolutionTls::new()) };
}

/// Marks one public `resolve*` call. The outermost entry owns the limits;
/// nested entries (factories calling back into the container) inherit
/// them so the whole walk shares one stack.
struct EntryGuard;

impl EntryGuard {
    fn enter(max_depth: usize, deadline: Option<Instant>, started: Instant) -> Self {
        RESOLUTION.with(|tls| {
            let mut tls = tls.borrow_mut();
            if tls.entries == 0 {
                tls.max_depth = max_depth;
                tls.deadline = deadline;
                tls.started = Some(started);
            }
            tls.entries += 1;
        });
        EntryGuard
    }
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        RESOLUTION.with(|tls| {
            let mut tls = tls.borrow_mut();
            tls.entries = tls.entries.saturating_sub(1);
            if tls.entries == 0 {
                tls.stack.clear();
                tls.deadline = None;
                tls.started = None;
            }
        });
    }
}

/// One pushed resolution frame; pops itself on drop, including during
/// unwinding from a panicking user factory.
struct FrameGuard;

impl FrameGuard {
    fn push(id: &ServiceId) -> Result<FrameGuard> {
        RESOLUTION.with(|tls| {
            let mut tls = tls.borrow_mut();
            if tls.stack.len() >= tls.max_depth {
                let mut path: Vec<String> = tls.stack.iter().map(|s| s.to_string()).collect();
                path.push(id.to_string());
                return Err(DiError::MaxDepthExceeded {
                    path,
                    limit: tls.max_depth,
                });
            }
            tls.stack.push(id.clone());
            Ok(FrameGuard)
        })
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        RESOLUTION.with(|tls| {
            tls.borrow_mut().stack.pop();
        });
    }
}

fn stack_contains(id: &ServiceId) -> bool {
    RESOLUTION.with(|tls| tls.borrow().stack.contains(id))
}

/// The frame currently being constructed, i.e. the consumer of whatever
/// resolves next. Works across factory boundaries because factories share
/// the thread-local stack.
fn stack_top() -> Option<ServiceId> {
    RESOLUTION.with(|tls| tls.borrow().stack.last().cloned())
}

fn path_with(id: &ServiceId) -> Vec<String> {
    RESOLUTION.with(|tls| {
        let tls = tls.borrow();
        let mut path: Vec<String> = tls.stack.iter().map(|s| s.to_string()).collect();
        path.push(id.to_string());
        path
    })
}

fn check_deadline(id: &ServiceId) -> Result<()> {
    RESOLUTION.with(|tls| {
        let tls = tls.borrow();
        if let Some(deadline) = tls.deadline {
            if Instant::now() > deadline {
                let mut path: Vec<String> = tls.stack.iter().map(|s| s.to_string()).collect();
                path.push(id.to_string());
                return Err(DiError::ResolutionTimeout {
                    path,
                    elapsed: tls
                        .started
                        .map(|s| s.elapsed())
                        .unwrap_or_default(),
                });
            }
        }
        Ok(())
    })
}

impl Container {
    // =========================================================================
    // Public entry points
    // =========================================================================

    /// Resolve `id` against the root scope.
    pub fn resolve(&self, id: &str) -> Result<Instance> {
        self.resolve_opts(id, ResolveOptions::default())
    }

    /// Resolve `id` with per-call parameter overrides.
    pub fn resolve_with(&self, id: &str, overrides: Overrides) -> Result<Instance> {
        self.resolve_opts(id, ResolveOptions::default().with_overrides(overrides))
    }

    /// Resolve `id` within a child scope.
    pub fn resolve_in(&self, scope: &ScopeHandle, id: &str) -> Result<Instance> {
        self.resolve_opts(id, ResolveOptions::default().in_scope(scope.clone()))
    }

    /// Resolve `id` with full options.
    pub fn resolve_opts(&self, id: &str, opts: ResolveOptions) -> Result<Instance> {
        self.sink.increment("resolve.count", 1);
        let started = Instant::now();

        let result = self.resolve_entry(id, &opts, started);

        if let Err(err) = &result {
            self.sink.increment("resolve.error", 1);
            if self.telemetry_config().report_errors {
                self.sink
                    .increment(&format!("resolve.error.{}", err.kind()), 1);
            }
        }
        if self.telemetry_config().track_cpu {
            self.sink
                .observe("resolve.duration_us", started.elapsed().as_micros() as f64);
        }
        if self.telemetry_config().track_memory {
            self.sink
                .observe("container.instances", self.scopes.root().len() as f64);
        }

        result
    }

    fn resolve_entry(&self, id: &str, opts: &ResolveOptions, started: Instant) -> Result<Instance> {
        let id = ServiceId::new(id)?;
        let scope = match &opts.scope {
            Some(handle) => handle.clone(),
            None => self.scopes.root().clone(),
        };
        if scope.is_ended() {
            return Err(DiError::ScopeEnded {
                scope: scope.name().to_string(),
            });
        }

        let _entry = EntryGuard::enter(
            self.profile.container.max_resolution_depth,
            opts.deadline,
            started,
        );
        self.resolve_node(&id, &opts.overrides, &scope)
    }

    // =========================================================================
    // Kernel
    // =========================================================================

    fn resolve_node(
        &self,
        id: &ServiceId,
        overrides: &Overrides,
        scope: &ScopeHandle,
    ) -> Result<Instance> {
        // The consumer is whatever frame is open when we are entered
        let consumer = stack_top();

        // 1. alias expansion
        let (canonical, binding) = self.store.lookup(id).ok_or_else(|| self.not_found(id))?;

        // 2. cycle check on the canonical id
        if stack_contains(&canonical) {
            return Err(DiError::CircularDependency {
                path: path_with(&canonical),
            });
        }
        check_deadline(&canonical)?;

        // A contextual override produces a per-consumer instance: it must
        // neither read from nor publish to the shared lifetime cache, or
        // the override would leak to other consumers
        let contextual = consumer
            .as_ref()
            .and_then(|c| self.store.contextual_for(c, &canonical));

        // 3. lifetime cache hit
        let strategy = Strategy::select(binding.lifetime(), &self.scopes, scope);
        if contextual.is_none() {
            if let Some((instance, meta)) = strategy.retrieve(&canonical)? {
                #[cfg(feature = "logging")]
                trace!(
                    target: "blueprint_di",
                    service = %canonical,
                    lifetime = binding.lifetime().as_str(),
                    "Resolved from lifetime cache"
                );
                return self.apply_pending(&canonical, instance, meta, &strategy);
            }
        }

        self.sink.increment("resolve.miss", 1);

        // 4. push frame; the guard pops on every exit path
        let _frame = FrameGuard::push(&canonical)?;

        if let Some(concrete) = contextual {
            // 5-10 for the override product, skipping publication
            let raw = self.build_concrete(&concrete, &canonical, overrides, scope)?;
            let (instance, _) = self.apply_hooks(&canonical, raw, InstanceMeta::default())?;
            return Ok(instance);
        }

        self.construct_guarded(&binding, &canonical, overrides, scope, &strategy)
    }

    /// Serialize construction per `(scope, id)` so contended singleton or
    /// scoped resolves construct at most once.
    fn construct_guarded(
        &self,
        binding: &Binding,
        canonical: &ServiceId,
        overrides: &Overrides,
        scope: &ScopeHandle,
        strategy: &Strategy<'_>,
    ) -> Result<Instance> {
        match strategy.lock_key(canonical) {
            Some(key) => {
                let lock = self.locks.entry(key).or_default().clone();
                // Deadline-aware acquisition: a resolve blocked behind
                // another thread's construction still honors its deadline
                let _guard = loop {
                    match lock.try_lock() {
                        Ok(guard) => break guard,
                        Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                            break poisoned.into_inner();
                        }
                        Err(std::sync::TryLockError::WouldBlock) => {
                            check_deadline(canonical)?;
                            std::thread::sleep(std::time::Duration::from_micros(100));
                        }
                    }
                };

                // Another thread may have published while we waited
                if let Some((instance, meta)) = strategy.retrieve(canonical)? {
                    return self.apply_pending_locked(canonical, instance, meta, strategy);
                }
                self.construct_and_publish(binding, canonical, overrides, scope, strategy)
            }
            None => self.construct_and_publish(binding, canonical, overrides, scope, strategy),
        }
    }

    fn construct_and_publish(
        &self,
        binding: &Binding,
        canonical: &ServiceId,
        overrides: &Overrides,
        scope: &ScopeHandle,
        strategy: &Strategy<'_>,
    ) -> Result<Instance> {
        // 5-8. construct and inject through the binding's concrete
        let raw = self.build_concrete(&binding.concrete, canonical, overrides, scope)?;

        // 9-10. resolving callbacks, then decorators
        let (instance, meta) = self.apply_hooks(canonical, raw, InstanceMeta::default())?;

        // 11. publish by lifetime strategy (no-op for transient)
        strategy.store(canonical, Arc::clone(&instance), meta)?;
        Ok(instance)
    }

    fn build_concrete(
        &self,
        concrete: &Concrete,
        canonical: &ServiceId,
        overrides: &Overrides,
        scope: &ScopeHandle,
    ) -> Result<Instance> {
        #[cfg(feature = "logging")]
        trace!(
            target: "blueprint_di",
            service = %canonical,
            concrete = concrete.kind(),
            "Constructing service"
        );

        match concrete {
            Concrete::Instance(instance) => Ok(Arc::clone(instance)),
            Concrete::Factory(factory) => factory(self, overrides),
            Concrete::Type(type_name) => {
                self.construct_from_type(type_name, canonical, overrides, scope)
            }
        }
    }

    fn construct_from_type(
        &self,
        type_name: &str,
        target: &ServiceId,
        overrides: &Overrides,
        scope: &ScopeHandle,
    ) -> Result<Instance> {
        let model = self
            .models
            .get(type_name)
            .ok_or_else(|| DiError::analysis(type_name, "no type model registered"))?;
        let analyzer = self.analyzer();
        let prototype = self
            .prototypes
            .get_or_analyze(type_name, || analyzer.analyze(type_name))?;

        if !prototype.is_instantiable {
            return Err(DiError::analysis(type_name, "type is not instantiable"));
        }
        let constructor = model
            .constructor
            .as_ref()
            .ok_or_else(|| DiError::analysis(type_name, "no constructor declared"))?;

        // Record the derived score for bindings registered before the model
        if let Some(entry) = self.store.get(target) {
            if entry.definition.complexity_score == 0 {
                self.store
                    .set_complexity(target, prototype.complexity_score());
            }
        }

        // Constructor arguments, in declaration order
        let args = self.resolve_parameters(&constructor.params, overrides, scope, target)?;
        let mut boxed = (constructor.build)(&ArgBag::new(args))?;

        // 7. property injection
        for property in &model.properties {
            if let Some(value) = self.resolve_property(&property.prototype, scope, target)? {
                (property.inject)(boxed.as_mut(), value)?;
            }
        }

        // 8. injected methods, same parameter rules as the constructor
        for method in &model.methods {
            let args =
                self.resolve_parameters(&method.prototype.parameters, overrides, scope, target)?;
            (method.invoke)(boxed.as_mut(), &ArgBag::new(args))?;
        }

        Ok(Arc::from(boxed))
    }

    /// The parameter ladder: explicit override, variadic tag collection,
    /// polymorphic type, declared default, null, error.
    fn resolve_parameters(
        &self,
        params: &[ParameterPrototype],
        overrides: &Overrides,
        scope: &ScopeHandle,
        target: &ServiceId,
    ) -> Result<Vec<(String, ArgValue)>> {
        let mut args = Vec::with_capacity(params.len());
        for param in params {
            let value = self.resolve_parameter(param, overrides, scope, target)?;
            args.push((param.name.clone(), value));
        }
        Ok(args)
    }

    fn resolve_parameter(
        &self,
        param: &ParameterPrototype,
        overrides: &Overrides,
        scope: &ScopeHandle,
        target: &ServiceId,
    ) -> Result<ArgValue> {
        if let Some(value) = overrides.get(&param.name) {
            return Ok(value.clone());
        }

        if param.is_variadic {
            let Some(tag) = &param.type_name else {
                return Ok(ArgValue::Value(Value::Array(Vec::new())));
            };
            let mut list = Vec::new();
            for id in self.store.tagged(tag) {
                list.push(self.resolve_node(&id, &Overrides::default(), scope)?);
            }
            return Ok(ArgValue::ServiceList(list));
        }

        if let Some(type_name) = &param.type_name {
            let dep = ServiceId::new(type_name)?;
            match self.resolve_node(&dep, &Overrides::default(), scope) {
                Ok(instance) => return Ok(ArgValue::Service(instance)),
                Err(DiError::ServiceNotFound { .. })
                    if !self.profile.container.strict && param.has_default =>
                {
                    return Ok(ArgValue::Value(
                        param.default.clone().unwrap_or(Value::Null),
                    ));
                }
                Err(DiError::ServiceNotFound { .. }) if param.allows_null => {
                    return Ok(ArgValue::Absent);
                }
                Err(err) => return Err(err),
            }
        }

        if param.has_default {
            return Ok(ArgValue::Value(
                param.default.clone().unwrap_or(Value::Null),
            ));
        }
        if param.allows_null {
            return Ok(ArgValue::Absent);
        }

        Err(DiError::unresolvable_parameter(
            &param.name,
            target.as_str(),
        ))
    }

    /// Property ladder: type, default, skip-if-optional, error-if-required.
    /// `None` means the optional property is skipped entirely.
    fn resolve_property(
        &self,
        property: &PropertyPrototype,
        scope: &ScopeHandle,
        target: &ServiceId,
    ) -> Result<Option<ArgValue>> {
        if let Some(type_name) = &property.type_name {
            let dep = ServiceId::new(type_name)?;
            match self.resolve_node(&dep, &Overrides::default(), scope) {
                Ok(instance) => return Ok(Some(ArgValue::Service(instance))),
                Err(DiError::ServiceNotFound { .. }) => {
                    // Same strict gate as parameters: no guessing from a
                    // declared default when the type is unbound
                    if property.has_default && !self.profile.container.strict {
                        return Ok(Some(ArgValue::Value(
                            property.default.clone().unwrap_or(Value::Null),
                        )));
                    }
                    if property.required {
                        return Err(DiError::unresolvable_property(
                            &property.name,
                            target.as_str(),
                        ));
                    }
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }

        if property.has_default {
            return Ok(Some(ArgValue::Value(
                property.default.clone().unwrap_or(Value::Null),
            )));
        }
        if property.required {
            return Err(DiError::unresolvable_property(
                &property.name,
                target.as_str(),
            ));
        }
        Ok(None)
    }

    // =========================================================================
    // Resolving callbacks and decorators
    // =========================================================================

    /// Apply the hooks not yet applied to this instance, in order: global
    /// callbacks, per-id callbacks, then decorators. Returns the (possibly
    /// replaced) instance and the updated applied-counts.
    fn apply_hooks(
        &self,
        id: &ServiceId,
        instance: Instance,
        meta: InstanceMeta,
    ) -> Result<(Instance, InstanceMeta)> {
        let (global, local) = self.store.callbacks_for(id);
        let decorators = self.store.decorators_for(id);

        let mut instance = instance;
        for callback in global.iter().skip(meta.global_callbacks_applied) {
            callback(&instance, self).map_err(|e| DiError::decorator(id.as_str(), e.to_string()))?;
        }
        for callback in local.iter().skip(meta.callbacks_applied) {
            callback(&instance, self).map_err(|e| DiError::decorator(id.as_str(), e.to_string()))?;
        }
        for decorator in decorators.iter().skip(meta.decorators_applied) {
            instance = decorator(instance, self)
                .map_err(|e| DiError::decorator(id.as_str(), e.to_string()))?;
        }

        Ok((
            instance,
            InstanceMeta {
                global_callbacks_applied: global.len(),
                callbacks_applied: local.len(),
                decorators_applied: decorators.len(),
            },
        ))
    }

    /// Whether hooks were registered after this instance was published.
    fn has_pending_hooks(&self, id: &ServiceId, meta: InstanceMeta) -> bool {
        let (global, local) = self.store.callbacks_for(id);
        global.len() > meta.global_callbacks_applied
            || local.len() > meta.callbacks_applied
            || self.store.decorators_for(id).len() > meta.decorators_applied
    }

    /// Cache-hit path: apply only hooks registered since publication and
    /// republish. Runs under the per-id construction lock so two racing
    /// cache hits cannot both wrap the same base instance.
    fn apply_pending(
        &self,
        id: &ServiceId,
        instance: Instance,
        meta: InstanceMeta,
        strategy: &Strategy<'_>,
    ) -> Result<Instance> {
        if !self.has_pending_hooks(id, meta) {
            return Ok(instance);
        }

        let Some(key) = strategy.lock_key(id) else {
            // Transients never reach the cache-hit path
            let (instance, _) = self.apply_hooks(id, instance, meta)?;
            return Ok(instance);
        };

        let lock = self.locks.entry(key).or_default().clone();
        let _guard = loop {
            match lock.try_lock() {
                Ok(guard) => break guard,
                Err(std::sync::TryLockError::Poisoned(poisoned)) => break poisoned.into_inner(),
                Err(std::sync::TryLockError::WouldBlock) => {
                    check_deadline(id)?;
                    std::thread::sleep(std::time::Duration::from_micros(100));
                }
            }
        };

        // Re-read under the lock; another thread may already have applied
        let (instance, meta) = strategy.retrieve(id)?.unwrap_or((instance, meta));
        self.apply_pending_locked(id, instance, meta, strategy)
    }

    /// [`apply_pending`](Self::apply_pending) body for callers that
    /// already hold the per-id lock.
    fn apply_pending_locked(
        &self,
        id: &ServiceId,
        instance: Instance,
        meta: InstanceMeta,
        strategy: &Strategy<'_>,
    ) -> Result<Instance> {
        let (instance, updated) = self.apply_hooks(id, instance, meta)?;
        if updated != meta {
            strategy.store(id, Arc::clone(&instance), updated)?;
        }
        Ok(instance)
    }

    fn not_found(&self, id: &ServiceId) -> DiError {
        let (suggestions, resolution_path) = if self.profile.container.debug {
            (self.suggestions_for(id), path_with(id))
        } else {
            (Vec::new(), Vec::new())
        };
        DiError::ServiceNotFound {
            id: id.to_string(),
            suggestions,
            resolution_path,
        }
    }

    /// Candidate ids sharing a substring or a substantial prefix with the
    /// missing id.
    fn suggestions_for(&self, id: &ServiceId) -> Vec<String> {
        let query = id.as_str();
        let min_prefix = query.len().div_ceil(2).max(3);
        let mut candidates: Vec<String> = self
            .store
            .ids()
            .into_iter()
            .map(|s| s.to_string())
            .filter(|known| {
                known.contains(query)
                    || query.contains(known.as_str())
                    || common_prefix_len(known, query) >= min_prefix
            })
            .collect();
        candidates.sort();
        candidates.truncate(3);
        candidates
    }
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

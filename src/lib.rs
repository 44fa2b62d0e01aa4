//! # blueprint-di
//!
//! A prototype-driven, string-keyed dependency injection container.
//!
//! Services are registered under opaque string ids and produced from one
//! of three concretes: an analyzable type, a factory closure, or a
//! pre-built instance. The container learns how to construct a type once
//! (its constructor parameters, injected properties, injected setter
//! methods), caches that knowledge as an immutable [`ServicePrototype`],
//! and resolves instances on demand under three lifetimes.
//!
//! ## Features
//!
//! - **Three lifetimes** - singleton, scoped, and transient, with
//!   per-service construction locking (at most one construction under
//!   contention)
//! - **Prototype analysis** - declare a [`TypeModel`] once; the analyzer
//!   derives a cacheable, serializable construction plan from it
//! - **Contextual bindings** - `when(consumer).needs(dep).give(impl)`
//! - **Decorators and resolving callbacks** - `extend` / `resolving`
//!   hooks applied in registration order before publication
//! - **Explicit scopes** - named child scopes with reverse-order disposal
//! - **Pre-flight validation** - uniqueness, dependency existence, cycle
//!   detection, environment constraints, and security red flags
//! - **Observable** - a two-method telemetry sink with collector-side
//!   sampling, plus optional `tracing` integration
//!
//! ## Quick start
//!
//! ```rust
//! use blueprint_di::{Concrete, Container};
//! use std::sync::Arc;
//!
//! struct Logger { prefix: String }
//! struct ReportService { logger: Arc<Logger> }
//!
//! let container = Container::new();
//!
//! container.singleton(
//!     "app.logger",
//!     Concrete::factory_of(|_| Ok(Logger { prefix: "app".into() })),
//! ).unwrap();
//!
//! container.transient(
//!     "app.reports",
//!     Concrete::factory_of(|c| {
//!         Ok(ReportService { logger: c.resolve_typed::<Logger>("app.logger")? })
//!     }),
//! ).unwrap();
//!
//! let reports = container.resolve_typed::<ReportService>("app.reports").unwrap();
//! assert_eq!(reports.logger.prefix, "app");
//! ```
//!
//! ## Scoped lifetimes
//!
//! ```rust
//! use blueprint_di::{Concrete, Container};
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! static SEQ: AtomicU64 = AtomicU64::new(0);
//! struct RequestContext { id: u64 }
//!
//! let container = Container::new();
//! container.scoped(
//!     "request.ctx",
//!     Concrete::factory_of(|_| Ok(RequestContext { id: SEQ.fetch_add(1, Ordering::SeqCst) })),
//! ).unwrap();
//!
//! let a = container.begin_scope("request-a");
//! let b = container.begin_scope("request-b");
//!
//! let ctx_a = container.resolve_in_typed::<RequestContext>(&a, "request.ctx").unwrap();
//! let ctx_b = container.resolve_in_typed::<RequestContext>(&b, "request.ctx").unwrap();
//! assert_ne!(ctx_a.id, ctx_b.id);
//!
//! container.end_scope(&a).unwrap();
//! assert!(container.resolve_in(&a, "request.ctx").is_err());
//! ```
//!
//! ## Prototype-driven construction
//!
//! ```rust
//! use blueprint_di::{Concrete, Container, ParameterPrototype, TypeModel};
//! use serde_json::json;
//!
//! struct HttpClient { base_url: String, retries: u32 }
//!
//! let container = Container::new();
//! container.register_model(
//!     TypeModel::of::<HttpClient>("app.HttpClient")
//!         .constructor(
//!             vec![
//!                 ParameterPrototype::with_default("base_url", json!("http://localhost")),
//!                 ParameterPrototype::with_default("retries", json!(3)),
//!             ],
//!             |args| Ok(HttpClient {
//!                 base_url: args.value("base_url")?,
//!                 retries: args.value("retries")?,
//!             }),
//!         )
//!         .build(),
//! );
//! container.singleton("app.http", Concrete::of_type("app.HttpClient")).unwrap();
//!
//! let client = container.resolve_typed::<HttpClient>("app.http").unwrap();
//! assert_eq!(client.retries, 3);
//! ```

mod analyzer;
mod bootstrap;
mod container;
mod definitions;
mod error;
mod id;
mod lazy;
#[cfg(feature = "logging")]
pub mod logging;
mod model;
mod prototype;
mod prototype_cache;
mod resolver;
mod scope;
mod strategy;
mod telemetry;
mod validator;

pub use analyzer::{Analyzer, ModelRegistry};
pub use bootstrap::{
    BootstrapFailure, Bootstrapper, ContainerConfig, DefinitionSource, DependencyEdge, Profile,
    StaticDefinitionSource, TelemetryConfig, detect_cycles, CACHE_SERVICE_ID, PROFILE_SERVICE_ID,
    TELEMETRY_SERVICE_ID,
};
pub use container::{BindingBuilder, Container, ContextualBuilder, ContextualNeed};
pub use definitions::{
    Binding, Concrete, DecoratorFn, DefinitionStore, DisposeFn, FactoryFn, Overrides, ResolvingFn,
    ServiceDefinition,
};
pub use error::{DiError, DisposeFailure, Result};
pub use id::{Environment, Expression, Lifetime, ServiceId, TypedKey};
pub use lazy::{Lazy, LazyTyped};
pub use model::{ArgBag, ArgValue, Instance, TypeModel, TypeModelBuilder};
pub use prototype::{
    MethodPrototype, ParameterPrototype, PropertyPrototype, ServicePrototype,
};
pub use prototype_cache::PrototypeCache;
pub use resolver::ResolveOptions;
pub use scope::{ScopeHandle, ScopeManager};
pub use telemetry::{NullSink, RecordingSink, SamplingCollector, TelemetrySink};
pub use validator::{
    ServiceReport, ValidationFinding, ValidationPolicy, ValidationReport, ValidationRule,
    Validator,
};

// Re-export tracing macros for convenience when logging is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Bootstrapper, Concrete, Container, DiError, Lifetime, Overrides, Profile, ResolveOptions,
        Result, ScopeHandle, ServiceId, TypeModel, TypedKey,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Database {
        url: String,
    }

    #[test]
    fn test_singleton_registration() {
        let container = Container::new();
        container
            .singleton(
                "app.db",
                Concrete::factory_of(|_| Ok(Database { url: "test".into() })),
            )
            .unwrap();

        let db = container.resolve_typed::<Database>("app.db").unwrap();
        assert_eq!(db.url, "test");
    }

    #[test]
    fn test_multiple_resolve_same_instance() {
        let container = Container::new();
        container
            .singleton(
                "app.db",
                Concrete::factory_of(|_| Ok(Database { url: "test".into() })),
            )
            .unwrap();

        let db1 = container.resolve_typed::<Database>("app.db").unwrap();
        let db2 = container.resolve_typed::<Database>("app.db").unwrap();
        assert!(Arc::ptr_eq(&db1, &db2));
    }

    #[test]
    fn test_prelude_compiles() {
        use crate::prelude::*;
        let container = Container::new();
        let _: Result<ServiceId> = ServiceId::new("x");
        assert!(!container.has("x"));
    }
}

//! The analysis layer: turning registered type models into prototypes.
//!
//! `analyze` is deterministic: for a fixed [`ModelRegistry`] the same type
//! name always yields the same [`ServicePrototype`].

use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;

use crate::error::{DiError, Result};
use crate::model::TypeModel;
use crate::prototype::{MethodPrototype, ServicePrototype};
use crate::telemetry::{NullSink, TelemetrySink};

/// Method name under which constructor parameters are reported.
const CONSTRUCTOR_NAME: &str = "new";

/// Registry of declared type models, keyed by type name.
#[derive(Default)]
pub struct ModelRegistry {
    models: DashMap<String, Arc<TypeModel>, RandomState>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model, replacing any previous model for the same type.
    pub fn register(&self, model: TypeModel) {
        self.models
            .insert(model.type_name().to_string(), Arc::new(model));
    }

    /// Look up a model by type name.
    pub fn get(&self, type_name: &str) -> Option<Arc<TypeModel>> {
        self.models.get(type_name).map(|m| Arc::clone(&m))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.models.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.models.len())
            .finish()
    }
}

/// Produces [`ServicePrototype`] values from registered type models.
pub struct Analyzer {
    registry: Arc<ModelRegistry>,
    sink: Arc<dyn TelemetrySink>,
    strict_injection: bool,
}

impl Analyzer {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            sink: Arc::new(NullSink),
            strict_injection: false,
        }
    }

    /// Route `analysis.count` emissions through `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Require an explicit type or default on every injection point.
    pub fn with_strict_injection(mut self, strict: bool) -> Self {
        self.strict_injection = strict;
        self
    }

    /// Inspect a type and produce its construction plan.
    ///
    /// Fails with [`DiError::Analysis`] when no model is registered for
    /// the type, or when strict injection finds an undeclared injection
    /// point.
    pub fn analyze(&self, type_name: &str) -> Result<ServicePrototype> {
        let model = self
            .registry
            .get(type_name)
            .ok_or_else(|| DiError::analysis(type_name, "no type model registered"))?;

        if self.strict_injection {
            self.check_injection_points(type_name, &model)?;
        }

        let constructor = model
            .constructor
            .as_ref()
            .map(|c| MethodPrototype::new(CONSTRUCTOR_NAME, c.params.clone()));

        let prototype = ServicePrototype {
            class: type_name.to_string(),
            constructor,
            injected_properties: model
                .properties
                .iter()
                .map(|p| p.prototype.clone())
                .collect(),
            injected_methods: model.methods.iter().map(|m| m.prototype.clone()).collect(),
            is_instantiable: model.is_instantiable(),
        };

        self.sink.increment("analysis.count", 1);
        Ok(prototype)
    }

    fn check_injection_points(&self, type_name: &str, model: &TypeModel) -> Result<()> {
        let mut params = Vec::new();
        if let Some(ctor) = model.constructor.as_ref() {
            params.extend(ctor.params.iter());
        }
        for method in &model.methods {
            params.extend(method.prototype.parameters.iter());
        }
        for param in params {
            if param.type_name.is_none() && !param.has_default {
                return Err(DiError::analysis(
                    type_name,
                    format!("parameter `{}` declares neither a type nor a default", param.name),
                ));
            }
        }
        for property in &model.properties {
            let proto = &property.prototype;
            if proto.type_name.is_none() && !proto.has_default {
                return Err(DiError::analysis(
                    type_name,
                    format!("property `{}` declares neither a type nor a default", proto.name),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::{ParameterPrototype, PropertyPrototype};
    use crate::telemetry::RecordingSink;
    use serde_json::json;

    struct Report;

    fn registry_with_report() -> Arc<ModelRegistry> {
        let registry = ModelRegistry::new();
        registry.register(
            TypeModel::of::<Report>("app.Report")
                .constructor(
                    vec![ParameterPrototype::service("logger", "app.logger")],
                    |_| Ok(Report),
                )
                .property(PropertyPrototype::optional("clock", "app.clock"), |_, _| {
                    Ok(())
                })
                .build(),
        );
        Arc::new(registry)
    }

    #[test]
    fn test_analyze_produces_prototype() {
        let analyzer = Analyzer::new(registry_with_report());
        let proto = analyzer.analyze("app.Report").unwrap();

        assert_eq!(proto.class, "app.Report");
        assert!(proto.is_instantiable);
        let ctor = proto.constructor.unwrap();
        assert_eq!(ctor.parameters.len(), 1);
        assert_eq!(ctor.parameters[0].name, "logger");
        assert_eq!(proto.injected_properties.len(), 1);
    }

    #[test]
    fn test_analyze_unknown_type_fails() {
        let analyzer = Analyzer::new(Arc::new(ModelRegistry::new()));
        let err = analyzer.analyze("app.Missing").unwrap_err();
        assert!(matches!(err, DiError::Analysis { .. }));
    }

    #[test]
    fn test_analyze_is_deterministic() {
        let analyzer = Analyzer::new(registry_with_report());
        let a = analyzer.analyze("app.Report").unwrap();
        let b = analyzer.analyze("app.Report").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn test_abstract_type_not_instantiable() {
        let registry = ModelRegistry::new();
        registry.register(TypeModel::abstract_type("app.Logger"));
        let analyzer = Analyzer::new(Arc::new(registry));
        let proto = analyzer.analyze("app.Logger").unwrap();
        assert!(!proto.is_instantiable);
    }

    #[test]
    fn test_analysis_counter_emitted() {
        let sink = Arc::new(RecordingSink::new());
        let analyzer = Analyzer::new(registry_with_report()).with_sink(sink.clone());
        analyzer.analyze("app.Report").unwrap();
        analyzer.analyze("app.Report").unwrap();
        assert_eq!(sink.count("analysis.count"), 2);
    }

    #[test]
    fn test_strict_injection_rejects_untyped_param() {
        struct Naked;
        let registry = ModelRegistry::new();
        registry.register(
            TypeModel::of::<Naked>("app.Naked")
                .constructor(
                    vec![ParameterPrototype {
                        name: "mystery".into(),
                        type_name: None,
                        has_default: false,
                        default: None,
                        is_variadic: false,
                        allows_null: true,
                        required: false,
                    }],
                    |_| Ok(Naked),
                )
                .build(),
        );
        let analyzer = Analyzer::new(Arc::new(registry)).with_strict_injection(true);
        assert!(analyzer.analyze("app.Naked").is_err());

        let lenient = Analyzer::new({
            let registry = ModelRegistry::new();
            registry.register(
                TypeModel::of::<Naked>("app.Naked")
                    .constructor(
                        vec![ParameterPrototype::with_default("n", json!(1))],
                        |_| Ok(Naked),
                    )
                    .build(),
            );
            Arc::new(registry)
        })
        .with_strict_injection(true);
        assert!(lenient.analyze("app.Naked").is_ok());
    }
}

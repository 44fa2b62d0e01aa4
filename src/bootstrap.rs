//! Profile-driven container assembly.
//!
//! A [`Profile`] bundles the container and telemetry configuration as
//! immutable value structs; `with_*` methods return fresh values. The
//! [`Bootstrapper`] builds a container from a profile: core
//! infrastructure first, then user registrations, then definitions loaded
//! from an external [`DefinitionSource`], then a fail-fast validation
//! pass, sealing, and a final `bootstrap_completed` counter.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::container::Container;
use crate::definitions::{Binding, Concrete, ServiceDefinition};
use crate::error::{DiError, Result};
use crate::id::ServiceId;
use crate::telemetry::TelemetrySink;
use crate::validator::{ValidationPolicy, ValidationReport};

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Ids under which bootstrap registers core infrastructure.
pub const CACHE_SERVICE_ID: &str = "container.prototype-cache";
pub const PROFILE_SERVICE_ID: &str = "container.profile";
pub const TELEMETRY_SERVICE_ID: &str = "container.telemetry";

/// Container behavior switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Filesystem root for the prototype cache; in-memory when unset
    pub cache_dir: Option<PathBuf>,
    /// Fail on ambiguous resolution instead of guessing
    pub strict: bool,
    /// Require explicit declared types on every injection point
    pub strict_injection: bool,
    /// Rich failure context: resolution paths and candidate suggestions
    pub debug: bool,
    /// Make `bind` default to deferred (scoped) construction
    pub lazy_default: bool,
    /// Upper bound on nested resolves
    pub max_resolution_depth: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            strict: false,
            strict_injection: false,
            debug: false,
            lazy_default: false,
            max_resolution_depth: 50,
        }
    }
}

impl ContainerConfig {
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_strict_injection(mut self, strict_injection: bool) -> Self {
        self.strict_injection = strict_injection;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_lazy_default(mut self, lazy_default: bool) -> Self {
        self.lazy_default = lazy_default;
        self
    }

    pub fn with_max_resolution_depth(mut self, depth: usize) -> Self {
        self.max_resolution_depth = depth;
        self
    }
}

/// Telemetry collection switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Fraction of observations recorded, in `[0, 1]`
    pub sampling_rate: f64,
    pub track_cpu: bool,
    pub track_memory: bool,
    /// Emit per-kind error counters through the sink
    pub report_errors: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sampling_rate: 1.0,
            track_cpu: false,
            track_memory: false,
            report_errors: false,
        }
    }
}

impl TelemetryConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_sampling_rate(mut self, rate: f64) -> Self {
        self.sampling_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_track_cpu(mut self, track: bool) -> Self {
        self.track_cpu = track;
        self
    }

    pub fn with_track_memory(mut self, track: bool) -> Self {
        self.track_memory = track;
        self
    }

    pub fn with_report_errors(mut self, report: bool) -> Self {
        self.report_errors = report;
        self
    }
}

/// An immutable bundle of container and telemetry configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub container: ContainerConfig,
    pub telemetry: TelemetryConfig,
}

impl Profile {
    /// Strict resolution, terse errors, sampled telemetry.
    pub fn production() -> Self {
        Self {
            container: ContainerConfig::default().with_strict(true).with_debug(false),
            telemetry: TelemetryConfig::default()
                .with_sampling_rate(0.1)
                .with_report_errors(true),
        }
    }

    /// Lenient resolution, rich errors, full telemetry.
    pub fn development() -> Self {
        Self {
            container: ContainerConfig::default().with_strict(false).with_debug(true),
            telemetry: TelemetryConfig::default().with_sampling_rate(1.0),
        }
    }

    /// No persistent cache, no telemetry, shallow graphs.
    pub fn testing() -> Self {
        Self {
            container: ContainerConfig::default().with_max_resolution_depth(16),
            telemetry: TelemetryConfig::default().with_enabled(false),
        }
    }
}

/// A declared dependency edge from an external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub service: ServiceId,
}

/// External store of service definitions read during bootstrap, e.g. a
/// table behind a query builder.
pub trait DefinitionSource: Send + Sync {
    fn find_all(&self) -> Result<Vec<ServiceDefinition>>;

    fn find_by_id(&self, id: &ServiceId) -> Result<Option<ServiceDefinition>>;

    fn service_dependencies(&self, id: &ServiceId) -> Result<Vec<DependencyEdge>>;

    fn dependency_graph(&self) -> Result<BTreeMap<ServiceId, Vec<DependencyEdge>>>;

    /// Cycles in a dependency graph, each as the path of ids around the
    /// loop.
    fn detect_circular_dependencies(
        &self,
        graph: &BTreeMap<ServiceId, Vec<DependencyEdge>>,
    ) -> Vec<Vec<ServiceId>> {
        detect_cycles(graph)
    }

    /// Ids depending on `id`; the length is the dependent count.
    fn dependent_services(&self, id: &ServiceId) -> Result<Vec<ServiceId>>;
}

/// A [`DefinitionSource`] over an in-memory definition list.
#[derive(Debug, Clone, Default)]
pub struct StaticDefinitionSource {
    rows: Vec<ServiceDefinition>,
}

impl StaticDefinitionSource {
    pub fn new(rows: Vec<ServiceDefinition>) -> Self {
        Self { rows }
    }
}

impl DefinitionSource for StaticDefinitionSource {
    fn find_all(&self) -> Result<Vec<ServiceDefinition>> {
        Ok(self.rows.clone())
    }

    fn find_by_id(&self, id: &ServiceId) -> Result<Option<ServiceDefinition>> {
        Ok(self.rows.iter().find(|d| &d.id == id).cloned())
    }

    fn service_dependencies(&self, id: &ServiceId) -> Result<Vec<DependencyEdge>> {
        Ok(self
            .rows
            .iter()
            .find(|d| &d.id == id)
            .map(|d| {
                d.dependencies
                    .iter()
                    .map(|dep| DependencyEdge {
                        service: dep.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn dependency_graph(&self) -> Result<BTreeMap<ServiceId, Vec<DependencyEdge>>> {
        Ok(self
            .rows
            .iter()
            .map(|d| {
                (
                    d.id.clone(),
                    d.dependencies
                        .iter()
                        .map(|dep| DependencyEdge {
                            service: dep.clone(),
                        })
                        .collect(),
                )
            })
            .collect())
    }

    fn dependent_services(&self, id: &ServiceId) -> Result<Vec<ServiceId>> {
        Ok(self
            .rows
            .iter()
            .filter(|d| d.dependencies.contains(id))
            .map(|d| d.id.clone())
            .collect())
    }
}

/// Cycle detection over an adjacency map: iterative DFS from each root,
/// reporting each discovered loop as its id path.
pub fn detect_cycles(graph: &BTreeMap<ServiceId, Vec<DependencyEdge>>) -> Vec<Vec<ServiceId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    fn visit(
        node: &ServiceId,
        graph: &BTreeMap<ServiceId, Vec<DependencyEdge>>,
        colors: &mut BTreeMap<ServiceId, Color>,
        path: &mut Vec<ServiceId>,
        cycles: &mut Vec<Vec<ServiceId>>,
    ) {
        colors.insert(node.clone(), Color::Grey);
        path.push(node.clone());

        if let Some(edges) = graph.get(node) {
            for edge in edges {
                match colors.get(&edge.service) {
                    Some(Color::White) => visit(&edge.service, graph, colors, path, cycles),
                    Some(Color::Grey) => {
                        if let Some(start) = path.iter().position(|n| n == &edge.service) {
                            let mut cycle = path[start..].to_vec();
                            cycle.push(edge.service.clone());
                            cycles.push(cycle);
                        }
                    }
                    _ => {}
                }
            }
        }

        path.pop();
        colors.insert(node.clone(), Color::Black);
    }

    let mut colors: BTreeMap<ServiceId, Color> = graph
        .keys()
        .map(|id| (id.clone(), Color::White))
        .collect();
    let mut cycles = Vec::new();

    for node in graph.keys() {
        if colors[node] == Color::White {
            let mut path = Vec::new();
            visit(node, graph, &mut colors, &mut path, &mut cycles);
        }
    }

    cycles
}

/// Why bootstrap did not produce a container.
#[derive(Debug, Error)]
pub enum BootstrapFailure {
    /// The validator found errors; the report carries them
    #[error("bootstrap validation failed with {} error(s)", .report.error_count())]
    Invalid { report: ValidationReport },

    /// A registration or infrastructure step failed
    #[error(transparent)]
    Error(#[from] DiError),
}

type SetupFn = Box<dyn Fn(&Container) -> Result<()> + Send + Sync>;

/// Assembles a container from a profile.
pub struct Bootstrapper {
    profile: Profile,
    sink: Option<Arc<dyn TelemetrySink>>,
    source: Option<Arc<dyn DefinitionSource>>,
    policy: ValidationPolicy,
    setup: Vec<SetupFn>,
}

impl Bootstrapper {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            sink: None,
            source: None,
            policy: ValidationPolicy::default(),
            setup: Vec::new(),
        }
    }

    /// Export telemetry into `sink` (wrapped by the profile's sampler).
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Load additional definitions from an external source.
    pub fn with_source(mut self, source: Arc<dyn DefinitionSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Validation rule toggles for the pre-seal pass.
    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Queue user registrations; run after core infrastructure, before
    /// the external source is loaded.
    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: Fn(&Container) -> Result<()> + Send + Sync + 'static,
    {
        self.setup.push(Box::new(f));
        self
    }

    /// Run the bootstrap sequence. Fails fast on any validation error.
    pub fn bootstrap(self) -> std::result::Result<Container, BootstrapFailure> {
        // 1. fresh stores honoring the profile
        let container = match self.sink {
            Some(sink) => Container::with_profile_and_sink(self.profile.clone(), sink)?,
            None => Container::with_profile(self.profile.clone())?,
        };

        // 2. core infrastructure as singletons
        container.instance(CACHE_SERVICE_ID, container.prototypes())?;
        container.instance(PROFILE_SERVICE_ID, self.profile.clone())?;
        container.instance(TELEMETRY_SERVICE_ID, Arc::clone(&container.sink))?;

        for setup in &self.setup {
            setup(&container)?;
        }

        // 3. definitions from the external source
        if let Some(source) = &self.source {
            for definition in source.find_all()? {
                let Some(class) = definition.class.clone() else {
                    #[cfg(feature = "logging")]
                    warn!(
                        target: "blueprint_di",
                        service = %definition.id,
                        "Skipping sourced definition without a class"
                    );
                    continue;
                };
                container
                    .definitions()
                    .register(Binding::new(definition, Concrete::of_type(&class)))?;
            }
        }

        // 4. pre-flight validation, sealing on success
        let report = container.seal_with(self.policy);
        if !report.is_valid() {
            return Err(BootstrapFailure::Invalid { report });
        }

        // 5. announce readiness
        container.sink.increment("bootstrap_completed", 1);

        #[cfg(feature = "logging")]
        debug!(
            target: "blueprint_di",
            services = container.definitions().len(),
            "Bootstrap completed"
        );

        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Lifetime;
    use crate::telemetry::RecordingSink;

    fn id(s: &str) -> ServiceId {
        ServiceId::new(s).unwrap()
    }

    #[test]
    fn test_profile_presets() {
        let production = Profile::production();
        assert!(production.container.strict);
        assert!(!production.container.debug);
        assert!((production.telemetry.sampling_rate - 0.1).abs() < f64::EPSILON);

        let development = Profile::development();
        assert!(!development.container.strict);
        assert!(development.container.debug);
        assert!((development.telemetry.sampling_rate - 1.0).abs() < f64::EPSILON);

        let testing = Profile::testing();
        assert!(!testing.telemetry.enabled);
        assert_eq!(testing.container.max_resolution_depth, 16);
        assert!(testing.container.cache_dir.is_none());
    }

    #[test]
    fn test_with_methods_return_fresh_values() {
        let base = ContainerConfig::default();
        let strict = base.clone().with_strict(true);
        assert!(!base.strict);
        assert!(strict.strict);
    }

    #[test]
    fn test_sampling_rate_clamped() {
        assert_eq!(TelemetryConfig::default().with_sampling_rate(7.0).sampling_rate, 1.0);
        assert_eq!(TelemetryConfig::default().with_sampling_rate(-1.0).sampling_rate, 0.0);
    }

    #[test]
    fn test_bootstrap_registers_core_infrastructure() {
        let container = Bootstrapper::new(Profile::testing()).bootstrap().unwrap();

        assert!(container.has(CACHE_SERVICE_ID));
        assert!(container.has(PROFILE_SERVICE_ID));
        assert!(container.has(TELEMETRY_SERVICE_ID));
        assert!(container.is_sealed());

        let profile = container
            .resolve_typed::<Profile>(PROFILE_SERVICE_ID)
            .unwrap();
        assert_eq!(*profile, Profile::testing());
    }

    #[test]
    fn test_bootstrap_emits_completed_counter() {
        let sink = Arc::new(RecordingSink::new());
        Bootstrapper::new(Profile::development())
            .with_sink(sink.clone())
            .bootstrap()
            .unwrap();
        assert_eq!(sink.count("bootstrap_completed"), 1);
    }

    #[test]
    fn test_bootstrap_loads_definitions_from_source() {
        let rows = vec![
            ServiceDefinition::new(id("app.report"))
                .with_class("app.Report")
                .with_lifetime(Lifetime::Singleton),
        ];
        let container = Bootstrapper::new(Profile::testing())
            .with_source(Arc::new(StaticDefinitionSource::new(rows)))
            .bootstrap()
            .unwrap();

        assert!(container.has("app.report"));
    }

    #[test]
    fn test_bootstrap_fails_fast_on_invalid_definitions() {
        let rows = vec![
            ServiceDefinition::new(id("danger")).with_class("shell_exec_wrapper"),
        ];
        let err = Bootstrapper::new(Profile::testing())
            .with_source(Arc::new(StaticDefinitionSource::new(rows)))
            .bootstrap()
            .unwrap_err();

        match err {
            BootstrapFailure::Invalid { report } => {
                assert!(!report.is_valid());
                assert!(report.report_for("danger").is_some());
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[test]
    fn test_configure_runs_before_sealing() {
        let container = Bootstrapper::new(Profile::testing())
            .configure(|c| c.instance("app.answer", 42u32))
            .bootstrap()
            .unwrap();

        assert_eq!(*container.resolve_typed::<u32>("app.answer").unwrap(), 42);
    }

    #[test]
    fn test_static_source_graph_and_cycles() {
        let rows = vec![
            ServiceDefinition::new(id("a")).with_dependency(id("b")),
            ServiceDefinition::new(id("b")).with_dependency(id("a")),
            ServiceDefinition::new(id("c")),
        ];
        let source = StaticDefinitionSource::new(rows);

        let graph = source.dependency_graph().unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(
            source.service_dependencies(&id("a")).unwrap(),
            vec![DependencyEdge { service: id("b") }]
        );
        assert_eq!(source.dependent_services(&id("b")).unwrap(), vec![id("a")]);

        let cycles = source.detect_circular_dependencies(&graph);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].first(), cycles[0].last());
        assert!(cycles[0].contains(&id("a")) && cycles[0].contains(&id("b")));
    }
}

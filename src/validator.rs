//! Pre-flight validation over the definition store.
//!
//! Side-effect free: the validator never instantiates services and never
//! mutates the store. Running it twice over the same definitions yields
//! identical reports - definitions are visited in id order and rules run
//! in a fixed sequence. Warnings never block; errors do.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde_json::Value;

use crate::definitions::{DefinitionStore, ServiceDefinition};
use crate::id::{Environment, Lifetime, ServiceId};

/// Class-name tokens that flag a definition as dangerous.
const DANGEROUS_TOKENS: &[&str] = &[
    "exec",
    "eval",
    "system",
    "passthru",
    "popen",
    "assert",
    "unserialize",
];

/// Config-key substrings that indicate secret-like material.
const SENSITIVE_KEY_MARKERS: &[&str] =
    &["password", "secret", "key", "token", "api_key", "private_key"];

const MAX_COMPLEXITY: u32 = 15;
const MAX_DEPENDENCIES: usize = 10;
const MAX_SINGLETON_DEPENDENTS: usize = 20;

/// Which rule produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationRule {
    Attribute,
    UniqueServiceId,
    LifetimeImmutability,
    RequiredTags,
    ValidEnvironment,
    DependencyExists,
    NoCircularDependencies,
    DependencyAvailability,
    SecurityPolicy,
    SensitiveDataProtection,
    PerformanceComplexity,
    PerformanceDependencyCount,
    PerformanceFanIn,
}

impl ValidationRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attribute => "Attribute",
            Self::UniqueServiceId => "UniqueServiceId",
            Self::LifetimeImmutability => "LifetimeImmutability",
            Self::RequiredTags => "RequiredTags",
            Self::ValidEnvironment => "ValidEnvironment",
            Self::DependencyExists => "DependencyExists",
            Self::NoCircularDependencies => "NoCircularDependencies",
            Self::DependencyAvailability => "DependencyAvailability",
            Self::SecurityPolicy => "SecurityPolicy",
            Self::SensitiveDataProtection => "SensitiveDataProtection",
            Self::PerformanceComplexity => "PerformanceComplexity",
            Self::PerformanceDependencyCount => "PerformanceDependencyCount",
            Self::PerformanceFanIn => "PerformanceFanIn",
        }
    }
}

impl std::fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One error or warning produced by a rule.
#[derive(Debug, Clone)]
pub struct ValidationFinding {
    pub rule: ValidationRule,
    pub message: String,
    /// The offending value, when one exists
    pub value: Option<Value>,
    /// The definition field the finding anchors to
    pub field: Option<String>,
}

impl ValidationFinding {
    fn new(rule: ValidationRule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
            value: None,
            field: None,
        }
    }

    fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Findings for one service.
#[derive(Debug, Clone)]
pub struct ServiceReport {
    pub service_id: ServiceId,
    pub errors: Vec<ValidationFinding>,
    pub warnings: Vec<ValidationFinding>,
}

impl ServiceReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether a rule produced an error for this service.
    pub fn has_error(&self, rule: ValidationRule) -> bool {
        self.errors.iter().any(|f| f.rule == rule)
    }

    pub fn has_warning(&self, rule: ValidationRule) -> bool {
        self.warnings.iter().any(|f| f.rule == rule)
    }
}

/// The validator's full output; returned, never thrown.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub services: Vec<ServiceReport>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.services.iter().all(|s| s.is_valid())
    }

    pub fn error_count(&self) -> usize {
        self.services.iter().map(|s| s.errors.len()).sum()
    }

    pub fn warning_count(&self) -> usize {
        self.services.iter().map(|s| s.warnings.len()).sum()
    }

    pub fn report_for(&self, id: &str) -> Option<&ServiceReport> {
        self.services.iter().find(|s| s.service_id.as_str() == id)
    }
}

/// Per-rule toggles. Everything defaults on except `required_tags`,
/// which is a project-policy opt-in.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub attributes: bool,
    pub unique_service_id: bool,
    pub lifetime_immutability: bool,
    pub required_tags: bool,
    pub valid_environment: bool,
    pub dependency_exists: bool,
    pub no_circular_dependencies: bool,
    pub dependency_availability: bool,
    pub security: bool,
    pub sensitive_config: bool,
    pub performance: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            attributes: true,
            unique_service_id: true,
            lifetime_immutability: true,
            required_tags: false,
            valid_environment: true,
            dependency_exists: true,
            no_circular_dependencies: true,
            dependency_availability: true,
            security: true,
            sensitive_config: true,
            performance: true,
        }
    }
}

/// Runs the rule set over definitions and produces a structured report.
#[derive(Debug, Default)]
pub struct Validator {
    policy: ValidationPolicy,
}

impl Validator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    /// Validate every definition registered in a store.
    pub fn validate_store(&self, store: &DefinitionStore) -> ValidationReport {
        self.validate_definitions(&store.all_definitions())
    }

    /// Validate a definition list, e.g. rows from an external source.
    pub fn validate_definitions(&self, definitions: &[ServiceDefinition]) -> ValidationReport {
        let mut ordered: Vec<&ServiceDefinition> = definitions.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let id_counts = count_ids(definitions);
        let known_ids: HashSet<&ServiceId> = definitions.iter().map(|d| &d.id).collect();
        let by_id: HashMap<&ServiceId, &ServiceDefinition> =
            definitions.iter().map(|d| (&d.id, d)).collect();
        let cyclic = if self.policy.no_circular_dependencies {
            nodes_on_cycles(definitions)
        } else {
            HashSet::new()
        };
        let dependents = dependent_counts(definitions);

        let services = ordered
            .into_iter()
            .map(|def| {
                let mut errors = Vec::new();
                let mut warnings = Vec::new();

                if self.policy.attributes {
                    self.check_attributes(def, &mut errors);
                }
                if self.policy.unique_service_id && id_counts[&def.id] > 1 {
                    errors.push(
                        ValidationFinding::new(
                            ValidationRule::UniqueServiceId,
                            format!("service id `{}` is registered more than once", def.id),
                        )
                        .with_field("id"),
                    );
                }
                if self.policy.lifetime_immutability {
                    self.check_lifetime_conflicts(def, definitions, &mut errors);
                }
                if self.policy.required_tags && def.tags.is_empty() {
                    errors.push(
                        ValidationFinding::new(
                            ValidationRule::RequiredTags,
                            "definition carries no tags",
                        )
                        .with_field("tags"),
                    );
                }
                if self.policy.valid_environment {
                    self.check_environment(def, &mut errors);
                }
                if self.policy.dependency_exists {
                    self.check_dependencies_exist(def, &known_ids, &mut errors);
                }
                if self.policy.no_circular_dependencies && cyclic.contains(&def.id) {
                    errors.push(ValidationFinding::new(
                        ValidationRule::NoCircularDependencies,
                        format!("`{}` participates in a dependency cycle", def.id),
                    ));
                }
                if self.policy.dependency_availability {
                    self.check_dependency_availability(def, &by_id, &mut errors);
                }
                if self.policy.security {
                    self.check_security(def, &mut errors);
                }
                if self.policy.sensitive_config {
                    self.check_sensitive_config(def, &mut errors);
                }
                if self.policy.performance {
                    self.check_performance(def, &dependents, &mut warnings);
                }

                ServiceReport {
                    service_id: def.id.clone(),
                    errors,
                    warnings,
                }
            })
            .collect();

        ValidationReport { services }
    }

    fn check_attributes(&self, def: &ServiceDefinition, errors: &mut Vec<ValidationFinding>) {
        if let Some(class) = &def.class {
            if class.is_empty() {
                errors.push(
                    ValidationFinding::new(
                        ValidationRule::Attribute,
                        "class identifier must not be empty",
                    )
                    .with_field("class"),
                );
            }
        }
        for tag in &def.tags {
            if tag.is_empty() {
                errors.push(
                    ValidationFinding::new(ValidationRule::Attribute, "tags must be non-empty")
                        .with_field("tags"),
                );
            }
        }
        for key in def.config.keys() {
            if key.is_empty() {
                errors.push(
                    ValidationFinding::new(
                        ValidationRule::Attribute,
                        "config keys must be non-empty",
                    )
                    .with_field("config"),
                );
            }
        }
    }

    fn check_lifetime_conflicts(
        &self,
        def: &ServiceDefinition,
        all: &[ServiceDefinition],
        errors: &mut Vec<ValidationFinding>,
    ) {
        let conflicting = all
            .iter()
            .any(|other| other.id == def.id && other.lifetime != def.lifetime);
        if conflicting {
            errors.push(
                ValidationFinding::new(
                    ValidationRule::LifetimeImmutability,
                    format!(
                        "`{}` is declared with more than one lifetime; lifetime is immutable after registration",
                        def.id
                    ),
                )
                .with_field("lifetime"),
            );
        }
    }

    fn check_environment(&self, def: &ServiceDefinition, errors: &mut Vec<ValidationFinding>) {
        if let Some(environment) = &def.environment {
            if Environment::from_str(environment).is_err() {
                errors.push(
                    ValidationFinding::new(
                        ValidationRule::ValidEnvironment,
                        format!(
                            "environment `{environment}` is not one of development, staging, production"
                        ),
                    )
                    .with_value(Value::String(environment.clone()))
                    .with_field("environment"),
                );
            }
        }
    }

    fn check_dependencies_exist(
        &self,
        def: &ServiceDefinition,
        known: &HashSet<&ServiceId>,
        errors: &mut Vec<ValidationFinding>,
    ) {
        for dep in &def.dependencies {
            if !known.contains(dep) {
                errors.push(
                    ValidationFinding::new(
                        ValidationRule::DependencyExists,
                        format!("dependency `{dep}` is not registered"),
                    )
                    .with_value(Value::String(dep.to_string()))
                    .with_field("dependencies"),
                );
            }
        }
    }

    fn check_dependency_availability(
        &self,
        def: &ServiceDefinition,
        by_id: &HashMap<&ServiceId, &ServiceDefinition>,
        errors: &mut Vec<ValidationFinding>,
    ) {
        for dep in &def.dependencies {
            let Some(dep_def) = by_id.get(dep) else {
                continue; // DependencyExists reports the missing binding
            };
            let Some(dep_env) = &dep_def.environment else {
                continue; // unconstrained dependencies are available everywhere
            };
            if def.environment.as_deref() != Some(dep_env.as_str()) {
                errors.push(
                    ValidationFinding::new(
                        ValidationRule::DependencyAvailability,
                        format!(
                            "dependency `{dep}` is constrained to `{dep_env}` but `{}` is not",
                            def.id
                        ),
                    )
                    .with_field("dependencies"),
                );
            }
        }
    }

    fn check_security(&self, def: &ServiceDefinition, errors: &mut Vec<ValidationFinding>) {
        let Some(class) = &def.class else { return };
        let lowered = class.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        for dangerous in DANGEROUS_TOKENS {
            if tokens.contains(dangerous) {
                errors.push(
                    ValidationFinding::new(
                        ValidationRule::SecurityPolicy,
                        format!("class `{class}` matches dangerous function name `{dangerous}`"),
                    )
                    .with_value(Value::String(class.clone()))
                    .with_field("class"),
                );
                break;
            }
        }
    }

    fn check_sensitive_config(&self, def: &ServiceDefinition, errors: &mut Vec<ValidationFinding>) {
        for key in def.config.keys() {
            let lowered = key.to_lowercase();
            if SENSITIVE_KEY_MARKERS
                .iter()
                .any(|marker| lowered.contains(marker))
            {
                errors.push(
                    ValidationFinding::new(
                        ValidationRule::SensitiveDataProtection,
                        format!("config key `{key}` looks like secret material"),
                    )
                    .with_field("config"),
                );
            }
        }
    }

    fn check_performance(
        &self,
        def: &ServiceDefinition,
        dependents: &HashMap<ServiceId, usize>,
        warnings: &mut Vec<ValidationFinding>,
    ) {
        if def.complexity_score > MAX_COMPLEXITY {
            warnings.push(
                ValidationFinding::new(
                    ValidationRule::PerformanceComplexity,
                    format!(
                        "complexity score {} exceeds {MAX_COMPLEXITY}",
                        def.complexity_score
                    ),
                )
                .with_value(Value::from(def.complexity_score))
                .with_field("complexity_score"),
            );
        }
        if def.dependencies.len() > MAX_DEPENDENCIES {
            warnings.push(
                ValidationFinding::new(
                    ValidationRule::PerformanceDependencyCount,
                    format!(
                        "{} dependencies exceed {MAX_DEPENDENCIES}",
                        def.dependencies.len()
                    ),
                )
                .with_field("dependencies"),
            );
        }
        if def.lifetime == Lifetime::Singleton {
            let fan_in = dependents.get(&def.id).copied().unwrap_or(0);
            if fan_in > MAX_SINGLETON_DEPENDENTS {
                warnings.push(ValidationFinding::new(
                    ValidationRule::PerformanceFanIn,
                    format!("singleton has {fan_in} dependents, exceeding {MAX_SINGLETON_DEPENDENTS}"),
                ));
            }
        }
    }
}

fn count_ids(definitions: &[ServiceDefinition]) -> HashMap<&ServiceId, usize> {
    let mut counts = HashMap::new();
    for def in definitions {
        *counts.entry(&def.id).or_insert(0) += 1;
    }
    counts
}

fn dependent_counts(definitions: &[ServiceDefinition]) -> HashMap<ServiceId, usize> {
    let mut counts: HashMap<ServiceId, usize> = HashMap::new();
    for def in definitions {
        for dep in &def.dependencies {
            *counts.entry(dep.clone()).or_insert(0) += 1;
        }
    }
    counts
}

/// Every node participating in a cycle of the declared dependency graph.
///
/// A one-hop inverse check catches the common mutual-dependency case
/// early; the full DFS always runs for the rest, so indirect cycles are
/// never missed.
fn nodes_on_cycles(definitions: &[ServiceDefinition]) -> HashSet<ServiceId> {
    let graph: HashMap<&ServiceId, &Vec<ServiceId>> = definitions
        .iter()
        .map(|d| (&d.id, &d.dependencies))
        .collect();

    let mut on_cycle: HashSet<ServiceId> = HashSet::new();

    // Fast path: direct mutual dependencies
    for def in definitions {
        for dep in &def.dependencies {
            if let Some(dep_deps) = graph.get(dep) {
                if dep_deps.contains(&def.id) {
                    on_cycle.insert(def.id.clone());
                    on_cycle.insert(dep.clone());
                }
            }
        }
    }

    // Full detection: DFS with a path stack, collecting every node on a
    // discovered cycle
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    let mut colors: HashMap<&ServiceId, Color> =
        graph.keys().map(|id| (*id, Color::White)).collect();

    fn visit<'a>(
        node: &'a ServiceId,
        graph: &HashMap<&'a ServiceId, &'a Vec<ServiceId>>,
        colors: &mut HashMap<&'a ServiceId, Color>,
        path: &mut Vec<&'a ServiceId>,
        on_cycle: &mut HashSet<ServiceId>,
    ) {
        colors.insert(node, Color::Grey);
        path.push(node);

        if let Some(deps) = graph.get(node) {
            for dep in deps.iter() {
                let Some((&dep_key, _)) = graph.get_key_value(dep) else {
                    continue; // dangling edges are DependencyExists findings
                };
                match colors[dep_key] {
                    Color::White => visit(dep_key, graph, colors, path, on_cycle),
                    Color::Grey => {
                        // Everything from the first occurrence of dep on
                        // the path forward is on the cycle
                        if let Some(start) = path.iter().position(|n| *n == dep_key) {
                            for member in &path[start..] {
                                on_cycle.insert((*member).clone());
                            }
                        }
                    }
                    Color::Black => {}
                }
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
    }

    let mut ordered: Vec<&ServiceId> = graph.keys().copied().collect();
    ordered.sort();
    for node in ordered {
        if colors[node] == Color::White {
            let mut path = Vec::new();
            visit(node, &graph, &mut colors, &mut path, &mut on_cycle);
        }
    }

    on_cycle
}

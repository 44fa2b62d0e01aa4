//! Error types for the container runtime.

use std::time::Duration;

use thiserror::Error;

use crate::id::Lifetime;

/// A single dispose hook failure collected while ending a scope.
#[derive(Debug, Clone)]
pub struct DisposeFailure {
    /// Id of the instance whose hook failed
    pub id: String,
    /// What the hook reported
    pub message: String,
}

impl std::fmt::Display for DisposeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.message)
    }
}

/// Errors that can occur during registration, analysis, or resolution.
#[derive(Error, Debug)]
pub enum DiError {
    /// Service ids must be non-empty
    #[error("service id must be a non-empty string")]
    InvalidId,

    /// No binding (or alias target) exists for the requested id
    #[error("service not found: {id}{}{}", suggestions_suffix(.suggestions), path_suffix(.resolution_path))]
    ServiceNotFound {
        id: String,
        /// Close-match candidates, populated only in debug profiles
        suggestions: Vec<String>,
        /// The open resolution frames at the point of failure, populated
        /// only in debug profiles
        resolution_path: Vec<String>,
    },

    /// A cycle was detected in the current resolution stack
    #[error("circular dependency: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    /// The resolution stack grew past the configured limit
    #[error("max resolution depth {limit} exceeded: {}", .path.join(" -> "))]
    MaxDepthExceeded { path: Vec<String>, limit: usize },

    /// A constructor or method parameter had no override, type, default, or null fallback
    #[error("unresolvable parameter `{parameter}` while constructing `{target}`")]
    UnresolvableParameter { parameter: String, target: String },

    /// A required injected property could not be resolved
    #[error("unresolvable property `{property}` while constructing `{target}`")]
    UnresolvableProperty { property: String, target: String },

    /// The analyzer could not produce a prototype for a type
    #[error("analysis of `{type_name}` failed: {reason}")]
    Analysis { type_name: String, reason: String },

    /// Re-registration attempted to change a binding's lifetime
    #[error("lifetime of `{id}` is {existing}, cannot re-register as {requested}")]
    LifetimeImmutability {
        id: String,
        existing: Lifetime,
        requested: Lifetime,
    },

    /// The container was sealed and no longer accepts registrations
    #[error("container is sealed - no further registrations allowed")]
    ContainerSealed,

    /// An ended scope was used for storage or retrieval
    #[error("scope `{scope}` has ended")]
    ScopeEnded { scope: String },

    /// The root scope cannot be ended while the container is active
    #[error("the root scope cannot be ended")]
    RootScopeEnd,

    /// One or more dispose hooks failed while ending a scope
    #[error("{} dispose hook(s) failed while ending scope", .errors.len())]
    ScopeEndErrors { errors: Vec<DisposeFailure> },

    /// A resolution ran past its deadline
    #[error("resolution timed out after {elapsed:?}: {}", .path.join(" -> "))]
    ResolutionTimeout { path: Vec<String>, elapsed: Duration },

    /// A decorator or resolving callback failed
    #[error("decorator for `{id}` failed: {cause}")]
    Decorator { id: String, cause: String },

    /// Alias registration would form a cycle
    #[error("alias cycle: {}", .path.join(" -> "))]
    AliasCycle { path: Vec<String> },

    /// A prototype map/json was missing required fields or malformed
    #[error("prototype decode failed: {reason}")]
    PrototypeDecode { reason: String },

    /// A resolved instance could not be downcast to the requested type
    #[error("type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },

    /// Prototype cache I/O failed
    #[error("cache i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failed
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

fn suggestions_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

fn path_suffix(path: &[String]) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" (while resolving: {})", path.join(" -> "))
    }
}

impl DiError {
    /// Create a `ServiceNotFound` without debug context.
    #[inline]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::ServiceNotFound {
            id: id.into(),
            suggestions: Vec::new(),
            resolution_path: Vec::new(),
        }
    }

    /// Create an `Analysis` error.
    #[inline]
    pub fn analysis(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Analysis {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a `Decorator` error.
    #[inline]
    pub fn decorator(id: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Decorator {
            id: id.into(),
            cause: cause.into(),
        }
    }

    /// Create an `UnresolvableParameter` error.
    #[inline]
    pub fn unresolvable_parameter(parameter: impl Into<String>, target: impl Into<String>) -> Self {
        Self::UnresolvableParameter {
            parameter: parameter.into(),
            target: target.into(),
        }
    }

    /// Create an `UnresolvableProperty` error.
    #[inline]
    pub fn unresolvable_property(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::UnresolvableProperty {
            property: property.into(),
            target: target.into(),
        }
    }

    /// Create a `TypeMismatch` for the requested type.
    #[inline]
    pub fn type_mismatch<T>() -> Self {
        Self::TypeMismatch {
            expected: std::any::type_name::<T>(),
        }
    }

    /// Create a `PrototypeDecode` error.
    #[inline]
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::PrototypeDecode {
            reason: reason.into(),
        }
    }

    /// Stable snake_case name of the error kind, used as a telemetry
    /// metric suffix.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidId => "invalid_id",
            Self::ServiceNotFound { .. } => "service_not_found",
            Self::CircularDependency { .. } => "circular_dependency",
            Self::MaxDepthExceeded { .. } => "max_depth_exceeded",
            Self::UnresolvableParameter { .. } => "unresolvable_parameter",
            Self::UnresolvableProperty { .. } => "unresolvable_property",
            Self::Analysis { .. } => "analysis",
            Self::LifetimeImmutability { .. } => "lifetime_immutability",
            Self::ContainerSealed => "container_sealed",
            Self::ScopeEnded { .. } => "scope_ended",
            Self::RootScopeEnd => "root_scope_end",
            Self::ScopeEndErrors { .. } => "scope_end_errors",
            Self::ResolutionTimeout { .. } => "resolution_timeout",
            Self::Decorator { .. } => "decorator",
            Self::AliasCycle { .. } => "alias_cycle",
            Self::PrototypeDecode { .. } => "prototype_decode",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::Io(_) => "io",
            Self::Encode(_) => "encode",
        }
    }
}

/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, DiError>;

//! Service identifiers and core value types.
//!
//! Services are indexed by opaque string ids. Consumers pick their own
//! conventions (dotted names like `"app.logger"` or fully qualified type
//! names); the container only requires ids to be non-empty and compares
//! them by exact, case-sensitive equality.

use std::borrow::Borrow;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DiError, Result};

/// An opaque, non-empty service identifier.
///
/// Cheap to clone (`Arc<str>` backed) and usable as a map key.
///
/// # Examples
///
/// ```rust
/// use blueprint_di::ServiceId;
///
/// let id = ServiceId::new("app.logger").unwrap();
/// assert_eq!(id.as_str(), "app.logger");
/// assert!(ServiceId::new("").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(Arc<str>);

impl ServiceId {
    /// Create a service id, rejecting empty strings.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref();
        if id.is_empty() {
            return Err(DiError::InvalidId);
        }
        Ok(Self(Arc::from(id)))
    }

    /// Get the id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceId({:?})", &*self.0)
    }
}

impl Borrow<str> for ServiceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ServiceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ServiceId {
    type Error = DiError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl Serialize for ServiceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ServiceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ServiceId::new(&s).map_err(|_| serde::de::Error::custom("service id must be non-empty"))
    }
}

/// Service lifetimes controlling instance caching behavior.
///
/// A binding's lifetime is fixed at first registration. Re-registering the
/// same id with a different lifetime is rejected; remove the binding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// Single instance per container, cached in the root scope
    Singleton,
    /// Single instance per child scope, released when the scope ends
    Scoped,
    /// New instance on every resolve, never cached
    #[default]
    Transient,
}

impl Lifetime {
    /// Short name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifetime::Singleton => "singleton",
            Lifetime::Scoped => "scoped",
            Lifetime::Transient => "transient",
        }
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment environment a definition is constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = DiError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(DiError::analysis(
                other,
                "environment must be one of development, staging, production",
            )),
        }
    }
}

/// A raw string that collaborators must pass through without quoting.
///
/// The container itself never interprets expressions; the type is shared
/// with the query-builder and router crates that do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression(String);

impl Expression {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A service id carrying a compile-time type for typed lookups.
///
/// The container still indexes by the string id; the phantom type only
/// drives the downcast on retrieval.
///
/// # Examples
///
/// ```rust
/// use blueprint_di::{Container, TypedKey};
///
/// struct Config { debug: bool }
///
/// let container = Container::new();
/// container.instance("app.config", Config { debug: true }).unwrap();
///
/// let key: TypedKey<Config> = TypedKey::new("app.config").unwrap();
/// let config = container.get(&key).unwrap();
/// assert!(config.debug);
/// ```
pub struct TypedKey<T> {
    id: ServiceId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedKey<T> {
    /// Create a typed key over a service id.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        Ok(Self {
            id: ServiceId::new(id)?,
            _marker: PhantomData,
        })
    }

    /// The underlying service id.
    #[inline]
    pub fn id(&self) -> &ServiceId {
        &self.id
    }
}

impl<T> Clone for TypedKey<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedKey<{}>({:?})", std::any::type_name::<T>(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_rejects_empty() {
        assert!(ServiceId::new("").is_err());
        assert!(ServiceId::new("x").is_ok());
    }

    #[test]
    fn test_id_equality_is_case_sensitive() {
        let a = ServiceId::new("Logger").unwrap();
        let b = ServiceId::new("logger").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, ServiceId::new("Logger").unwrap());
    }

    #[test]
    fn test_id_borrows_as_str() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ServiceId::new("db").unwrap(), 1);
        assert_eq!(map.get("db"), Some(&1));
    }

    #[test]
    fn test_lifetime_default_is_transient() {
        assert_eq!(Lifetime::default(), Lifetime::Transient);
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert!("prod".parse::<Environment>().is_err());
    }

    #[test]
    fn test_environment_serde_round_trip() {
        let json = serde_json::to_string(&Environment::Staging).unwrap();
        assert_eq!(json, "\"staging\"");
        let back: Environment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Environment::Staging);
    }

    #[test]
    fn test_expression_passes_through() {
        let expr = Expression::new("COUNT(*)");
        assert_eq!(expr.as_str(), "COUNT(*)");
        assert_eq!(expr.to_string(), "COUNT(*)");
    }
}

//! The prototype model: immutable construction plans.
//!
//! A [`ServicePrototype`] describes how a concrete type is built - its
//! constructor parameters, injectable properties, and injectable methods.
//! Prototypes are pure data: the analyzer produces them, the resolver and
//! the prototype cache consume them. Serialization is byte-stable: equal
//! prototypes always encode to identical output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DiError, Result};

/// One constructor or method argument's resolution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterPrototype {
    /// Parameter name, unique within its method
    pub name: String,
    /// Declared polymorphic target (a service id), if any
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Whether a default value exists
    pub has_default: bool,
    /// The default value, present iff `has_default`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Whether the parameter absorbs a variable number of arguments
    pub is_variadic: bool,
    /// Whether an absent value is acceptable
    pub allows_null: bool,
    /// Required iff no default and not nullable
    pub required: bool,
}

impl ParameterPrototype {
    /// A required parameter resolved by service type.
    pub fn service(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: Some(type_name.into()),
            has_default: false,
            default: None,
            is_variadic: false,
            allows_null: false,
            required: true,
        }
    }

    /// A parameter carrying a default value.
    pub fn with_default(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            has_default: true,
            default: Some(default),
            is_variadic: false,
            allows_null: false,
            required: false,
        }
    }

    /// A nullable parameter: resolved to its type when possible, absent otherwise.
    pub fn nullable(name: impl Into<String>, type_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            type_name,
            has_default: false,
            default: None,
            is_variadic: false,
            allows_null: true,
            required: false,
        }
    }

    /// A variadic parameter collecting every service tagged with `type_name`.
    pub fn variadic(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: Some(type_name.into()),
            has_default: false,
            default: None,
            is_variadic: true,
            allows_null: false,
            required: false,
        }
    }
}

/// One injectable property's resolution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyPrototype {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub has_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub allows_null: bool,
    pub required: bool,
}

impl PropertyPrototype {
    /// A required property resolved by service type.
    pub fn service(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: Some(type_name.into()),
            has_default: false,
            default: None,
            allows_null: false,
            required: true,
        }
    }

    /// An optional property: injected when resolvable, skipped otherwise.
    pub fn optional(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: Some(type_name.into()),
            has_default: false,
            default: None,
            allows_null: true,
            required: false,
        }
    }

    /// A property injected from a default value.
    pub fn with_default(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            has_default: true,
            default: Some(default),
            allows_null: false,
            required: false,
        }
    }
}

/// An injectable method: a name plus ordered parameters.
///
/// Parameter order is semantically significant; arguments are resolved
/// and passed in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodPrototype {
    pub name: String,
    pub parameters: Vec<ParameterPrototype>,
}

impl MethodPrototype {
    pub fn new(name: impl Into<String>, parameters: Vec<ParameterPrototype>) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }
}

/// The full construction plan for one concrete type.
///
/// Immutable once built. Round-trips through [`to_map`](Self::to_map) /
/// [`from_map`](Self::from_map) with byte-identical output for equal
/// inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePrototype {
    /// The inspected type identifier
    pub class: String,
    /// Constructor plan, or none for types built without arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constructor: Option<MethodPrototype>,
    /// Properties injected after construction, in declaration order
    #[serde(default)]
    pub injected_properties: Vec<PropertyPrototype>,
    /// Methods invoked after property injection, in declaration order
    #[serde(default)]
    pub injected_methods: Vec<MethodPrototype>,
    /// False for abstract types and interfaces
    pub is_instantiable: bool,
}

impl ServicePrototype {
    /// Serialize to a JSON object map.
    pub fn to_map(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(DiError::decode(format!(
                "prototype serialized to non-object value: {other}"
            ))),
        }
    }

    /// Deserialize from a JSON object map.
    ///
    /// Fails with [`DiError::PrototypeDecode`] when required fields are
    /// missing or malformed.
    pub fn from_map(map: Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(map)).map_err(|e| DiError::decode(e.to_string()))
    }

    /// Serialize to a JSON string. Encoding is fallible and reported
    /// explicitly rather than returning a sentinel.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| DiError::decode(e.to_string()))
    }

    /// Rough construction cost: one point per injection site.
    ///
    /// Used by the validator's performance rules.
    pub fn complexity_score(&self) -> u32 {
        let ctor = self
            .constructor
            .as_ref()
            .map(|c| c.parameters.len())
            .unwrap_or(0);
        let props = self.injected_properties.len();
        let methods: usize = self
            .injected_methods
            .iter()
            .map(|m| 1 + m.parameters.len())
            .sum();
        (ctor + props + methods) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ServicePrototype {
        ServicePrototype {
            class: "app.ReportService".into(),
            constructor: Some(MethodPrototype::new(
                "new",
                vec![
                    ParameterPrototype::service("logger", "app.logger"),
                    ParameterPrototype::with_default("retries", json!(3)),
                    ParameterPrototype::nullable("cache", Some("app.cache".into())),
                ],
            )),
            injected_properties: vec![PropertyPrototype::optional("clock", "app.clock")],
            injected_methods: vec![MethodPrototype::new(
                "set_bus",
                vec![ParameterPrototype::service("bus", "app.bus")],
            )],
            is_instantiable: true,
        }
    }

    #[test]
    fn test_map_round_trip() {
        let proto = sample();
        let map = proto.to_map().unwrap();
        let back = ServicePrototype::from_map(map).unwrap();
        assert_eq!(proto, back);
    }

    #[test]
    fn test_serialization_is_byte_stable() {
        let a = sample().to_json().unwrap();
        let b = sample().to_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_map_missing_fields() {
        let mut map = Map::new();
        map.insert("class".into(), json!("app.X"));
        // is_instantiable missing
        let err = ServicePrototype::from_map(map).unwrap_err();
        assert!(matches!(err, DiError::PrototypeDecode { .. }));
    }

    #[test]
    fn test_required_derivation() {
        let p = ParameterPrototype::service("db", "app.db");
        assert!(p.required);
        let d = ParameterPrototype::with_default("n", json!(1));
        assert!(!d.required && d.has_default);
        let n = ParameterPrototype::nullable("c", None);
        assert!(!n.required && n.allows_null);
    }

    #[test]
    fn test_complexity_counts_injection_sites() {
        // 3 ctor params + 1 property + (1 method + 1 param)
        assert_eq!(sample().complexity_score(), 6);
    }

    #[test]
    fn test_json_round_trip_preserves_method_order() {
        let proto = ServicePrototype {
            class: "app.Ordered".into(),
            constructor: None,
            injected_properties: vec![],
            injected_methods: vec![
                MethodPrototype::new("first", vec![]),
                MethodPrototype::new("second", vec![]),
            ],
            is_instantiable: true,
        };
        let back = ServicePrototype::from_json(&proto.to_json().unwrap()).unwrap();
        assert_eq!(back.injected_methods[0].name, "first");
        assert_eq!(back.injected_methods[1].name, "second");
    }
}

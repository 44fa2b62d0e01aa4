//! Type models: the registration-time stand-in for runtime reflection.
//!
//! The resolver needs to discover constructor parameters, injectable
//! properties, and injectable methods at runtime. There is no reflection
//! to read them from, so a [`TypeModel`] declares them up front through a
//! builder DSL and pairs each declaration with the typed closure that
//! actually constructs or injects. The analyzer derives the pure-data
//! [`ServicePrototype`](crate::prototype::ServicePrototype) from the same
//! declarations.

use std::any::Any;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{DiError, Result};
use crate::prototype::{MethodPrototype, ParameterPrototype, PropertyPrototype};

/// A type-erased live service instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A resolved argument flowing into construction closures.
#[derive(Clone)]
pub enum ArgValue {
    /// A resolved service instance
    Service(Instance),
    /// Every instance a variadic parameter collected
    ServiceList(Vec<Instance>),
    /// A plain value (an override or a declared default)
    Value(Value),
    /// A nullable parameter that resolved to nothing
    Absent,
}

impl std::fmt::Debug for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::Service(_) => f.write_str("Service(..)"),
            ArgValue::ServiceList(v) => write!(f, "ServiceList(len={})", v.len()),
            ArgValue::Value(v) => write!(f, "Value({v})"),
            ArgValue::Absent => f.write_str("Absent"),
        }
    }
}

/// Ordered, named arguments handed to a construction closure.
///
/// Arguments appear in parameter declaration order; lookups are by name.
pub struct ArgBag {
    args: Vec<(String, ArgValue)>,
}

impl ArgBag {
    pub(crate) fn new(args: Vec<(String, ArgValue)>) -> Self {
        Self { args }
    }

    /// Raw access by parameter name.
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// A required service argument, downcast to `T`.
    pub fn service<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        match self.get(name) {
            Some(ArgValue::Service(instance)) => instance
                .clone()
                .downcast::<T>()
                .map_err(|_| DiError::type_mismatch::<T>()),
            _ => Err(DiError::unresolvable_parameter(name, "argument bag")),
        }
    }

    /// An optional service argument; absent or missing yields `None`.
    pub fn opt_service<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        match self.get(name) {
            Some(ArgValue::Service(instance)) => instance.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Every instance collected by a variadic parameter, downcast to `T`.
    pub fn service_list<T: Send + Sync + 'static>(&self, name: &str) -> Result<Vec<Arc<T>>> {
        match self.get(name) {
            Some(ArgValue::ServiceList(instances)) => instances
                .iter()
                .map(|i| {
                    i.clone()
                        .downcast::<T>()
                        .map_err(|_| DiError::type_mismatch::<T>())
                })
                .collect(),
            Some(ArgValue::Absent) | None => Ok(Vec::new()),
            _ => Err(DiError::unresolvable_parameter(name, "argument bag")),
        }
    }

    /// A plain value argument, deserialized into `T`.
    pub fn value<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        match self.get(name) {
            Some(ArgValue::Value(value)) => {
                serde_json::from_value(value.clone()).map_err(DiError::Encode)
            }
            _ => Err(DiError::unresolvable_parameter(name, "argument bag")),
        }
    }

    /// Whether a nullable parameter resolved to nothing.
    pub fn is_absent(&self, name: &str) -> bool {
        matches!(self.get(name), Some(ArgValue::Absent) | None)
    }
}

pub(crate) type ConstructFn =
    Arc<dyn Fn(&ArgBag) -> Result<Box<dyn Any + Send + Sync>> + Send + Sync>;
pub(crate) type InjectPropertyFn =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), ArgValue) -> Result<()> + Send + Sync>;
pub(crate) type InvokeMethodFn =
    Arc<dyn Fn(&mut (dyn Any + Send + Sync), &ArgBag) -> Result<()> + Send + Sync>;

pub(crate) struct ConstructorModel {
    pub(crate) params: Vec<ParameterPrototype>,
    pub(crate) build: ConstructFn,
}

pub(crate) struct PropertyModel {
    pub(crate) prototype: PropertyPrototype,
    pub(crate) inject: InjectPropertyFn,
}

pub(crate) struct MethodModel {
    pub(crate) prototype: MethodPrototype,
    pub(crate) invoke: InvokeMethodFn,
}

/// The declared construction surface of one concrete type.
///
/// # Examples
///
/// ```rust
/// use blueprint_di::{ParameterPrototype, TypeModel};
/// use serde_json::json;
///
/// struct HttpClient {
///     base_url: String,
///     timeout_secs: u64,
/// }
///
/// let model = TypeModel::of::<HttpClient>("app.HttpClient")
///     .constructor(
///         vec![
///             ParameterPrototype::with_default("base_url", json!("http://localhost")),
///             ParameterPrototype::with_default("timeout_secs", json!(30)),
///         ],
///         |args| {
///             Ok(HttpClient {
///                 base_url: args.value("base_url")?,
///                 timeout_secs: args.value("timeout_secs")?,
///             })
///         },
///     )
///     .build();
///
/// assert_eq!(model.type_name(), "app.HttpClient");
/// assert!(model.is_instantiable());
/// ```
pub struct TypeModel {
    type_name: String,
    instantiable: bool,
    pub(crate) constructor: Option<ConstructorModel>,
    pub(crate) properties: Vec<PropertyModel>,
    pub(crate) methods: Vec<MethodModel>,
}

impl TypeModel {
    /// Start describing an instantiable type.
    pub fn of<T: Send + Sync + 'static>(type_name: impl Into<String>) -> TypeModelBuilder<T> {
        TypeModelBuilder {
            type_name: type_name.into(),
            constructor: None,
            properties: Vec::new(),
            methods: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Describe an abstract type or interface: analyzable, never constructed.
    pub fn abstract_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            instantiable: false,
            constructor: None,
            properties: Vec::new(),
            methods: Vec::new(),
        }
    }

    #[inline]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[inline]
    pub fn is_instantiable(&self) -> bool {
        self.instantiable
    }
}

impl std::fmt::Debug for TypeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeModel")
            .field("type_name", &self.type_name)
            .field("instantiable", &self.instantiable)
            .field("has_constructor", &self.constructor.is_some())
            .field("properties", &self.properties.len())
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Builder pairing declared injection points with their typed closures.
pub struct TypeModelBuilder<T> {
    type_name: String,
    constructor: Option<ConstructorModel>,
    properties: Vec<PropertyModel>,
    methods: Vec<MethodModel>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> TypeModelBuilder<T> {
    /// Declare the constructor: its parameters and the closure that builds
    /// `T` from the resolved [`ArgBag`].
    pub fn constructor<F>(mut self, params: Vec<ParameterPrototype>, build: F) -> Self
    where
        F: Fn(&ArgBag) -> Result<T> + Send + Sync + 'static,
    {
        let build: ConstructFn =
            Arc::new(move |bag| Ok(Box::new(build(bag)?) as Box<dyn Any + Send + Sync>));
        self.constructor = Some(ConstructorModel { params, build });
        self
    }

    /// Declare a parameterless constructor.
    pub fn constructs_with<F>(self, build: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.constructor(Vec::new(), move |_| Ok(build()))
    }

    /// Declare an injectable property and its setter.
    pub fn property<F>(mut self, prototype: PropertyPrototype, inject: F) -> Self
    where
        F: Fn(&mut T, ArgValue) -> Result<()> + Send + Sync + 'static,
    {
        let inject: InjectPropertyFn = Arc::new(move |obj, value| {
            let typed = obj
                .downcast_mut::<T>()
                .ok_or_else(|| DiError::type_mismatch::<T>())?;
            inject(typed, value)
        });
        self.properties.push(PropertyModel { prototype, inject });
        self
    }

    /// Declare an injectable method and the closure that invokes it.
    pub fn method<F>(mut self, prototype: MethodPrototype, invoke: F) -> Self
    where
        F: Fn(&mut T, &ArgBag) -> Result<()> + Send + Sync + 'static,
    {
        let invoke: InvokeMethodFn = Arc::new(move |obj, bag| {
            let typed = obj
                .downcast_mut::<T>()
                .ok_or_else(|| DiError::type_mismatch::<T>())?;
            invoke(typed, bag)
        });
        self.methods.push(MethodModel { prototype, invoke });
        self
    }

    /// Finish the model.
    pub fn build(self) -> TypeModel {
        TypeModel {
            type_name: self.type_name,
            instantiable: true,
            constructor: self.constructor,
            properties: self.properties,
            methods: self.methods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Greeter {
        greeting: String,
        count: u32,
    }

    #[test]
    fn test_constructor_closure_receives_args() {
        let model = TypeModel::of::<Greeter>("test.Greeter")
            .constructor(
                vec![ParameterPrototype::with_default("greeting", json!("hi"))],
                |args| {
                    Ok(Greeter {
                        greeting: args.value("greeting")?,
                        count: 0,
                    })
                },
            )
            .build();

        let ctor = model.constructor.as_ref().unwrap();
        let bag = ArgBag::new(vec![("greeting".into(), ArgValue::Value(json!("hello")))]);
        let mut boxed = (ctor.build)(&bag).unwrap();
        let greeter = boxed.downcast_mut::<Greeter>().unwrap();
        assert_eq!(greeter.greeting, "hello");
    }

    #[test]
    fn test_property_injection_downcasts() {
        let model = TypeModel::of::<Greeter>("test.Greeter")
            .constructs_with(|| Greeter {
                greeting: String::new(),
                count: 0,
            })
            .property(
                PropertyPrototype::with_default("count", json!(7)),
                |obj, value| {
                    if let ArgValue::Value(v) = value {
                        obj.count = serde_json::from_value(v)?;
                    }
                    Ok(())
                },
            )
            .build();

        let mut boxed = (model.constructor.as_ref().unwrap().build)(&ArgBag::new(vec![])).unwrap();
        let prop = &model.properties[0];
        (prop.inject)(boxed.as_mut(), ArgValue::Value(json!(7))).unwrap();
        assert_eq!(boxed.downcast_ref::<Greeter>().unwrap().count, 7);
    }

    #[test]
    fn test_abstract_type_is_not_instantiable() {
        let model = TypeModel::abstract_type("test.Logger");
        assert!(!model.is_instantiable());
        assert!(model.constructor.is_none());
    }

    #[test]
    fn test_arg_bag_service_downcast_mismatch() {
        let instance: Instance = Arc::new(5u32);
        let bag = ArgBag::new(vec![("n".into(), ArgValue::Service(instance))]);
        assert!(bag.service::<String>("n").is_err());
        assert_eq!(*bag.service::<u32>("n").unwrap(), 5);
    }

    #[test]
    fn test_arg_bag_absent() {
        let bag = ArgBag::new(vec![("maybe".into(), ArgValue::Absent)]);
        assert!(bag.is_absent("maybe"));
        assert!(bag.opt_service::<u32>("maybe").is_none());
    }
}

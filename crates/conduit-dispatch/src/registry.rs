//! Target type registry.
//!
//! Every dispatchable type is described by a [`TypeDef`]: an optional
//! constructor plus a set of named methods, each with its parameter schema and
//! a type-erased invoker. Definitions are usually generated by
//! `#[target]`, but can be assembled by hand:
//!
//! ```rust
//! use conduit_dispatch::{into_value, ParamSpec, TypeDef, TypeRegistry};
//!
//! struct Greeter { prefix: String }
//!
//! let def = TypeDef::new("demo")
//!     .constructor(vec![ParamSpec::string("prefix").with_default("Hello")], |mut args| {
//!         Ok(Greeter { prefix: args.take(0)? })
//!     })
//!     .method("greet", vec![ParamSpec::string("name")], |this: &Greeter, mut args| {
//!         let name: String = args.take(0)?;
//!         into_value(format!("{}, {}", this.prefix, name))
//!     });
//!
//! let mut registry = TypeRegistry::new();
//! registry.register(def);
//! assert!(registry.method("demo", "greet").is_some());
//! ```

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use anyhow::anyhow;
use serde_json::Value;

use crate::router::normalize_path;
use crate::value::{Args, Instance, ParamSpec};

/// A Rust type exposed to the dispatcher.
///
/// Implemented by `#[target]`.
pub trait Target: 'static {
    /// Registered type name (`"demo"`, `"billing/invoice"`).
    const NAME: &'static str;

    fn type_def() -> TypeDef;
}

/// Whether a method needs an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    Static,
    Instance,
}

type StaticFn = Rc<dyn Fn(Args) -> anyhow::Result<Value>>;
type MethodFn = Rc<dyn Fn(&Instance, Args) -> anyhow::Result<Value>>;
type BuildFn = Rc<dyn Fn(Args) -> anyhow::Result<Rc<dyn Any>>>;

#[derive(Clone)]
enum Invoke {
    Static(StaticFn),
    Instance(MethodFn),
}

/// A registered method.
#[derive(Clone)]
pub struct MethodDef {
    name: String,
    params: Vec<ParamSpec>,
    invoke: Invoke,
}

impl MethodDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn receiver(&self) -> Receiver {
        match self.invoke {
            Invoke::Static(_) => Receiver::Static,
            Invoke::Instance(_) => Receiver::Instance,
        }
    }

    /// Calls the method. Instance methods fail without a receiver.
    pub fn call(&self, receiver: Option<&Instance>, args: Args) -> anyhow::Result<Value> {
        match (&self.invoke, receiver) {
            (Invoke::Static(f), _) => f(args),
            (Invoke::Instance(f), Some(this)) => f(this, args),
            (Invoke::Instance(_), None) => Err(anyhow!("`{}` requires an instance", self.name)),
        }
    }
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("receiver", &self.receiver())
            .finish()
    }
}

/// A registered constructor.
#[derive(Clone)]
pub struct ConstructorDef {
    params: Vec<ParamSpec>,
    build: BuildFn,
}

impl ConstructorDef {
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub(crate) fn build(&self, args: Args) -> anyhow::Result<Rc<dyn Any>> {
        (self.build)(args)
    }
}

impl fmt::Debug for ConstructorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorDef")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Description of one target type.
#[derive(Clone, Debug)]
pub struct TypeDef {
    name: String,
    constructor: Option<ConstructorDef>,
    methods: HashMap<String, MethodDef>,
}

impl TypeDef {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: normalize_path(name.as_ref()),
            constructor: None,
            methods: HashMap::new(),
        }
    }

    /// Sets the constructor.
    pub fn constructor<T, F>(mut self, params: Vec<ParamSpec>, build: F) -> Self
    where
        T: 'static,
        F: Fn(Args) -> anyhow::Result<T> + 'static,
    {
        self.constructor = Some(ConstructorDef {
            params,
            build: Rc::new(move |args| build(args).map(|value| Rc::new(value) as Rc<dyn Any>)),
        });
        self
    }

    /// Parameterless constructor backed by `Default`.
    pub fn default_constructor<T: Default + 'static>(self) -> Self {
        self.constructor(Vec::new(), |_| Ok(T::default()))
    }

    /// Adds a method invoked on an instance of `T`.
    pub fn method<T, F>(mut self, name: impl Into<String>, params: Vec<ParamSpec>, f: F) -> Self
    where
        T: 'static,
        F: Fn(&T, Args) -> anyhow::Result<Value> + 'static,
    {
        let name = name.into();
        let invoke = Invoke::Instance(Rc::new(move |this: &Instance, args| {
            let this = this.downcast_ref::<T>().ok_or_else(|| {
                anyhow!(
                    "instance of `{}` is not a {}",
                    this.type_name(),
                    type_name::<T>()
                )
            })?;
            f(this, args)
        }));
        self.methods.insert(
            name.clone(),
            MethodDef {
                name,
                params,
                invoke,
            },
        );
        self
    }

    /// Adds a method that needs no instance.
    pub fn static_method<F>(mut self, name: impl Into<String>, params: Vec<ParamSpec>, f: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + 'static,
    {
        let name = name.into();
        self.methods.insert(
            name.clone(),
            MethodDef {
                name,
                params,
                invoke: Invoke::Static(Rc::new(f)),
            },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constructor_def(&self) -> Option<&ConstructorDef> {
        self.constructor.as_ref()
    }

    pub fn method_def(&self, name: &str) -> Option<&MethodDef> {
        self.methods.get(name)
    }

    /// Method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// All known target types, keyed by normalized name.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDef>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition, returning the one it replaced.
    pub fn register(&mut self, def: TypeDef) -> Option<TypeDef> {
        self.types.insert(def.name.clone(), def)
    }

    pub fn register_target<T: Target>(&mut self) -> Option<TypeDef> {
        self.register(T::type_def())
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn method(&self, type_name: &str, method: &str) -> Option<&MethodDef> {
        self.get(type_name).and_then(|def| def.method_def(method))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{into_value, Arg};
    use serde_json::json;

    struct Counter {
        start: i64,
    }

    fn counter_def() -> TypeDef {
        TypeDef::new("/math/counter/")
            .constructor(vec![ParamSpec::int("start").with_default(0)], |mut args| {
                Ok(Counter {
                    start: args.take(0)?,
                })
            })
            .method(
                "plus",
                vec![ParamSpec::int("n")],
                |this: &Counter, mut args| {
                    let n: i64 = args.take(0)?;
                    into_value(this.start + n)
                },
            )
            .static_method("zero", Vec::new(), |_| into_value(0))
    }

    #[test]
    fn test_name_is_normalized() {
        assert_eq!(counter_def().name(), "math/counter");
    }

    #[test]
    fn test_method_receivers() {
        let def = counter_def();
        assert_eq!(def.method_def("plus").unwrap().receiver(), Receiver::Instance);
        assert_eq!(def.method_def("zero").unwrap().receiver(), Receiver::Static);
        assert_eq!(def.method_names(), vec!["plus", "zero"]);
    }

    #[test]
    fn test_call_instance_method() {
        let def = counter_def();
        let ctor = def.constructor_def().unwrap();
        let object = ctor.build(Args::new(vec![Arg::Value(json!(10))])).unwrap();
        let instance = Instance::from_rc("math/counter", object);

        let plus = def.method_def("plus").unwrap();
        let out = plus
            .call(Some(&instance), Args::new(vec![Arg::Value(json!(5))]))
            .unwrap();
        assert_eq!(out, json!(15));
    }

    #[test]
    fn test_instance_method_without_receiver_fails() {
        let def = counter_def();
        let plus = def.method_def("plus").unwrap();
        assert!(plus
            .call(None, Args::new(vec![Arg::Value(json!(1))]))
            .is_err());
    }

    #[test]
    fn test_wrong_instance_type_fails() {
        let def = counter_def();
        let plus = def.method_def("plus").unwrap();
        let wrong = Instance::new("math/counter", "not a counter");
        let err = plus
            .call(Some(&wrong), Args::new(vec![Arg::Value(json!(1))]))
            .unwrap_err();
        assert!(err.to_string().contains("is not a"));
    }

    #[test]
    fn test_registry_replaces() {
        let mut registry = TypeRegistry::new();
        assert!(registry.register(counter_def()).is_none());
        assert!(registry.register(TypeDef::new("math/counter")).is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.method("math/counter", "plus").is_none());
    }
}

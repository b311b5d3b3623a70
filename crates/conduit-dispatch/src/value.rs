//! Parameter schemas and bound argument values.
//!
//! A target's parameters are described by [`ParamSpec`]s carrying a finite
//! [`ParamKind`] tag. The binder turns an [`InputMap`] into [`Args`], a
//! positional list of [`Arg`]s, and generated wrappers pull typed values back
//! out through the [`Param`] trait.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::registry::Target;

/// Flat request payload handed to the dispatcher.
pub type InputMap = Map<String, Value>;

/// Label → value map produced by a dispatch cycle.
pub type ResultMap = Map<String, Value>;

/// The declared kind of a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    Array,
    String,
    Object,
    /// Passed through without coercion.
    Untyped,
    /// An instance of the named target, built by the object factory.
    Service(String),
}

impl ParamKind {
    pub fn is_service(&self) -> bool {
        matches!(self, ParamKind::Service(_))
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Int => write!(f, "int"),
            ParamKind::Float => write!(f, "float"),
            ParamKind::Bool => write!(f, "bool"),
            ParamKind::Array => write!(f, "array"),
            ParamKind::String => write!(f, "string"),
            ParamKind::Object => write!(f, "object"),
            ParamKind::Untyped => write!(f, "mixed"),
            ParamKind::Service(name) => write!(f, "service `{}`", name),
        }
    }
}

/// One method or constructor parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    /// Used when the input map has no (or a `null`) value for `name`.
    pub default: Option<Value>,
    check: Option<fn(&Value) -> bool>,
}

impl PartialEq for ParamSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind && self.default == other.default
    }
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            check: None,
        }
    }

    /// Derives the kind (and implicit default) from a Rust type.
    ///
    /// `Option<T>` parameters get a `null` default, so they never show up as missing.
    pub fn of<T: Param>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: T::kind(),
            default: T::implicit_default(),
            check: Some(T::accepts),
        }
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Int)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Float)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Bool)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::String)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Array)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Object)
    }

    pub fn untyped(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Untyped)
    }

    pub fn service(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Service(target.into()))
    }

    /// Sets the default value.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Restricts coerced values further, e.g. to the range of a `u8`.
    pub fn with_check(mut self, check: fn(&Value) -> bool) -> Self {
        self.check = Some(check);
        self
    }

    /// Whether an already coerced `value` fits the declared Rust type.
    pub fn accepts(&self, value: &Value) -> bool {
        self.check.map_or(true, |check| check(value))
    }
}

/// A constructed target object.
///
/// Cloning is cheap and preserves identity: two handles are the same instance
/// when [`ptr_eq`](Self::ptr_eq) says so.
#[derive(Clone)]
pub struct Instance {
    type_name: Rc<str>,
    object: Rc<dyn Any>,
}

impl Instance {
    /// Wraps a freshly built value.
    pub fn new<T: 'static>(type_name: &str, value: T) -> Self {
        Self::from_rc(type_name, Rc::new(value))
    }

    pub(crate) fn from_rc(type_name: &str, object: Rc<dyn Any>) -> Self {
        Self {
            type_name: Rc::from(type_name),
            object,
        }
    }

    /// Registered name of the target this instance belongs to.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Address of the underlying object, stable for the instance's lifetime.
    pub fn address(&self) -> usize {
        Rc::as_ptr(&self.object) as *const () as usize
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        self.address() == other.address()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    pub fn downcast<T: 'static>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.object).downcast::<T>().ok()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("type_name", &self.type_name)
            .field("address", &format_args!("{:#x}", self.address()))
            .finish()
    }
}

/// One bound argument.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Instance(Instance),
}

impl Arg {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(v) => Some(v),
            Arg::Instance(_) => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Arg::Instance(i) => Some(i),
            Arg::Value(_) => None,
        }
    }
}

/// Errors raised when a wrapper extracts a bound argument.
#[derive(Debug, Error)]
pub enum ArgError {
    #[error("argument #{0} is missing or was already taken")]
    Missing(usize),

    #[error("argument #{index}: {reason}")]
    Invalid { index: usize, reason: String },
}

/// Positional arguments produced by a successful bind.
#[derive(Debug, Default)]
pub struct Args {
    items: Vec<Option<Arg>>,
}

impl Args {
    pub fn new(items: Vec<Arg>) -> Self {
        Self {
            items: items.into_iter().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.items.get(index).and_then(Option::as_ref)
    }

    /// Shortcut for the JSON value at `index`.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.get(index).and_then(Arg::as_value)
    }

    /// Iterates over the arguments that have not been taken yet.
    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.items.iter().flatten()
    }

    /// Moves the argument at `index` out, converted to `T`.
    pub fn take<T: Param>(&mut self, index: usize) -> Result<T, ArgError> {
        let arg = self
            .items
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(ArgError::Missing(index))?;
        T::from_arg(arg).map_err(|reason| ArgError::Invalid { index, reason })
    }
}

/// Rust types that can appear as target parameters.
///
/// The kind tells the binder how to coerce input; `from_arg` turns the bound
/// argument back into the Rust value.
pub trait Param: Sized {
    fn kind() -> ParamKind;

    /// Default used when the parameter declares none.
    fn implicit_default() -> Option<Value> {
        None
    }

    fn from_arg(arg: Arg) -> Result<Self, String>;

    /// Whether a coerced input value converts to `Self`.
    ///
    /// The binder calls this so that out-of-range numbers and malformed
    /// elements are reported as missing instead of failing at call time.
    fn accepts(value: &Value) -> bool {
        Self::from_arg(Arg::Value(value.clone())).is_ok()
    }
}

fn from_json<T: DeserializeOwned>(arg: Arg) -> Result<T, String> {
    match arg {
        Arg::Value(v) => serde_json::from_value(v).map_err(|e| e.to_string()),
        Arg::Instance(i) => Err(format!(
            "expected {}, got an instance of `{}`",
            type_name::<T>(),
            i.type_name()
        )),
    }
}

macro_rules! json_param {
    ($kind:ident => $($ty:ty),+ $(,)?) => {
        $(
            impl Param for $ty {
                fn kind() -> ParamKind {
                    ParamKind::$kind
                }

                fn from_arg(arg: Arg) -> Result<Self, String> {
                    from_json(arg)
                }
            }
        )+
    };
}

json_param!(Int => i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
json_param!(Float => f32, f64);
json_param!(Bool => bool);
json_param!(String => String);
json_param!(Object => Map<String, Value>);
json_param!(Untyped => Value);

impl<T: DeserializeOwned> Param for Vec<T> {
    fn kind() -> ParamKind {
        ParamKind::Array
    }

    fn from_arg(arg: Arg) -> Result<Self, String> {
        from_json(arg)
    }
}

impl<T: DeserializeOwned> Param for HashMap<String, T> {
    fn kind() -> ParamKind {
        ParamKind::Object
    }

    fn from_arg(arg: Arg) -> Result<Self, String> {
        from_json(arg)
    }
}

impl<T: Param> Param for Option<T> {
    fn kind() -> ParamKind {
        T::kind()
    }

    fn implicit_default() -> Option<Value> {
        Some(Value::Null)
    }

    fn from_arg(arg: Arg) -> Result<Self, String> {
        match arg {
            Arg::Value(Value::Null) => Ok(None),
            other => T::from_arg(other).map(Some),
        }
    }
}

impl<T: Target> Param for Rc<T> {
    fn kind() -> ParamKind {
        ParamKind::Service(T::NAME.to_string())
    }

    fn from_arg(arg: Arg) -> Result<Self, String> {
        match arg {
            Arg::Instance(i) => i.downcast::<T>().ok_or_else(|| {
                format!(
                    "instance of `{}` is not a {}",
                    i.type_name(),
                    type_name::<T>()
                )
            }),
            Arg::Value(_) => Err(format!("expected an instance of `{}`", T::NAME)),
        }
    }
}

/// Serializes a target's return value.
pub fn into_value<R: Serialize>(value: R) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

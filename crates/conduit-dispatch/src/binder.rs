//! Schema-driven argument binding.
//!
//! Binding walks a parameter list in declaration order and produces either a
//! complete [`Args`] or an `ArgumentMismatch` naming every parameter that could
//! not be satisfied. It never yields a partial list.
//!
//! Resolution per parameter:
//!
//! 1. service parameters are built by the [`ObjectFactory`]
//! 2. a present, non-null input value is coerced to the declared kind
//! 3. otherwise the default, if any, is used
//!
//! A value that fails coercion, or that the declared Rust type rejects (a
//! `300` for a `u8`), counts as missing; the default does not rescue it.

use serde_json::{Map, Value};

use crate::error::DispatchError;
use crate::factory::ObjectFactory;
use crate::metadata::MethodSignature;
use crate::value::{Arg, Args, InputMap, ParamKind, ParamSpec};

/// Binds parameter lists against an input map.
#[derive(Clone, Copy)]
pub struct Binder<'a> {
    factory: &'a ObjectFactory,
}

impl<'a> Binder<'a> {
    pub fn new(factory: &'a ObjectFactory) -> Self {
        Self { factory }
    }

    pub fn bind_signature(
        &self,
        signature: &MethodSignature,
        input: &InputMap,
    ) -> Result<Args, DispatchError> {
        self.bind(&signature.key(), &signature.params, input)
    }

    /// Binds `params`; `target` names the callee in the error.
    pub fn bind(
        &self,
        target: &str,
        params: &[ParamSpec],
        input: &InputMap,
    ) -> Result<Args, DispatchError> {
        let mut args = Vec::with_capacity(params.len());
        let mut missing = Vec::new();

        for spec in params {
            match self.resolve(target, spec, input) {
                Some(arg) => args.push(arg),
                None => missing.push(spec.name.clone()),
            }
        }

        if missing.is_empty() {
            Ok(Args::new(args))
        } else {
            Err(DispatchError::ArgumentMismatch {
                target: target.to_string(),
                missing,
            })
        }
    }

    fn resolve(&self, target: &str, spec: &ParamSpec, input: &InputMap) -> Option<Arg> {
        if let ParamKind::Service(type_name) = &spec.kind {
            return match self.factory.create(type_name, input) {
                Ok(instance) => Some(Arg::Instance(instance)),
                Err(err) => {
                    tracing::debug!(
                        callee = target,
                        param = %spec.name,
                        error = %err,
                        "service parameter unavailable"
                    );
                    spec.default.clone().map(Arg::Value)
                }
            };
        }

        match input.get(&spec.name).filter(|v| !v.is_null()) {
            None => spec.default.clone().map(Arg::Value),
            Some(value) => {
                let coerced = coerce(&spec.kind, value).filter(|v| spec.accepts(v));
                if coerced.is_none() {
                    tracing::debug!(
                        callee = target,
                        param = %spec.name,
                        expected = %spec.kind,
                        "input value does not coerce"
                    );
                }
                coerced.map(Arg::Value)
            }
        }
    }
}

/// Converts `value` to `kind`, or `None` when it cannot be represented.
///
/// | Kind | Accepts |
/// |------|---------|
/// | int | integers, floats with no fraction, numeric strings |
/// | float | numbers, numeric strings |
/// | bool | booleans |
/// | array | arrays; objects (their values); scalars (wrapped) |
/// | string | strings (trimmed), numbers |
/// | object | objects; arrays (index-keyed) |
/// | mixed | anything |
pub fn coerce(kind: &ParamKind, value: &Value) -> Option<Value> {
    match kind {
        ParamKind::Untyped => Some(value.clone()),
        ParamKind::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| n.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15)
                        .map(|f| f as i64)
                })
                .map(Value::from),
            Value::String(s) => parse_int(s.trim()).map(Value::from),
            _ => None,
        },
        ParamKind::Float => match value {
            Value::Number(n) => n.as_f64().map(Value::from),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from),
            _ => None,
        },
        ParamKind::Bool => value.as_bool().map(Value::Bool),
        ParamKind::String => match value {
            Value::String(s) => Some(Value::String(s.trim().to_string())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            _ => None,
        },
        ParamKind::Array => match value {
            Value::Array(_) => Some(value.clone()),
            Value::Object(map) => Some(Value::Array(map.values().cloned().collect())),
            Value::Null => None,
            scalar => Some(Value::Array(vec![scalar.clone()])),
        },
        ParamKind::Object => match value {
            Value::Object(_) => Some(value.clone()),
            Value::Array(items) => Some(Value::Object(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v.clone()))
                    .collect::<Map<String, Value>>(),
            )),
            _ => None,
        },
        ParamKind::Service(_) => None,
    }
}

fn parse_int(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
            .map(|f| f as i64)
    })
}

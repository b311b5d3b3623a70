//! Memoized method signatures.
//!
//! Looking up a signature walks the [`TypeRegistry`] once; afterwards the same
//! `Rc<MethodSignature>` is handed out for every request on `"type::method"`.
//! The cache is never invalidated: registered types are fixed once the
//! context is built.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::DispatchError;
use crate::registry::{Receiver, TypeRegistry};
use crate::value::ParamSpec;

/// Parameter schema of one method or constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSignature {
    pub owner: String,
    pub method: String,
    pub receiver: Receiver,
    pub params: Vec<ParamSpec>,
}

impl MethodSignature {
    /// Cache key and diagnostic name: `"owner::method"`.
    pub fn key(&self) -> String {
        signature_key(&self.owner, &self.method)
    }

    pub fn is_static(&self) -> bool {
        self.receiver == Receiver::Static
    }

    /// Names of parameters with no default.
    pub fn required(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| !p.has_default() && !p.kind.is_service())
            .map(|p| p.name.as_str())
            .collect()
    }
}

fn signature_key(owner: &str, method: &str) -> String {
    format!("{}::{}", owner, method)
}

/// Signature cache over a fixed registry.
#[derive(Debug, Default)]
pub struct MetadataCache {
    registry: TypeRegistry,
    methods: RefCell<HashMap<String, Rc<MethodSignature>>>,
    constructors: RefCell<HashMap<String, Rc<MethodSignature>>>,
}

impl MetadataCache {
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            methods: RefCell::default(),
            constructors: RefCell::default(),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// True when `type_name::method` is registered. Does not touch the cache.
    pub fn has_method(&self, type_name: &str, method: &str) -> bool {
        self.registry.method(type_name, method).is_some()
    }

    /// Signature of `type_name::method`.
    pub fn signature(
        &self,
        type_name: &str,
        method: &str,
    ) -> Result<Rc<MethodSignature>, DispatchError> {
        let key = signature_key(type_name, method);
        if let Some(hit) = self.methods.borrow().get(&key) {
            return Ok(Rc::clone(hit));
        }

        let def = self
            .registry
            .method(type_name, method)
            .ok_or_else(|| DispatchError::NotFound {
                target: key.clone(),
            })?;
        let signature = Rc::new(MethodSignature {
            owner: type_name.to_string(),
            method: method.to_string(),
            receiver: def.receiver(),
            params: def.params().to_vec(),
        });
        tracing::trace!(signature = %key, "cached method signature");
        self.methods
            .borrow_mut()
            .insert(key, Rc::clone(&signature));
        Ok(signature)
    }

    /// Constructor signature of `type_name`.
    ///
    /// `NotFound` when the type is unknown, `NotConstructible` when it has no
    /// constructor.
    pub fn constructor(&self, type_name: &str) -> Result<Rc<MethodSignature>, DispatchError> {
        if let Some(hit) = self.constructors.borrow().get(type_name) {
            return Ok(Rc::clone(hit));
        }

        let def = self
            .registry
            .get(type_name)
            .ok_or_else(|| DispatchError::NotFound {
                target: type_name.to_string(),
            })?;
        let ctor = def
            .constructor_def()
            .ok_or_else(|| DispatchError::NotConstructible {
                target: type_name.to_string(),
            })?;
        let signature = Rc::new(MethodSignature {
            owner: type_name.to_string(),
            method: "new".to_string(),
            receiver: Receiver::Static,
            params: ctor.params().to_vec(),
        });
        self.constructors
            .borrow_mut()
            .insert(type_name.to_string(), Rc::clone(&signature));
        Ok(signature)
    }

    /// Number of memoized method signatures.
    pub fn cached(&self) -> usize {
        self.methods.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeDef;
    use crate::value::{into_value, ParamKind};

    fn cache() -> MetadataCache {
        let mut registry = TypeRegistry::new();
        registry.register(
            TypeDef::new("demo")
                .default_constructor::<Unit>()
                .method(
                    "greet",
                    vec![ParamSpec::string("name"), ParamSpec::string("punct").with_default("!")],
                    |_: &Unit, _| into_value("hi"),
                ),
        );
        registry.register(TypeDef::new("static").static_method("ping", Vec::new(), |_| {
            into_value("pong")
        }));
        MetadataCache::new(registry)
    }

    #[derive(Default)]
    struct Unit;

    #[test]
    fn test_signature_is_memoized() {
        let cache = cache();
        let a = cache.signature("demo", "greet").unwrap();
        let b = cache.signature("demo", "greet").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.cached(), 1);
        assert_eq!(a.key(), "demo::greet");
        assert_eq!(a.params[0].kind, ParamKind::String);
        assert_eq!(a.required(), vec!["name"]);
        assert!(!a.is_static());
    }

    #[test]
    fn test_unknown_method_not_found() {
        let cache = cache();
        let err = cache.signature("demo", "missing").unwrap_err();
        assert!(matches!(err, DispatchError::NotFound { ref target } if target == "demo::missing"));
        assert_eq!(cache.cached(), 0);
    }

    #[test]
    fn test_constructor_signature() {
        let cache = cache();
        let ctor = cache.constructor("demo").unwrap();
        assert_eq!(ctor.key(), "demo::new");
        assert!(ctor.params.is_empty());

        assert!(matches!(
            cache.constructor("static"),
            Err(DispatchError::NotConstructible { .. })
        ));
        assert!(matches!(
            cache.constructor("nope"),
            Err(DispatchError::NotFound { .. })
        ));
    }

    #[test]
    fn test_static_signature() {
        let cache = cache();
        assert!(cache.signature("static", "ping").unwrap().is_static());
        assert!(cache.has_method("static", "ping"));
    }
}

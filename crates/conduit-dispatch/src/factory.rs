//! Memoizing object factory.
//!
//! Instances are cached by type name plus the canonical form of the bound
//! constructor arguments, so repeated requests with equivalent input share one
//! object while different input yields distinct objects.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::binder::Binder;
use crate::error::{contain_panic, DispatchError};
use crate::metadata::MetadataCache;
use crate::value::{Arg, Args, InputMap, Instance};

/// Builds and caches target instances.
#[derive(Debug)]
pub struct ObjectFactory {
    metadata: MetadataCache,
    instances: RefCell<HashMap<String, Instance>>,
    building: RefCell<Vec<String>>,
}

impl ObjectFactory {
    pub fn new(metadata: MetadataCache) -> Self {
        Self {
            metadata,
            instances: RefCell::default(),
            building: RefCell::default(),
        }
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    pub fn binder(&self) -> Binder<'_> {
        Binder::new(self)
    }

    /// Returns the instance of `type_name` for `input`, building it on first use.
    ///
    /// Constructor parameters are bound from `input`; service parameters
    /// recurse into the factory. A type that (transitively) needs itself fails
    /// with `DependencyCycle`.
    pub fn create(&self, type_name: &str, input: &InputMap) -> Result<Instance, DispatchError> {
        let signature = self.metadata.constructor(type_name)?;

        let args = {
            let _guard = BuildGuard::enter(&self.building, type_name)?;
            self.binder().bind_signature(&signature, input)?
        };

        let key = cache_key(type_name, &args);
        if let Some(hit) = self.instances.borrow().get(&key) {
            return Ok(hit.clone());
        }

        let ctor = self
            .metadata
            .registry()
            .get(type_name)
            .and_then(|def| def.constructor_def())
            .ok_or_else(|| DispatchError::NotConstructible {
                target: type_name.to_string(),
            })?;
        let object = contain_panic(|| ctor.build(args))
            .map_err(|err| DispatchError::invocation(signature.key(), err))?;

        let instance = Instance::from_rc(type_name, object);
        tracing::debug!(
            type_name,
            address = instance.address(),
            "constructed instance"
        );
        self.instances.borrow_mut().insert(key, instance.clone());
        Ok(instance)
    }

    /// Drops every cache entry pointing at `instance`. Returns how many were removed.
    pub fn destroy(&self, instance: &Instance) -> usize {
        let mut instances = self.instances.borrow_mut();
        let before = instances.len();
        instances.retain(|_, cached| !cached.ptr_eq(instance));
        before - instances.len()
    }

    /// Number of cached instances.
    pub fn len(&self) -> usize {
        self.instances.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.instances.borrow_mut().clear();
    }
}

/// `type` for parameterless constructors, `type[arg,...]` otherwise.
fn cache_key(type_name: &str, args: &Args) -> String {
    if args.is_empty() {
        return type_name.to_string();
    }
    let parts: Vec<String> = args
        .iter()
        .map(|arg| match arg {
            // serde_json maps are ordered, so this is canonical
            Arg::Value(value) => value.to_string(),
            Arg::Instance(instance) => {
                format!("@{}#{:x}", instance.type_name(), instance.address())
            }
        })
        .collect();
    format!("{}[{}]", type_name, parts.join(","))
}

/// Marks a type as under construction for the guard's lifetime.
struct BuildGuard<'a> {
    stack: &'a RefCell<Vec<String>>,
}

impl<'a> BuildGuard<'a> {
    fn enter(stack: &'a RefCell<Vec<String>>, type_name: &str) -> Result<Self, DispatchError> {
        let mut building = stack.borrow_mut();
        if building.iter().any(|t| t == type_name) {
            let mut chain = building.clone();
            chain.push(type_name.to_string());
            tracing::warn!(chain = %chain.join(" -> "), "dependency cycle");
            return Err(DispatchError::DependencyCycle {
                target: type_name.to_string(),
                chain,
            });
        }
        building.push(type_name.to_string());
        Ok(Self { stack })
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

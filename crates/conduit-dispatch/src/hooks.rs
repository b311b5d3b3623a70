//! Before/after hooks keyed by path prefix.
//!
//! Hooks let cross-cutting checks run around every invocation without touching
//! target code.
//!
//! # Pipeline position
//!
//! ```text
//! descriptor
//!   → BEFORE hooks ← (auth checks, validation)
//!   → target invocation
//!   → AFTER hooks ← (auditing, cleanup)
//! ```
//!
//! # Matching
//!
//! A hook registered under `/billing` runs for every descriptor whose path
//! (`/billing/invoice/send`) starts with that prefix. Use `/` for a global
//! hook. Matching hooks run in ascending prefix order, then in registration
//! order within one prefix.
//!
//! # Outcome
//!
//! Hook callables bind their parameters from the request input like any
//! target. Returning `null` or `true` lets dispatch continue. Any other
//! value aborts the cycle, as do an error, a panic or an unbindable parameter.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::error::contain_panic;
use crate::factory::ObjectFactory;
use crate::metadata::MethodSignature;
use crate::registry::Receiver;
use crate::value::{Args, InputMap, ParamSpec};

/// When a hook runs relative to the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Before,
    After,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Before => write!(f, "before"),
            HookPhase::After => write!(f, "after"),
        }
    }
}

type CallableFn = Rc<dyn Fn(Args) -> anyhow::Result<Value>>;

/// A named function with a parameter schema.
///
/// Hand-written or generated by `#[callable]`.
#[derive(Clone)]
pub struct Callable {
    name: String,
    params: Vec<ParamSpec>,
    f: CallableFn,
}

impl Callable {
    pub fn new<F>(name: impl Into<String>, params: Vec<ParamSpec>, f: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + 'static,
    {
        Self {
            name: name.into(),
            params,
            f: Rc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn signature(&self) -> MethodSignature {
        MethodSignature {
            owner: "hook".to_string(),
            method: self.name.clone(),
            receiver: Receiver::Static,
            params: self.params.clone(),
        }
    }

    pub fn call(&self, args: Args) -> anyhow::Result<Value> {
        (self.f)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Result of running a hook chain.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    Continue,
    Abort { hook: String, message: String },
}

impl HookOutcome {
    pub fn is_continue(&self) -> bool {
        matches!(self, HookOutcome::Continue)
    }
}

/// Hooks registered per phase and path prefix.
#[derive(Clone, Default)]
pub struct HookRegistry {
    before: BTreeMap<String, Vec<Callable>>,
    after: BTreeMap<String, Vec<Callable>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a before hook.
    ///
    /// ```rust
    /// use conduit_dispatch::{into_value, Callable, HookRegistry, ParamSpec};
    ///
    /// let hooks = HookRegistry::new().before(
    ///     "/admin",
    ///     Callable::new("require_token", vec![ParamSpec::string("token")], |mut args| {
    ///         let token: String = args.take(0)?;
    ///         into_value(token == "s3cret")
    ///     }),
    /// );
    /// assert_eq!(hooks.len(), 1);
    /// ```
    pub fn before(mut self, prefix: impl AsRef<str>, callable: Callable) -> Self {
        self.register(HookPhase::Before, prefix, callable);
        self
    }

    /// Adds an after hook.
    pub fn after(mut self, prefix: impl AsRef<str>, callable: Callable) -> Self {
        self.register(HookPhase::After, prefix, callable);
        self
    }

    pub fn register(
        &mut self,
        phase: HookPhase,
        prefix: impl AsRef<str>,
        callable: Callable,
    ) -> &mut Self {
        let prefix = normalize_prefix(prefix.as_ref());
        self.phase_mut(phase).entry(prefix).or_default().push(callable);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    /// Total number of registered hooks.
    pub fn len(&self) -> usize {
        self.before
            .values()
            .chain(self.after.values())
            .map(Vec::len)
            .sum()
    }

    /// Hooks of `phase` that apply to `path`, in execution order.
    pub fn matching(&self, phase: HookPhase, path: &str) -> Vec<&Callable> {
        self.phase(phase)
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .flat_map(|(_, hooks)| hooks.iter())
            .collect()
    }

    /// Runs the chain for `path`, stopping at the first abort.
    pub fn run(
        &self,
        phase: HookPhase,
        path: &str,
        input: &InputMap,
        factory: &ObjectFactory,
    ) -> HookOutcome {
        for hook in self.matching(phase, path) {
            let args = match factory.binder().bind_signature(&hook.signature(), input) {
                Ok(args) => args,
                Err(err) => return abort(hook, err.to_string()),
            };
            match contain_panic(|| hook.call(args)) {
                Ok(Value::Null) | Ok(Value::Bool(true)) => {
                    tracing::trace!(%phase, path, hook = hook.name(), "hook passed");
                }
                Ok(other) => return abort(hook, format!("returned {}", other)),
                Err(err) => return abort(hook, format!("{:#}", err)),
            }
        }
        HookOutcome::Continue
    }

    fn phase(&self, phase: HookPhase) -> &BTreeMap<String, Vec<Callable>> {
        match phase {
            HookPhase::Before => &self.before,
            HookPhase::After => &self.after,
        }
    }

    fn phase_mut(&mut self, phase: HookPhase) -> &mut BTreeMap<String, Vec<Callable>> {
        match phase {
            HookPhase::Before => &mut self.before,
            HookPhase::After => &mut self.after,
        }
    }
}

fn abort(hook: &Callable, message: String) -> HookOutcome {
    HookOutcome::Abort {
        hook: hook.name().to_string(),
        message,
    }
}

/// `"billing/"` → `"/billing"`, `""` → `"/"`.
fn normalize_prefix(prefix: &str) -> String {
    format!("/{}", crate::router::normalize_path(prefix))
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("before", &self.before.keys().collect::<Vec<_>>())
            .field("after", &self.after.keys().collect::<Vec<_>>())
            .finish()
    }
}

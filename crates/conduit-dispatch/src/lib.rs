//! Command dispatch with schema-driven argument binding.
//!
//! `conduit-dispatch` turns an opaque command string plus a flat input map into
//! validated calls on registered targets, runs before/after hooks around each
//! call, and forwards `cli/...` commands to external processes.
//!
//! # Features
//!
//! - **Routing**: a resolver stack maps `"a/b|c/d"` chains to descriptors
//! - **Binding**: inputs are coerced to each parameter's declared kind, all or nothing
//! - **Factory**: target instances are memoized by their constructor arguments
//! - **Hooks**: prefix-matched interceptors that can abort a cycle
//! - **External commands**: stdin/stdout piping, background mode, timeouts
//!
//! # Usage
//!
//! ```rust
//! use conduit_dispatch::{target, DispatchContext, InputMap};
//! use serde_json::json;
//!
//! pub struct Greeter {
//!     prefix: String,
//! }
//!
//! #[target(name = "demo")]
//! impl Greeter {
//!     pub fn new(#[param(default = "Hello")] prefix: String) -> Self {
//!         Self { prefix }
//!     }
//!
//!     pub fn greet(&self, name: String) -> String {
//!         format!("{}, {}", self.prefix, name)
//!     }
//! }
//!
//! let ctx = DispatchContext::builder().target::<Greeter>().build();
//!
//! let mut input = InputMap::new();
//! input.insert("name".into(), json!("Alice"));
//!
//! let results = ctx.dispatch("demo/greet", &input).unwrap();
//! assert_eq!(results["demo/greet"], "Hello, Alice");
//! ```
//!
//! # Failures
//!
//! A failing descriptor does not stop the cycle. Each failure is handed to the
//! context's [`ErrorSink`] once; the default [`TracingSink`] logs it with
//! `tracing` and carries on. A sink that returns `Err` escalates, and
//! [`DispatchContext::dispatch`] then returns [`DispatchError::Escalated`].
//! Hook aborts are the exception: they end the cycle after being reported.

mod binder;
mod config;
mod context;
mod dispatch;
mod error;
mod external;
mod factory;
mod hooks;
mod metadata;
mod registry;
mod router;
mod value;

pub use binder::{coerce, Binder};

pub use config::{ConfigError, DispatchConfig, ProcessConfig};

pub use context::{DispatchContext, DispatchContextBuilder};

pub use error::{
    CollectingSink, DispatchError, ErrorSink, Failure, FailureKind, TracingSink,
};

pub use external::{command_spec, ARGV_KEY, BACKGROUND_KEY, CAPTURE_KEY, STDIN_KEY};

pub use factory::ObjectFactory;

pub use hooks::{Callable, HookOutcome, HookPhase, HookRegistry};

pub use metadata::{MetadataCache, MethodSignature};

pub use registry::{ConstructorDef, MethodDef, Receiver, Target, TypeDef, TypeRegistry};

pub use router::{
    normalize_path, split_path, CommandDescriptor, DescriptorTarget, Resolution, Resolver,
    RouteScope, Router, RouterSettings,
};

pub use value::{
    into_value, Arg, ArgError, Args, InputMap, Instance, Param, ParamKind, ParamSpec, ResultMap,
};

pub use conduit_macros::{callable, target};

pub use conduit_pipe::{ExternalCommandSpec, ProcessInvoker, ProcessOutput, ProcessRunner};

// Paths used by generated code.
#[doc(hidden)]
pub mod __private {
    pub use anyhow;
    pub use serde_json;
}

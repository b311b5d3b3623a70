//! The dispatch context.
//!
//! A [`DispatchContext`] owns every piece of per-host state: the metadata
//! cache and object factory, the hook registry, the router, the process
//! runner and the error sink. It is built once and then serves any number of
//! dispatch cycles.
//!
//! The context is `!Send`; run one per worker thread.

use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use conduit_pipe::ProcessRunner;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, ErrorSink, Failure, TracingSink};
use crate::factory::ObjectFactory;
use crate::hooks::{Callable, HookPhase, HookRegistry};
use crate::metadata::MetadataCache;
use crate::registry::{Target, TypeDef, TypeRegistry};
use crate::router::{CommandDescriptor, Resolution, Resolver, RouteScope, Router};

/// Per-host dispatch state.
pub struct DispatchContext {
    pub(crate) factory: ObjectFactory,
    pub(crate) hooks: HookRegistry,
    pub(crate) router: Router,
    pub(crate) runner: Box<dyn ProcessRunner>,
    pub(crate) sink: Box<dyn ErrorSink>,
}

impl DispatchContext {
    pub fn builder() -> DispatchContextBuilder {
        DispatchContextBuilder::new()
    }

    pub fn factory(&self) -> &ObjectFactory {
        &self.factory
    }

    pub fn metadata(&self) -> &MetadataCache {
        self.factory.metadata()
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Resolves `raw` without executing anything.
    pub fn resolve(&self, raw: &str) -> Resolution {
        self.router.resolve(raw, self.factory.metadata())
    }

    /// Hands `err` to the sink, turning a refusal into `Escalated`.
    pub fn report(&self, err: DispatchError) -> Result<(), DispatchError> {
        let failure = Failure::from(&err);
        self.sink.report(failure).map_err(DispatchError::Escalated)
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("factory", &self.factory)
            .field("hooks", &self.hooks)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

/// Builder for [`DispatchContext`].
///
/// ```rust
/// use conduit_dispatch::{into_value, DispatchContext, InputMap, TypeDef};
///
/// let ctx = DispatchContext::builder()
///     .type_def(TypeDef::new("health").static_method("ping", Vec::new(), |_| into_value("pong")))
///     .build();
///
/// let results = ctx.dispatch("health/ping", &InputMap::new()).unwrap();
/// assert_eq!(results["health/ping"], "pong");
/// ```
#[derive(Default)]
pub struct DispatchContextBuilder {
    config: DispatchConfig,
    registry: TypeRegistry,
    hooks: HookRegistry,
    resolvers: Vec<Resolver>,
    executables: Vec<(String, PathBuf)>,
    runner: Option<Box<dyn ProcessRunner>>,
    sink: Option<Box<dyn ErrorSink>>,
}

impl DispatchContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router, process and sink settings. Explicit builder calls win.
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a `#[target]` type.
    pub fn target<T: Target>(mut self) -> Self {
        self.registry.register_target::<T>();
        self
    }

    pub fn type_def(mut self, def: TypeDef) -> Self {
        self.registry.register(def);
        self
    }

    pub fn hook(mut self, phase: HookPhase, prefix: impl AsRef<str>, callable: Callable) -> Self {
        self.hooks.register(phase, prefix, callable);
        self
    }

    pub fn before(self, prefix: impl AsRef<str>, callable: Callable) -> Self {
        self.hook(HookPhase::Before, prefix, callable)
    }

    pub fn after(self, prefix: impl AsRef<str>, callable: Callable) -> Self {
        self.hook(HookPhase::After, prefix, callable)
    }

    /// Adds a resolver above every resolver added so far.
    pub fn prepend_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str, &RouteScope<'_>) -> Vec<CommandDescriptor> + 'static,
    {
        self.resolvers.push(Rc::new(resolver));
        self
    }

    /// Adds a shared resolver such as [`Router::trailing_argument`].
    pub fn resolver(mut self, resolver: Resolver) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Maps `cli/<name>` to `path`.
    pub fn executable(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.executables.push((name.into(), path.into()));
        self
    }

    /// Replaces the process runner built from the config.
    pub fn runner(mut self, runner: impl ProcessRunner + 'static) -> Self {
        self.runner = Some(Box::new(runner));
        self
    }

    /// Replaces the default [`TracingSink`].
    pub fn sink(mut self, sink: impl ErrorSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn build(self) -> DispatchContext {
        let mut router = Router::from_config(&self.config);
        for (name, path) in self.executables {
            router.executable(name, path);
        }
        for resolver in self.resolvers {
            router.prepend_resolver(resolver);
        }

        let runner = match self.runner {
            Some(runner) => runner,
            None => Box::new(self.config.process.invoker()),
        };
        let sink = match self.sink {
            Some(sink) => sink,
            None => Box::new(TracingSink::with_escalation(self.config.escalate_failures)),
        };

        tracing::debug!(
            types = self.registry.len(),
            hooks = self.hooks.len(),
            "dispatch context built"
        );

        DispatchContext {
            factory: ObjectFactory::new(MetadataCache::new(self.registry)),
            hooks: self.hooks,
            router,
            runner,
            sink,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CollectingSink, FailureKind};
    use crate::value::into_value;

    #[test]
    fn test_builder_wires_config() {
        let config = DispatchConfig::from_yaml_str("api_root: v1\nexecutables:\n  cat: /bin/cat\n")
            .unwrap();
        let ctx = DispatchContext::builder()
            .config(config)
            .executable("echo", "/bin/echo")
            .build();
        assert_eq!(ctx.router().settings().api_root, "v1");
        assert_eq!(ctx.router().executables().len(), 2);
    }

    #[test]
    fn test_report_goes_through_sink() {
        let sink = Rc::new(CollectingSink::new());
        let ctx = DispatchContext::builder().sink(sink.clone()).build();
        ctx.report(DispatchError::NotFound {
            target: "a/b".into(),
        })
        .unwrap();
        assert_eq!(sink.kinds(), vec![FailureKind::NotFound]);
    }

    #[test]
    fn test_escalating_config_uses_escalating_sink() {
        let config = DispatchConfig {
            escalate_failures: true,
            ..DispatchConfig::default()
        };
        let ctx = DispatchContext::builder().config(config).build();
        let err = ctx
            .report(DispatchError::NotFound {
                target: "a/b".into(),
            })
            .unwrap_err();
        assert!(err.is_escalated());
    }

    #[test]
    fn test_later_resolver_runs_first() {
        let ctx = DispatchContext::builder()
            .type_def(
                TypeDef::new("t")
                    .static_method("one", Vec::new(), |_| into_value(1))
                    .static_method("two", Vec::new(), |_| into_value(2)),
            )
            .prepend_resolver(|raw, _| vec![CommandDescriptor::method(raw, "t", "one")])
            .prepend_resolver(|raw, _| vec![CommandDescriptor::method(raw, "t", "two")])
            .build();
        let res = ctx.resolve("anything");
        assert_eq!(res.descriptors[0].label, "t/two");
    }
}

//! The dispatch loop.
//!
//! ```text
//! raw command + input
//!   → Router           → [descriptor, ...]
//!   → per descriptor, in order:
//!       before hooks   (abort ends the cycle)
//!       factory/binder (instance + args)
//!       invocation     (errors and panics are contained)
//!       after hooks    (abort ends the cycle)
//!   → result map keyed by descriptor label
//! ```
//!
//! Every failure goes to the context's error sink exactly once; the cycle only
//! returns `Err` when the sink escalates.

use std::borrow::Cow;
use std::path::Path;

use serde_json::Value;

use crate::context::DispatchContext;
use crate::error::{contain_panic, DispatchError};
use crate::external::command_spec;
use crate::hooks::{HookOutcome, HookPhase};
use crate::registry::Receiver;
use crate::router::{CommandDescriptor, DescriptorTarget};
use crate::value::{InputMap, ResultMap};

impl DispatchContext {
    /// Resolves `raw` and executes the resulting descriptors.
    ///
    /// Unmapped chain segments are reported as `NotFound` and skipped.
    pub fn dispatch(&self, raw: &str, input: &InputMap) -> Result<ResultMap, DispatchError> {
        let resolution = self.resolve(raw);
        for diagnostic in resolution.diagnostics {
            self.report(diagnostic)?;
        }
        self.execute(&resolution.descriptors, input)
    }

    /// Executes `descriptors` in order against `input`.
    ///
    /// Non-null results are stored under each descriptor's label; a later
    /// descriptor with the same label overwrites the earlier result.
    pub fn execute(
        &self,
        descriptors: &[CommandDescriptor],
        input: &InputMap,
    ) -> Result<ResultMap, DispatchError> {
        let mut results = ResultMap::new();

        for descriptor in descriptors {
            let input = scoped_input(descriptor, input);
            let path = descriptor.hook_path();

            if let HookOutcome::Abort { hook, message } =
                self.hooks
                    .run(HookPhase::Before, &path, &input, &self.factory)
            {
                self.report(hook_failure(descriptor, HookPhase::Before, hook, message))?;
                break;
            }

            match self.invoke(descriptor, &input) {
                Ok(Value::Null) => {
                    tracing::debug!(label = %descriptor.label, "no result to store");
                }
                Ok(value) => {
                    if results.insert(descriptor.label.clone(), value).is_some() {
                        tracing::debug!(label = %descriptor.label, "result overwritten");
                    }
                }
                Err(err) if err.is_escalated() => return Err(err),
                Err(err) => {
                    self.report(err)?;
                    continue;
                }
            }

            if let HookOutcome::Abort { hook, message } =
                self.hooks.run(HookPhase::After, &path, &input, &self.factory)
            {
                self.report(hook_failure(descriptor, HookPhase::After, hook, message))?;
                break;
            }
        }

        Ok(results)
    }

    fn invoke(&self, descriptor: &CommandDescriptor, input: &InputMap) -> Result<Value, DispatchError> {
        match &descriptor.target {
            DescriptorTarget::Method { type_name, method } => {
                self.invoke_method(&descriptor.label, type_name, method, input)
            }
            DescriptorTarget::External { executable, .. } => {
                self.invoke_external(&descriptor.label, executable, input)
            }
        }
    }

    fn invoke_method(
        &self,
        label: &str,
        type_name: &str,
        method: &str,
        input: &InputMap,
    ) -> Result<Value, DispatchError> {
        let metadata = self.factory.metadata();
        let signature = metadata.signature(type_name, method)?;
        let def = metadata
            .registry()
            .method(type_name, method)
            .ok_or_else(|| DispatchError::NotFound {
                target: signature.key(),
            })?;

        let receiver = match signature.receiver {
            Receiver::Static => None,
            Receiver::Instance => Some(self.factory.create(type_name, input)?),
        };
        let args = self.factory.binder().bind_signature(&signature, input)?;

        tracing::debug!(label, signature = %signature.key(), args = args.len(), "invoking");
        contain_panic(|| def.call(receiver.as_ref(), args))
            .map_err(|err| DispatchError::invocation(label, err))
    }

    fn invoke_external(
        &self,
        label: &str,
        executable: &Path,
        input: &InputMap,
    ) -> Result<Value, DispatchError> {
        let spec = command_spec(label, executable, input)?;
        let output = self
            .runner
            .run(&spec)
            .map_err(|source| DispatchError::Process {
                target: label.to_string(),
                source,
            })?;

        if output.detached {
            tracing::info!(label, pid = output.pid, "started in background");
            return Ok(Value::Null);
        }

        if output.timed_out {
            let budget_ms = self
                .runner
                .timeout()
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default();
            self.report(DispatchError::ProcessTimeout {
                target: label.to_string(),
                budget_ms,
            })?;
            let partial = output.trimmed();
            return Ok(if spec.capture && !partial.is_empty() {
                Value::String(partial.to_string())
            } else {
                Value::Null
            });
        }

        if !output.success() {
            tracing::warn!(label, pid = output.pid, exit_code = ?output.exit_code, "command exited unsuccessfully");
        }

        Ok(if spec.capture {
            Value::String(output.trimmed().to_string())
        } else {
            Value::Null
        })
    }
}

/// Request input with the descriptor's bound values layered on top.
fn scoped_input<'a>(descriptor: &CommandDescriptor, input: &'a InputMap) -> Cow<'a, InputMap> {
    if descriptor.bound.is_empty() {
        return Cow::Borrowed(input);
    }
    let mut merged = input.clone();
    for (key, value) in &descriptor.bound {
        merged.insert(key.clone(), value.clone());
    }
    Cow::Owned(merged)
}

fn hook_failure(
    descriptor: &CommandDescriptor,
    phase: HookPhase,
    hook: String,
    message: String,
) -> DispatchError {
    DispatchError::Hook {
        target: descriptor.label.clone(),
        hook,
        phase,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CollectingSink, FailureKind};
    use crate::registry::TypeDef;
    use crate::value::{into_value, ParamSpec};
    use conduit_pipe::{ExternalCommandSpec, ProcessError, ProcessOutput, ProcessRunner};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn input(value: Value) -> InputMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    struct Greeter {
        prefix: String,
    }

    fn greeter() -> TypeDef {
        TypeDef::new("demo")
            .constructor(
                vec![ParamSpec::string("prefix").with_default("Hello")],
                |mut args| {
                    Ok(Greeter {
                        prefix: args.take(0)?,
                    })
                },
            )
            .method(
                "greet",
                vec![ParamSpec::string("name")],
                |this: &Greeter, mut args| {
                    let name: String = args.take(0)?;
                    into_value(format!("{}, {}", this.prefix, name))
                },
            )
            .static_method("nothing", Vec::new(), |_| Ok(Value::Null))
            .static_method("panics", Vec::new(), |_| panic!("boom"))
    }

    #[derive(Default)]
    struct FakeRunner {
        seen: RefCell<Vec<ExternalCommandSpec>>,
        output: ProcessOutput,
    }

    impl ProcessRunner for FakeRunner {
        fn run(&self, spec: &ExternalCommandSpec) -> Result<ProcessOutput, ProcessError> {
            self.seen.borrow_mut().push(spec.clone());
            Ok(self.output.clone())
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }
    }

    #[test]
    fn test_null_result_not_stored() {
        let ctx = DispatchContext::builder().type_def(greeter()).build();
        let results = ctx.dispatch("demo/nothing", &InputMap::new()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_panic_is_contained() {
        let sink = Rc::new(CollectingSink::new());
        let ctx = DispatchContext::builder()
            .type_def(greeter())
            .sink(sink.clone())
            .build();
        let results = ctx
            .dispatch("demo/panics|demo/greet", &input(json!({"name": "Bo"})))
            .unwrap();
        assert_eq!(results["demo/greet"], json!("Hello, Bo"));
        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::InvocationFailure);
        assert!(failures[0].message.contains("boom"));
    }

    #[test]
    fn test_bound_input_overrides_request() {
        let ctx = DispatchContext::builder().type_def(greeter()).build();
        let descriptor = CommandDescriptor::method("demo/greet", "demo", "greet").bind("name", "Cy");
        let results = ctx
            .execute(&[descriptor], &input(json!({"name": "ignored"})))
            .unwrap();
        assert_eq!(results["demo/greet"], json!("Hello, Cy"));
    }

    #[test]
    fn test_last_writer_wins() {
        let ctx = DispatchContext::builder().type_def(greeter()).build();
        let first = CommandDescriptor::method("demo/greet", "demo", "greet").bind("name", "A");
        let second = CommandDescriptor::method("demo/greet", "demo", "greet").bind("name", "B");
        let results = ctx.execute(&[first, second], &InputMap::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results["demo/greet"], json!("Hello, B"));
    }

    #[test]
    fn test_external_uses_runner() {
        let runner = Rc::new(FakeRunner {
            output: ProcessOutput {
                pid: 7,
                stdout: "hi\n".into(),
                exit_code: Some(0),
                ..ProcessOutput::default()
            },
            ..FakeRunner::default()
        });
        let ctx = DispatchContext::builder()
            .executable("cat", "/bin/cat")
            .runner(runner.clone())
            .build();
        let results = ctx
            .dispatch("cli/cat", &input(json!({"stdin": "hi", "argv": ["-u"]})))
            .unwrap();
        assert_eq!(results["cli/cat"], json!("hi"));

        let seen = runner.seen.borrow();
        assert_eq!(seen[0].label, "cli/cat");
        assert_eq!(seen[0].stdin, "hi");
        assert_eq!(seen[0].argv, vec!["-u"]);
    }

    #[test]
    fn test_timeout_reported_and_partial_kept() {
        let runner = Rc::new(FakeRunner {
            output: ProcessOutput {
                pid: 9,
                stdout: "early\n".into(),
                timed_out: true,
                ..ProcessOutput::default()
            },
            ..FakeRunner::default()
        });
        let sink = Rc::new(CollectingSink::new());
        let ctx = DispatchContext::builder()
            .executable("slow", "/usr/bin/slow")
            .runner(runner)
            .sink(sink.clone())
            .build();
        let results = ctx.dispatch("cli/slow", &InputMap::new()).unwrap();
        assert_eq!(results["cli/slow"], json!("early"));
        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::ProcessTimeout);
        assert!(failures[0].message.contains("20ms"));
    }

    #[test]
    fn test_background_stores_nothing() {
        let runner = Rc::new(FakeRunner {
            output: ProcessOutput {
                pid: 11,
                detached: true,
                ..ProcessOutput::default()
            },
            ..FakeRunner::default()
        });
        let ctx = DispatchContext::builder()
            .executable("daemon", "/usr/bin/daemon")
            .runner(runner.clone())
            .build();
        let results = ctx
            .dispatch("cli/daemon", &input(json!({"background": true})))
            .unwrap();
        assert!(results.is_empty());
        assert!(runner.seen.borrow()[0].background);
    }

    #[test]
    fn test_escalation_stops_cycle() {
        let sink = Rc::new(CollectingSink::escalating());
        let ctx = DispatchContext::builder()
            .type_def(greeter())
            .sink(sink.clone())
            .build();
        let err = ctx
            .dispatch("demo/greet|demo/nothing", &InputMap::new())
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ArgumentMismatch);
        assert_eq!(sink.len(), 1);
    }
}

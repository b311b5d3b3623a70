//! Dispatch errors and the failure reporting seam.
//!
//! Per-descriptor failures never abort a dispatch cycle on their own. The
//! dispatcher converts each [`DispatchError`] into a [`Failure`] record and
//! hands it to the context's [`ErrorSink`]; only a sink that refuses the
//! failure (escalation) ends the cycle early.

use std::any::Any;
use std::cell::RefCell;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use conduit_pipe::ProcessError;
use thiserror::Error;

use crate::hooks::HookPhase;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors produced while routing, binding and invoking.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("`{target}` not found")]
    NotFound { target: String },

    #[error("`{target}`: cannot bind [{}]", .missing.join(", "))]
    ArgumentMismatch { target: String, missing: Vec<String> },

    #[error("`{target}` has no constructor")]
    NotConstructible { target: String },

    #[error("dependency cycle while constructing `{target}`: {}", .chain.join(" -> "))]
    DependencyCycle { target: String, chain: Vec<String> },

    #[error("`{target}` failed: {source}")]
    Invocation {
        target: String,
        #[source]
        source: BoxError,
    },

    #[error("{phase} hook `{hook}` aborted `{target}`: {message}")]
    Hook {
        target: String,
        hook: String,
        phase: HookPhase,
        message: String,
    },

    #[error("`{target}`: {source}")]
    Process {
        target: String,
        #[source]
        source: ProcessError,
    },

    #[error("`{target}` timed out after {budget_ms}ms")]
    ProcessTimeout { target: String, budget_ms: u64 },

    #[error("dispatch aborted by {}: {}", .0.kind, .0.message)]
    Escalated(Failure),
}

impl DispatchError {
    pub fn invocation(target: impl Into<String>, source: impl Into<BoxError>) -> Self {
        DispatchError::Invocation {
            target: target.into(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::NotFound { .. } | DispatchError::NotConstructible { .. } => {
                FailureKind::NotFound
            }
            DispatchError::ArgumentMismatch { .. } | DispatchError::DependencyCycle { .. } => {
                FailureKind::ArgumentMismatch
            }
            DispatchError::Invocation { .. } => FailureKind::InvocationFailure,
            DispatchError::Hook { .. } => FailureKind::HookFailure,
            DispatchError::Process { source, .. } => match source {
                ProcessError::Spawn { .. } | ProcessError::LogFile { .. } => {
                    FailureKind::ProcessSpawnFailure
                }
                ProcessError::Io(_) | ProcessError::InvalidUtf8(_) => {
                    FailureKind::InvocationFailure
                }
            },
            DispatchError::ProcessTimeout { .. } => FailureKind::ProcessTimeout,
            DispatchError::Escalated(failure) => failure.kind,
        }
    }

    /// The label, path or type the error is about.
    pub fn target(&self) -> &str {
        match self {
            DispatchError::NotFound { target }
            | DispatchError::ArgumentMismatch { target, .. }
            | DispatchError::NotConstructible { target }
            | DispatchError::DependencyCycle { target, .. }
            | DispatchError::Invocation { target, .. }
            | DispatchError::Hook { target, .. }
            | DispatchError::Process { target, .. }
            | DispatchError::ProcessTimeout { target, .. } => target,
            DispatchError::Escalated(failure) => &failure.target,
        }
    }

    pub fn is_escalated(&self) -> bool {
        matches!(self, DispatchError::Escalated(_))
    }
}

/// Failure categories reported to an [`ErrorSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NotFound,
    ArgumentMismatch,
    InvocationFailure,
    HookFailure,
    ProcessSpawnFailure,
    ProcessTimeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::NotFound => "not-found",
            FailureKind::ArgumentMismatch => "argument-mismatch",
            FailureKind::InvocationFailure => "invocation-failure",
            FailureKind::HookFailure => "hook-failure",
            FailureKind::ProcessSpawnFailure => "process-spawn-failure",
            FailureKind::ProcessTimeout => "process-timeout",
        };
        f.write_str(name)
    }
}

/// A reported failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub target: String,
    pub message: String,
    /// Messages of the error's `source()` chain, outermost first.
    pub trace: Vec<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            message: message.into(),
            trace: Vec::new(),
        }
    }
}

impl From<&DispatchError> for Failure {
    fn from(err: &DispatchError) -> Self {
        if let DispatchError::Escalated(failure) = err {
            return failure.clone();
        }
        let mut trace = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push(cause.to_string());
            source = cause.source();
        }
        Failure {
            kind: err.kind(),
            target: err.target().to_string(),
            message: err.to_string(),
            trace,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Receives per-descriptor failures.
///
/// Returning `Err` escalates: the dispatcher stops and returns
/// [`DispatchError::Escalated`] to its caller.
pub trait ErrorSink {
    fn report(&self, failure: Failure) -> Result<(), Failure>;
}

impl<S: ErrorSink + ?Sized> ErrorSink for Rc<S> {
    fn report(&self, failure: Failure) -> Result<(), Failure> {
        (**self).report(failure)
    }
}

impl<S: ErrorSink + ?Sized> ErrorSink for Box<S> {
    fn report(&self, failure: Failure) -> Result<(), Failure> {
        (**self).report(failure)
    }
}

/// Logs failures through `tracing`, optionally escalating them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    escalate: bool,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn escalating() -> Self {
        Self { escalate: true }
    }

    pub fn with_escalation(escalate: bool) -> Self {
        Self { escalate }
    }
}

impl ErrorSink for TracingSink {
    fn report(&self, failure: Failure) -> Result<(), Failure> {
        tracing::warn!(
            kind = %failure.kind,
            subject = %failure.target,
            trace = ?failure.trace,
            "{}",
            failure.message
        );
        if self.escalate {
            Err(failure)
        } else {
            Ok(())
        }
    }
}

/// Records failures in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    failures: RefCell<Vec<Failure>>,
    escalate: bool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the failure and then escalates it.
    pub fn escalating() -> Self {
        Self {
            failures: RefCell::default(),
            escalate: true,
        }
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.failures.borrow().clone()
    }

    pub fn kinds(&self) -> Vec<FailureKind> {
        self.failures.borrow().iter().map(|f| f.kind).collect()
    }

    pub fn count(&self, kind: FailureKind) -> usize {
        self.failures
            .borrow()
            .iter()
            .filter(|f| f.kind == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.failures.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.borrow().is_empty()
    }

    pub fn take(&self) -> Vec<Failure> {
        self.failures.take()
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, failure: Failure) -> Result<(), Failure> {
        self.failures.borrow_mut().push(failure.clone());
        if self.escalate {
            Err(failure)
        } else {
            Ok(())
        }
    }
}

/// Runs user code, turning a panic into an error (`panicked: <msg>`).
pub(crate) fn contain_panic<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

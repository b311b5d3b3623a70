use std::rc::Rc;
use std::time::Duration;

use crate::command::{ExternalCommandSpec, ProcessOutput};
use crate::shell::ProcessError;

/// Something that can run an [`ExternalCommandSpec`].
///
/// [`ProcessInvoker`](crate::ProcessInvoker) spawns real processes. Hosts and
/// tests can substitute their own runner.
pub trait ProcessRunner {
    /// Run the command and return what the child produced.
    ///
    /// In [`PipeMode::Capture`] the returned stdout is the child's output.
    /// In [`PipeMode::Discard`] stdout is empty.
    /// In [`PipeMode::Background`] only the pid is meaningful.
    fn run(&self, spec: &ExternalCommandSpec) -> Result<ProcessOutput, ProcessError>;

    /// Read budget for synchronous commands, if any.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeMode {
    /// Feed stdin, read stdout to EOF and return it.
    Capture,
    /// Feed stdin, drain stdout without keeping it.
    Discard,
    /// Detach the child with all stdio discarded and return immediately.
    Background,
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for Box<R> {
    fn run(&self, spec: &ExternalCommandSpec) -> Result<ProcessOutput, ProcessError> {
        (**self).run(spec)
    }

    fn timeout(&self) -> Option<Duration> {
        (**self).timeout()
    }
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for Rc<R> {
    fn run(&self, spec: &ExternalCommandSpec) -> Result<ProcessOutput, ProcessError> {
        (**self).run(spec)
    }

    fn timeout(&self) -> Option<Duration> {
        (**self).timeout()
    }
}

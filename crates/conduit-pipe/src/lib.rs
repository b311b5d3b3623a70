//! External process invocation for conduit.
//!
//! Commands that are mapped to OS executables are described by an
//! [`ExternalCommandSpec`] and handed to a [`ProcessRunner`]. The stock runner,
//! [`ProcessInvoker`], supports three modes:
//!
//! - **Capture**: stdin is fed, stdout is read to EOF and returned.
//! - **Discard**: same pipes, but stdout is drained and thrown away.
//! - **Background**: the child is detached from the caller and never waited on.
//!
//! Stderr of synchronous children is appended to a [`DailyLog`] file when one
//! is configured.
//!
//! # Example
//!
//! ```no_run
//! use conduit_pipe::{ExternalCommandSpec, ProcessInvoker, ProcessRunner};
//!
//! let invoker = ProcessInvoker::new();
//! let spec = ExternalCommandSpec::new("cli/cat", "cat").stdin("hi");
//! let output = invoker.run(&spec)?;
//! assert_eq!(output.trimmed(), "hi");
//! # Ok::<(), conduit_pipe::ProcessError>(())
//! ```

pub mod command;
pub mod log;
pub mod pipe;
pub mod platform;
pub mod shell;

pub use command::{ExternalCommandSpec, ProcessOutput};
pub use log::DailyLog;
pub use pipe::{PipeMode, ProcessRunner};
pub use platform::OsStrategy;
pub use shell::{ProcessError, ProcessInvoker, MIN_POLL_INTERVAL};

//! Command descriptions and results exchanged with a [`ProcessRunner`](crate::ProcessRunner).

use std::path::PathBuf;

use crate::pipe::PipeMode;

/// One external command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommandSpec {
    /// Label the result is reported under.
    pub label: String,
    /// Resolved path (or bare name) of the executable.
    pub executable: PathBuf,
    /// Arguments forwarded after the executable.
    pub argv: Vec<String>,
    /// Payload written to the child's stdin before it is closed.
    pub stdin: String,
    /// Detach the child instead of waiting on it.
    pub background: bool,
    /// Return the child's stdout.
    pub capture: bool,
}

impl ExternalCommandSpec {
    /// Creates a capturing, foreground spec with no arguments.
    pub fn new(label: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            executable: executable.into(),
            argv: Vec::new(),
            stdin: String::new(),
            background: false,
            capture: true,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the stdin payload.
    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = payload.into();
        self
    }

    /// Runs the child detached.
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Toggles stdout capture.
    pub fn capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    /// The effective pipe mode. Background wins over capture.
    pub fn mode(&self) -> PipeMode {
        if self.background {
            PipeMode::Background
        } else if self.capture {
            PipeMode::Capture
        } else {
            PipeMode::Discard
        }
    }
}

/// What came back from a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// OS process id.
    pub pid: u32,
    /// Captured stdout (empty unless capturing). Partial when `timed_out`.
    pub stdout: String,
    /// Exit code, when the child was waited on and exited normally.
    pub exit_code: Option<i32>,
    /// The read budget ran out before the child finished. The child keeps running.
    pub timed_out: bool,
    /// The child was started in the background and never waited on.
    pub detached: bool,
}

impl ProcessOutput {
    pub(crate) fn detached(pid: u32) -> Self {
        Self {
            pid,
            detached: true,
            ..Self::default()
        }
    }

    /// Stdout with surrounding whitespace removed.
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// True when the child exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

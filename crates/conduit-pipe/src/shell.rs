use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use wait_timeout::ChildExt;

use crate::command::{ExternalCommandSpec, ProcessOutput};
use crate::log::DailyLog;
use crate::pipe::{PipeMode, ProcessRunner};
use crate::platform::{self, OsStrategy};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{label}`: {source}")]
    Spawn {
        label: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Command output was not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Lower bound for the timeout poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Spawns external commands.
///
/// Without a shell profile the executable is spawned directly and argv is
/// passed as-is. With a profile, the [`OsStrategy`] builds a quoted command
/// line that sources the profile first and the platform shell runs it.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    strategy: &'static OsStrategy,
    log: Option<DailyLog>,
    shell_profile: Option<String>,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self {
            strategy: OsStrategy::current(),
            log: None,
            shell_profile: None,
            timeout: None,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Appends child stderr to a daily log in `dir`.
    pub fn with_log(mut self, log: DailyLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Sources `profile` before every command.
    pub fn with_shell_profile(mut self, profile: impl Into<String>) -> Self {
        self.shell_profile = Some(profile.into());
        self
    }

    /// Stop waiting after `timeout`. The child is left running.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// How often liveness is checked while a timeout budget is active.
    ///
    /// Clamped to at least [`MIN_POLL_INTERVAL`].
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Uses the command line rules of another OS.
    pub fn with_strategy(mut self, os: &str) -> Self {
        self.strategy = OsStrategy::for_os(os);
        self
    }

    /// The full command line a shell would run for `spec`.
    pub fn command_line(&self, spec: &ExternalCommandSpec) -> String {
        self.strategy.command_line(
            &spec.executable.to_string_lossy(),
            &spec.argv,
            self.shell_profile.as_deref(),
        )
    }

    fn build_command(&self, spec: &ExternalCommandSpec) -> Command {
        match &self.shell_profile {
            Some(_) => {
                let mut cmd = Command::new(self.strategy.shell);
                cmd.arg(self.strategy.shell_flag);
                shell_line_arg(&mut cmd, self.command_line(spec));
                cmd
            }
            None => {
                let mut cmd = Command::new(&spec.executable);
                cmd.args(&spec.argv);
                cmd
            }
        }
    }

    fn spawn(&self, spec: &ExternalCommandSpec, mut cmd: Command) -> Result<Child, ProcessError> {
        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            label: spec.label.clone(),
            source,
        })?;
        tracing::debug!(label = %spec.label, pid = child.id(), mode = ?spec.mode(), "spawned external command");
        Ok(child)
    }

    fn run_detached(&self, spec: &ExternalCommandSpec) -> Result<ProcessOutput, ProcessError> {
        let mut cmd = self.build_command(spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        platform::detach(&mut cmd);

        let child = self.spawn(spec, cmd)?;
        let pid = child.id();
        reap_in_background(child);
        Ok(ProcessOutput::detached(pid))
    }

    fn stderr_target(&self) -> Result<Stdio, ProcessError> {
        match &self.log {
            Some(log) => log
                .open()
                .map(Stdio::from)
                .map_err(|source| ProcessError::LogFile {
                    path: log.current_path(),
                    source,
                }),
            None => Ok(Stdio::null()),
        }
    }

    fn run_piped(&self, spec: &ExternalCommandSpec) -> Result<ProcessOutput, ProcessError> {
        let mut cmd = self.build_command(spec);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(self.stderr_target()?);

        let mut child = self.spawn(spec, cmd)?;
        let pid = child.id();
        let writer = child
            .stdin
            .take()
            .map(|stdin| feed_stdin(stdin, spec.stdin.clone().into_bytes()));
        let stdout = child.stdout.take();
        let capture = spec.mode() == PipeMode::Capture;

        match self.timeout {
            None => {
                let mut buffer = Vec::new();
                let read = match stdout {
                    Some(mut stdout) if capture => stdout.read_to_end(&mut buffer).map(drop),
                    Some(mut stdout) => io::copy(&mut stdout, &mut io::sink()).map(drop),
                    None => Ok(()),
                };
                join_writer(writer);
                let status = wait_then(&mut child, read)?;
                Ok(ProcessOutput {
                    pid,
                    stdout: String::from_utf8(buffer)?,
                    exit_code: status.code(),
                    ..ProcessOutput::default()
                })
            }
            Some(budget) => {
                let reader = stdout.map(|stdout| StdoutReader::spawn(stdout, capture));
                self.wait_within(spec, child, pid, reader, writer, budget)
            }
        }
    }

    fn wait_within(
        &self,
        spec: &ExternalCommandSpec,
        mut child: Child,
        pid: u32,
        reader: Option<StdoutReader>,
        writer: Option<JoinHandle<io::Result<()>>>,
        budget: Duration,
    ) -> Result<ProcessOutput, ProcessError> {
        let started = Instant::now();
        let status = loop {
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break None;
            }
            if let Some(status) = child.wait_timeout(self.poll_interval.min(remaining))? {
                break Some(status);
            }
        };

        let drained = match &reader {
            Some(reader) if status.is_some() => {
                let remaining = budget.saturating_sub(started.elapsed());
                reader.wait_done(remaining.max(self.poll_interval))
            }
            Some(_) => false,
            None => true,
        };
        let stdout = reader.map(|r| r.snapshot()).unwrap_or_default();

        match status {
            Some(status) if drained => {
                join_writer(writer);
                Ok(ProcessOutput {
                    pid,
                    stdout,
                    exit_code: status.code(),
                    ..ProcessOutput::default()
                })
            }
            _ => {
                tracing::warn!(
                    label = %spec.label,
                    pid,
                    budget_ms = budget.as_millis() as u64,
                    "read budget exhausted, leaving child running"
                );
                if status.is_none() {
                    reap_in_background(child);
                }
                Ok(ProcessOutput {
                    pid,
                    stdout,
                    exit_code: status.and_then(|s| s.code()),
                    timed_out: true,
                    detached: false,
                })
            }
        }
    }
}

impl ProcessRunner for ProcessInvoker {
    fn run(&self, spec: &ExternalCommandSpec) -> Result<ProcessOutput, ProcessError> {
        match spec.mode() {
            PipeMode::Background => self.run_detached(spec),
            PipeMode::Capture | PipeMode::Discard => self.run_piped(spec),
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(windows)]
fn shell_line_arg(cmd: &mut Command, line: String) {
    use std::os::windows::process::CommandExt;
    cmd.raw_arg(line);
}

#[cfg(not(windows))]
fn shell_line_arg(cmd: &mut Command, line: String) {
    cmd.arg(line);
}

/// Writes the payload on its own thread so a child that fills its stdout
/// before reading stdin cannot deadlock us. The pipe closes when the thread ends.
fn feed_stdin(mut stdin: ChildStdin, payload: Vec<u8>) -> JoinHandle<io::Result<()>> {
    thread::spawn(move || {
        if payload.is_empty() {
            return Ok(());
        }
        match stdin.write_all(&payload) {
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    })
}

/// Reaps `child` before surfacing a stdout read error.
fn wait_then(child: &mut Child, read: io::Result<()>) -> Result<ExitStatus, ProcessError> {
    let status = child.wait();
    read?;
    Ok(status?)
}

/// Waits for `child` on a detached thread so it never lingers as a zombie.
fn reap_in_background(mut child: Child) {
    let pid = child.id();
    thread::spawn(move || match child.wait() {
        Ok(status) => tracing::debug!(pid, code = ?status.code(), "reaped child"),
        Err(e) => tracing::debug!(pid, error = %e, "failed to reap child"),
    });
}

fn join_writer(writer: Option<JoinHandle<io::Result<()>>>) {
    if let Some(handle) = writer {
        match handle.join() {
            Ok(Err(e)) => tracing::debug!(error = %e, "stdin write failed"),
            Err(_) => tracing::debug!("stdin writer panicked"),
            Ok(Ok(())) => {}
        }
    }
}

/// Drains a child's stdout in the background so the caller can poll with a budget.
struct StdoutReader {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl StdoutReader {
    fn spawn(mut stdout: ChildStdout, keep: bool) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let shared = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match stdout.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) if keep => {
                        if let Ok(mut buf) = shared.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                    Ok(_) => {}
                }
            }
            let _ = tx.send(());
        });
        Self { buffer, done }
    }

    fn wait_done(&self, timeout: Duration) -> bool {
        self.done.recv_timeout(timeout).is_ok()
    }

    fn snapshot(&self) -> String {
        self.buffer
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_capture_echo() {
        let invoker = ProcessInvoker::new();
        let spec = ExternalCommandSpec::new("cli/echo", "echo").arg("hello");
        let output = invoker.run(&spec).unwrap();
        assert_eq!(output.trimmed(), "hello");
        assert!(output.success());
    }

    #[test]
    fn test_stdin_piping() {
        let invoker = ProcessInvoker::new();
        let spec = ExternalCommandSpec::new("cli/grep", "grep")
            .arg("foo")
            .stdin("foo\nbar\nbaz");
        let output = invoker.run(&spec).unwrap();
        assert_eq!(output.trimmed(), "foo");
    }

    #[test]
    fn test_discard_returns_empty_stdout() {
        let invoker = ProcessInvoker::new();
        let spec = ExternalCommandSpec::new("cli/echo", "echo")
            .arg("hello")
            .capture(false);
        let output = invoker.run(&spec).unwrap();
        assert_eq!(output.stdout, "");
        assert_eq!(output.exit_code, Some(0));
    }

    #[test]
    fn test_exit_code_reported() {
        let invoker = ProcessInvoker::new();
        let spec = ExternalCommandSpec::new("cli/false", "false");
        let output = invoker.run(&spec).unwrap();
        assert_eq!(output.exit_code, Some(1));
        assert!(!output.success());
    }

    #[test]
    fn test_spawn_failure_names_label() {
        let invoker = ProcessInvoker::new();
        let spec = ExternalCommandSpec::new("cli/missing", "/definitely/not/here");
        match invoker.run(&spec) {
            Err(ProcessError::Spawn { label, .. }) => assert_eq!(label, "cli/missing"),
            other => panic!("expected spawn failure, got {other:?}"),
        }
    }

    #[test]
    fn test_stderr_goes_to_daily_log() {
        let tmp = tempfile::tempdir().unwrap();
        let log = DailyLog::new(tmp.path(), "conduit");
        let invoker = ProcessInvoker::new().with_log(log.clone());
        let spec = ExternalCommandSpec::new("cli/ls", "ls").arg("/definitely/not/here");
        let output = invoker.run(&spec).unwrap();

        assert_eq!(output.stdout, "");
        let logged = std::fs::read_to_string(log.current_path()).unwrap();
        assert!(logged.contains("/definitely/not/here"));
    }

    #[test]
    fn test_shell_profile_is_sourced() {
        let tmp = tempfile::tempdir().unwrap();
        let profile = tmp.path().join("profile.sh");
        std::fs::write(&profile, "export CONDUIT_GREETING=sourced\n").unwrap();

        let invoker =
            ProcessInvoker::new().with_shell_profile(profile.to_string_lossy().into_owned());
        let spec = ExternalCommandSpec::new("cli/printenv", "printenv").arg("CONDUIT_GREETING");
        let output = invoker.run(&spec).unwrap();
        assert_eq!(output.trimmed(), "sourced");
    }

    #[test]
    fn test_timeout_returns_partial_without_killing() {
        let invoker = ProcessInvoker::new()
            .with_timeout(Duration::from_millis(300))
            .with_poll_interval(Duration::from_millis(20));
        let spec = ExternalCommandSpec::new("cli/slow", "sh")
            .args(["-c", "echo early; sleep 2; echo late"]);

        let start = Instant::now();
        let output = invoker.run(&spec).unwrap();

        assert!(output.timed_out);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(output.trimmed(), "early");
        #[cfg(target_os = "linux")]
        assert!(std::path::Path::new(&format!("/proc/{}", output.pid)).exists());
    }

    #[test]
    fn test_timeout_not_hit_for_fast_child() {
        let invoker = ProcessInvoker::new().with_timeout(Duration::from_secs(5));
        let spec = ExternalCommandSpec::new("cli/cat", "cat").stdin("hi");
        let output = invoker.run(&spec).unwrap();
        assert!(!output.timed_out);
        assert_eq!(output.trimmed(), "hi");
    }

    #[test]
    fn test_background_returns_immediately() {
        let invoker = ProcessInvoker::new();
        let spec = ExternalCommandSpec::new("cli/sleep", "sleep")
            .arg("1")
            .background(true);

        let start = Instant::now();
        let output = invoker.run(&spec).unwrap();

        assert!(output.detached);
        assert!(output.pid > 0);
        assert!(start.elapsed() < Duration::from_millis(900));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_background_child_is_reaped() {
        let invoker = ProcessInvoker::new();
        let spec = ExternalCommandSpec::new("cli/true", "true").background(true);
        let output = invoker.run(&spec).unwrap();

        thread::sleep(Duration::from_millis(500));
        let state = std::fs::read_to_string(format!("/proc/{}/stat", output.pid))
            .ok()
            .and_then(|stat| {
                let (_, rest) = stat.rsplit_once(')')?;
                rest.trim_start().chars().next()
            });
        assert_ne!(state, Some('Z'));
    }

    #[test]
    fn test_read_error_still_reaps_child() {
        let mut child = Command::new("true").spawn().unwrap();
        let err = wait_then(&mut child, Err(io::Error::other("pipe broke"))).unwrap_err();
        assert!(matches!(err, ProcessError::Io(_)));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        let invoker = ProcessInvoker::new().with_poll_interval(Duration::ZERO);
        assert_eq!(invoker.poll_interval(), MIN_POLL_INTERVAL);
        let invoker = ProcessInvoker::new().with_poll_interval(Duration::from_millis(20));
        assert_eq!(invoker.poll_interval(), Duration::from_millis(20));
    }
}

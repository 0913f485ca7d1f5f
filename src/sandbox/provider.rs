//! The confinement seam.
//!
//! [`ConfinementProvider`] runs one command line under a wall-clock budget
//! and hands back its exit status and console streams. It does not isolate
//! anything itself; the command it is given (nsjail by default) does. Any
//! other technology can be slotted in behind the trait.

use std::ffi::OsString;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::{Result, SandboxError};
use crate::sandbox::config::{DEFAULT_KILL_GRACE, DEFAULT_MAX_OUTPUT_BYTES};
use crate::sandbox::io::CapturedOutput;

/// A fully-built command line for the confinement tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfinementCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ConfinementCommand {
    /// Start a command for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Program to execute.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments after the program.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

impl fmt::Display for ConfinementCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// What a confined process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, or `128 + signal` when the process was killed by a signal.
    pub exit_code: i32,
    /// Captured stdout bytes.
    pub stdout: Vec<u8>,
    /// Captured stderr bytes.
    pub stderr: Vec<u8>,
    /// Whether the budget expired and the process group was killed.
    pub timed_out: bool,
}

/// Runs a command under enforced time limits.
///
/// Implementations must terminate the whole process group once `timeout`
/// elapses, must not block much past `timeout`, and must return every byte
/// of console output captured up to that point.
#[async_trait]
pub trait ConfinementProvider: Send + Sync {
    /// Run `command` to completion or until `timeout` expires.
    async fn run(&self, command: &ConfinementCommand, timeout: Duration) -> Result<ProcessOutput>;
}

/// Launches the command as a local child process in its own process group.
#[derive(Debug, Clone)]
pub struct ProcessProvider {
    kill_grace: Duration,
    max_output_bytes: usize,
}

impl Default for ProcessProvider {
    fn default() -> Self {
        Self::new(DEFAULT_KILL_GRACE)
    }
}

impl ProcessProvider {
    /// Create a provider that waits at most `kill_grace` for pipes to drain
    /// after a forced kill.
    pub fn new(kill_grace: Duration) -> Self {
        Self {
            kill_grace,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Keep at most `limit` bytes of each console stream.
    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            // The child leads its own group, so this reaches its descendants too.
            if let Err(errno) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                tracing::warn!(pid, error = %errno, "failed to kill process group");
            }
        }
        if let Err(e) = child.start_kill() {
            tracing::debug!(error = %e, "child already gone");
        }
        if tokio::time::timeout(self.kill_grace, child.wait()).await.is_err() {
            tracing::error!("confined process did not exit after SIGKILL");
        }
    }

    async fn join_reader(&self, deadline: Instant, reader: JoinHandle<usize>) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let abort = reader.abort_handle();
        if tokio::time::timeout(remaining, reader).await.is_err() {
            // A descendant that escaped the group may still hold the pipe open.
            tracing::warn!("console pipe still open after grace period");
            abort.abort();
        }
    }
}

#[async_trait]
impl ConfinementProvider for ProcessProvider {
    async fn run(&self, command: &ConfinementCommand, timeout: Duration) -> Result<ProcessOutput> {
        let mut child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                program: command.program().to_path_buf(),
                source,
            })?;

        let stdout = CapturedOutput::with_limit(self.max_output_bytes);
        let stderr = CapturedOutput::with_limit(self.max_output_bytes);
        let stdout_reader = child.stdout.take().map(|pipe| tokio::spawn(stdout.clone().drain(pipe)));
        let stderr_reader = child.stderr.take().map(|pipe| tokio::spawn(stderr.clone().drain(pipe)));

        let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "confined process timed out");
                self.terminate(&mut child).await;
                (child.try_wait().ok().flatten(), true)
            }
        };

        let deadline = Instant::now() + self.kill_grace;
        for reader in [stdout_reader, stderr_reader].into_iter().flatten() {
            self.join_reader(deadline, reader).await;
        }

        for (stream, captured) in [("stdout", &stdout), ("stderr", &stderr)] {
            let dropped = captured.dropped();
            if dropped > 0 {
                tracing::warn!(stream, dropped, limit = self.max_output_bytes, "console output truncated");
            }
        }

        Ok(ProcessOutput {
            exit_code: status.map(exit_code).unwrap_or(128 + Signal::SIGKILL as i32),
            stdout: stdout.to_bytes(),
            stderr: stderr.to_bytes(),
            timed_out,
        })
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

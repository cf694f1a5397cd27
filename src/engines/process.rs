//! Cancellable external tool invocation.
//!
//! Every engine that shells out goes through [`ToolProcess`] so a cancelled
//! job never leaves a tool running: SIGTERM first, then SIGKILL once the
//! grace period runs out.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{OverwatchError, Result};

/// How long to wait for stderr to drain after the process exits.
const PIPE_DRAIN_WAIT: Duration = Duration::from_secs(1);

/// Keep only the end of stderr in error messages.
const STDERR_TAIL: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub timeout: Option<Duration>,
    pub grace: Duration,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            timeout: None,
            grace: Duration::from_secs(3),
        }
    }
}

impl ProcessLimits {
    pub fn new(timeout: Option<Duration>, grace: Duration) -> Self {
        Self { timeout, grace }
    }
}

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stderr: String,
}

/// A running external tool with piped stdout and stderr.
pub struct ToolProcess {
    tool: String,
    child: Child,
    stderr: Option<JoinHandle<String>>,
}

impl ToolProcess {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        debug!(tool = program, ?args, "spawning external tool");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => OverwatchError::external(program, "not found on PATH"),
                _ => OverwatchError::external(program, format!("failed to start: {err}")),
            })?;

        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        Ok(Self {
            tool: program.to_string(),
            child,
            stderr,
        })
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Waits for the tool to exit. Cancellation and the timeout both
    /// terminate the process before returning.
    pub async fn wait(mut self, cancel: &CancellationToken, limits: ProcessLimits) -> Result<ToolOutput> {
        enum Wake {
            Exited(io::Result<ExitStatus>),
            Cancelled,
            TimedOut(Duration),
        }

        // Unread stdout would eventually block the tool on a full pipe.
        if let Some(mut stdout) = self.child.stdout.take() {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await;
            });
        }

        let deadline = async {
            match limits.timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let wake = tokio::select! {
            status = self.child.wait() => Wake::Exited(status),
            _ = cancel.cancelled() => Wake::Cancelled,
            limit = deadline => Wake::TimedOut(limit),
        };

        match wake {
            Wake::Exited(status) => {
                let status = status?;
                let stderr = self.collect_stderr().await;
                if status.success() {
                    Ok(ToolOutput { status, stderr })
                } else {
                    Err(OverwatchError::external(
                        &self.tool,
                        format!("exited with {status}: {}", tail(&stderr)),
                    ))
                }
            }
            Wake::Cancelled => {
                debug!(tool = %self.tool, "terminating tool after cancellation");
                terminate(&mut self.child, limits.grace).await;
                Err(OverwatchError::Cancelled)
            }
            Wake::TimedOut(limit) => {
                warn!(tool = %self.tool, timeout_s = limit.as_secs(), "tool timed out");
                terminate(&mut self.child, limits.grace).await;
                Err(OverwatchError::external(
                    &self.tool,
                    format!("timed out after {}s", limit.as_secs()),
                ))
            }
        }
    }

    async fn collect_stderr(&mut self) -> String {
        let Some(handle) = self.stderr.take() else {
            return String::new();
        };
        match tokio::time::timeout(PIPE_DRAIN_WAIT, handle).await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        }
    }
}

/// Runs a tool to completion and returns its stdout.
pub async fn run_captured(
    program: &str,
    args: &[String],
    cancel: &CancellationToken,
    limits: ProcessLimits,
) -> Result<String> {
    let mut process = ToolProcess::spawn(program, args)?;
    let stdout = process.take_stdout().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });

    process.wait(cancel, limits).await?;

    let bytes = match stdout {
        Some(handle) => match tokio::time::timeout(PIPE_DRAIN_WAIT, handle).await {
            Ok(Ok(bytes)) => bytes,
            _ => Vec::new(),
        },
        None => Vec::new(),
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// SIGTERM, bounded wait, then SIGKILL and reap.
pub async fn terminate(child: &mut Child, grace: Duration) {
    if send_sigterm(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(_)) => return,
            Ok(Err(err)) => warn!(error = %err, "waiting for terminated tool failed"),
            Err(_) => debug!("grace period elapsed, killing tool"),
        }
    }
    if let Err(err) = child.kill().await {
        warn!(error = %err, "failed to kill tool");
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: `pid` is a child of this process that has not been reaped yet.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

fn tail(text: &str) -> &str {
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text;
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

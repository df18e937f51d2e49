//! Verifier runner
//!
//! Runs the verification harness as a child process in its own process group
//! with stdin closed, a bounded timeout and the repository root as working
//! directory. The child is held by [`HarnessProcess`], which kills the whole
//! group and reaps the child on every exit path: normal exit, timeout,
//! cancellation, or the future being dropped.
//!
//! The harness's stderr is redirected into its stdout inside the shell, so
//! the report keeps the order in which lines were written.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::config::VerifyConfig;
use crate::domain::{Target, VerificationReport};

/// How long reader tasks get to drain the pipes after the child is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Errors that prevent a verification report from being produced
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("failed to spawn verifier `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for verifier: {0}")]
    Wait(#[source] std::io::Error),

    #[error("verification interrupted")]
    Interrupted,
}

/// Capability interface for anything that can judge the current artifacts
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, target: &Target, cancel: &Cancellation) -> Result<VerificationReport, VerifyError>;
}

/// Runs a shell command as the verification harness
#[derive(Debug, Clone)]
pub struct SubprocessVerifier {
    command: String,
    timeout: Duration,
}

impl SubprocessVerifier {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        let command = command.into();
        debug!(%command, timeout_ms = timeout.as_millis() as u64, "SubprocessVerifier::new: called");
        Self { command, timeout }
    }

    pub fn from_config(config: &VerifyConfig) -> Self {
        Self::new(config.command.clone(), Duration::from_millis(config.timeout_ms))
    }

    fn build_command(&self, target: &Target) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("exec 2>&1\n{}", self.command))
            .current_dir(&target.root)
            .env("REPAIRLOOP_TARGET", &target.name)
            .env("REPAIRLOOP_INPUT", &target.input)
            .env("REPAIRLOOP_EXPECTED", &target.expected)
            .env("REPAIRLOOP_MODULE", &target.module)
            .env("REPAIRLOOP_TEST", &target.test)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

enum Finish {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl Verifier for SubprocessVerifier {
    async fn verify(&self, target: &Target, cancel: &Cancellation) -> Result<VerificationReport, VerifyError> {
        debug!(target = %target.name, command = %self.command, "SubprocessVerifier::verify: called");
        if cancel.is_cancelled() {
            debug!("SubprocessVerifier::verify: cancelled before spawn");
            return Err(VerifyError::Interrupted);
        }

        let start = Instant::now();
        let mut process = HarnessProcess::spawn(self.build_command(target)).map_err(|e| VerifyError::Spawn {
            command: self.command.clone(),
            source: e,
        })?;
        info!(pid = ?process.pid, "Verifier started: {}", self.command);

        let finish = tokio::select! {
            status = process.wait() => Finish::Exited(status.map_err(VerifyError::Wait)?),
            _ = tokio::time::sleep(self.timeout) => Finish::TimedOut,
            _ = cancel.cancelled() => Finish::Cancelled,
        };

        match finish {
            // Stragglers the harness left in its group go with it
            Finish::Exited(_) => process.kill_group(),
            Finish::TimedOut | Finish::Cancelled => process.kill().await,
        }
        let output = process.collect_output().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match finish {
            Finish::Exited(status) => {
                let exit_code = exit_code(status);
                info!(exit_code, duration_ms, "Verifier finished");
                Ok(VerificationReport::from_exit(exit_code, output, duration_ms))
            }
            Finish::TimedOut => {
                warn!(duration_ms, "Verifier timed out and was killed");
                let mut output = output;
                if !output.is_empty() && !output.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str(&format!(
                    "[repairloop] verifier timed out after {}ms and was killed\n",
                    self.timeout.as_millis()
                ));
                Ok(VerificationReport::timed_out(output, duration_ms))
            }
            Finish::Cancelled => {
                warn!(duration_ms, "Verifier interrupted");
                Err(VerifyError::Interrupted)
            }
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    // Killed by a signal has no code
    status.code().unwrap_or(-1)
}

/// A running harness child with its output readers
///
/// Until the child has been reaped, dropping this kills the process group.
struct HarnessProcess {
    child: Child,
    pid: Option<u32>,
    reaped: bool,
    stdout: Reader,
    stderr: Reader,
}

impl HarnessProcess {
    fn spawn(mut cmd: Command) -> std::io::Result<Self> {
        let mut child = cmd.spawn()?;
        let pid = child.id();
        debug!(?pid, "HarnessProcess::spawn: spawned");
        let stdout = Reader::start(child.stdout.take());
        let stderr = Reader::start(child.stderr.take());
        Ok(Self {
            child,
            pid,
            reaped: false,
            stdout,
            stderr,
        })
    }

    async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.reaped = true;
        debug!(?status, "HarnessProcess::wait: reaped");
        Ok(status)
    }

    /// Kill the whole process group, then reap the direct child
    async fn kill(&mut self) {
        debug!(pid = ?self.pid, "HarnessProcess::kill: called");
        self.kill_group();
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to kill verifier child");
        }
        self.reaped = true;
    }

    fn kill_group(&self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            // The child leads its own group, so pgid == pid
            if let Some(pid) = self.pid
                && let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL)
            {
                debug!(pid, error = %e, "HarnessProcess::kill_group: killpg failed");
            }
        }
    }

    /// Combined output; stderr only holds what the shell wrote before its redirect
    async fn collect_output(&mut self) -> String {
        let stdout = self.stdout.finish().await;
        let stderr = self.stderr.finish().await;
        let mut output = String::from_utf8_lossy(&stdout).into_owned();
        if !stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&String::from_utf8_lossy(&stderr));
        }
        output
    }
}

impl Drop for HarnessProcess {
    fn drop(&mut self) {
        if !self.reaped {
            debug!(pid = ?self.pid, "HarnessProcess::drop: killing unreaped child");
            self.kill_group();
            let _ = self.child.start_kill();
        }
        self.stdout.abort();
        self.stderr.abort();
    }
}

/// Drains one pipe into a shared buffer
///
/// The buffer is shared so whatever was read survives even when a grandchild
/// holds the pipe open past the grace period.
struct Reader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl Reader {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let handle = pipe.map(|mut pipe| {
            let buf = buf.clone();
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => buf.lock().await.extend_from_slice(&chunk[..n]),
                        Err(e) => {
                            debug!(error = %e, "Reader: pipe read failed");
                            break;
                        }
                    }
                }
            })
        });
        Self { buf, handle }
    }

    async fn finish(&mut self) -> Vec<u8> {
        if let Some(handle) = self.handle.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(DRAIN_GRACE, handle).await.is_err() {
                warn!("Verifier output pipe still open after exit; keeping what was read");
                abort.abort();
            }
        }
        std::mem::take(&mut *self.buf.lock().await)
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

//! Worker process launching and termination.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::error::BridgeError;
use crate::core::config::WorkerConfig;

/// The byte channel to a freshly launched worker.
pub struct WorkerConnection {
    /// OS process id, if the worker is a real process.
    pub pid: Option<u32>,

    /// Worker output (replies).
    pub reader: Box<dyn AsyncRead + Send + Unpin>,

    /// Worker input (requests).
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,

    /// Owned child process; `None` for in-process workers.
    pub child: Option<Child>,
}

impl std::fmt::Debug for WorkerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConnection")
            .field("pid", &self.pid)
            .field("has_child", &self.child.is_some())
            .finish_non_exhaustive()
    }
}

/// Starts worker instances for the bridge.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Launch one worker. The bridge waits for its ready handshake.
    async fn launch(&self) -> Result<WorkerConnection, BridgeError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String {
        "worker".to_string()
    }
}

// ============================================================================
// Process launcher
// ============================================================================

/// Launches the worker as a child process speaking on stdin/stdout.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            envs: Vec::new(),
        }
    }

    /// Set an extra environment variable for every launched worker.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<WorkerConnection, BridgeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // Worker diagnostics share our stderr; stdout stays protocol-only.
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // Own process group so termination reaches anything the worker spawns.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::start(format!("failed to spawn {}: {}", self.program.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::start("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::start("worker stdout was not captured"))?;

        let pid = child.id();
        info!(pid, program = %self.program.display(), "Spawned worker process");

        Ok(WorkerConnection {
            pid,
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }

    fn describe(&self) -> String {
        self.program.display().to_string()
    }
}

// ============================================================================
// Termination
// ============================================================================

/// How a worker is taken down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateMode {
    /// stdin is already closed; wait, then SIGTERM, wait again, then SIGKILL.
    Graceful(Duration),
    /// SIGKILL right away (hung or broken worker).
    Immediate,
}

/// Terminate and reap a child process. Returns its exit status if known.
pub(crate) async fn terminate_child(child: &mut Child, mode: TerminateMode) -> Option<ExitStatus> {
    let pid = child.id();

    if let Ok(Some(status)) = child.try_wait() {
        kill_group(pid);
        return Some(status);
    }

    if let TerminateMode::Graceful(grace) = mode {
        if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
            debug!(pid, %status, "Worker exited after stdin closed");
            kill_group(pid);
            return Some(status);
        }

        #[cfg(unix)]
        signal_group(pid, nix::sys::signal::Signal::SIGTERM);

        if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
            debug!(pid, %status, "Worker exited after SIGTERM");
            kill_group(pid);
            return Some(status);
        }
        warn!(pid, "Worker ignored SIGTERM for {:?}; killing", grace);
    }

    kill_group(pid);
    if let Err(e) = child.kill().await {
        warn!(pid, "Failed to kill worker: {}", e);
    }
    child.wait().await.ok()
}

/// SIGKILL whatever is left in the worker's process group.
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => debug!(pid = raw, ?signal, "Signalled worker process group"),
        // ESRCH: the group is already gone
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => debug!(pid = raw, ?signal, "Failed to signal worker group: {}", e),
    }
}

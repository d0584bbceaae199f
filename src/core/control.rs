//! Process control through a pid file.
//!
//! `serve` claims the pid file (stopping a live previous instance first) and
//! releases it on exit; `stop` signals the instance the file names. A recorded
//! pid only counts as an instance while it runs this same executable, so a
//! stale file whose pid was reused never gets another process killed.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Failed to access pid file {}: {source}", path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("Process {pid} is still running after SIGKILL")]
    StillRunning { pid: u32 },

    #[error("Failed to resolve the running executable: {0}")]
    CurrentExe(#[source] io::Error),

    #[error("Process control is only supported on unix")]
    Unsupported,
}

impl ControlError {
    fn pid_file(path: &Path, source: io::Error) -> Self {
        Self::PidFile {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of [`stop_instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No pid file, or the recorded process was already gone.
    NotRunning,
    /// The process exited; `forced` if it needed SIGKILL.
    Stopped { pid: u32, forced: bool },
}

/// A claimed pid file, removed again on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Stop any live instance recorded at `path`, then record ourselves.
    pub async fn claim(path: impl Into<PathBuf>, grace: Duration) -> Result<Self, ControlError> {
        Self::claim_as(path.into(), grace, &own_program()?).await
    }

    async fn claim_as(path: PathBuf, grace: Duration, program: &Path) -> Result<Self, ControlError> {
        let pid = std::process::id();

        match read_pid(&path)? {
            Some(existing) if existing == pid => {}
            Some(_) => match stop_instance_as(&path, grace, program).await? {
                StopOutcome::Stopped { pid: old, forced } => {
                    info!(pid = old, forced, "Stopped previous instance");
                }
                StopOutcome::NotRunning => debug!("Replacing stale pid file"),
            },
            None => {}
        }

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| ControlError::pid_file(&path, e))?;
        }
        std::fs::write(&path, format!("{}\n", pid)).map_err(|e| ControlError::pid_file(&path, e))?;
        debug!(pid, path = %path.display(), "Pid file written");

        Ok(Self { path, pid })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Leave it alone if another instance has claimed it since.
        if let Ok(Some(pid)) = read_pid(&self.path) {
            if pid == self.pid {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!("Failed to remove pid file {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

/// Stop the instance recorded at `path`: SIGTERM, wait up to `grace`, then
/// SIGKILL. A missing file, a dead process, or a process running some other
/// executable is a successful no-op that removes the file.
pub async fn stop_instance(path: &Path, grace: Duration) -> Result<StopOutcome, ControlError> {
    stop_instance_as(path, grace, &own_program()?).await
}

async fn stop_instance_as(path: &Path, grace: Duration, program: &Path) -> Result<StopOutcome, ControlError> {
    let Some(pid) = read_pid(path)? else {
        return Ok(StopOutcome::NotRunning);
    };

    if !is_alive(pid) {
        debug!(pid, "Recorded process is not running");
        remove_pid_file(path)?;
        return Ok(StopOutcome::NotRunning);
    }
    if runs_program(pid, program) == Some(false) {
        warn!(
            pid,
            "Recorded process is not {}; treating the pid file as stale",
            program.display()
        );
        remove_pid_file(path)?;
        return Ok(StopOutcome::NotRunning);
    }

    info!(pid, "Sending SIGTERM");
    send_signal(pid, Sig::Term)?;
    let forced = if wait_for_exit(pid, grace).await {
        false
    } else {
        warn!(pid, "Still running after {}ms; sending SIGKILL", grace.as_millis());
        send_signal(pid, Sig::Kill)?;
        if !wait_for_exit(pid, KILL_WAIT).await {
            return Err(ControlError::StillRunning { pid });
        }
        true
    };

    remove_pid_file(path)?;
    Ok(StopOutcome::Stopped { pid, forced })
}

/// The pid recorded at `path`. Unparseable content counts as no pid.
pub fn read_pid(path: &Path) -> Result<Option<u32>, ControlError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ControlError::pid_file(path, e)),
    };
    match content.trim().parse::<u32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => {
            warn!("Ignoring malformed pid file {}", path.display());
            Ok(None)
        }
    }
}

/// Canonical path of the running executable.
fn own_program() -> Result<PathBuf, ControlError> {
    let exe = std::env::current_exe().map_err(ControlError::CurrentExe)?;
    Ok(std::fs::canonicalize(&exe).unwrap_or(exe))
}

/// Whether `pid` is executing `program`. `None` when the platform cannot tell.
#[cfg(target_os = "linux")]
fn runs_program(pid: u32, program: &Path) -> Option<bool> {
    let exe = match std::fs::read_link(format!("/proc/{}/exe", pid)) {
        Ok(exe) => exe,
        Err(e) => {
            debug!(pid, "Cannot read executable of process: {}", e);
            return Some(false);
        }
    };
    // A binary replaced on disk while running reads back with this suffix.
    let stripped = exe
        .to_str()
        .and_then(|s| s.strip_suffix(" (deleted)"))
        .map(PathBuf::from);
    let exe = stripped.unwrap_or(exe);
    Some(exe == program)
}

#[cfg(not(target_os = "linux"))]
fn runs_program(_pid: u32, _program: &Path) -> Option<bool> {
    None
}

fn remove_pid_file(path: &Path) -> Result<(), ControlError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ControlError::pid_file(path, e)),
    }
}

async fn wait_for_exit(pid: u32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[derive(Debug, Clone, Copy)]
enum Sig {
    Term,
    Kill,
}

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but belongs to someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, sig: Sig) -> Result<(), ControlError> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| ControlError::Signal {
        pid,
        reason: "pid out of range".to_string(),
    })?;
    let signal = match sig {
        Sig::Term => Signal::SIGTERM,
        Sig::Kill => Signal::SIGKILL,
    };
    match kill(Pid::from_raw(raw), signal) {
        // Exited between the liveness check and the signal.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(ControlError::Signal {
            pid,
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn is_alive(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _sig: Sig) -> Result<(), ControlError> {
    Err(ControlError::Unsupported)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::{Child, Command};
    use tempfile::TempDir;

    /// Reap the child in the background so it does not linger as a zombie.
    fn reap_in_background(mut child: Child) {
        std::thread::spawn(move || {
            let _ = child.wait();
        });
    }

    fn shell() -> PathBuf {
        std::fs::canonicalize("/bin/sh").unwrap()
    }

    /// A shell that keeps running `script`'s loop until signalled.
    fn spawn_shell(script: &str) -> u32 {
        let child = Command::new("/bin/sh").args(["-c", script]).spawn().unwrap();
        let pid = child.id();
        reap_in_background(child);
        pid
    }

    #[tokio::test]
    async fn test_stop_without_pid_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.pid");
        assert_eq!(
            stop_instance(&path, Duration::from_millis(100)).await.unwrap(),
            StopOutcome::NotRunning
        );
        // Twice is fine too.
        assert_eq!(
            stop_instance(&path, Duration::from_millis(100)).await.unwrap(),
            StopOutcome::NotRunning
        );
    }

    #[tokio::test]
    async fn test_stop_with_dead_pid_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.pid");

        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        std::fs::write(&path, pid.to_string()).unwrap();

        assert_eq!(
            stop_instance(&path, Duration::from_millis(100)).await.unwrap(),
            StopOutcome::NotRunning
        );
        assert!(!path.exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_stop_leaves_unrelated_process_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.pid");

        let mut other = Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(&path, format!("{}\n", other.id())).unwrap();

        let outcome = stop_instance(&path, Duration::from_millis(200)).await.unwrap();
        assert_eq!(outcome, StopOutcome::NotRunning);
        assert!(!path.exists());
        assert!(other.try_wait().unwrap().is_none());

        other.kill().unwrap();
        other.wait().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_claim_over_reused_pid_keeps_process() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.pid");

        let mut other = Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(&path, other.id().to_string()).unwrap();

        let claimed = PidFile::claim(&path, Duration::from_millis(200)).await.unwrap();
        assert_eq!(read_pid(claimed.path()).unwrap(), Some(std::process::id()));
        assert!(other.try_wait().unwrap().is_none());

        other.kill().unwrap();
        other.wait().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_runs_program_matches_own_executable() {
        let own = own_program().unwrap();
        assert_eq!(runs_program(std::process::id(), &own), Some(true));
        assert_eq!(runs_program(std::process::id(), &shell()), Some(false));
    }

    #[tokio::test]
    async fn test_stop_terminates_live_process() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.pid");

        let pid = spawn_shell("while :; do sleep 1; done");
        std::fs::write(&path, format!("{}\n", pid)).unwrap();

        let outcome = stop_instance_as(&path, Duration::from_secs(2), &shell())
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Stopped { pid, forced: false });
        assert!(!path.exists());
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_sigkill() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.pid");

        let pid = spawn_shell("trap '' TERM; while :; do sleep 1; done");
        std::fs::write(&path, pid.to_string()).unwrap();
        // Let the shell install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcome = stop_instance_as(&path, Duration::from_millis(200), &shell())
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Stopped { pid, forced: true });
    }

    #[tokio::test]
    async fn test_claim_writes_and_releases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run").join("server.pid");

        let claimed = PidFile::claim(&path, Duration::from_millis(100)).await.unwrap();
        assert_eq!(read_pid(&path).unwrap(), Some(std::process::id()));
        assert_eq!(claimed.pid(), std::process::id());

        drop(claimed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_claim_replaces_previous_instance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.pid");

        let old = spawn_shell("while :; do sleep 1; done");
        std::fs::write(&path, old.to_string()).unwrap();

        let claimed = PidFile::claim_as(path.clone(), Duration::from_secs(2), &shell())
            .await
            .unwrap();
        assert!(!is_alive(old));
        assert_eq!(read_pid(claimed.path()).unwrap(), Some(std::process::id()));
    }

    #[test]
    fn test_malformed_pid_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.pid");
        std::fs::write(&path, "not-a-pid").unwrap();
        assert_eq!(read_pid(&path).unwrap(), None);
    }
}

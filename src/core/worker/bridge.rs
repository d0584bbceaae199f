//! Worker bridge.
//!
//! A single coordinator task owns the worker handle. Callers enqueue jobs on a
//! bounded channel and wait on a oneshot for the reply, so at most one call is
//! ever in flight on the worker and jobs run in arrival order.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::BridgeError;
use super::launcher::{TerminateMode, WorkerConnection, WorkerLauncher, terminate_child};
use super::wire::{WorkerMessage, WorkerOutcome, WorkerRequest};
use crate::core::config::WorkerConfig;

/// Timing and sizing knobs for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub startup_timeout: Duration,
    pub terminate_grace: Duration,
    pub restart_window: Duration,
    pub restart_cooldown: Duration,
    pub max_start_failures: u32,
    pub queue_depth: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(10),
            terminate_grace: Duration::from_secs(2),
            restart_window: Duration::from_secs(60),
            restart_cooldown: Duration::from_secs(5),
            max_start_failures: 3,
            queue_depth: 64,
        }
    }
}

impl BridgeSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            startup_timeout: config.startup_timeout,
            terminate_grace: config.terminate_grace,
            restart_window: config.restart_window,
            restart_cooldown: config.restart_cooldown,
            max_start_failures: config.max_start_failures,
            queue_depth: config.queue_depth,
        }
    }
}

/// Worker lifecycle state as seen from the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// No worker running yet (or the last one was retired cleanly).
    Idle,
    Starting,
    Ready,
    Busy,
    /// The last worker crashed, hung, or failed to start.
    Crashed,
    Stopped,
}

/// Snapshot published by the coordinator after every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub pid: Option<u32>,
    /// Number of workers successfully started so far.
    pub generation: u64,
    /// Tool currently executing on the worker.
    pub pending: Option<String>,
    pub calls_completed: u64,
    pub consecutive_start_failures: u32,
    pub degraded: bool,
    /// How the previous worker ended.
    pub last_exit: Option<String>,
    /// Set once the coordinator has exited.
    #[serde(skip)]
    pub closed: bool,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            state: WorkerState::Idle,
            pid: None,
            generation: 0,
            pending: None,
            calls_completed: 0,
            consecutive_start_failures: 0,
            degraded: false,
            last_exit: None,
            closed: false,
        }
    }
}

type Reply = oneshot::Sender<Result<WorkerOutcome, BridgeError>>;

struct Job {
    tool_name: String,
    arguments: Map<String, Value>,
    deadline: Instant,
    timeout: Duration,
    reply: Reply,
}

/// Handle to the worker coordinator. Cheap to clone.
#[derive(Clone)]
pub struct WorkerBridge {
    jobs: mpsc::Sender<Job>,
    status: watch::Receiver<WorkerStatus>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for WorkerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerBridge")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl WorkerBridge {
    /// Spawn the coordinator. No worker is started until the first call.
    pub fn spawn(launcher: Arc<dyn WorkerLauncher>, settings: BridgeSettings) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(settings.queue_depth.max(1));
        let (status_tx, status_rx) = watch::channel(WorkerStatus::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(worker = %launcher.describe(), "Worker bridge started");

        let coordinator = Coordinator {
            launcher,
            settings,
            handle: None,
            seq: 0,
            failures: StartFailures::default(),
            status: status_tx,
            shutdown: shutdown_rx,
        };
        tokio::spawn(coordinator.run(jobs_rx));

        Self {
            jobs: jobs_tx,
            status: status_rx,
            shutdown: Arc::new(shutdown_tx),
        }
    }

    /// Run one tool on the worker, waiting at most `timeout` from now.
    ///
    /// The timeout covers queueing, worker startup and execution.
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> Result<WorkerOutcome, BridgeError> {
        let deadline = Instant::now() + timeout;
        let (reply, rx) = oneshot::channel();
        let job = Job {
            tool_name: tool_name.to_string(),
            arguments,
            deadline,
            timeout,
            reply,
        };

        match tokio::time::timeout_at(deadline, self.jobs.send(job)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(BridgeError::Stopped),
            Err(_) => return Err(BridgeError::Timeout(timeout)),
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            // Coordinator dropped the job while shutting down.
            Ok(Err(_)) => Err(BridgeError::Stopped),
            Err(_) => Err(BridgeError::Timeout(timeout)),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerStatus> {
        self.status.clone()
    }

    /// Stop the coordinator and terminate the worker. Safe to call repeatedly
    /// and concurrently; every caller returns once the worker is gone.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let mut status = self.status.clone();
        while !status.borrow_and_update().closed {
            if status.changed().await.is_err() {
                break;
            }
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

struct Coordinator {
    launcher: Arc<dyn WorkerLauncher>,
    settings: BridgeSettings,
    handle: Option<WorkerHandle>,
    seq: u64,
    failures: StartFailures,
    status: watch::Sender<WorkerStatus>,
    shutdown: watch::Receiver<bool>,
}

enum Wait {
    Reply(Result<WorkerOutcome, String>),
    TimedOut,
    Shutdown,
}

impl Coordinator {
    async fn run(mut self, mut jobs: mpsc::Receiver<Job>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => break,
                job = jobs.recv() => match job {
                    Some(job) => self.execute(job).await,
                    None => break,
                },
            }
        }

        jobs.close();
        let mut dropped = 0usize;
        while let Ok(job) = jobs.try_recv() {
            let _ = job.reply.send(Err(BridgeError::Stopped));
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Failed {} queued call(s) at shutdown", dropped);
        }

        if let Some(handle) = self.handle.take() {
            let grace = self.settings.terminate_grace;
            let exit = handle.terminate(TerminateMode::Graceful(grace)).await;
            info!(exit = exit.as_deref().unwrap_or("unknown"), "Worker stopped");
            self.status.send_modify(|s| s.last_exit = exit);
        }

        self.status.send_modify(|s| {
            s.state = WorkerState::Stopped;
            s.pid = None;
            s.pending = None;
            s.closed = true;
        });
        info!("Worker bridge stopped");
    }

    async fn execute(&mut self, job: Job) {
        if job.reply.is_closed() {
            debug!(tool = %job.tool_name, "Caller gone before its turn, skipping");
            return;
        }
        if Instant::now() >= job.deadline {
            let _ = job.reply.send(Err(BridgeError::Timeout(job.timeout)));
            return;
        }

        let result = self.call(&job).await;
        // The caller may have timed out meanwhile; the result is dropped then.
        let _ = job.reply.send(result);
    }

    async fn call(&mut self, job: &Job) -> Result<WorkerOutcome, BridgeError> {
        let mut handle = self.ensure_worker(job.deadline, job.timeout).await?;

        self.seq += 1;
        let request = WorkerRequest {
            seq: self.seq,
            tool_name: job.tool_name.clone(),
            arguments: job.arguments.clone(),
        };
        self.status.send_modify(|s| {
            s.state = WorkerState::Busy;
            s.pending = Some(job.tool_name.clone());
        });
        debug!(seq = request.seq, tool = %job.tool_name, "Sending call to worker");

        if let Err(e) = handle.send(&request).await {
            let reason = format!("failed to write to worker: {}", e);
            self.retire(handle, TerminateMode::Immediate, &reason).await;
            return Err(BridgeError::Crashed(reason));
        }

        let wait = tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => Wait::Shutdown,
            reply = tokio::time::timeout_at(job.deadline, handle.read_reply(request.seq)) => match reply {
                Ok(reply) => Wait::Reply(reply),
                Err(_) => Wait::TimedOut,
            },
        };

        match wait {
            Wait::Reply(Ok(outcome)) => {
                self.handle = Some(handle);
                self.status.send_modify(|s| {
                    s.state = WorkerState::Ready;
                    s.pending = None;
                    s.calls_completed += 1;
                });
                Ok(outcome)
            }
            Wait::Reply(Err(reason)) => {
                warn!(tool = %job.tool_name, "Worker died during call: {}", reason);
                self.retire(handle, TerminateMode::Immediate, &reason).await;
                Err(BridgeError::Crashed(reason))
            }
            Wait::TimedOut => {
                warn!(
                    tool = %job.tool_name,
                    "Worker did not reply within {}ms; killing it",
                    job.timeout.as_millis()
                );
                self.retire(handle, TerminateMode::Immediate, "killed after timeout")
                    .await;
                Err(BridgeError::Timeout(job.timeout))
            }
            Wait::Shutdown => {
                // Terminated gracefully by `run` on the way out.
                self.handle = Some(handle);
                Err(BridgeError::Stopped)
            }
        }
    }

    /// Take the running worker, or start a new one.
    async fn ensure_worker(
        &mut self,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<WorkerHandle, BridgeError> {
        if let Some(mut handle) = self.handle.take() {
            match handle.exited() {
                None => return Ok(handle),
                Some(status) => {
                    let reason = format!("exited while idle ({})", status);
                    warn!(pid = handle.pid, "Worker {}", reason);
                    self.retire(handle, TerminateMode::Immediate, &reason).await;
                }
            }
        }

        let now = Instant::now();
        if let Some(retry_in) = self.failures.cooldown_remaining(now, &self.settings) {
            return Err(BridgeError::start(format!(
                "worker is degraded after {} consecutive start failures; next attempt in {}ms",
                self.failures.consecutive,
                retry_in.as_millis()
            )));
        }

        self.status.send_modify(|s| {
            s.state = WorkerState::Starting;
            s.pid = None;
        });

        let startup_deadline = (now + self.settings.startup_timeout).min(deadline);
        match self.start(startup_deadline).await {
            Ok(handle) => {
                self.failures = StartFailures::default();
                info!(pid = handle.pid, generation = handle.generation, "Worker ready");
                self.status.send_modify(|s| {
                    s.state = WorkerState::Ready;
                    s.pid = handle.pid;
                    s.generation = handle.generation;
                    s.consecutive_start_failures = 0;
                    s.degraded = false;
                });
                Ok(handle)
            }
            Err(reason) if startup_deadline == deadline && Instant::now() >= deadline => {
                // The caller ran out of time first; not the worker's fault.
                debug!("Worker startup outlived the caller's deadline: {}", reason);
                self.status.send_modify(|s| s.state = WorkerState::Idle);
                Err(BridgeError::Timeout(timeout))
            }
            Err(reason) => {
                let degraded = self.failures.record(Instant::now(), &self.settings);
                if degraded {
                    warn!(
                        "Worker failed to start {} times in a row; degraded for {}ms",
                        self.failures.consecutive,
                        self.settings.restart_cooldown.as_millis()
                    );
                } else {
                    warn!("Worker failed to start: {}", reason);
                }
                let consecutive = self.failures.consecutive;
                self.status.send_modify(|s| {
                    s.state = WorkerState::Crashed;
                    s.consecutive_start_failures = consecutive;
                    s.degraded = degraded;
                    s.last_exit = Some(reason.clone());
                });
                Err(BridgeError::StartFailed(reason))
            }
        }
    }

    async fn start(&mut self, startup_deadline: Instant) -> Result<WorkerHandle, String> {
        let connection = tokio::time::timeout_at(startup_deadline, self.launcher.launch())
            .await
            .map_err(|_| "launch timed out".to_string())?
            .map_err(|e| match e {
                BridgeError::StartFailed(msg) => msg,
                other => other.to_string(),
            })?;

        let generation = self.status.borrow().generation + 1;
        let mut handle = WorkerHandle::new(connection, generation);

        match tokio::time::timeout_at(startup_deadline, handle.await_ready()).await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(reason)) => {
                handle.terminate(TerminateMode::Immediate).await;
                Err(reason)
            }
            Err(_) => {
                handle.terminate(TerminateMode::Immediate).await;
                Err(format!(
                    "no ready handshake within {}ms",
                    self.settings.startup_timeout.as_millis()
                ))
            }
        }
    }

    /// Terminate a broken worker and record why. Completes only after the
    /// process has been reaped.
    async fn retire(&mut self, handle: WorkerHandle, mode: TerminateMode, reason: &str) {
        let exit = handle.terminate(mode).await;
        let last_exit = match exit {
            Some(status) => format!("{} ({})", reason, status),
            None => reason.to_string(),
        };
        self.status.send_modify(|s| {
            s.state = WorkerState::Crashed;
            s.pid = None;
            s.pending = None;
            s.last_exit = Some(last_exit);
        });
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // All bridge handles dropped; the job channel closing ends the loop.
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================================
// Start failure tracking
// ============================================================================

#[derive(Debug, Default)]
struct StartFailures {
    consecutive: u32,
    window_start: Option<Instant>,
    last_failure: Option<Instant>,
    degraded: bool,
}

impl StartFailures {
    /// Record a failed start; returns whether the bridge is now degraded.
    fn record(&mut self, now: Instant, settings: &BridgeSettings) -> bool {
        let window_expired = self
            .window_start
            .is_none_or(|start| now.duration_since(start) > settings.restart_window);
        if window_expired && !self.degraded {
            self.window_start = Some(now);
            self.consecutive = 0;
        }

        self.consecutive += 1;
        self.last_failure = Some(now);
        if self.consecutive >= settings.max_start_failures.max(1) {
            self.degraded = true;
        }
        self.degraded
    }

    /// Time left before another start may be attempted, if degraded.
    fn cooldown_remaining(&self, now: Instant, settings: &BridgeSettings) -> Option<Duration> {
        if !self.degraded {
            return None;
        }
        let retry_at = self.last_failure? + settings.restart_cooldown;
        (now < retry_at).then(|| retry_at - now)
    }
}

// ============================================================================
// Worker handle
// ============================================================================

struct WorkerHandle {
    generation: u64,
    pid: Option<u32>,
    lines: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    child: Option<Child>,
}

impl WorkerHandle {
    fn new(connection: WorkerConnection, generation: u64) -> Self {
        Self {
            generation,
            pid: connection.pid,
            lines: BufReader::new(connection.reader).lines(),
            writer: connection.writer,
            child: connection.child,
        }
    }

    async fn await_ready(&mut self) -> Result<(), String> {
        loop {
            match self.next_message().await? {
                Some(msg) if msg.ready => return Ok(()),
                Some(msg) => debug!(?msg, "Unexpected worker message before ready"),
                None => {}
            }
        }
    }

    async fn send(&mut self, request: &WorkerRequest) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }

    /// Read until the reply for `seq` arrives. Errors mean the worker is gone.
    async fn read_reply(&mut self, seq: u64) -> Result<WorkerOutcome, String> {
        loop {
            let Some(msg) = self.next_message().await? else {
                continue;
            };
            match msg.seq {
                Some(s) if s == seq => return Ok(msg.into_outcome()),
                Some(s) => warn!(seq = s, expected = seq, "Discarding late worker reply"),
                None if msg.ready => debug!("Ignoring repeated ready message"),
                None => debug!(?msg, "Ignoring worker message without seq"),
            }
        }
    }

    /// Next protocol message; `Ok(None)` for a skipped non-JSON line.
    async fn next_message(&mut self) -> Result<Option<WorkerMessage>, String> {
        match self.lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                match serde_json::from_str::<WorkerMessage>(trimmed) {
                    Ok(msg) => Ok(Some(msg)),
                    Err(_) => {
                        debug!(target: "scene_worker_stdout", "{}", trimmed);
                        Ok(None)
                    }
                }
            }
            Ok(None) => Err("worker closed its output".to_string()),
            Err(e) => Err(format!("failed to read from worker: {}", e)),
        }
    }

    /// Exit status if the process has already exited.
    fn exited(&mut self) -> Option<std::process::ExitStatus> {
        self.child.as_mut().and_then(|c| c.try_wait().ok().flatten())
    }

    /// Close the pipes, terminate, and reap. Returns a description of the exit.
    async fn terminate(self, mode: TerminateMode) -> Option<String> {
        let WorkerHandle {
            pid,
            lines,
            writer,
            child,
            ..
        } = self;
        drop(writer);

        let exit = match child {
            Some(mut child) => terminate_child(&mut child, mode)
                .await
                .map(|status| status.to_string()),
            None => None,
        };
        drop(lines);
        debug!(pid, ?exit, "Worker terminated");
        exit
    }
}

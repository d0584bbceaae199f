//! Server lifecycle state and the in-flight request gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, watch};

/// `Starting -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Stopping or Stopped.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared lifecycle state. Requests hold a [`RequestGuard`] while running so
/// that stopping can wait for them.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<ServerState>,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ServerState::Starting);
        Self {
            state,
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// `Starting -> Running`. No effect in any other state.
    pub fn mark_running(&self) {
        self.state.send_if_modified(|s| {
            if *s == ServerState::Starting {
                *s = ServerState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Admit a request, or `None` once the server is no longer running.
    pub fn try_begin(self: &Arc<Self>) -> Option<RequestGuard> {
        // Count first, then check: a stopper that saw zero cannot miss us.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = RequestGuard {
            lifecycle: Arc::clone(self),
        };
        if self.state() == ServerState::Running {
            Some(guard)
        } else {
            None
        }
    }

    /// Move to Stopping. Returns `false` if a stop was already underway or done.
    pub fn begin_stop(&self) -> bool {
        self.state.send_if_modified(|s| match s {
            ServerState::Starting | ServerState::Running => {
                *s = ServerState::Stopping;
                true
            }
            ServerState::Stopping | ServerState::Stopped => false,
        })
    }

    /// Wait until no requests are in flight. Returns `false` on timeout.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    pub fn mark_stopped(&self) {
        self.state.send_replace(ServerState::Stopped);
    }

    /// Resolves once the state is Stopped.
    pub async fn wait_stopped(&self) {
        let mut rx = self.state.subscribe();
        while *rx.borrow_and_update() != ServerState::Stopped {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    fn finish_request(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Resolves once `state` reports Stopping or Stopped (or its sender is gone).
/// Cancel safe.
pub async fn stop_requested(state: &mut watch::Receiver<ServerState>) {
    while !state.borrow_and_update().is_shutting_down() {
        if state.changed().await.is_err() {
            return;
        }
    }
}

/// Marks one admitted request; dropping it releases the slot.
#[derive(Debug)]
pub struct RequestGuard {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.lifecycle.finish_request();
    }
}

//! Worker bridge error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by [`super::WorkerBridge::invoke`].
///
/// A structured failure reported *by* the worker is not an error here; it is
/// a [`super::WorkerOutcome::Failure`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    /// The worker process could not be started or never reported ready.
    #[error("Worker failed to start: {0}")]
    StartFailed(String),

    /// The worker exited (or its pipe broke) while a call was pending.
    #[error("Worker crashed: {0}")]
    Crashed(String),

    /// The call did not complete within its deadline.
    #[error("Worker did not reply within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The bridge is shutting down or already stopped.
    #[error("Worker bridge is shut down")]
    Stopped,
}

impl BridgeError {
    pub fn start(msg: impl Into<String>) -> Self {
        Self::StartFailed(msg.into())
    }
}

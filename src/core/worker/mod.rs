//! Worker bridge: owns the single scene-engine worker process.
//!
//! - [`launcher`]: how a worker is started and torn down
//! - [`bridge`]: the coordinator that serializes calls onto the worker
//! - [`wire`]: the newline-delimited JSON spoken over the worker's pipes

pub mod bridge;
pub mod error;
pub mod launcher;
pub mod wire;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{BridgeSettings, WorkerBridge, WorkerState, WorkerStatus};
pub use error::BridgeError;
pub use launcher::{ProcessLauncher, TerminateMode, WorkerConnection, WorkerLauncher};
pub use wire::{WorkerMessage, WorkerOutcome, WorkerRequest};

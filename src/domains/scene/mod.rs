//! Scene domain: the mock engine executed inside the worker process.
//!
//! The server never links the engine into its own request path; it only
//! reaches it through the worker wire protocol. The `scene-worker` binary and
//! the integration tests are the consumers of this module.

pub mod engine;
pub mod worker;

pub use engine::{Scene, SceneError};
pub use worker::{ServeExit, WorkerFaults, serve};

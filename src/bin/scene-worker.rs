//! Mock scene worker.
//!
//! Speaks the worker wire protocol on stdin/stdout against an in-memory
//! scene. Logs go to stderr, which the server passes through.

use std::process::ExitCode;

use tracing::{Level, error};
use tracing_subscriber::{EnvFilter, fmt};

use scene_mcp_server::domains::scene::{WorkerFaults, serve};

fn main() -> ExitCode {
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let faults = WorkerFaults::from_env();
    let result = runtime.block_on(serve(tokio::io::stdin(), tokio::io::stdout(), &faults));
    // A fault exit leaves the stdin reader blocked; do not wait for it.
    runtime.shutdown_background();

    match result {
        Ok(exit) => ExitCode::from(exit.exit_code()),
        Err(e) => {
            error!("Scene worker failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

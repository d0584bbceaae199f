//! Scene MCP Server Library
//!
//! A Model Context Protocol (MCP) server that exposes 3D scene operations as
//! tools. Tool calls are validated in-process and executed by one supervised
//! worker process.
//!
//! # Architecture
//!
//! The server is organized into the following modules:
//!
//! - **core**: Infrastructure
//!   - **protocol**: frame decoding and response encoding shared by transports
//!   - **dispatcher**: registry lookup, argument validation, worker invocation
//!   - **worker**: the bridge that owns, restarts and terminates the worker
//!   - **transport**: stdio and HTTP adapters
//!   - **server** / **lifecycle** / **supervisor**: request gating and shutdown
//! - **domains**: Business logic organized by bounded contexts
//!   - **tools**: tool descriptors, parameter schemas and validation
//!   - **scene**: the mock scene engine run by the `scene-worker` binary
//!
//! # Example
//!
//! ```rust,no_run
//! use scene_mcp_server::core::{Config, McpServer, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let transport = config.transport.clone();
//!     let server = McpServer::new(config)?;
//!     Supervisor::new(server, transport).run().await?;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod domains;

// Re-export commonly used types for convenience
pub use core::{Config, Error, McpServer, Result};

//! Core module containing shared infrastructure components.
//!
//! This module provides the foundational building blocks for the MCP server:
//! configuration, error handling, the wire protocol, request dispatch, the
//! worker bridge, server lifecycle, and the transport layer.

pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod server;
pub mod supervisor;
pub mod transport;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use lifecycle::ServerState;
pub use server::{HealthReport, McpServer};
pub use supervisor::Supervisor;
pub use transport::{TransportConfig, TransportService};

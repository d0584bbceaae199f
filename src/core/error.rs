//! Error types and handling for the MCP server.
//!
//! Request-level failures never surface here; they travel to the client as
//! error frames (see [`super::protocol::ErrorCode`]). This type covers the
//! conditions that stop the server itself.

use thiserror::Error;

use super::transport::TransportError;

/// A specialized Result type for MCP server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the MCP server.
#[derive(Debug, Error)]
pub enum Error {
    /// Error originating from the tools domain.
    #[error("Tool error: {0}")]
    Tool(#[from] crate::domains::tools::ToolError),

    /// A transport failed to start or broke down.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

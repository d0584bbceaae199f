//! Transport layer for the MCP server.
//!
//! This module provides two transport implementations:
//! - **STDIO**: newline-delimited frames on stdin/stdout - feature: `stdio`
//! - **HTTP**: JSON-RPC over POST requests - feature: `http`
//!
//! Both decode frames with [`crate::core::protocol::decode_frame`] and hand
//! them to the same [`crate::core::McpServer`]; `both` mode runs them side by
//! side.
//!
//! # Feature Flags
//!
//! - `stdio` (default): STDIO transport - no extra dependencies
//! - `http` (default): HTTP transport - adds axum, tower, tower-http

mod config;
mod error;
mod service;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "stdio")]
pub mod stdio;

pub use config::{HttpConfig, TransportConfig, TransportMode};
pub use error::{TransportError, TransportResult};
pub use service::TransportService;

//! Tools domain module.
//!
//! This module handles all tool-related functionality for the MCP server.
//! Tools are named, schema-described scene operations that clients call; the
//! server validates them here and the worker process executes them.
//!
//! ## Architecture
//!
//! - `definitions/` - Tool descriptors, grouped by concern
//! - `schema.rs` - Semantic parameter types and argument coercion
//! - `registry.rs` - Central tool registry, lookup and validation
//! - `error.rs` - Tool-specific error types
//!
//! ## Adding a New Tool
//!
//! 1. Add a descriptor in `definitions/` (e.g., `objects.rs`)
//! 2. List it in `definitions::all()`
//! 3. Implement the operation in the worker

pub mod definitions;
mod error;
mod registry;
pub mod schema;

pub use error::ToolError;
pub use registry::{ToolDescriptor, ToolRegistry, WorkerOperation};
pub use schema::{ArgValue, NormalizedArguments, ParamSpec, SemanticType};

//! Tool-specific error types.

use thiserror::Error;

/// Errors that can occur while registering, resolving or validating tools.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
    /// A tool with the same name is already registered.
    #[error("Tool already registered: {0}")]
    Duplicate(String),

    /// The requested tool was not found.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Invalid arguments were provided to the tool.
    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}

impl ToolError {
    /// Create a new "duplicate" error.
    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::Duplicate(name.into())
    }

    /// Create a new "not found" error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create a new "invalid arguments" error.
    pub fn invalid_arguments(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

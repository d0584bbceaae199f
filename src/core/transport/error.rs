//! Transport error types.

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur in transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind to address.
    #[error("Failed to bind to {address}: {source}")]
    BindError {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error during transport.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The requested transport was not compiled in.
    #[error("Transport '{0}' is not available in this build")]
    Unavailable(&'static str),

    /// HTTP-specific error.
    #[error("HTTP error: {0}")]
    HttpError(String),
}

impl TransportError {
    /// Create a bind error.
    pub fn bind(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::BindError {
            address: address.into(),
            source,
        }
    }

    /// Create an HTTP error.
    pub fn http(msg: impl Into<String>) -> Self {
        Self::HttpError(msg.into())
    }
}

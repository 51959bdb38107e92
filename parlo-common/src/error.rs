//! Common error types for Parlo

use thiserror::Error;

/// Common result type for Parlo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Parlo services
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport or non-success response
    #[error("HTTP error: {0}")]
    Http(String),

    /// Operation exceeded its time budget
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Component is in the wrong state for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Component was asked to start while already running
    #[error("Already running: {0}")]
    AlreadyRunning(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures a later retry may clear (transport, timeout)
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_) | Error::Io(_))
    }
}

// Error handling module
// Defines the driver error taxonomy and connection-level failures

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by a single query against the endpoint.
///
/// These never abort a run: the executor records them as timeout samples.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// The endpoint did not answer within the configured timeout
    #[error("Query timed out")]
    Timeout,

    /// The endpoint answered with a non-success status
    #[error("Endpoint returned HTTP {status}")]
    Http { status: u16 },

    /// Network-level failure (connect, reset, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Errors that can occur while loading or driving a benchmark
#[derive(Error, Debug)]
pub enum DriverError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed use-case or query-mix data on disk
    #[error("Failed to load {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    /// Parameter pool cannot serve a query
    #[error("Parameter error: {0}")]
    Parameter(String),

    /// Connection failure surfaced outside the per-query path
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// A client task died during a multi-client run
    #[error("Client {client} failed: {message}")]
    ClientFailed { client: usize, message: String },

    /// The run was cancelled from outside (Ctrl+C, SIGTERM)
    #[error("Run interrupted")]
    Interrupted,

    /// I/O error on a report or measurement stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DriverError {
    /// Build a load error for the given file
    pub fn load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        DriverError::Load {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

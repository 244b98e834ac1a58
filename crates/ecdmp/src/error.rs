//! Error types for the ECDMP SDK.

/// Errors that can occur inside the ECDMP SDK.
///
/// Producer calls never surface these; they are logged and absorbed.
/// Only the builder and the explicit lifecycle calls return them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Key-value store rejected a read or write.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Filesystem error from a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

//! Error types for despa-sync.

use thiserror::Error;

/// Result type alias using despa-sync's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for despa-sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The backing realtime feed failed (unreachable, refused, read error).
    #[error("Feed error: {0}")]
    Feed(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

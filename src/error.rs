//! Error types for the relay.

use thiserror::Error;

/// Main error type for relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to open change feed: {0}")]
    Subscribe(String),

    #[error("Change feed interrupted: {0}")]
    Feed(String),

    #[error("Document lookup failed: {0}")]
    Lookup(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Relay is already running")]
    AlreadyStarted,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Serialization(e.to_string())
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

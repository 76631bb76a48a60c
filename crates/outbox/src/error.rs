//! Outbox relay error types.

use thiserror::Error;

/// Errors that can occur while relaying outbox records.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    /// A stored record could not be decoded.
    #[error("Outbox record decoding error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The transport rejected an event.
    #[error("Publish error: {0}")]
    Publish(String),
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;

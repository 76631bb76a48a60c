//! Domain error types.

use common::EntityId;
use store::StoreError;
use thiserror::Error;

/// Errors raised by a [`crate::UnitOfWork`].
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// `begin` was called while a transaction is open.
    #[error("Transaction is already active")]
    AlreadyActive,

    /// `commit`, `rollback` or a registration was called without an open
    /// transaction.
    #[error("No active transaction")]
    NotActive,

    /// The buffered writes plus outbox records exceed the store's batch cap.
    #[error("Transaction has {items} writes, store accepts at most {max}")]
    BatchTooLarge { items: usize, max: usize },

    /// The context was cancelled before the commit was sent.
    #[error("Transaction was cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UnitOfWorkError {
    /// Returns true for errors caused by calling the transaction API out of
    /// sequence or over its size limit.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            UnitOfWorkError::AlreadyActive
                | UnitOfWorkError::NotActive
                | UnitOfWorkError::BatchTooLarge { .. }
        )
    }
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Unit of work error: {0}")]
    UnitOfWork(#[from] UnitOfWorkError),

    /// Entity not found.
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: &'static str,
        id: EntityId,
    },

    /// The entity was changed by someone else since it was loaded.
    #[error("Concurrent modification of {entity_type} {id}")]
    Conflict {
        entity_type: &'static str,
        id: EntityId,
    },

    /// Field validation failed.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

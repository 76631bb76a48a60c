use thiserror::Error;

/// Errors that can occur when interacting with the item store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write precondition did not hold. Nothing in the batch was applied.
    #[error("Condition failed for item '{key}'")]
    ConditionFailed { key: String },

    /// The batch exceeds the store's atomic write cap. Nothing was applied.
    #[error("Batch of {items} writes exceeds the atomic limit of {max}")]
    BatchTooLarge { items: usize, max: usize },

    /// An atomic batch must contain at least one write.
    #[error("Cannot write an empty batch")]
    EmptyBatch,

    /// The same key appears twice in one atomic batch.
    #[error("Key '{0}' appears more than once in the batch")]
    DuplicateKey(String),

    /// Injected or transport-level failure of the store itself.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if the error is a failed write precondition.
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, StoreError::ConditionFailed { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

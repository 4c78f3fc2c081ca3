use thiserror::Error;

use crate::{ExpectedVersion, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream was not at the expected version. Nothing was appended.
    #[error(
        "Concurrency conflict on stream {stream}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        stream: String,
        expected: ExpectedVersion,
        actual: Version,
    },

    /// The append request itself was malformed (empty batch, empty stream name).
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// The caller used an API in a way its contract forbids.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A token string could not be parsed.
    #[error("Invalid event store token: {0}")]
    InvalidToken(String),

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

impl EventStoreError {
    /// Returns true for optimistic-concurrency failures, which callers retry
    /// with fresh version information.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;

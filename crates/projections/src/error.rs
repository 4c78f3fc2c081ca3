//! Projection error types.

use event_store::{DocumentStoreError, EventStoreError};
use thiserror::Error;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// An error occurred in the document store.
    #[error("Document store error: {0}")]
    Document(#[from] DocumentStoreError),

    /// Failed to deserialize an event body or a stored document.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The registry has no instance with this name.
    #[error("Projection instance not found: {0}")]
    InstanceNotFound(String),

    /// The registry already has an instance with this name.
    #[error("Projection instance already exists: {0}")]
    InstanceExists(String),

    /// No instance is currently readable by any registered reader.
    #[error("No readable instance of projection {0}")]
    NoInstance(String),

    /// The operation is not meaningful here. This is a programming error.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A projection-specific error.
    #[error("Projection error: {0}")]
    Projection(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

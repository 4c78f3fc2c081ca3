//! Document storage with per-key optimistic versioning.
//!
//! Projections keep their materialized state here and the document-backed
//! projection registry keeps instance metadata and tokens here.

mod memory;
mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;

/// Errors that can occur when interacting with a document store.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    /// The document was not at the expected version. Nothing was written.
    #[error("Version conflict on document {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, DocumentStoreError>;

/// A stored document. Versions start at 1; a missing document is version 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub version: u64,
    pub body: serde_json::Value,
}

impl Document {
    /// Decodes the body into a concrete type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Key/value document store with optimistic concurrency per key.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads a document.
    async fn get_document(&self, key: &str) -> Result<Option<Document>>;

    /// Writes a document if it is at `expected_version` (0 = must not exist).
    ///
    /// Returns the new version.
    async fn save_document(
        &self,
        key: &str,
        body: serde_json::Value,
        expected_version: u64,
    ) -> Result<u64>;

    /// Writes a document regardless of its current version.
    async fn put_document(&self, key: &str, body: serde_json::Value) -> Result<u64>;

    /// Deletes a document. Deleting a missing document is not an error.
    async fn delete_document(&self, key: &str) -> Result<()>;

    /// Lists all documents whose key starts with `prefix`, ordered by key.
    async fn list_documents(&self, prefix: &str) -> Result<Vec<Document>>;

    /// Deletes all documents whose key starts with `prefix`, returning how many.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

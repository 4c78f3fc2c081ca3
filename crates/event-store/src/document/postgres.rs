use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{Document, DocumentStore, DocumentStoreError, Result};

/// PostgreSQL-backed document store over the `documents` table.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_version(&self, key: &str) -> Result<u64> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM documents WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(version.unwrap_or(0) as u64)
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn get_document(&self, key: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT key, version, body FROM documents WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Document {
                key: row.try_get("key")?,
                version: row.try_get::<i64, _>("version")? as u64,
                body: row.try_get("body")?,
            })
        })
        .transpose()
    }

    async fn save_document(
        &self,
        key: &str,
        body: serde_json::Value,
        expected_version: u64,
    ) -> Result<u64> {
        let result = if expected_version == 0 {
            sqlx::query(
                "INSERT INTO documents (key, version, body) VALUES ($1, 1, $2) ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(&body)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                "UPDATE documents SET body = $2, version = version + 1, updated_at = now() WHERE key = $1 AND version = $3",
            )
            .bind(key)
            .bind(&body)
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(DocumentStoreError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: self.current_version(key).await?,
            });
        }
        Ok(expected_version + 1)
    }

    async fn put_document(&self, key: &str, body: serde_json::Value) -> Result<u64> {
        let version: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (key, version, body) VALUES ($1, 1, $2)
            ON CONFLICT (key) DO UPDATE
                SET body = EXCLUDED.body, version = documents.version + 1, updated_at = now()
            RETURNING version
            "#,
        )
        .bind(key)
        .bind(&body)
        .fetch_one(&self.pool)
        .await?;
        Ok(version as u64)
    }

    async fn delete_document(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_documents(&self, prefix: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT key, version, body FROM documents WHERE left(key, length($1)) = $1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Document {
                    key: row.try_get("key")?,
                    version: row.try_get::<i64, _>("version")? as u64,
                    body: row.try_get("body")?,
                })
            })
            .collect()
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE left(key, length($1)) = $1")
            .bind(prefix)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Document, DocumentStore, DocumentStoreError, Result};

/// In-memory document store. Clones share the same documents.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<BTreeMap<String, (u64, serde_json::Value)>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

fn keys_with_prefix<'a, V>(
    map: &'a BTreeMap<String, V>,
    prefix: &'a str,
) -> impl Iterator<Item = (&'a String, &'a V)> + 'a {
    map.range(prefix.to_string()..)
        .take_while(move |(k, _)| k.starts_with(prefix))
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, key: &str) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents.get(key).map(|(version, body)| Document {
            key: key.to_string(),
            version: *version,
            body: body.clone(),
        }))
    }

    async fn save_document(
        &self,
        key: &str,
        body: serde_json::Value,
        expected_version: u64,
    ) -> Result<u64> {
        let mut documents = self.documents.write().await;
        let actual = documents.get(key).map(|(v, _)| *v).unwrap_or(0);
        if actual != expected_version {
            return Err(DocumentStoreError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual,
            });
        }
        let version = actual + 1;
        documents.insert(key.to_string(), (version, body));
        Ok(version)
    }

    async fn put_document(&self, key: &str, body: serde_json::Value) -> Result<u64> {
        let mut documents = self.documents.write().await;
        let version = documents.get(key).map(|(v, _)| *v).unwrap_or(0) + 1;
        documents.insert(key.to_string(), (version, body));
        Ok(version)
    }

    async fn delete_document(&self, key: &str) -> Result<()> {
        self.documents.write().await.remove(key);
        Ok(())
    }

    async fn list_documents(&self, prefix: &str) -> Result<Vec<Document>> {
        let documents = self.documents.read().await;
        Ok(keys_with_prefix(&documents, prefix)
            .map(|(key, (version, body))| Document {
                key: key.clone(),
                version: *version,
                body: body.clone(),
            })
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut documents = self.documents.write().await;
        let doomed: Vec<String> = keys_with_prefix(&documents, prefix)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            documents.remove(key);
        }
        Ok(doomed.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn save_requires_expected_version() {
        let store = InMemoryDocumentStore::new();

        let v1 = store.save_document("k", json!({"n": 1}), 0).await.unwrap();
        assert_eq!(v1, 1);

        let conflict = store.save_document("k", json!({"n": 2}), 0).await;
        assert!(matches!(
            conflict,
            Err(DocumentStoreError::VersionConflict { actual: 1, .. })
        ));

        let v2 = store.save_document("k", json!({"n": 2}), 1).await.unwrap();
        assert_eq!(v2, 2);
        let doc = store.get_document("k").await.unwrap().unwrap();
        assert_eq!(doc.version, 2);
        assert_eq!(doc.body["n"], 2);
    }

    #[tokio::test]
    async fn put_ignores_versions() {
        let store = InMemoryDocumentStore::new();
        assert_eq!(store.put_document("k", json!(1)).await.unwrap(), 1);
        assert_eq!(store.put_document("k", json!(2)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn prefix_operations_only_touch_matching_keys() {
        let store = InMemoryDocumentStore::new();
        for key in ["a/1", "a/2", "ab/1", "b/1"] {
            store.put_document(key, json!(key)).await.unwrap();
        }

        let listed: Vec<String> = store
            .list_documents("a/")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.key)
            .collect();
        assert_eq!(listed, vec!["a/1", "a/2"]);

        assert_eq!(store.delete_prefix("a/").await.unwrap(), 2);
        assert_eq!(store.len().await, 2);
        assert!(store.get_document("ab/1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_missing_document_is_ok() {
        let store = InMemoryDocumentStore::new();
        store.delete_document("nope").await.unwrap();
        assert!(store.is_empty().await);
    }
}

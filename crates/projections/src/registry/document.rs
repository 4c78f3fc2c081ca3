//! Registry persisted in a [`DocumentStore`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::CodeVersion;
use event_store::{DocumentStore, DocumentStoreError, EventStoreToken};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{ChangeHandler, ChangeSubscription, Observers, ProjectionRegistry};
use crate::error::{ProjectionError, Result};
use crate::metadata::{ProjectionInstanceMetadata, ProjectionStatus, sort_newest_first};

const MAX_WRITE_ATTEMPTS: usize = 16;

#[derive(Debug, Default, Serialize, Deserialize)]
struct InstancesDocument {
    instances: Vec<ProjectionInstanceMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenDocument {
    token: EventStoreToken,
}

/// Registry backed by a document store, shareable across processes.
///
/// All instances of a projection live in one document,
/// `projections/{name}/instances`, updated with optimistic concurrency and
/// retried on conflict. Each instance's token is its own document,
/// `projections/{name}/tokens/{instance}`, since only the instance's builder
/// writes it.
///
/// Observers of a handle are notified for that handle's own writes and, for
/// writes made elsewhere, when [`refresh`](Self::refresh) notices them.
pub struct DocumentProjectionRegistry {
    projection_name: String,
    documents: Arc<dyn DocumentStore>,
    observers: Arc<Observers>,
    /// Metadata as last published to observers. Its lock also serializes
    /// this handle's writes.
    last_seen: Mutex<BTreeMap<String, ProjectionInstanceMetadata>>,
}

impl DocumentProjectionRegistry {
    pub fn new(projection_name: impl Into<String>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            projection_name: projection_name.into(),
            documents,
            observers: Arc::default(),
            last_seen: Mutex::new(BTreeMap::new()),
        }
    }

    fn instances_key(&self) -> String {
        format!("projections/{}/instances", self.projection_name)
    }

    fn token_key(&self, instance: &str) -> String {
        format!("projections/{}/tokens/{}", self.projection_name, instance)
    }

    /// Re-reads the shared metadata and notifies observers of anything that
    /// changed since this handle last looked.
    pub async fn refresh(&self) -> Result<()> {
        let mut seen = self.last_seen.lock().await;
        let (instances, _) = self.load().await?;
        self.publish(&mut seen, instances);
        Ok(())
    }

    async fn load(&self) -> Result<(Vec<ProjectionInstanceMetadata>, u64)> {
        match self.documents.get_document(&self.instances_key()).await? {
            Some(document) => {
                let stored: InstancesDocument = document.decode()?;
                Ok((stored.instances, document.version))
            }
            None => Ok((Vec::new(), 0)),
        }
    }

    fn publish(
        &self,
        seen: &mut BTreeMap<String, ProjectionInstanceMetadata>,
        instances: Vec<ProjectionInstanceMetadata>,
    ) {
        let current: BTreeMap<_, _> = instances
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
        for (name, metadata) in &current {
            let previous = seen.get(name);
            if previous != Some(metadata) {
                self.observers.notify(metadata, previous);
            }
        }
        *seen = current;
    }

    /// Applies `change` to the stored instance list, retrying on conflicting
    /// concurrent writes.
    async fn mutate<F>(&self, change: F) -> Result<ProjectionInstanceMetadata>
    where
        F: Fn(&mut Vec<ProjectionInstanceMetadata>) -> Result<ProjectionInstanceMetadata>
            + Send
            + Sync,
    {
        let mut seen = self.last_seen.lock().await;
        let key = self.instances_key();

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (mut instances, version) = self.load().await?;
            let before = instances.clone();
            let result = change(&mut instances)?;
            if instances == before {
                self.publish(&mut seen, instances);
                return Ok(result);
            }

            let body = serde_json::to_value(InstancesDocument {
                instances: instances.clone(),
            })?;
            match self.documents.save_document(&key, body, version).await {
                Ok(_) => {
                    self.publish(&mut seen, instances);
                    return Ok(result);
                }
                Err(DocumentStoreError::VersionConflict { actual, .. }) => {
                    tracing::debug!(
                        projection = %self.projection_name,
                        attempt,
                        expected = version,
                        actual,
                        "registry write conflicted, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ProjectionError::Projection(format!(
            "registry for {} kept conflicting after {MAX_WRITE_ATTEMPTS} attempts",
            self.projection_name
        )))
    }
}

fn find_mut<'a>(
    instances: &'a mut [ProjectionInstanceMetadata],
    name: &str,
) -> Result<&'a mut ProjectionInstanceMetadata> {
    instances
        .iter_mut()
        .find(|m| m.name == name)
        .ok_or_else(|| ProjectionError::InstanceNotFound(name.to_string()))
}

#[async_trait]
impl ProjectionRegistry for DocumentProjectionRegistry {
    fn projection_name(&self) -> &str {
        &self.projection_name
    }

    #[tracing::instrument(skip(self), fields(projection = %self.projection_name))]
    async fn build_new_instance(
        &self,
        name: &str,
        node_name: Option<&str>,
        version: CodeVersion,
        minimal_reader: CodeVersion,
    ) -> Result<ProjectionInstanceMetadata> {
        self.mutate(|instances| {
            if instances.iter().any(|m| m.name == name) {
                return Err(ProjectionError::InstanceExists(name.to_string()));
            }
            let metadata = ProjectionInstanceMetadata {
                name: name.to_string(),
                version,
                minimal_reader,
                node_name: node_name.map(str::to_string),
                status: ProjectionStatus::NewBuild,
            };
            instances.push(metadata.clone());
            Ok(metadata)
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(projection = %self.projection_name))]
    async fn update_status(
        &self,
        name: &str,
        status: ProjectionStatus,
    ) -> Result<ProjectionInstanceMetadata> {
        self.mutate(|instances| {
            let metadata = find_mut(instances, name)?;
            metadata.status = status;
            Ok(metadata.clone())
        })
        .await
    }

    #[tracing::instrument(skip(self), fields(projection = %self.projection_name))]
    async fn transition_status(
        &self,
        name: &str,
        from: ProjectionStatus,
        to: ProjectionStatus,
    ) -> Result<Option<ProjectionInstanceMetadata>> {
        let moved = AtomicBool::new(false);
        let metadata = self
            .mutate(|instances| {
                let metadata = find_mut(instances, name)?;
                let matches = metadata.status == from;
                if matches {
                    metadata.status = to;
                }
                moved.store(matches, Ordering::Relaxed);
                Ok(metadata.clone())
            })
            .await?;
        Ok(moved.into_inner().then_some(metadata))
    }

    #[tracing::instrument(skip(self), fields(projection = %self.projection_name))]
    async fn upgrade(
        &self,
        name: &str,
        version: CodeVersion,
        minimal_reader: CodeVersion,
    ) -> Result<ProjectionInstanceMetadata> {
        self.mutate(|instances| {
            let metadata = find_mut(instances, name)?;
            metadata.version = version;
            metadata.minimal_reader = minimal_reader;
            Ok(metadata.clone())
        })
        .await
    }

    async fn get_all_metadata(&self) -> Result<Vec<ProjectionInstanceMetadata>> {
        let (mut instances, _) = self.load().await?;
        sort_newest_first(&mut instances);
        Ok(instances)
    }

    async fn get_metadata(&self, name: &str) -> Result<Option<ProjectionInstanceMetadata>> {
        let (instances, _) = self.load().await?;
        Ok(instances.into_iter().find(|m| m.name == name))
    }

    async fn get_token(&self, name: &str) -> Result<EventStoreToken> {
        match self.documents.get_document(&self.token_key(name)).await? {
            Some(document) => Ok(document.decode::<TokenDocument>()?.token),
            None => Ok(EventStoreToken::Initial),
        }
    }

    async fn set_token(&self, name: &str, token: EventStoreToken) -> Result<()> {
        let body = serde_json::to_value(TokenDocument { token })?;
        self.documents
            .put_document(&self.token_key(name), body)
            .await?;
        Ok(())
    }

    fn register_for_changes(
        &self,
        name: Option<&str>,
        handler: ChangeHandler,
    ) -> ChangeSubscription {
        self.observers.register(name, handler)
    }
}

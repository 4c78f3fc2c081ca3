//! In-memory registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::CodeVersion;
use event_store::EventStoreToken;
use tokio::sync::Mutex as AsyncMutex;

use super::{ChangeHandler, ChangeSubscription, Observers, ProjectionRegistry};
use crate::error::{ProjectionError, Result};
use crate::metadata::{ProjectionInstanceMetadata, ProjectionStatus, sort_newest_first};

#[derive(Default)]
struct RegistryState {
    instances: BTreeMap<String, ProjectionInstanceMetadata>,
    tokens: HashMap<String, EventStoreToken>,
}

#[derive(Default)]
struct SharedProjection {
    state: AsyncMutex<RegistryState>,
    observers: Arc<Observers>,
}

/// Process-wide table of in-memory registries, one per projection name.
///
/// Opening the same name twice yields handles over the same state and the
/// same observer list.
#[derive(Clone, Default)]
pub struct InMemoryRegistryHub {
    projections: Arc<Mutex<HashMap<String, Arc<SharedProjection>>>>,
}

impl InMemoryRegistryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the registry for `projection_name`, creating it if needed.
    pub fn open(&self, projection_name: &str) -> InMemoryProjectionRegistry {
        let shared = self
            .projections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(projection_name.to_string())
            .or_default()
            .clone();
        InMemoryProjectionRegistry {
            projection_name: projection_name.to_string(),
            shared,
        }
    }
}

/// Handle to one logical projection's in-memory registry.
///
/// Mutations are serialized by one lock per projection, and observers are
/// notified before it is released, so they see changes in the order they
/// were made.
#[derive(Clone)]
pub struct InMemoryProjectionRegistry {
    projection_name: String,
    shared: Arc<SharedProjection>,
}

impl InMemoryProjectionRegistry {
    /// Opens a standalone registry not shared with any hub.
    pub fn new(projection_name: impl Into<String>) -> Self {
        Self {
            projection_name: projection_name.into(),
            shared: Arc::default(),
        }
    }

    async fn modify<F>(&self, name: &str, change: F) -> Result<ProjectionInstanceMetadata>
    where
        F: FnOnce(&mut ProjectionInstanceMetadata) + Send,
    {
        let mut state = self.shared.state.lock().await;
        let current = state
            .instances
            .get_mut(name)
            .ok_or_else(|| ProjectionError::InstanceNotFound(name.to_string()))?;

        let old = current.clone();
        change(current);
        let new = current.clone();
        if new != old {
            self.shared.observers.notify(&new, Some(&old));
        }
        Ok(new)
    }
}

#[async_trait]
impl ProjectionRegistry for InMemoryProjectionRegistry {
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
        let mut state = self.shared.state.lock().await;
        if state.instances.contains_key(name) {
            return Err(ProjectionError::InstanceExists(name.to_string()));
        }

        let metadata = ProjectionInstanceMetadata {
            name: name.to_string(),
            version,
            minimal_reader,
            node_name: node_name.map(str::to_string),
            status: ProjectionStatus::NewBuild,
        };
        state.instances.insert(name.to_string(), metadata.clone());
        self.shared.observers.notify(&metadata, None);
        Ok(metadata)
    }

    #[tracing::instrument(skip(self), fields(projection = %self.projection_name))]
    async fn update_status(
        &self,
        name: &str,
        status: ProjectionStatus,
    ) -> Result<ProjectionInstanceMetadata> {
        self.modify(name, |m| m.status = status).await
    }

    #[tracing::instrument(skip(self), fields(projection = %self.projection_name))]
    async fn transition_status(
        &self,
        name: &str,
        from: ProjectionStatus,
        to: ProjectionStatus,
    ) -> Result<Option<ProjectionInstanceMetadata>> {
        let mut moved = false;
        let metadata = self
            .modify(name, |m| {
                if m.status == from {
                    m.status = to;
                    moved = true;
                }
            })
            .await?;
        Ok(moved.then_some(metadata))
    }

    #[tracing::instrument(skip(self), fields(projection = %self.projection_name))]
    async fn upgrade(
        &self,
        name: &str,
        version: CodeVersion,
        minimal_reader: CodeVersion,
    ) -> Result<ProjectionInstanceMetadata> {
        self.modify(name, |m| {
            m.version = version;
            m.minimal_reader = minimal_reader;
        })
        .await
    }

    async fn get_all_metadata(&self) -> Result<Vec<ProjectionInstanceMetadata>> {
        let state = self.shared.state.lock().await;
        let mut all: Vec<_> = state.instances.values().cloned().collect();
        sort_newest_first(&mut all);
        Ok(all)
    }

    async fn get_metadata(&self, name: &str) -> Result<Option<ProjectionInstanceMetadata>> {
        Ok(self.shared.state.lock().await.instances.get(name).cloned())
    }

    async fn get_token(&self, name: &str) -> Result<EventStoreToken> {
        let state = self.shared.state.lock().await;
        Ok(state.tokens.get(name).copied().unwrap_or_default())
    }

    async fn set_token(&self, name: &str, token: EventStoreToken) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        if !state.instances.contains_key(name) {
            return Err(ProjectionError::InstanceNotFound(name.to_string()));
        }
        state.tokens.insert(name.to_string(), token);
        Ok(())
    }

    fn register_for_changes(
        &self,
        name: Option<&str>,
        handler: ChangeHandler,
    ) -> ChangeSubscription {
        self.shared.observers.register(name, handler)
    }
}

//! Durable per-projection metadata and resumption tokens.
//!
//! A registry is opened for one logical projection name and holds every
//! instance built for it. Handles opened for the same name share their
//! backing state; handles for different names are independent.

mod document;
mod memory;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use common::CodeVersion;
use event_store::EventStoreToken;

use crate::error::Result;
use crate::metadata::{ProjectionInstanceMetadata, ProjectionStatus};

pub use document::DocumentProjectionRegistry;
pub use memory::{InMemoryProjectionRegistry, InMemoryRegistryHub};

/// Called with the new metadata and the metadata it replaced (`None` when the
/// instance was just created).
pub type ChangeHandler =
    Arc<dyn Fn(&ProjectionInstanceMetadata, Option<&ProjectionInstanceMetadata>) + Send + Sync>;

/// Metadata and token storage for the instances of one logical projection.
#[async_trait]
pub trait ProjectionRegistry: Send + Sync {
    /// The logical projection name this registry was opened for.
    fn projection_name(&self) -> &str;

    /// Creates an instance with status [`ProjectionStatus::NewBuild`].
    ///
    /// Fails with [`ProjectionError::InstanceExists`](crate::ProjectionError::InstanceExists)
    /// if the name is taken.
    async fn build_new_instance(
        &self,
        name: &str,
        node_name: Option<&str>,
        version: CodeVersion,
        minimal_reader: CodeVersion,
    ) -> Result<ProjectionInstanceMetadata>;

    /// Sets an instance's status. Observers are only notified on an actual change.
    async fn update_status(
        &self,
        name: &str,
        status: ProjectionStatus,
    ) -> Result<ProjectionInstanceMetadata>;

    /// Moves an instance from `from` to `to` in one atomic step.
    ///
    /// Returns `None` and changes nothing if the instance's status is no
    /// longer `from`.
    async fn transition_status(
        &self,
        name: &str,
        from: ProjectionStatus,
        to: ProjectionStatus,
    ) -> Result<Option<ProjectionInstanceMetadata>>;

    /// Records that an instance is being rebuilt by newer code.
    async fn upgrade(
        &self,
        name: &str,
        version: CodeVersion,
        minimal_reader: CodeVersion,
    ) -> Result<ProjectionInstanceMetadata>;

    /// All instances, newest version first, then by name.
    async fn get_all_metadata(&self) -> Result<Vec<ProjectionInstanceMetadata>>;

    async fn get_metadata(&self, name: &str) -> Result<Option<ProjectionInstanceMetadata>>;

    /// The instance's resumption token, `Initial` if none was stored.
    async fn get_token(&self, name: &str) -> Result<EventStoreToken>;

    async fn set_token(&self, name: &str, token: EventStoreToken) -> Result<()>;

    /// Registers `handler` for changes to one instance (`Some(name)`) or to
    /// all of them (`None`).
    ///
    /// Handlers run synchronously, in registration order, in the order the
    /// changes were made. They must not block. The registration lasts until
    /// the returned subscription is dropped.
    fn register_for_changes(&self, name: Option<&str>, handler: ChangeHandler)
    -> ChangeSubscription;
}

#[async_trait]
impl<R: ProjectionRegistry + ?Sized> ProjectionRegistry for Arc<R> {
    fn projection_name(&self) -> &str {
        (**self).projection_name()
    }

    async fn build_new_instance(
        &self,
        name: &str,
        node_name: Option<&str>,
        version: CodeVersion,
        minimal_reader: CodeVersion,
    ) -> Result<ProjectionInstanceMetadata> {
        (**self)
            .build_new_instance(name, node_name, version, minimal_reader)
            .await
    }

    async fn update_status(
        &self,
        name: &str,
        status: ProjectionStatus,
    ) -> Result<ProjectionInstanceMetadata> {
        (**self).update_status(name, status).await
    }

    async fn transition_status(
        &self,
        name: &str,
        from: ProjectionStatus,
        to: ProjectionStatus,
    ) -> Result<Option<ProjectionInstanceMetadata>> {
        (**self).transition_status(name, from, to).await
    }

    async fn upgrade(
        &self,
        name: &str,
        version: CodeVersion,
        minimal_reader: CodeVersion,
    ) -> Result<ProjectionInstanceMetadata> {
        (**self).upgrade(name, version, minimal_reader).await
    }

    async fn get_all_metadata(&self) -> Result<Vec<ProjectionInstanceMetadata>> {
        (**self).get_all_metadata().await
    }

    async fn get_metadata(&self, name: &str) -> Result<Option<ProjectionInstanceMetadata>> {
        (**self).get_metadata(name).await
    }

    async fn get_token(&self, name: &str) -> Result<EventStoreToken> {
        (**self).get_token(name).await
    }

    async fn set_token(&self, name: &str, token: EventStoreToken) -> Result<()> {
        (**self).set_token(name, token).await
    }

    fn register_for_changes(
        &self,
        name: Option<&str>,
        handler: ChangeHandler,
    ) -> ChangeSubscription {
        (**self).register_for_changes(name, handler)
    }
}

struct Observer {
    id: u64,
    filter: Option<String>,
    handler: ChangeHandler,
}

/// Ordered list of change handlers shared by the handles of one projection.
#[derive(Default)]
pub(crate) struct Observers {
    next_id: AtomicU64,
    list: Mutex<Vec<Observer>>,
}

impl Observers {
    pub(crate) fn register(
        self: &Arc<Self>,
        filter: Option<&str>,
        handler: ChangeHandler,
    ) -> ChangeSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Observer {
                id,
                filter: filter.map(str::to_string),
                handler,
            });
        ChangeSubscription {
            observers: Arc::downgrade(self),
            id,
        }
    }

    /// Calls every matching handler in registration order.
    ///
    /// The handler list is copied first so a handler may drop its own
    /// subscription without deadlocking.
    pub(crate) fn notify(
        &self,
        new: &ProjectionInstanceMetadata,
        old: Option<&ProjectionInstanceMetadata>,
    ) {
        let handlers: Vec<ChangeHandler> = self
            .list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|o| o.filter.as_deref().is_none_or(|f| f == new.name))
            .map(|o| Arc::clone(&o.handler))
            .collect();
        for handler in handlers {
            handler(new, old);
        }
    }

    fn unregister(&self, id: u64) {
        self.list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|o| o.id != id);
    }
}

/// Keeps a change handler registered; dropping it unregisters the handler.
#[must_use = "the handler is unregistered when the subscription is dropped"]
pub struct ChangeSubscription {
    observers: Weak<Observers>,
    id: u64,
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.unregister(self.id);
        }
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("id", &self.id)
            .finish()
    }
}

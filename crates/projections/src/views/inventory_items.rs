//! Inventory item list, one document per item.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, CodeVersion};
use domain::{Aggregate, InventoryEvent, InventoryItem};
use event_store::{DocumentStore, EventRecord, Version};
use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};
use crate::projection::{DEFAULT_EVENTS_BULK_SIZE, Projection};
use crate::reader::ProjectionReader;

/// Logical name shared by the projection and its readers.
pub const INVENTORY_ITEMS_PROJECTION: &str = "inventory_items";

/// Current state of one inventory item as served to queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItemView {
    pub id: AggregateId,
    pub name: String,
    pub count: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    /// Stream version of the last event applied to this document.
    pub version: Version,
}

fn items_prefix(instance: &str) -> String {
    format!("{instance}/items/")
}

fn item_key(instance: &str, id: AggregateId) -> String {
    format!("{instance}/items/{id}")
}

fn item_id_from_stream(stream_name: &str) -> Result<AggregateId> {
    stream_name
        .strip_prefix(InventoryItem::aggregate_type())
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| {
            ProjectionError::Projection(format!("not an inventory item stream: {stream_name}"))
        })
}

/// Projects inventory events into `{instance}/items/{id}` documents.
///
/// Changed items are kept in memory and written on commit. Each document
/// records the stream version it reflects, so replaying an event that is
/// already reflected changes nothing.
pub struct InventoryItemsProjection {
    documents: Arc<dyn DocumentStore>,
    instance: String,
    version: CodeVersion,
    minimal_reader: CodeVersion,
    bulk_size: usize,
    pending: BTreeMap<AggregateId, InventoryItemView>,
}

impl InventoryItemsProjection {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            documents,
            instance: String::new(),
            version: CodeVersion::new(1, 0),
            minimal_reader: CodeVersion::new(1, 0),
            bulk_size: DEFAULT_EVENTS_BULK_SIZE,
            pending: BTreeMap::new(),
        }
    }

    pub fn with_versions(mut self, version: CodeVersion, minimal_reader: CodeVersion) -> Self {
        self.version = version;
        self.minimal_reader = minimal_reader;
        self
    }

    pub fn with_bulk_size(mut self, bulk_size: usize) -> Self {
        self.bulk_size = bulk_size;
        self
    }

    async fn load(&self, id: AggregateId) -> Result<Option<InventoryItemView>> {
        if let Some(view) = self.pending.get(&id) {
            return Ok(Some(view.clone()));
        }
        match self
            .documents
            .get_document(&item_key(&self.instance, id))
            .await?
        {
            Some(document) => Ok(Some(document.decode()?)),
            None => Ok(None),
        }
    }

    async fn write_pending(&mut self) -> Result<usize> {
        let pending = std::mem::take(&mut self.pending);
        let written = pending.len();
        for (id, view) in pending {
            self.documents
                .put_document(&item_key(&self.instance, id), serde_json::to_value(&view)?)
                .await?;
        }
        Ok(written)
    }
}

#[async_trait]
impl Projection for InventoryItemsProjection {
    fn name(&self) -> &str {
        INVENTORY_ITEMS_PROJECTION
    }

    fn version(&self) -> CodeVersion {
        self.version
    }

    fn minimal_reader(&self) -> CodeVersion {
        self.minimal_reader
    }

    fn event_types(&self) -> Vec<String> {
        InventoryEvent::EVENT_TYPES
            .iter()
            .map(|t| t.to_string())
            .collect()
    }

    /// `inventory_items-1` first, then each successor bumps the trailing number.
    fn generate_instance_name(&self, current_best: Option<&str>) -> String {
        let Some(previous) = current_best else {
            return format!("{INVENTORY_ITEMS_PROJECTION}-1");
        };
        if let Some((stem, n)) = previous.rsplit_once('-')
            && let Ok(n) = n.parse::<u64>()
        {
            return format!("{stem}-{}", n + 1);
        }
        format!("{previous}-2")
    }

    fn set_instance_name(&mut self, name: &str) {
        self.instance = name.to_string();
        self.pending.clear();
    }

    async fn start_rebuild(&mut self, continuation: bool) -> Result<()> {
        if !continuation {
            self.pending.clear();
            let removed = self
                .documents
                .delete_prefix(&format!("{}/", self.instance))
                .await?;
            tracing::info!(instance = %self.instance, removed, "cleared instance contents");
        }
        Ok(())
    }

    async fn handle(&mut self, event: &EventRecord) -> Result<()> {
        let id = item_id_from_stream(&event.stream_name)?;
        let current = self.load(id).await?;
        if let Some(view) = &current
            && view.version >= event.stream_version
        {
            tracing::trace!(item = %id, version = %event.stream_version, "already applied");
            return Ok(());
        }

        let mut view = match (current, event.json_body::<InventoryEvent>()?) {
            (_, InventoryEvent::InventoryItemCreated(data)) => InventoryItemView {
                id,
                name: data.name,
                count: 0,
                active: true,
                created_at: data.created_at,
                version: event.stream_version,
            },
            (Some(mut view), InventoryEvent::InventoryItemRenamed(data)) => {
                view.name = data.new_name;
                view
            }
            (Some(mut view), InventoryEvent::ItemsCheckedIn(data)) => {
                view.count = view.count.saturating_add(data.count);
                view
            }
            (Some(mut view), InventoryEvent::ItemsRemoved(data)) => {
                view.count = view.count.saturating_sub(data.count);
                view
            }
            (Some(mut view), InventoryEvent::InventoryItemDeactivated(_)) => {
                view.active = false;
                view
            }
            (None, other) => {
                tracing::warn!(item = %id, event_type = %event.event_type, ?other, "event for unknown item");
                return Ok(());
            }
        };
        view.version = event.stream_version;
        self.pending.insert(id, view);
        Ok(())
    }

    async fn partial_commit(&mut self) -> Result<()> {
        let written = self.write_pending().await?;
        tracing::debug!(instance = %self.instance, written, "wrote item documents");
        Ok(())
    }

    async fn commit_rebuild(&mut self) -> Result<()> {
        self.write_pending().await?;
        Ok(())
    }

    async fn stop_rebuild(&mut self) -> Result<()> {
        tracing::info!(instance = %self.instance, "rebuild stopped");
        Ok(())
    }

    fn events_bulk_size(&self) -> usize {
        self.bulk_size
    }
}

/// Reads inventory item documents from whichever instance it is pointed at.
pub struct InventoryItemsReader {
    documents: Arc<dyn DocumentStore>,
    version: CodeVersion,
    minimal_reader: CodeVersion,
    instance: RwLock<Option<String>>,
}

impl InventoryItemsReader {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            documents,
            version: CodeVersion::new(1, 0),
            minimal_reader: CodeVersion::new(1, 0),
            instance: RwLock::new(None),
        }
    }

    pub fn with_versions(mut self, version: CodeVersion, minimal_reader: CodeVersion) -> Self {
        self.version = version;
        self.minimal_reader = minimal_reader;
        self
    }

    /// The instance queries currently go to.
    pub fn instance(&self) -> Option<String> {
        self.instance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require_instance(&self) -> Result<String> {
        self.instance()
            .ok_or_else(|| ProjectionError::NoInstance(INVENTORY_ITEMS_PROJECTION.to_string()))
    }

    /// All items, ordered by id.
    pub async fn list_items(&self) -> Result<Vec<InventoryItemView>> {
        let instance = self.require_instance()?;
        self.documents
            .list_documents(&items_prefix(&instance))
            .await?
            .iter()
            .map(|d| d.decode().map_err(ProjectionError::from))
            .collect()
    }

    pub async fn get_item(&self, id: AggregateId) -> Result<Option<InventoryItemView>> {
        let instance = self.require_instance()?;
        match self.documents.get_document(&item_key(&instance, id)).await? {
            Some(document) => Ok(Some(document.decode()?)),
            None => Ok(None),
        }
    }
}

impl ProjectionReader for InventoryItemsReader {
    fn projection_name(&self) -> &str {
        INVENTORY_ITEMS_PROJECTION
    }

    fn version(&self) -> CodeVersion {
        self.version
    }

    fn minimal_reader(&self) -> CodeVersion {
        self.minimal_reader
    }

    fn use_instance(&self, instance: Option<&str>) {
        *self
            .instance
            .write()
            .unwrap_or_else(PoisonError::into_inner) = instance.map(str::to_string);
    }
}

#[cfg(test)]
mod tests {
    use domain::{
        CheckInItems, CreateInventoryItem, DeactivateInventoryItem, InventoryService, RemoveItems,
        RenameInventoryItem,
    };
    use event_store::{EventStore, EventStoreToken, InMemoryDocumentStore, InMemoryEventStore};

    use super::*;

    async fn all_events(store: &InMemoryEventStore) -> Vec<EventRecord> {
        store
            .get_all_events(EventStoreToken::Initial, 1000, true)
            .await
            .unwrap()
            .events
    }

    fn projection(documents: &InMemoryDocumentStore, instance: &str) -> InventoryItemsProjection {
        let mut projection = InventoryItemsProjection::new(Arc::new(documents.clone()));
        projection.set_instance_name(instance);
        projection
    }

    #[test]
    fn instance_names_count_up() {
        let projection = InventoryItemsProjection::new(Arc::new(InMemoryDocumentStore::new()));
        assert_eq!(projection.generate_instance_name(None), "inventory_items-1");
        assert_eq!(
            projection.generate_instance_name(Some("inventory_items-9")),
            "inventory_items-10"
        );
        assert_eq!(projection.generate_instance_name(Some("custom")), "custom-2");
    }

    #[test]
    fn parses_item_streams_only() {
        let id = AggregateId::new();
        assert_eq!(item_id_from_stream(&format!("InventoryItem-{id}")).unwrap(), id);
        assert!(item_id_from_stream(&format!("Order-{id}")).is_err());
        assert!(item_id_from_stream("InventoryItem-nope").is_err());
    }

    #[tokio::test]
    async fn folds_item_events_into_documents_on_commit() {
        let store = InMemoryEventStore::new();
        let service = InventoryService::new(store.clone());
        let cmd = CreateInventoryItem::named("Widget");
        let id = cmd.item_id;
        service.create_item(cmd).await.unwrap();
        service.check_in(CheckInItems::new(id, 10)).await.unwrap();
        service.remove(RemoveItems::new(id, 3)).await.unwrap();
        service
            .rename_item(RenameInventoryItem::new(id, "Gadget"))
            .await
            .unwrap();
        service
            .deactivate(DeactivateInventoryItem::new(id))
            .await
            .unwrap();

        let documents = InMemoryDocumentStore::new();
        let mut projection = projection(&documents, "inv-1");
        for event in all_events(&store).await {
            projection.handle(&event).await.unwrap();
        }
        assert!(documents.is_empty().await);

        projection.partial_commit().await.unwrap();
        let reader = InventoryItemsReader::new(Arc::new(documents.clone()));
        reader.use_instance(Some("inv-1"));
        let item = reader.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.name, "Gadget");
        assert_eq!(item.count, 7);
        assert!(!item.active);
        assert_eq!(item.version, Version::new(5));
    }

    #[tokio::test]
    async fn replaying_applied_events_changes_nothing() {
        let store = InMemoryEventStore::new();
        let service = InventoryService::new(store.clone());
        let cmd = CreateInventoryItem::named("Widget");
        let id = cmd.item_id;
        service.create_item(cmd).await.unwrap();
        service.check_in(CheckInItems::new(id, 4)).await.unwrap();

        let documents = InMemoryDocumentStore::new();
        let mut projection = projection(&documents, "inv-1");
        let events = all_events(&store).await;
        for event in &events {
            projection.handle(event).await.unwrap();
        }
        projection.partial_commit().await.unwrap();
        for event in &events {
            projection.handle(event).await.unwrap();
        }
        projection.partial_commit().await.unwrap();

        let reader = InventoryItemsReader::new(Arc::new(documents));
        reader.use_instance(Some("inv-1"));
        assert_eq!(reader.get_item(id).await.unwrap().unwrap().count, 4);
    }

    #[tokio::test]
    async fn fresh_rebuild_clears_only_its_instance() {
        let documents = InMemoryDocumentStore::new();
        let view = |name: &str| {
            serde_json::json!({
                "id": AggregateId::new(),
                "name": name,
                "count": 1,
                "active": true,
                "created_at": Utc::now(),
                "version": 1,
            })
        };
        documents
            .put_document(&item_key("inv-1", AggregateId::new()), view("a"))
            .await
            .unwrap();
        documents
            .put_document(&item_key("inv-10", AggregateId::new()), view("b"))
            .await
            .unwrap();

        let mut continuing = projection(&documents, "inv-1");
        continuing.start_rebuild(true).await.unwrap();
        assert_eq!(documents.len().await, 2);

        let mut fresh = projection(&documents, "inv-1");
        fresh.start_rebuild(false).await.unwrap();
        assert_eq!(documents.len().await, 1);

        let reader = InventoryItemsReader::new(Arc::new(documents));
        reader.use_instance(Some("inv-10"));
        assert_eq!(reader.list_items().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reader_without_instance_fails() {
        let reader = InventoryItemsReader::new(Arc::new(InMemoryDocumentStore::new()));
        let err = reader.list_items().await.unwrap_err();
        assert!(matches!(err, ProjectionError::NoInstance(_)));
        assert!(reader.get_item(AggregateId::new()).await.is_err());
    }
}

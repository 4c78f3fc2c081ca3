//! Shared application state and projection wiring.

use std::sync::Arc;

use domain::InventoryService;
use event_store::{DocumentStore, EventStore};
use projections::{
    CoordinatorHandle, CoordinatorOptions, InventoryItemsProjection, InventoryItemsReader,
    ProjectionCoordinator, ProjectionReader, ProjectionRegistry, ReaderSelector,
};

use crate::config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub inventory: InventoryService<S>,
    pub items: Arc<InventoryItemsReader>,
    /// Keeps `items` pointed at the best readable instance.
    pub selector: ReaderSelector,
    pub registry: Arc<dyn ProjectionRegistry>,
}

impl<S: EventStore + Clone + 'static> AppState<S> {
    /// Builds the command side over `store` and starts selecting the
    /// instance inventory queries are served from.
    pub async fn new(
        store: S,
        registry: Arc<dyn ProjectionRegistry>,
        documents: Arc<dyn DocumentStore>,
    ) -> projections::Result<Arc<Self>> {
        let items = Arc::new(InventoryItemsReader::new(documents));
        let readers: Vec<Arc<dyn ProjectionReader>> = vec![items.clone()];
        let selector = ReaderSelector::start(registry.as_ref(), readers).await?;

        Ok(Arc::new(Self {
            inventory: InventoryService::new(store),
            items,
            selector,
            registry,
        }))
    }
}

/// Starts the inventory projection worker in the role `config` asks for.
pub fn spawn_inventory_projection<S: EventStore + Clone + 'static>(
    store: S,
    registry: Arc<dyn ProjectionRegistry>,
    documents: Arc<dyn DocumentStore>,
    config: &Config,
) -> CoordinatorHandle {
    let projection =
        InventoryItemsProjection::new(documents).with_bulk_size(config.projection_bulk_size);
    let options = CoordinatorOptions {
        role: config.projection_role,
        node_name: config.node_name.clone(),
        ..CoordinatorOptions::default()
    };
    tracing::info!(role = ?options.role, node = ?options.node_name, "starting inventory projection");
    ProjectionCoordinator::new(store, registry, projection, options).spawn()
}

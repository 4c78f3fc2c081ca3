//! Projection lifecycle for the query side.
//!
//! - [`ProjectionRegistry`]: durable instance metadata and resume tokens per
//!   logical projection, with change notification
//! - [`Projection`]: the contract a materialized view implements
//! - [`ProjectionCoordinator`]: drives a projection as [`Role::Master`] or
//!   [`Role::Rebuilder`], including the cutover to a rebuilt instance
//! - [`ReaderSelector`]: keeps query-side readers on the best readable instance
//! - [`views`]: the inventory item list projection and its reader

pub mod coordinator;
pub mod error;
pub mod metadata;
pub mod projection;
pub mod reader;
pub mod registry;
pub mod selector;
pub mod views;

pub use coordinator::{
    CoordinatorHandle, CoordinatorOptions, CoordinatorState, ProjectionCoordinator, Role,
    RunOutcome,
};
pub use error::{ProjectionError, Result};
pub use metadata::{ProjectionInstanceMetadata, ProjectionStatus};
pub use projection::{DEFAULT_EVENTS_BULK_SIZE, Projection, RebuildKind};
pub use reader::{ProjectionReader, Readability};
pub use registry::{
    ChangeHandler, ChangeSubscription, DocumentProjectionRegistry, InMemoryProjectionRegistry,
    InMemoryRegistryHub, ProjectionRegistry,
};
pub use selector::{ReaderSelector, Selection};
pub use views::{
    INVENTORY_ITEMS_PROJECTION, InventoryItemView, InventoryItemsProjection, InventoryItemsReader,
};

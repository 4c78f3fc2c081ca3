//! Sample projections over the inventory domain.

pub mod inventory_items;

pub use inventory_items::{
    INVENTORY_ITEMS_PROJECTION, InventoryItemView, InventoryItemsProjection, InventoryItemsReader,
};

//! Inventory item aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;

pub use aggregate::InventoryItem;
pub use commands::*;
pub use events::{
    InventoryEvent, InventoryItemCreatedData, InventoryItemDeactivatedData,
    InventoryItemRenamedData, ItemsCheckedInData, ItemsRemovedData,
};
pub use service::InventoryService;

use thiserror::Error;

/// Errors that can occur during inventory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Item name must not be blank.
    #[error("Item name is required")]
    NameRequired,

    /// Item was already created.
    #[error("Inventory item already created")]
    AlreadyCreated,

    /// Command targets an item that was never created.
    #[error("Inventory item does not exist")]
    NotCreated,

    /// Item is deactivated and cannot change.
    #[error("Inventory item is deactivated")]
    Deactivated,

    /// Counts must be positive.
    #[error("Invalid count: {count} (must be greater than 0)")]
    InvalidCount { count: u32 },

    /// Removing more items than are in stock.
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { available: u32, requested: u32 },
}

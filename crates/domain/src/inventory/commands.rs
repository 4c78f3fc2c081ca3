//! Inventory commands.

use common::AggregateId;

use crate::command::Command;

use super::InventoryItem;

/// Command to create a new inventory item.
#[derive(Debug, Clone)]
pub struct CreateInventoryItem {
    pub item_id: AggregateId,
    pub name: String,
}

impl CreateInventoryItem {
    pub fn new(item_id: AggregateId, name: impl Into<String>) -> Self {
        Self {
            item_id,
            name: name.into(),
        }
    }

    /// Creates the command with a generated item ID.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(AggregateId::new(), name)
    }
}

/// Command to rename an inventory item.
#[derive(Debug, Clone)]
pub struct RenameInventoryItem {
    pub item_id: AggregateId,
    pub new_name: String,
}

impl RenameInventoryItem {
    pub fn new(item_id: AggregateId, new_name: impl Into<String>) -> Self {
        Self {
            item_id,
            new_name: new_name.into(),
        }
    }
}

/// Command to add units to stock.
#[derive(Debug, Clone)]
pub struct CheckInItems {
    pub item_id: AggregateId,
    pub count: u32,
}

impl CheckInItems {
    pub fn new(item_id: AggregateId, count: u32) -> Self {
        Self { item_id, count }
    }
}

/// Command to remove units from stock.
#[derive(Debug, Clone)]
pub struct RemoveItems {
    pub item_id: AggregateId,
    pub count: u32,
}

impl RemoveItems {
    pub fn new(item_id: AggregateId, count: u32) -> Self {
        Self { item_id, count }
    }
}

/// Command to deactivate an inventory item.
#[derive(Debug, Clone)]
pub struct DeactivateInventoryItem {
    pub item_id: AggregateId,
}

impl DeactivateInventoryItem {
    pub fn new(item_id: AggregateId) -> Self {
        Self { item_id }
    }
}

macro_rules! impl_command {
    ($($command:ty),* $(,)?) => {
        $(
            impl Command for $command {
                type Aggregate = InventoryItem;

                fn aggregate_id(&self) -> AggregateId {
                    self.item_id
                }
            }
        )*
    };
}

impl_command!(
    CreateInventoryItem,
    RenameInventoryItem,
    CheckInItems,
    RemoveItems,
    DeactivateInventoryItem,
);

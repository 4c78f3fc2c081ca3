//! Inventory domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events that can occur on an inventory item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InventoryEvent {
    /// Item was created.
    InventoryItemCreated(InventoryItemCreatedData),

    /// Item was renamed.
    InventoryItemRenamed(InventoryItemRenamedData),

    /// Stock was added.
    ItemsCheckedIn(ItemsCheckedInData),

    /// Stock was removed.
    ItemsRemoved(ItemsRemovedData),

    /// Item was deactivated.
    InventoryItemDeactivated(InventoryItemDeactivatedData),
}

impl InventoryEvent {
    /// Every event type name this enum produces, for cursor filters.
    pub const EVENT_TYPES: [&'static str; 5] = [
        "InventoryItemCreated",
        "InventoryItemRenamed",
        "ItemsCheckedIn",
        "ItemsRemoved",
        "InventoryItemDeactivated",
    ];

    pub fn item_created(item_id: AggregateId, name: impl Into<String>) -> Self {
        InventoryEvent::InventoryItemCreated(InventoryItemCreatedData {
            item_id,
            name: name.into(),
            created_at: Utc::now(),
        })
    }

    pub fn item_renamed(new_name: impl Into<String>) -> Self {
        InventoryEvent::InventoryItemRenamed(InventoryItemRenamedData {
            new_name: new_name.into(),
        })
    }

    pub fn items_checked_in(count: u32) -> Self {
        InventoryEvent::ItemsCheckedIn(ItemsCheckedInData { count })
    }

    pub fn items_removed(count: u32) -> Self {
        InventoryEvent::ItemsRemoved(ItemsRemovedData { count })
    }

    pub fn item_deactivated() -> Self {
        InventoryEvent::InventoryItemDeactivated(InventoryItemDeactivatedData {
            deactivated_at: Utc::now(),
        })
    }
}

impl DomainEvent for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::InventoryItemCreated(_) => "InventoryItemCreated",
            InventoryEvent::InventoryItemRenamed(_) => "InventoryItemRenamed",
            InventoryEvent::ItemsCheckedIn(_) => "ItemsCheckedIn",
            InventoryEvent::ItemsRemoved(_) => "ItemsRemoved",
            InventoryEvent::InventoryItemDeactivated(_) => "InventoryItemDeactivated",
        }
    }
}

/// Data for InventoryItemCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItemCreatedData {
    pub item_id: AggregateId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Data for InventoryItemRenamed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItemRenamedData {
    pub new_name: String,
}

/// Data for ItemsCheckedIn event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemsCheckedInData {
    pub count: u32,
}

/// Data for ItemsRemoved event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemsRemovedData {
    pub count: u32,
}

/// Data for InventoryItemDeactivated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItemDeactivatedData {
    pub deactivated_at: DateTime<Utc>,
}

//! Inventory item aggregate implementation.

use common::AggregateId;
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{InventoryError, InventoryEvent};

/// Inventory item aggregate root.
///
/// Tracks a named stock-keeping item and how many units are on hand.
#[derive(Debug, Clone, Default)]
pub struct InventoryItem {
    id: Option<AggregateId>,
    version: Version,
    name: String,
    count: u32,
    active: bool,
}

impl Aggregate for InventoryItem {
    type Event = InventoryEvent;
    type Error = InventoryError;

    fn aggregate_type() -> &'static str {
        "InventoryItem"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            InventoryEvent::InventoryItemCreated(data) => {
                self.id = Some(data.item_id);
                self.name = data.name;
                self.active = true;
            }
            InventoryEvent::InventoryItemRenamed(data) => self.name = data.new_name,
            InventoryEvent::ItemsCheckedIn(data) => {
                self.count = self.count.saturating_add(data.count)
            }
            InventoryEvent::ItemsRemoved(data) => self.count = self.count.saturating_sub(data.count),
            InventoryEvent::InventoryItemDeactivated(_) => self.active = false,
        }
    }
}

// Query methods
impl InventoryItem {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of units on hand.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

// Command methods (return events)
impl InventoryItem {
    fn ensure_active(&self) -> Result<(), InventoryError> {
        if self.id.is_none() {
            return Err(InventoryError::NotCreated);
        }
        if !self.active {
            return Err(InventoryError::Deactivated);
        }
        Ok(())
    }

    /// Creates the item.
    pub fn create(
        &self,
        item_id: AggregateId,
        name: &str,
    ) -> Result<Vec<InventoryEvent>, InventoryError> {
        if self.id.is_some() {
            return Err(InventoryError::AlreadyCreated);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(InventoryError::NameRequired);
        }
        Ok(vec![InventoryEvent::item_created(item_id, name)])
    }

    /// Renames the item. Renaming to the current name is a no-op.
    pub fn rename(&self, new_name: &str) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_active()?;
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(InventoryError::NameRequired);
        }
        if new_name == self.name {
            return Ok(vec![]);
        }
        Ok(vec![InventoryEvent::item_renamed(new_name)])
    }

    /// Adds units to stock.
    pub fn check_in(&self, count: u32) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_active()?;
        if count == 0 {
            return Err(InventoryError::InvalidCount { count });
        }
        Ok(vec![InventoryEvent::items_checked_in(count)])
    }

    /// Removes units from stock.
    pub fn remove(&self, count: u32) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_active()?;
        if count == 0 {
            return Err(InventoryError::InvalidCount { count });
        }
        if count > self.count {
            return Err(InventoryError::InsufficientStock {
                available: self.count,
                requested: count,
            });
        }
        Ok(vec![InventoryEvent::items_removed(count)])
    }

    /// Deactivates the item; no further changes are accepted.
    pub fn deactivate(&self) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_active()?;
        Ok(vec![InventoryEvent::item_deactivated()])
    }
}

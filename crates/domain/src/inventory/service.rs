//! Inventory service providing a simplified API for inventory operations.

use common::AggregateId;
use event_store::EventStore;

use crate::command::{Command, CommandResult};
use crate::error::DomainError;
use crate::repository::AggregateRepository;

use super::{
    CheckInItems, CreateInventoryItem, DeactivateInventoryItem, InventoryError, InventoryItem,
    RemoveItems, RenameInventoryItem,
};

impl From<InventoryError> for DomainError {
    fn from(e: InventoryError) -> Self {
        DomainError::Inventory(e)
    }
}

/// Service for managing inventory items.
///
/// Wraps an [`AggregateRepository`] and exposes one method per command.
pub struct InventoryService<S: EventStore> {
    repository: AggregateRepository<S, InventoryItem>,
}

impl<S: EventStore> InventoryService<S> {
    /// Creates a new inventory service with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            repository: AggregateRepository::new(store),
        }
    }

    /// Returns a reference to the underlying repository.
    pub fn repository(&self) -> &AggregateRepository<S, InventoryItem> {
        &self.repository
    }

    /// Creates a new inventory item.
    #[tracing::instrument(skip(self))]
    pub async fn create_item(
        &self,
        cmd: CreateInventoryItem,
    ) -> Result<CommandResult<InventoryItem>, DomainError> {
        let item_id = cmd.aggregate_id();
        self.repository
            .execute(item_id, |item| item.create(item_id, &cmd.name))
            .await
    }

    /// Renames an inventory item.
    #[tracing::instrument(skip(self))]
    pub async fn rename_item(
        &self,
        cmd: RenameInventoryItem,
    ) -> Result<CommandResult<InventoryItem>, DomainError> {
        self.repository
            .execute(cmd.aggregate_id(), |item| item.rename(&cmd.new_name))
            .await
    }

    /// Adds units to an item's stock.
    #[tracing::instrument(skip(self))]
    pub async fn check_in(
        &self,
        cmd: CheckInItems,
    ) -> Result<CommandResult<InventoryItem>, DomainError> {
        self.repository
            .execute(cmd.aggregate_id(), |item| item.check_in(cmd.count))
            .await
    }

    /// Removes units from an item's stock.
    #[tracing::instrument(skip(self))]
    pub async fn remove(
        &self,
        cmd: RemoveItems,
    ) -> Result<CommandResult<InventoryItem>, DomainError> {
        self.repository
            .execute(cmd.aggregate_id(), |item| item.remove(cmd.count))
            .await
    }

    /// Deactivates an inventory item.
    #[tracing::instrument(skip(self))]
    pub async fn deactivate(
        &self,
        cmd: DeactivateInventoryItem,
    ) -> Result<CommandResult<InventoryItem>, DomainError> {
        self.repository
            .execute(cmd.aggregate_id(), |item| item.deactivate())
            .await
    }

    /// Loads an item from its event stream.
    pub async fn get_item(&self, item_id: AggregateId) -> Result<InventoryItem, DomainError> {
        Ok(self.repository.get(item_id).await?.into_state())
    }
}

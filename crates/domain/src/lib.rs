//! Domain layer for the event-sourcing engine.
//!
//! This crate provides:
//! - [`Aggregate`] and [`DomainEvent`] traits for event-sourced entities
//! - [`AggregateRepository`], which loads and saves aggregates as event streams
//! - [`EventSerializer`], the pluggable per-format body codec
//! - the inventory sample domain ([`InventoryItem`] and [`InventoryService`])

pub mod aggregate;
pub mod command;
pub mod error;
pub mod inventory;
pub mod repository;
pub mod serializer;

pub use aggregate::{Aggregate, AggregateRoot, DomainEvent};
pub use command::{Command, CommandResult};
pub use error::DomainError;
pub use inventory::{
    CheckInItems, CreateInventoryItem, DeactivateInventoryItem, InventoryError, InventoryEvent,
    InventoryItem, InventoryService, RemoveItems, RenameInventoryItem,
};
pub use repository::AggregateRepository;
pub use serializer::{EventSerializer, JsonEventSerializer};

//! Event store for the event-sourcing engine.
//!
//! - [`EventStore`]: append-only multi-stream log with a global [`EventStoreToken`] order
//! - [`EventStreamingCursor`]: resumable, type-filtered live read over a store
//! - [`DocumentStore`]: per-key optimistically versioned documents used for
//!   projection state and projection metadata
//! - [`StopHandle`] / [`StopSignal`]: cooperative cancellation for blocking waits

pub mod cursor;
pub mod document;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod stop;
pub mod store;
pub mod token;

pub use common::AggregateId;
pub use cursor::{CursorOptions, CursorStep, CursorStream, EventStreamingCursor};
pub use document::{
    Document, DocumentStore, DocumentStoreError, InMemoryDocumentStore, PostgresDocumentStore,
};
pub use error::{EventStoreError, Result};
pub use event::{EventId, EventRecord, EventRecordBuilder, JSON_FORMAT, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use stop::{StopHandle, StopSignal};
pub use store::{EventPage, EventStore, EventStoreExt, ExpectedVersion};
pub use token::EventStoreToken;

//! Shared types used across the event store, domain and projection crates.

pub mod types;
pub mod version;

pub use types::AggregateId;
pub use version::{CodeVersion, VersionParseError};

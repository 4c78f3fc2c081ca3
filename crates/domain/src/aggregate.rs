//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns the event type name.
    ///
    /// Stored as the record's event type and used by cursors to filter.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates in an event-sourced system.
///
/// In event sourcing, aggregates:
/// - Are rebuilt by replaying events
/// - Generate events from commands
/// - Apply events to update state (pure, deterministic)
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    ///
    /// Together with the id this names the aggregate's stream.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's unique identifier.
    ///
    /// Returns None for a new, uninitialized aggregate.
    fn id(&self) -> Option<AggregateId>;

    /// Returns the current version of the aggregate.
    fn version(&self) -> Version;

    /// Sets the aggregate version.
    ///
    /// Called by the repository after loading and after saving.
    fn set_version(&mut self, version: Version);

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic and must not fail:
    /// events represent facts that have already happened.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

/// An aggregate together with its persistence bookkeeping.
///
/// Tracks the stream version the aggregate was loaded at and the changes
/// recorded since, which [`AggregateRepository::save`](crate::AggregateRepository::save)
/// appends with that version as the precondition.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: AggregateId,
    state: A,
    original_version: Version,
    pending: Vec<A::Event>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates a root for an aggregate that has no stream yet.
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            state: A::default(),
            original_version: Version::initial(),
            pending: Vec::new(),
        }
    }

    /// Creates a root from a replayed aggregate loaded at `version`.
    pub(crate) fn loaded(id: AggregateId, mut state: A, version: Version) -> Self {
        state.set_version(version);
        Self {
            id,
            state,
            original_version: version,
            pending: Vec::new(),
        }
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Returns the current state, including uncommitted changes.
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Consumes the root, returning the aggregate state.
    pub fn into_state(self) -> A {
        self.state
    }

    /// Returns the stream version the aggregate was loaded (or last saved) at.
    pub fn original_version(&self) -> Version {
        self.original_version
    }

    /// Returns true if the aggregate has never been saved.
    pub fn is_new(&self) -> bool {
        self.original_version == Version::initial()
    }

    /// Returns the changes recorded since load.
    pub fn uncommitted(&self) -> &[A::Event] {
        &self.pending
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Applies new events to the state and queues them for saving.
    pub fn record(&mut self, events: impl IntoIterator<Item = A::Event>) {
        for event in events {
            self.state.apply(event.clone());
            self.pending.push(event);
        }
    }

    /// Marks the pending changes as persisted at `version`.
    pub(crate) fn mark_committed(&mut self, version: Version) -> Vec<A::Event> {
        self.original_version = version;
        self.state.set_version(version);
        std::mem::take(&mut self.pending)
    }
}

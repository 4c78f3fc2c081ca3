use std::fmt;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{EventRecord, EventStoreError, EventStoreToken, Result, Version};

/// Write precondition for [`EventStore::add_to_stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedVersion {
    /// No version check is performed.
    #[default]
    Any,
    /// The stream must not exist yet.
    EmptyStream,
    /// The stream must be exactly at this version.
    Exact(Version),
}

impl ExpectedVersion {
    /// Checks the precondition against the stream's current version.
    pub fn check(&self, stream: &str, current: Version) -> Result<()> {
        let ok = match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::EmptyStream => current == Version::initial(),
            ExpectedVersion::Exact(expected) => current == *expected,
        };
        if ok {
            Ok(())
        } else {
            metrics::counter!("event_store_concurrency_conflicts_total").increment(1);
            Err(EventStoreError::ConcurrencyConflict {
                stream: stream.to_string(),
                expected: *self,
                actual: current,
            })
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => f.write_str("any"),
            ExpectedVersion::EmptyStream => f.write_str("empty stream"),
            ExpectedVersion::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// One page of the global event order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    /// Events strictly after the requested token, in token order.
    pub events: Vec<EventRecord>,
    /// Token to resume from: the last returned event's token, or the
    /// requested token when nothing was returned.
    pub next_token: EventStoreToken,
    /// Whether more events exist beyond `next_token`.
    pub has_more: bool,
}

/// Append-only, multi-stream event log with a derived global order.
///
/// Implementations must make the version check and the append one atomic
/// step per stream, and must notify [`subscribe_head`](EventStore::subscribe_head)
/// receivers after every successful append.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to `stream_name` if `expected` holds.
    ///
    /// On success the records are updated in place with their stream name,
    /// consecutive stream versions and consecutive global tokens, and the new
    /// stream version is returned. On a failed precondition nothing is
    /// appended, the records are left untouched and
    /// [`EventStoreError::ConcurrencyConflict`] is returned.
    async fn add_to_stream(
        &self,
        stream_name: &str,
        events: &mut [EventRecord],
        expected: ExpectedVersion,
    ) -> Result<Version>;

    /// Reads up to `max_count` events of one stream with
    /// `stream_version >= min_version`, in stream order.
    async fn read_stream(
        &self,
        stream_name: &str,
        min_version: Version,
        max_count: usize,
        load_body: bool,
    ) -> Result<Vec<EventRecord>>;

    /// Reads up to `max_count` events strictly after `after` in global order.
    ///
    /// `Initial` starts from the first event; `Current` returns an empty page
    /// positioned at the head.
    async fn get_all_events(
        &self,
        after: EventStoreToken,
        max_count: usize,
        load_body: bool,
    ) -> Result<EventPage>;

    /// Fills in `body` for records previously read header-only, by token.
    async fn load_bodies(&self, events: &mut [EventRecord]) -> Result<()>;

    /// Returns the current version of a stream (0 when it does not exist).
    async fn stream_version(&self, stream_name: &str) -> Result<Version>;

    /// Returns the token of the last appended event, `Initial` when empty.
    async fn head_token(&self) -> Result<EventStoreToken>;

    /// Returns a receiver that observes the head token after each append.
    fn subscribe_head(&self) -> watch::Receiver<EventStoreToken>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event.
    async fn append_event(
        &self,
        stream_name: &str,
        event: &mut EventRecord,
        expected: ExpectedVersion,
    ) -> Result<Version> {
        self.add_to_stream(stream_name, std::slice::from_mut(event), expected)
            .await
    }

    /// Reads a whole stream from its first event.
    async fn read_stream_to_end(
        &self,
        stream_name: &str,
        load_body: bool,
    ) -> Result<Vec<EventRecord>> {
        self.read_stream(stream_name, Version::first(), usize::MAX, load_body)
            .await
    }

    /// Checks if a stream exists (has any events).
    async fn stream_exists(&self, stream_name: &str) -> Result<bool> {
        Ok(self.stream_version(stream_name).await? > Version::initial())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates an append request before touching storage.
/// Publishes `token` unless the watch already holds a later head. Appends
/// finishing out of order therefore never move the head backwards.
pub(crate) fn advance_head(head: &watch::Sender<EventStoreToken>, token: EventStoreToken) {
    head.send_if_modified(|current| {
        if token > *current {
            *current = token;
            true
        } else {
            false
        }
    });
}

pub(crate) fn validate_append(stream_name: &str, events: &[EventRecord]) -> Result<()> {
    if stream_name.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "stream name must not be empty".to_string(),
        ));
    }
    if events.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty event list".to_string(),
        ));
    }
    if let Some(appended) = events.iter().find(|e| e.is_appended()) {
        return Err(EventStoreError::InvalidAppend(format!(
            "event {} was already appended at {}",
            appended.event_id, appended.token
        )));
    }
    Ok(())
}

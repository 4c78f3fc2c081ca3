use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};

use crate::{
    EventRecord, EventStoreToken, Result, Version,
    store::{EventPage, EventStore, ExpectedVersion, advance_head, validate_append},
};

#[derive(Default)]
struct MemoryLog {
    /// Global order; the event at index `i` has token `Position(i + 1)`.
    events: Vec<EventRecord>,
    /// Indexes into `events`, per stream, in stream-version order.
    streams: HashMap<String, Vec<usize>>,
}

impl MemoryLog {
    fn stream_version(&self, stream_name: &str) -> Version {
        self.streams
            .get(stream_name)
            .map(|idx| Version::new(idx.len() as i64))
            .unwrap_or_default()
    }

    fn head(&self) -> EventStoreToken {
        EventStoreToken::from_position(self.events.len() as u64)
    }
}

/// In-memory event store.
///
/// Used by tests and by the server when no database is configured. Cloning
/// is cheap and every clone shares the same log.
#[derive(Clone)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<MemoryLog>>,
    head: Arc<watch::Sender<EventStoreToken>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        let (head, _) = watch::channel(EventStoreToken::Initial);
        Self {
            log: Arc::new(RwLock::new(MemoryLog::default())),
            head: Arc::new(head),
        }
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

fn copy_of(event: &EventRecord, load_body: bool) -> EventRecord {
    if load_body {
        event.clone()
    } else {
        event.without_body()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn add_to_stream(
        &self,
        stream_name: &str,
        events: &mut [EventRecord],
        expected: ExpectedVersion,
    ) -> Result<Version> {
        validate_append(stream_name, events)?;

        let mut log = self.log.write().await;
        let current = log.stream_version(stream_name);
        expected.check(stream_name, current)?;

        let mut version = current;
        for event in events.iter_mut() {
            version = version.next();
            event.stream_name = stream_name.to_string();
            event.stream_version = version;
            event.token = EventStoreToken::from_position(log.events.len() as u64 + 1);

            let index = log.events.len();
            log.events.push(event.clone());
            log.streams
                .entry(stream_name.to_string())
                .or_default()
                .push(index);
        }

        let head = log.head();
        drop(log);

        metrics::counter!("event_store_events_appended_total").increment(events.len() as u64);
        advance_head(&self.head, head);
        Ok(version)
    }

    async fn read_stream(
        &self,
        stream_name: &str,
        min_version: Version,
        max_count: usize,
        load_body: bool,
    ) -> Result<Vec<EventRecord>> {
        let log = self.log.read().await;
        let Some(indexes) = log.streams.get(stream_name) else {
            return Ok(Vec::new());
        };

        // Stream versions are dense and 1-based, so the version maps to an offset.
        let skip = (min_version.as_i64().max(1) - 1) as usize;
        Ok(indexes
            .iter()
            .skip(skip)
            .take(max_count)
            .map(|&i| copy_of(&log.events[i], load_body))
            .collect())
    }

    async fn get_all_events(
        &self,
        after: EventStoreToken,
        max_count: usize,
        load_body: bool,
    ) -> Result<EventPage> {
        let log = self.log.read().await;
        let start = match after.position() {
            Some(p) => (p as usize).min(log.events.len()),
            None => {
                return Ok(EventPage {
                    events: Vec::new(),
                    next_token: log.head(),
                    has_more: false,
                });
            }
        };

        let end = start.saturating_add(max_count).min(log.events.len());
        let events: Vec<EventRecord> = log.events[start..end]
            .iter()
            .map(|e| copy_of(e, load_body))
            .collect();
        let next_token = events.last().map(|e| e.token).unwrap_or(after);

        Ok(EventPage {
            events,
            next_token,
            has_more: end < log.events.len(),
        })
    }

    async fn load_bodies(&self, events: &mut [EventRecord]) -> Result<()> {
        let log = self.log.read().await;
        for event in events.iter_mut().filter(|e| e.body.is_none()) {
            if let Some(stored) = event
                .token
                .position()
                .filter(|p| *p > 0)
                .and_then(|p| log.events.get(p as usize - 1))
            {
                event.body = stored.body.clone();
            }
        }
        Ok(())
    }

    async fn stream_version(&self, stream_name: &str) -> Result<Version> {
        Ok(self.log.read().await.stream_version(stream_name))
    }

    async fn head_token(&self) -> Result<EventStoreToken> {
        Ok(self.log.read().await.head())
    }

    fn subscribe_head(&self) -> watch::Receiver<EventStoreToken> {
        self.head.subscribe()
    }
}

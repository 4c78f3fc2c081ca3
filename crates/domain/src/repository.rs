//! Loads and saves aggregates as event streams.

use std::marker::PhantomData;
use std::sync::Arc;

use common::AggregateId;
use event_store::{EventRecord, EventStore, EventStoreExt, ExpectedVersion, Version};

use crate::aggregate::{Aggregate, AggregateRoot};
use crate::command::CommandResult;
use crate::error::DomainError;
use crate::serializer::{EventSerializer, JsonEventSerializer};

/// Repository for one aggregate type over an [`EventStore`].
///
/// Each aggregate lives in its own stream named `{aggregate_type}-{id}`.
/// Saves append with the loaded version as the precondition, so two writers
/// racing on the same aggregate get a concurrency error instead of a merge.
pub struct AggregateRepository<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    serializers: Vec<Arc<dyn EventSerializer<A::Event>>>,
    _phantom: PhantomData<A>,
}

impl<S, A> AggregateRepository<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a repository that reads and writes JSON bodies.
    pub fn new(store: S) -> Self {
        Self {
            store,
            serializers: vec![Arc::new(JsonEventSerializer)],
            _phantom: PhantomData,
        }
    }

    /// Registers a serializer ahead of the existing ones; it becomes the
    /// format used for new events.
    pub fn with_serializer(mut self, serializer: Arc<dyn EventSerializer<A::Event>>) -> Self {
        self.serializers.insert(0, serializer);
        self
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the stream name holding the aggregate with `id`.
    pub fn stream_name(id: AggregateId) -> String {
        format!("{}-{}", A::aggregate_type(), id)
    }

    fn deserialize(&self, record: &EventRecord) -> Result<A::Event, DomainError> {
        let serializer = self
            .serializers
            .iter()
            .find(|s| s.handles_format(&record.format))
            .ok_or_else(|| DomainError::UnsupportedFormat(record.format.clone()))?;
        serializer.deserialize(record)
    }

    /// Loads an aggregate, returning None if its stream is empty.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn find(&self, id: AggregateId) -> Result<Option<AggregateRoot<A>>, DomainError> {
        let records = self
            .store
            .read_stream_to_end(&Self::stream_name(id), true)
            .await?;
        if records.is_empty() {
            return Ok(None);
        }

        let mut state = A::default();
        for record in &records {
            state.apply(self.deserialize(record)?);
        }
        let version = Version::new(records.len() as i64);
        Ok(Some(AggregateRoot::loaded(id, state, version)))
    }

    /// Loads an aggregate, failing with [`DomainError::AggregateNotFound`]
    /// if its stream is empty.
    pub async fn get(&self, id: AggregateId) -> Result<AggregateRoot<A>, DomainError> {
        self.find(id)
            .await?
            .ok_or_else(|| DomainError::AggregateNotFound {
                aggregate_type: A::aggregate_type(),
                aggregate_id: id.to_string(),
            })
    }

    /// Loads an aggregate, or starts a fresh one if its stream is empty.
    pub async fn load_or_new(&self, id: AggregateId) -> Result<AggregateRoot<A>, DomainError> {
        Ok(self
            .find(id)
            .await?
            .unwrap_or_else(|| AggregateRoot::new(id)))
    }

    /// Appends the aggregate's uncommitted changes to its stream.
    ///
    /// Returns the new stream version; the root is updated to it and its
    /// pending changes are cleared. On a concurrency conflict nothing is
    /// written and the root is left as it was.
    #[tracing::instrument(skip(self, root), fields(aggregate_type = A::aggregate_type(), id = %root.id()))]
    pub async fn save(&self, root: &mut AggregateRoot<A>) -> Result<Version, DomainError> {
        if !root.has_changes() {
            return Ok(root.original_version());
        }

        let writer = self
            .serializers
            .first()
            .ok_or_else(|| DomainError::UnsupportedFormat(String::new()))?;
        let mut records = Vec::with_capacity(root.uncommitted().len());
        for event in root.uncommitted() {
            let mut record = EventRecord::new("", writer.format(), Vec::new());
            writer.serialize(event, &mut record)?;
            records.push(record);
        }

        let expected = if root.is_new() {
            ExpectedVersion::EmptyStream
        } else {
            ExpectedVersion::Exact(root.original_version())
        };
        let version = self
            .store
            .add_to_stream(&Self::stream_name(root.id()), &mut records, expected)
            .await?;

        root.mark_committed(version);
        tracing::debug!(%version, count = records.len(), "saved aggregate");
        Ok(version)
    }

    /// Loads the aggregate, runs `command_fn` against it and saves the
    /// resulting events.
    pub async fn execute<F>(
        &self,
        id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut root = self.load_or_new(id).await?;
        let events = command_fn(root.state())?;

        root.record(events.iter().cloned());
        let new_version = self.save(&mut root).await?;

        Ok(CommandResult {
            aggregate: root.into_state(),
            events,
            new_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::DomainEvent;
    use event_store::InMemoryEventStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    enum CounterEvent {
        Opened,
        Added { amount: i32 },
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Opened => "Opened",
                CounterEvent::Added { .. } => "Added",
            }
        }
    }

    #[derive(Debug, Default)]
    struct Counter {
        open: bool,
        total: i32,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("counter is not open")]
    struct NotOpen;

    impl From<NotOpen> for DomainError {
        fn from(_: NotOpen) -> Self {
            DomainError::AggregateNotFound {
                aggregate_type: "Counter",
                aggregate_id: String::new(),
            }
        }
    }

    impl Aggregate for Counter {
        type Event = CounterEvent;
        type Error = NotOpen;

        fn aggregate_type() -> &'static str {
            "Counter"
        }

        fn id(&self) -> Option<AggregateId> {
            None
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                CounterEvent::Opened => self.open = true,
                CounterEvent::Added { amount } => self.total += amount,
            }
        }
    }

    struct UnknownFormat;

    impl EventSerializer<CounterEvent> for UnknownFormat {
        fn format(&self) -> &str {
            "xml"
        }

        fn deserialize(&self, _record: &EventRecord) -> Result<CounterEvent, DomainError> {
            Err(DomainError::UnsupportedFormat("xml".to_string()))
        }

        fn serialize(&self, event: &CounterEvent, record: &mut EventRecord) -> Result<(), DomainError> {
            record.event_type = event.event_type().to_string();
            record.format = "xml".to_string();
            record.body = Some(b"<counter/>".to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn get_missing_aggregate_is_not_found() {
        let repo: AggregateRepository<_, Counter> = AggregateRepository::new(InMemoryEventStore::new());
        let err = repo.get(AggregateId::new()).await.unwrap_err();
        assert!(matches!(err, DomainError::AggregateNotFound { .. }));
        assert!(repo.find(AggregateId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_get_folds_events_and_records_version() {
        let store = InMemoryEventStore::new();
        let repo: AggregateRepository<_, Counter> = AggregateRepository::new(store.clone());
        let id = AggregateId::new();

        let mut root = AggregateRoot::new(id);
        root.record(vec![CounterEvent::Opened, CounterEvent::Added { amount: 5 }]);
        assert_eq!(repo.save(&mut root).await.unwrap(), Version::new(2));
        assert!(!root.has_changes());

        let loaded = repo.get(id).await.unwrap();
        assert_eq!(loaded.original_version(), Version::new(2));
        assert_eq!(loaded.state().total, 5);
        assert!(loaded.state().open);

        let stream = AggregateRepository::<InMemoryEventStore, Counter>::stream_name(id);
        assert_eq!(stream, format!("Counter-{id}"));
        assert_eq!(store.stream_version(&stream).await.unwrap(), Version::new(2));
    }

    #[tokio::test]
    async fn stale_save_is_a_concurrency_conflict() {
        let store = InMemoryEventStore::new();
        let repo: AggregateRepository<_, Counter> = AggregateRepository::new(store.clone());
        let id = AggregateId::new();

        let mut root = AggregateRoot::new(id);
        root.record(vec![CounterEvent::Opened]);
        repo.save(&mut root).await.unwrap();

        let mut first = repo.get(id).await.unwrap();
        let mut second = repo.get(id).await.unwrap();
        first.record(vec![CounterEvent::Added { amount: 1 }]);
        second.record(vec![CounterEvent::Added { amount: 2 }]);

        repo.save(&mut first).await.unwrap();
        let err = repo.save(&mut second).await.unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert!(second.has_changes());
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn new_aggregate_requires_empty_stream() {
        let repo: AggregateRepository<_, Counter> = AggregateRepository::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        let mut first = AggregateRoot::new(id);
        first.record(vec![CounterEvent::Opened]);
        repo.save(&mut first).await.unwrap();

        let mut duplicate = AggregateRoot::new(id);
        duplicate.record(vec![CounterEvent::Opened]);
        assert!(repo.save(&mut duplicate).await.unwrap_err().is_concurrency_conflict());
    }

    #[tokio::test]
    async fn unknown_format_fails_to_load() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let xml_repo: AggregateRepository<_, Counter> =
            AggregateRepository::new(store.clone()).with_serializer(Arc::new(UnknownFormat));
        let mut root = AggregateRoot::new(id);
        root.record(vec![CounterEvent::Opened]);
        xml_repo.save(&mut root).await.unwrap();

        let json_repo: AggregateRepository<_, Counter> = AggregateRepository::new(store);
        let err = json_repo.get(id).await.unwrap_err();
        assert!(matches!(err, DomainError::UnsupportedFormat(f) if f == "xml"));
    }

    #[tokio::test]
    async fn execute_saves_command_events() {
        let repo: AggregateRepository<_, Counter> = AggregateRepository::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        let result = repo
            .execute(id, |_| Ok(vec![CounterEvent::Opened]))
            .await
            .unwrap();
        assert_eq!(result.new_version, Version::first());

        let result = repo
            .execute(id, |c| {
                if c.open {
                    Ok(vec![CounterEvent::Added { amount: 3 }])
                } else {
                    Err(NotOpen)
                }
            })
            .await
            .unwrap();
        assert_eq!(result.aggregate.total, 3);
        assert_eq!(result.aggregate.version(), Version::new(2));

        let empty = repo.execute(id, |_| Ok(vec![])).await.unwrap();
        assert_eq!(empty.new_version, Version::new(2));
        assert!(empty.is_noop());
    }
}

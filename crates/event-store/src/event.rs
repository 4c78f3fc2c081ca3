use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::EventStoreToken;

/// Body format tag for JSON-encoded event bodies.
pub const JSON_FORMAT: &str = "json";

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-stream sequence number, used for optimistic concurrency control.
///
/// A stream that does not exist is at version 0; the first event appended
/// to it gets version 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of a stream with no events (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version of the first event in a stream (1).
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// An event as stored in the log.
///
/// `stream_name`, `stream_version` and `token` are assigned by the store on
/// append; before that they hold placeholder values. Once appended a record
/// is immutable and readers receive copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// Logical event name (e.g., "InventoryItemCreated").
    pub event_type: String,

    /// Format tag selecting the deserializer for `body`.
    pub format: String,

    /// Opaque payload. `None` when the record was read header-only.
    pub body: Option<Vec<u8>>,

    /// Stream this event belongs to.
    pub stream_name: String,

    /// 1-based position within the stream.
    pub stream_version: Version,

    /// Position in the store's global order.
    pub token: EventStoreToken,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    /// Creates an unappended record with the given type, format and body.
    pub fn new(event_type: impl Into<String>, format: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            format: format.into(),
            body: Some(body),
            stream_name: String::new(),
            stream_version: Version::initial(),
            token: EventStoreToken::Initial,
            timestamp: Utc::now(),
        }
    }

    /// Creates a new event record builder.
    pub fn builder() -> EventRecordBuilder {
        EventRecordBuilder::default()
    }

    /// Returns true once the store has assigned this record its identity.
    pub fn is_appended(&self) -> bool {
        !self.token.is_initial()
    }

    /// Decodes a JSON body.
    ///
    /// Fails if the body was not loaded.
    pub fn json_body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.body {
            Some(body) => serde_json::from_slice(body),
            None => Err(serde_json::Error::io(std::io::Error::other(format!(
                "body of event {} was not loaded",
                self.event_id
            )))),
        }
    }

    /// Returns a header-only copy of this record.
    pub fn without_body(&self) -> Self {
        Self {
            body: None,
            ..self.clone()
        }
    }
}

/// Builder for constructing event records.
#[derive(Debug, Default)]
pub struct EventRecordBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    format: Option<String>,
    body: Option<Vec<u8>>,
    timestamp: Option<DateTime<Utc>>,
}

impl EventRecordBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the format tag.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Sets the raw body bytes.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `payload` as JSON and sets the format to [`JSON_FORMAT`].
    pub fn json<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(payload)?);
        self.format = Some(JSON_FORMAT.to_string());
        Ok(self)
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builds the event record.
    ///
    /// # Panics
    ///
    /// Panics if the event type or the body is not set.
    pub fn build(self) -> EventRecord {
        self.try_build()
            .expect("event_type and body are required")
    }

    /// Tries to build the event record, returning None if required fields are missing.
    pub fn try_build(self) -> Option<EventRecord> {
        Some(EventRecord {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type?,
            format: self.format.unwrap_or_else(|| JSON_FORMAT.to_string()),
            body: Some(self.body?),
            stream_name: String::new(),
            stream_version: Version::initial(),
            token: EventStoreToken::Initial,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

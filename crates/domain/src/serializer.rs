//! Pluggable event body codecs.

use event_store::{EventRecord, JSON_FORMAT};

use crate::aggregate::DomainEvent;
use crate::error::DomainError;

/// Converts domain events to and from stored record bodies.
///
/// A repository can hold several serializers; reads pick the first one whose
/// [`handles_format`](EventSerializer::handles_format) accepts the record's
/// format tag, writes always use the first one.
pub trait EventSerializer<E>: Send + Sync {
    /// Format tag written into records this serializer produces.
    fn format(&self) -> &str;

    /// Returns true if this serializer can decode records with `format`.
    fn handles_format(&self, format: &str) -> bool {
        self.format() == format
    }

    /// Decodes a record's body into a domain event.
    fn deserialize(&self, record: &EventRecord) -> Result<E, DomainError>;

    /// Encodes `event` into `record`, setting its type, format and body.
    fn serialize(&self, event: &E, record: &mut EventRecord) -> Result<(), DomainError>;
}

/// JSON body codec, format tag [`JSON_FORMAT`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventSerializer;

impl<E: DomainEvent> EventSerializer<E> for JsonEventSerializer {
    fn format(&self) -> &str {
        JSON_FORMAT
    }

    fn deserialize(&self, record: &EventRecord) -> Result<E, DomainError> {
        Ok(record.json_body()?)
    }

    fn serialize(&self, event: &E, record: &mut EventRecord) -> Result<(), DomainError> {
        record.event_type = event.event_type().to_string();
        record.format = JSON_FORMAT.to_string();
        record.body = Some(serde_json::to_vec(event)?);
        Ok(())
    }
}

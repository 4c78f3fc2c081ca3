//! Global positions in the event log.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::EventStoreError;

const WIDTH: usize = 20;
const CURRENT: &str = "current";

/// Opaque, totally ordered position in the store's global order.
///
/// `Initial` sorts before every event and means "replay everything";
/// `Current` sorts after every event and means "skip history, start live".
/// The store resolves `Current` to the head position at the moment of the call.
///
/// The string form is fixed-width and order-preserving under ordinal string
/// comparison, so persisted tokens can be used directly as sort keys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum EventStoreToken {
    #[default]
    Initial,
    Position(u64),
    Current,
}

impl EventStoreToken {
    /// Builds a token from a 1-based global position. Position 0 is `Initial`.
    pub fn from_position(position: u64) -> Self {
        if position == 0 {
            Self::Initial
        } else {
            Self::Position(position)
        }
    }

    /// Returns the numeric position, `0` for `Initial` and `None` for `Current`.
    pub fn position(&self) -> Option<u64> {
        match self {
            Self::Initial => Some(0),
            Self::Position(p) => Some(*p),
            Self::Current => None,
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, Self::Initial)
    }
}

impl fmt::Display for EventStoreToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "{:0width$}", 0, width = WIDTH),
            Self::Position(p) => write!(f, "{:0width$}", p, width = WIDTH),
            Self::Current => f.write_str(CURRENT),
        }
    }
}

impl FromStr for EventStoreToken {
    type Err = EventStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == CURRENT {
            return Ok(Self::Current);
        }
        if s.len() != WIDTH || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EventStoreError::InvalidToken(s.to_string()));
        }
        s.parse::<u64>()
            .map(Self::from_position)
            .map_err(|_| EventStoreError::InvalidToken(s.to_string()))
    }
}

impl TryFrom<String> for EventStoreToken {
    type Error = EventStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventStoreToken> for String {
    fn from(token: EventStoreToken) -> Self {
        token.to_string()
    }
}

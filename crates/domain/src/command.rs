//! Commands and what executing one produces.

use common::AggregateId;
use event_store::Version;

use crate::aggregate::Aggregate;

/// Outcome of a command that the aggregate accepted.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// State after the new events were applied.
    pub aggregate: A,
    /// Events appended to the stream; empty when the command changed nothing.
    pub events: Vec<A::Event>,
    /// Stream version after the append.
    pub new_version: Version,
}

impl<A: Aggregate> CommandResult<A> {
    /// True if the command was accepted but appended nothing.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// An intention addressed to a single aggregate instance.
pub trait Command: Send + Sync {
    type Aggregate: Aggregate;

    fn aggregate_id(&self) -> AggregateId;

    /// The stream the command's events are appended to.
    fn stream_name(&self) -> String {
        format!(
            "{}-{}",
            <Self::Aggregate as Aggregate>::aggregate_type(),
            self.aggregate_id()
        )
    }
}

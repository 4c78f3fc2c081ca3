//! The contract a projection implements to be driven by a coordinator.

use async_trait::async_trait;
use common::CodeVersion;
use event_store::EventRecord;

use crate::Result;

/// Default number of events applied between partial commits.
pub const DEFAULT_EVENTS_BULK_SIZE: usize = 100;

/// How an existing instance relates to the code that wants to write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildKind {
    /// Stored contents are current; keep streaming from the stored token.
    NoRebuild,
    /// A build of this same code was interrupted; resume it from the stored token.
    ContinueRebuild,
    /// Stored contents are incompatible; clear them and replay from the start.
    NewRebuild,
}

/// A materialized view fed by events of a fixed set of types.
///
/// One value of the implementing type writes one instance at a time; the
/// coordinator binds it with [`set_instance_name`](Projection::set_instance_name)
/// before any other lifecycle call. Applied events must only become durable
/// through [`partial_commit`](Projection::partial_commit) or
/// [`commit_rebuild`](Projection::commit_rebuild), since the coordinator
/// persists the resume token right after those succeed.
#[async_trait]
pub trait Projection: Send {
    /// Logical projection name, shared by all its instances.
    fn name(&self) -> &str;

    /// Code version of this implementation.
    fn version(&self) -> CodeVersion;

    /// Lowest reader version able to read what this implementation writes.
    fn minimal_reader(&self) -> CodeVersion;

    /// Event types this projection handles. Others are never delivered.
    fn event_types(&self) -> Vec<String>;

    /// Classifies an instance built by `stored_version`.
    fn classify_rebuild(&self, stored_version: &CodeVersion) -> RebuildKind {
        if *stored_version == self.version() {
            RebuildKind::NoRebuild
        } else {
            RebuildKind::NewRebuild
        }
    }

    /// Proposes a name for a new instance. `current_best` is the instance
    /// being succeeded, if any. Called again with the rejected name when the
    /// proposal is already taken.
    fn generate_instance_name(&self, current_best: Option<&str>) -> String;

    /// Binds the projection to the instance it writes.
    fn set_instance_name(&mut self, name: &str);

    /// Called before replaying into the instance. When `continuation` is
    /// false the instance's existing contents must be discarded.
    async fn start_rebuild(&mut self, continuation: bool) -> Result<()>;

    /// Applies one event.
    async fn handle(&mut self, event: &EventRecord) -> Result<()>;

    /// Makes every event applied so far durable.
    async fn partial_commit(&mut self) -> Result<()>;

    /// Makes the finished rebuild durable.
    async fn commit_rebuild(&mut self) -> Result<()>;

    /// Called when a rebuild ends without completing. Contents are kept so a
    /// later run can continue.
    async fn stop_rebuild(&mut self) -> Result<()>;

    /// Number of events applied between partial commits.
    fn events_bulk_size(&self) -> usize {
        DEFAULT_EVENTS_BULK_SIZE
    }
}

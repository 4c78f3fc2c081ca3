//! Query-side access to projection instances.

use common::CodeVersion;

/// Whether a reader can read an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readability {
    Compatible,
    /// The instance requires a newer reader.
    ReaderTooOld,
    /// The instance was built by code older than the reader accepts.
    DataTooOld,
}

/// One implementation able to read instances of a logical projection.
///
/// Readers are shared between request handlers and the
/// [`ReaderSelector`](crate::ReaderSelector), which points them at an
/// instance through [`use_instance`](ProjectionReader::use_instance).
pub trait ProjectionReader: Send + Sync {
    fn projection_name(&self) -> &str;

    /// Code version of this reader.
    fn version(&self) -> CodeVersion;

    /// Oldest instance version this reader understands.
    fn minimal_reader(&self) -> CodeVersion;

    /// Checks an instance against this reader.
    fn readability(
        &self,
        instance_minimal_reader: CodeVersion,
        stored_version: CodeVersion,
    ) -> Readability {
        if self.version() < instance_minimal_reader {
            Readability::ReaderTooOld
        } else if stored_version < self.minimal_reader() {
            Readability::DataTooOld
        } else {
            Readability::Compatible
        }
    }

    /// Points the reader at an instance, or at none.
    fn use_instance(&self, instance: Option<&str>);
}

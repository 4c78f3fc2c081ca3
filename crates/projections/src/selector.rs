//! Points readers at the best readable instance of a projection.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use common::CodeVersion;

use crate::error::Result;
use crate::metadata::{ProjectionInstanceMetadata, ProjectionStatus};
use crate::reader::{ProjectionReader, Readability};
use crate::registry::{ChangeSubscription, ProjectionRegistry};

/// The instance currently served and the reader serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub instance: String,
    pub instance_version: CodeVersion,
    pub reader_version: CodeVersion,
    reader_index: usize,
}

/// Watches a registry and keeps exactly one reader pointed at the best
/// instance it can read.
///
/// Readable instances are those running or being built that at least one
/// reader is compatible with. Running instances are preferred over builds,
/// then newer versions. The newest compatible reader gets the instance and
/// every other reader is pointed at none. Selection is recomputed inside
/// each change notification, so it follows the registry without polling.
pub struct ReaderSelector {
    shared: Arc<SelectorState>,
    _subscription: ChangeSubscription,
}

struct SelectorState {
    projection_name: String,
    readers: Vec<Arc<dyn ProjectionReader>>,
    inner: Mutex<SelectorInner>,
}

#[derive(Default)]
struct SelectorInner {
    instances: BTreeMap<String, ProjectionInstanceMetadata>,
    selected: Option<Selection>,
}

impl ReaderSelector {
    /// Subscribes to `registry`, loads its current instances and makes the
    /// first selection.
    #[tracing::instrument(skip_all, fields(projection = %registry.projection_name()))]
    pub async fn start(
        registry: &dyn ProjectionRegistry,
        readers: Vec<Arc<dyn ProjectionReader>>,
    ) -> Result<Self> {
        let shared = Arc::new(SelectorState {
            projection_name: registry.projection_name().to_string(),
            readers,
            inner: Mutex::new(SelectorInner::default()),
        });

        // Subscribe before loading so no change can fall in between.
        let observer = Arc::clone(&shared);
        let subscription =
            registry.register_for_changes(None, Arc::new(move |new, _| observer.observe(new)));

        let all = registry.get_all_metadata().await?;
        shared.merge(all);

        Ok(Self {
            shared,
            _subscription: subscription,
        })
    }

    pub fn selected(&self) -> Option<Selection> {
        self.shared.lock().selected.clone()
    }

    /// The reader currently pointed at an instance, if any.
    pub fn current_reader(&self) -> Option<Arc<dyn ProjectionReader>> {
        let index = self.shared.lock().selected.as_ref()?.reader_index;
        self.shared.readers.get(index).cloned()
    }
}

impl SelectorState {
    fn lock(&self) -> std::sync::MutexGuard<'_, SelectorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observe(&self, metadata: &ProjectionInstanceMetadata) {
        let mut inner = self.lock();
        inner
            .instances
            .insert(metadata.name.clone(), metadata.clone());
        self.reselect(&mut inner);
    }

    /// Adds loaded instances that no notification has reported yet;
    /// notified metadata is never older than a load.
    fn merge(&self, all: Vec<ProjectionInstanceMetadata>) {
        let mut inner = self.lock();
        for metadata in all {
            inner
                .instances
                .entry(metadata.name.clone())
                .or_insert(metadata);
        }
        self.reselect(&mut inner);
    }

    /// Index of the newest reader able to read `metadata`.
    fn best_reader(&self, metadata: &ProjectionInstanceMetadata) -> Option<usize> {
        self.readers
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                r.readability(metadata.minimal_reader, metadata.version)
                    == Readability::Compatible
            })
            .max_by_key(|(_, r)| r.version())
            .map(|(index, _)| index)
    }

    fn reselect(&self, inner: &mut SelectorInner) {
        let selection = inner
            .instances
            .values()
            .filter(|m| m.status.is_readable())
            .filter_map(|m| self.best_reader(m).map(|index| (m, index)))
            .min_by(|(a, _), (b, _)| {
                let key = |m: &ProjectionInstanceMetadata| {
                    (m.status != ProjectionStatus::Running, Reverse(m.version))
                };
                key(a).cmp(&key(b)).then_with(|| a.name.cmp(&b.name))
            })
            .map(|(m, index)| Selection {
                instance: m.name.clone(),
                instance_version: m.version,
                reader_version: self.readers[index].version(),
                reader_index: index,
            });

        if selection == inner.selected {
            return;
        }

        for (index, reader) in self.readers.iter().enumerate() {
            match &selection {
                Some(s) if s.reader_index == index => reader.use_instance(Some(&s.instance)),
                _ => reader.use_instance(None),
            }
        }

        metrics::counter!("reader_selector_switches_total").increment(1);
        match &selection {
            Some(s) => tracing::info!(
                projection = %self.projection_name,
                instance = %s.instance,
                reader = %s.reader_version,
                "reader switched"
            ),
            None => tracing::warn!(projection = %self.projection_name, "no readable instance"),
        }
        inner.selected = selection;
    }
}

//! Drives one projection through its instance lifecycle.
//!
//! A coordinator binds a [`Projection`] to an instance in the registry,
//! feeds it events from an [`EventStreamingCursor`], makes progress durable
//! every [`events_bulk_size`](Projection::events_bulk_size) events, and
//! promotes the instance once a rebuild catches up with the log.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Instant;

use common::CodeVersion;
use event_store::{
    CursorOptions, CursorStep, EventStore, EventStoreToken, EventStreamingCursor, StopHandle,
    StopSignal,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{ProjectionError, Result};
use crate::metadata::{ProjectionInstanceMetadata, ProjectionStatus};
use crate::projection::{Projection, RebuildKind};
use crate::registry::{ChangeSubscription, ProjectionRegistry};

/// Upper bound on rejected instance name proposals before giving up.
const MAX_NAME_ATTEMPTS: usize = 64;

/// Which instance a coordinator binds to and how it promotes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Keeps one serving instance current.
    #[default]
    Master,
    /// Builds the next instance in the background and cuts over to it.
    Rebuilder,
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatorOptions {
    pub role: Role,
    /// Recorded on instances this coordinator creates.
    pub node_name: Option<String>,
    pub cursor: CursorOptions,
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The stop signal fired.
    Stopped,
    /// The instance under construction was cancelled or discontinued by
    /// someone else.
    Revoked,
}

/// What a running coordinator publishes about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorState {
    /// The instance the coordinator is bound to, once bound.
    pub instance: Option<String>,
    /// Set once the instance has caught up with the log.
    pub caught_up: bool,
}

struct Binding {
    instance: String,
    start: EventStoreToken,
    rebuilding: bool,
    continuation: bool,
}

/// Runs a projection as [`Role::Master`] or [`Role::Rebuilder`].
///
/// A master stays bound to the instance it picked at start for the whole
/// run, whatever later happens to that instance's status.
pub struct ProjectionCoordinator<S, P>
where
    S: EventStore + Clone + 'static,
    P: Projection + 'static,
{
    store: S,
    registry: Arc<dyn ProjectionRegistry>,
    projection: P,
    options: CoordinatorOptions,
    state: watch::Sender<CoordinatorState>,
}

impl<S, P> ProjectionCoordinator<S, P>
where
    S: EventStore + Clone + 'static,
    P: Projection + 'static,
{
    pub fn new(
        store: S,
        registry: Arc<dyn ProjectionRegistry>,
        projection: P,
        options: CoordinatorOptions,
    ) -> Self {
        let (state, _) = watch::channel(CoordinatorState::default());
        Self {
            store,
            registry,
            projection,
            options,
            state,
        }
    }

    /// Observes the coordinator's published state.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Runs the coordinator on a new task.
    pub fn spawn(self) -> CoordinatorHandle {
        let stop = StopHandle::new();
        let state = self.subscribe();
        let task = tokio::spawn(self.run(stop.signal()));
        CoordinatorHandle { stop, state, task }
    }

    /// Binds an instance and processes events until stopped or revoked.
    ///
    /// Before returning normally, work applied since the last flush is made
    /// durable and its token stored. An unfinished rebuild is left
    /// [`ProjectionStatus::NewBuild`] so a later run can continue it.
    #[tracing::instrument(
        skip_all,
        fields(
            projection = %self.projection.name(),
            role = ?self.options.role,
            instance = tracing::field::Empty,
        )
    )]
    pub async fn run(mut self, mut stop: StopSignal) -> Result<RunOutcome> {
        let binding = match self.options.role {
            Role::Master => self.bind_master().await?,
            Role::Rebuilder => self.bind_rebuilder().await?,
        };
        let instance = binding.instance.clone();
        tracing::Span::current().record("instance", instance.as_str());

        self.projection.set_instance_name(&instance);
        self.state.send_replace(CoordinatorState {
            instance: Some(instance.clone()),
            caught_up: false,
        });

        // The handle stays alive for the whole run so the signal only fires
        // through an actual revocation.
        let revoke = StopHandle::new();
        let mut revoked = revoke.signal();
        let mut revocation = self.watch_revocation(&instance, &revoke).await?;

        let mut rebuilding = binding.rebuilding;
        if rebuilding {
            self.projection.start_rebuild(binding.continuation).await?;
            tracing::info!(
                continuation = binding.continuation,
                start = %binding.start,
                "rebuild started"
            );
        } else {
            tracing::info!(start = %binding.start, "resuming instance");
        }

        // The first boundary completes a rebuild. In live mode boundaries
        // only mark the cursor going idle, when pending work is flushed.
        let mut cursor = EventStreamingCursor::new(
            self.store.clone(),
            self.projection.event_types(),
            binding.start,
            rebuilding,
            CursorOptions {
                idle_boundaries: true,
                ..self.options.cursor
            },
        );
        let bulk_size = self.projection.events_bulk_size().max(1);
        let projection_name = self.projection.name().to_string();
        let started = Instant::now();
        let mut pending = 0usize;

        loop {
            let step = tokio::select! {
                biased;
                () = revoked.stopped() => None,
                step = cursor.next(&mut stop) => Some(step?),
            };

            match step {
                Some(CursorStep::Event(event)) => {
                    self.projection.handle(&event).await?;
                    metrics::counter!(
                        "projection_events_applied_total",
                        "projection" => projection_name.clone()
                    )
                    .increment(1);
                    pending += 1;
                    if pending >= bulk_size {
                        self.flush(&instance, cursor.position()).await?;
                        pending = 0;
                    }
                }
                Some(CursorStep::CaughtUp) => {
                    if rebuilding {
                        self.projection.commit_rebuild().await?;
                        self.registry
                            .set_token(&instance, cursor.position())
                            .await?;
                        if !self.promote(&instance).await? {
                            self.projection.stop_rebuild().await?;
                            drop(revocation);
                            tracing::info!(
                                position = %cursor.position(),
                                "rebuild revoked before promotion"
                            );
                            return Ok(RunOutcome::Revoked);
                        }
                        rebuilding = false;
                        cursor.enter_live_mode();
                        // Only an unfinished build can be revoked.
                        revocation = None;

                        let elapsed = started.elapsed().as_secs_f64();
                        metrics::histogram!("projection_rebuild_duration_seconds")
                            .record(elapsed);
                        metrics::counter!("projection_rebuilds_committed_total").increment(1);
                        tracing::info!(
                            position = %cursor.position(),
                            duration = elapsed,
                            "rebuild committed"
                        );
                    } else if pending > 0 {
                        self.flush(&instance, cursor.position()).await?;
                    }
                    pending = 0;
                    self.state.send_if_modified(|s| !std::mem::replace(&mut s.caught_up, true));
                }
                Some(CursorStep::Cancelled) => {
                    self.shut_down(&instance, cursor.position(), pending, rebuilding)
                        .await?;
                    tracing::info!(position = %cursor.position(), "coordinator stopped");
                    return Ok(RunOutcome::Stopped);
                }
                None => {
                    self.shut_down(&instance, cursor.position(), pending, rebuilding)
                        .await?;
                    drop(revocation);
                    tracing::info!(position = %cursor.position(), "rebuild revoked");
                    return Ok(RunOutcome::Revoked);
                }
            }
        }
    }

    /// Picks the instance a master serves from.
    ///
    /// Candidates are running or building instances not newer than this
    /// code; the newest wins, a running one on ties.
    async fn bind_master(&mut self) -> Result<Binding> {
        let version = self.projection.version();
        let all = self.registry.get_all_metadata().await?;
        let candidate = all
            .iter()
            .filter(|m| m.status.is_readable() && m.version <= version)
            .min_by_key(|m| (Reverse(m.version), m.status != ProjectionStatus::Running))
            .cloned();

        let Some(existing) = candidate else {
            let name = self.fresh_name(None, &all)?;
            self.create_instance(&name).await?;
            return Ok(Binding {
                instance: name,
                start: EventStoreToken::Initial,
                rebuilding: true,
                continuation: false,
            });
        };

        let kind = self.projection.classify_rebuild(&existing.version);
        tracing::debug!(instance = %existing.name, stored = %existing.version, ?kind, "classified instance");
        match kind {
            RebuildKind::NoRebuild if existing.status == ProjectionStatus::Running => Ok(Binding {
                start: self.registry.get_token(&existing.name).await?,
                instance: existing.name,
                rebuilding: false,
                continuation: false,
            }),
            RebuildKind::NoRebuild | RebuildKind::ContinueRebuild => {
                self.continue_instance(&existing, version).await
            }
            RebuildKind::NewRebuild => {
                // Reset the token first: a crash before the upgrade below
                // then classifies the instance the same way again.
                self.registry
                    .set_token(&existing.name, EventStoreToken::Initial)
                    .await?;
                self.registry
                    .upgrade(&existing.name, version, self.projection.minimal_reader())
                    .await?;
                self.registry
                    .update_status(&existing.name, ProjectionStatus::NewBuild)
                    .await?;
                tracing::info!(instance = %existing.name, from = %existing.version, to = %version, "upgrading instance");
                Ok(Binding {
                    instance: existing.name,
                    start: EventStoreToken::Initial,
                    rebuilding: true,
                    continuation: false,
                })
            }
        }
    }

    /// Picks the instance a rebuilder builds: an unfinished build of this
    /// code version, or a new instance succeeding the best running one.
    async fn bind_rebuilder(&mut self) -> Result<Binding> {
        let version = self.projection.version();
        let all = self.registry.get_all_metadata().await?;

        let unfinished = all
            .iter()
            .find(|m| m.status == ProjectionStatus::NewBuild && m.version == version)
            .cloned();
        if let Some(existing) = unfinished {
            return self.continue_instance(&existing, version).await;
        }

        let best_running = all
            .iter()
            .find(|m| m.status == ProjectionStatus::Running)
            .map(|m| m.name.clone());
        let name = self.fresh_name(best_running.as_deref(), &all)?;
        self.create_instance(&name).await?;
        Ok(Binding {
            instance: name,
            start: EventStoreToken::Initial,
            rebuilding: true,
            continuation: false,
        })
    }

    async fn continue_instance(
        &mut self,
        existing: &ProjectionInstanceMetadata,
        version: CodeVersion,
    ) -> Result<Binding> {
        if existing.version != version {
            self.registry
                .upgrade(&existing.name, version, self.projection.minimal_reader())
                .await?;
        }
        self.registry
            .update_status(&existing.name, ProjectionStatus::NewBuild)
            .await?;
        Ok(Binding {
            start: self.registry.get_token(&existing.name).await?,
            instance: existing.name.clone(),
            rebuilding: true,
            continuation: true,
        })
    }

    async fn create_instance(&mut self, name: &str) -> Result<()> {
        self.registry
            .build_new_instance(
                name,
                self.options.node_name.as_deref(),
                self.projection.version(),
                self.projection.minimal_reader(),
            )
            .await?;
        tracing::info!(instance = %name, version = %self.projection.version(), "created instance");
        Ok(())
    }

    /// Asks the projection for an instance name not already in `taken`.
    fn fresh_name(
        &self,
        current_best: Option<&str>,
        taken: &[ProjectionInstanceMetadata],
    ) -> Result<String> {
        let mut name = self.projection.generate_instance_name(current_best);
        for _ in 0..MAX_NAME_ATTEMPTS {
            if !taken.iter().any(|m| m.name == name) {
                return Ok(name);
            }
            name = self.projection.generate_instance_name(Some(&name));
        }
        Err(ProjectionError::InstanceExists(name))
    }

    /// Subscribes a rebuilder to cancellation of its instance.
    async fn watch_revocation(
        &mut self,
        instance: &str,
        revoke: &StopHandle,
    ) -> Result<Option<ChangeSubscription>> {
        if self.options.role != Role::Rebuilder {
            return Ok(None);
        }

        let handle = revoke.clone();
        let subscription = self.registry.register_for_changes(
            Some(instance),
            Arc::new(move |new, _| {
                if new.status.is_revoked() {
                    handle.stop();
                }
            }),
        );

        // A revocation between binding and subscribing would otherwise go unseen.
        if let Some(current) = self.registry.get_metadata(instance).await?
            && current.status.is_revoked()
        {
            revoke.stop();
        }
        Ok(Some(subscription))
    }

    /// Marks the freshly built instance as serving. A rebuilder then retires
    /// the instance it replaces, so there is always a running instance.
    ///
    /// Returns false, touching nothing, if the build was cancelled or
    /// discontinued in the meantime.
    async fn promote(&mut self, instance: &str) -> Result<bool> {
        let promoted = self
            .registry
            .transition_status(instance, ProjectionStatus::NewBuild, ProjectionStatus::Running)
            .await?;
        if promoted.is_none() {
            return Ok(false);
        }

        if self.options.role == Role::Rebuilder {
            let predecessor = self
                .registry
                .get_all_metadata()
                .await?
                .into_iter()
                .find(|m| m.status == ProjectionStatus::Running && m.name != instance);
            if let Some(previous) = predecessor {
                self.registry
                    .update_status(&previous.name, ProjectionStatus::Legacy)
                    .await?;
                tracing::info!(new = %instance, old = %previous.name, "cut over to new instance");
                return Ok(true);
            }
        }
        tracing::info!("instance running");
        Ok(true)
    }

    /// Makes applied events durable, then stores the token of the last one.
    async fn flush(&mut self, instance: &str, position: EventStoreToken) -> Result<()> {
        self.projection.partial_commit().await?;
        self.registry.set_token(instance, position).await?;
        metrics::counter!("projection_partial_commits_total").increment(1);
        tracing::debug!(%position, "partial commit");
        Ok(())
    }

    async fn shut_down(
        &mut self,
        instance: &str,
        position: EventStoreToken,
        pending: usize,
        rebuilding: bool,
    ) -> Result<()> {
        if pending > 0 {
            self.flush(instance, position).await?;
        }
        if rebuilding {
            self.projection.stop_rebuild().await?;
        }
        Ok(())
    }
}

/// A coordinator running on its own task.
pub struct CoordinatorHandle {
    stop: StopHandle,
    state: watch::Receiver<CoordinatorState>,
    task: JoinHandle<Result<RunOutcome>>,
}

impl CoordinatorHandle {
    /// The bound instance, once binding has happened.
    pub fn instance_name(&self) -> Option<String> {
        self.state.borrow().instance.clone()
    }

    pub fn is_caught_up(&self) -> bool {
        self.state.borrow().caught_up
    }

    /// Waits until the instance has caught up. Returns false if the
    /// coordinator ended first.
    pub async fn caught_up(&mut self) -> bool {
        self.state.wait_for(|s| s.caught_up).await.is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Requests a stop and waits for the coordinator to flush and return.
    pub async fn stop(self) -> Result<RunOutcome> {
        self.stop.stop();
        self.join().await
    }

    /// Waits for the coordinator to return on its own.
    pub async fn join(self) -> Result<RunOutcome> {
        self.task
            .await
            .map_err(|e| ProjectionError::Projection(format!("coordinator task failed: {e}")))?
    }
}

//! Resumable, type-filtered live read over an [`EventStore`].

use std::collections::{HashSet, VecDeque};
use std::pin::Pin;

use futures_core::Stream;
use tokio::sync::watch;

use crate::{EventRecord, EventStore, EventStoreError, EventStoreToken, Result, StopSignal};

/// Tuning for [`EventStreamingCursor`].
#[derive(Debug, Clone, Copy)]
pub struct CursorOptions {
    /// Maximum number of events fetched from the store per round trip.
    pub batch_size: usize,
    /// Lets a live-mode cursor be read past a boundary, which then only
    /// marks the cursor going idle. Rebuild mode always allows it.
    pub idle_boundaries: bool,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            batch_size: 256,
            idle_boundaries: false,
        }
    }
}

/// One outcome of [`EventStreamingCursor::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum CursorStep {
    /// The next event of interest.
    Event(EventRecord),
    /// Every event in the store up to now has been delivered. Produced once
    /// per catch-up.
    CaughtUp,
    /// The stop signal fired. The last delivered token is still a valid resume point.
    Cancelled,
}

/// A stream of cursor steps, ending when the stop signal fires.
pub type CursorStream = Pin<Box<dyn Stream<Item = Result<CursorStep>> + Send>>;

/// Lazy, infinite sequence of events whose type is in a fixed set.
///
/// The cursor starts strictly after a token, skips events of other types
/// (they still advance its scan position), and suspends on the store's head
/// watch when there is nothing left to read. Each time it reaches the head it
/// reports [`CursorStep::CaughtUp`] once.
///
/// In rebuild mode the caller keeps reading after a boundary. In live mode a
/// boundary is final: the next call fails with
/// [`EventStoreError::Unsupported`](crate::EventStoreError::Unsupported)
/// unless [`CursorOptions::idle_boundaries`] is set.
pub struct EventStreamingCursor<S: EventStore> {
    store: S,
    event_types: HashSet<String>,
    rebuild_mode: bool,
    idle_boundaries: bool,
    batch_size: usize,
    /// Token of the last delivered event (or the start token).
    position: EventStoreToken,
    /// Token of the last event read from the store, relevant or not.
    scanned: EventStoreToken,
    buffer: VecDeque<EventRecord>,
    /// The last fetch reached the head of the log.
    exhausted: bool,
    boundary_sent: bool,
    /// A boundary was reported in live mode; nothing may be read past it.
    boundary_final: bool,
    head: watch::Receiver<EventStoreToken>,
}

impl<S: EventStore> EventStreamingCursor<S> {
    /// Creates a cursor delivering events of `event_types` strictly after `start`.
    pub fn new<I, T>(
        store: S,
        event_types: I,
        start: EventStoreToken,
        rebuild_mode: bool,
        options: CursorOptions,
    ) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let head = store.subscribe_head();
        Self {
            store,
            event_types: event_types.into_iter().map(Into::into).collect(),
            rebuild_mode,
            idle_boundaries: options.idle_boundaries,
            batch_size: options.batch_size.max(1),
            position: start,
            scanned: start,
            buffer: VecDeque::new(),
            exhausted: false,
            boundary_sent: false,
            boundary_final: false,
            head,
        }
    }

    /// Token of the last event returned, the resume point for a new cursor.
    ///
    /// Before anything was delivered this is the start token (with `Current`
    /// resolved once the cursor has read from the store).
    pub fn position(&self) -> EventStoreToken {
        self.position
    }

    pub fn is_rebuild_mode(&self) -> bool {
        self.rebuild_mode
    }

    /// Leaves rebuild mode. Later boundaries follow the live-mode contract.
    pub fn enter_live_mode(&mut self) {
        self.rebuild_mode = false;
    }

    /// Returns the next event of interest, a catch-up boundary, or
    /// `Cancelled` once `stop` fires.
    ///
    /// Cancel-safe: dropping the future loses no event, since delivery and
    /// position update happen together without an await point between them.
    pub async fn next(&mut self, stop: &mut StopSignal) -> Result<CursorStep> {
        loop {
            if stop.is_stopped() {
                return Ok(CursorStep::Cancelled);
            }

            if self.boundary_final {
                tracing::error!(position = %self.position, "live cursor read past its boundary");
                return Err(EventStoreError::Unsupported(
                    "reading a live cursor past its caught-up boundary",
                ));
            }

            if let Some(event) = self.buffer.pop_front() {
                self.position = event.token;
                self.boundary_sent = false;
                return Ok(CursorStep::Event(event));
            }

            if !self.exhausted {
                self.fetch().await?;
                continue;
            }

            if !self.boundary_sent {
                self.boundary_sent = true;
                self.boundary_final = !self.rebuild_mode && !self.idle_boundaries;
                tracing::debug!(position = %self.position, "cursor caught up");
                return Ok(CursorStep::CaughtUp);
            }

            if *self.head.borrow_and_update() > self.scanned {
                self.exhausted = false;
                continue;
            }

            tokio::select! {
                changed = self.head.changed() => {
                    if changed.is_err() {
                        // The store is gone; nothing more can arrive.
                        stop.stopped().await;
                        return Ok(CursorStep::Cancelled);
                    }
                }
                () = stop.stopped() => return Ok(CursorStep::Cancelled),
            }
            self.exhausted = false;
        }
    }

    async fn fetch(&mut self) -> Result<()> {
        if self.scanned == EventStoreToken::Current {
            let head = self.store.head_token().await?;
            self.scanned = head;
            self.position = head;
        }

        // Mark the head as seen before reading so an append racing with this
        // fetch still wakes the next wait.
        let _ = self.head.borrow_and_update();
        let page = self
            .store
            .get_all_events(self.scanned, self.batch_size, true)
            .await?;

        for event in page.events {
            if self.event_types.contains(&event.event_type) {
                self.buffer.push_back(event);
            } else {
                tracing::trace!(event_type = %event.event_type, token = %event.token, "skipping event");
            }
        }
        self.scanned = page.next_token;
        self.exhausted = !page.has_more;
        Ok(())
    }
}

impl<S: EventStore + 'static> EventStreamingCursor<S> {
    /// Turns the cursor into a [`Stream`].
    ///
    /// The stream ends on cancellation and after yielding a store error.
    pub fn into_stream(self, stop: StopSignal) -> CursorStream {
        Box::pin(futures_util::stream::unfold(
            Some((self, stop)),
            |state| async move {
                let (mut cursor, mut stop) = state?;
                match cursor.next(&mut stop).await {
                    Ok(CursorStep::Cancelled) => None,
                    Ok(step) => Some((Ok(step), Some((cursor, stop)))),
                    Err(e) => Some((Err(e), None)),
                }
            },
        ))
    }
}

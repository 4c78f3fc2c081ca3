//! Cooperative cancellation for blocking waits.
//!
//! A [`StopHandle`] is held by whoever supervises a worker; every blocking
//! call the worker makes receives a [`StopSignal`] and returns promptly once
//! the handle is stopped. Dropping every handle also counts as a stop.

use std::sync::Arc;

use tokio::sync::watch;

/// Sends the stop request. `Clone` is cheap and all clones stop the same signal.
#[derive(Clone, Debug)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observes a stop request.
#[derive(Clone, Debug)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
    /// Keeps the channel open for signals that must never fire.
    _keep_open: Option<Arc<watch::Sender<bool>>>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests a stop. Calling it more than once is harmless.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a new signal observing this handle.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
            _keep_open: None,
        }
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    /// A signal that is never stopped.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keep_open: Some(Arc::new(tx)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once a stop was requested or every handle was dropped.
    pub async fn stopped(&mut self) {
        // An error means the sender is gone, which is treated as a stop.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

//! Internal lifecycle events.
//!
//! The session and dispatcher signal the controller through a
//! single-capacity channel. Capacity one is deliberate: duplicate signals
//! coalesce, and a full channel means an equivalent event is already
//! pending, so a dropped send is safe.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A lifecycle signal consumed by the controller's event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    /// The current session ended; reconnect under backoff.
    Disconnect,
    /// The gateway asked this client to reconnect elsewhere.
    Migrate,
    /// The gateway terminated this client for good.
    Kickout,
}

/// Non-blocking producer side of the event channel.
#[derive(Clone)]
pub(crate) struct EventSender {
    tx: mpsc::Sender<Event>,
    stop: CancellationToken,
}

impl EventSender {
    pub(crate) fn new(tx: mpsc::Sender<Event>, stop: CancellationToken) -> Self {
        Self { tx, stop }
    }

    /// Deliver `event` without blocking. Dropped silently once the bridge is
    /// stopping, and dropped with a log line when the channel is full.
    pub(crate) fn send(&self, event: Event) {
        if self.stop.is_cancelled() {
            debug!(?event, "bridge is stopping, dropping event");
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                error!(?event, "event channel full, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                debug!(?event, "event loop gone, dropping event");
            }
        }
    }
}

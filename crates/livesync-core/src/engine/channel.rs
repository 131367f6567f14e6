//! Live channel
//!
//! At most one channel is open per engine. Each channel is tagged with the
//! `SourceId` it was opened for, and its listener task re-checks that tag
//! whenever something arrives, so deliveries for a superseded source are
//! dropped even if they were already in flight.

use std::fmt;
use std::sync::Weak;

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use super::{Inner, Source};
use crate::remote::{CancelHandle, SnapshotEvent};

/// Token minted each time a new, non-empty reference is adopted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// An open subscription and the means to stop it
pub(crate) struct LiveChannel {
    pub(crate) tag: SourceId,
    cancel: Box<dyn CancelHandle>,
    stop: Option<oneshot::Sender<()>>,
}

impl LiveChannel {
    pub(crate) fn new(
        tag: SourceId,
        cancel: Box<dyn CancelHandle>,
        stop: oneshot::Sender<()>,
    ) -> Self {
        Self {
            tag,
            cancel,
            stop: Some(stop),
        }
    }

    /// Cancel the remote subscription and stop the listener task
    ///
    /// Closing an already-closed channel does nothing.
    pub(crate) fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
            self.cancel.cancel();
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drain a live channel until it is stopped, closed, or fails
pub(crate) async fn listen<S: Source>(
    engine: Weak<Inner<S>>,
    tag: SourceId,
    mut events: mpsc::UnboundedReceiver<SnapshotEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stop => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(inner) = engine.upgrade() else {
            break;
        };

        match event {
            SnapshotEvent::Snapshot(snapshot) => inner.deliver(tag, snapshot).await,
            SnapshotEvent::Error(message) => {
                inner.fail_channel(tag, message);
                break;
            }
        }
    }
    trace!("Listener for {} finished", tag);
}

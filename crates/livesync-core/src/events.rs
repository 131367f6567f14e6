//! Engine notifications
//!
//! Consumers subscribe with `Engine::subscribe_events()` and receive every
//! notification emitted after subscribing.

use crate::error::SyncError;

/// Notifications emitted by an engine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Work started: a new source was adopted, a channel opened, or a fetch issued
    Request,
    /// Loading finished; fires on empty results and on failures too
    Load,
    /// New remote content was written to the local store
    Sync,
    /// Delivery or deferred resolution failed; always follows the `Load`
    Error(SyncError),
}

impl SyncEvent {
    /// Short name, handy for logging and assertions
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::Request => "request",
            SyncEvent::Load => "load",
            SyncEvent::Sync => "sync",
            SyncEvent::Error(_) => "error",
        }
    }
}

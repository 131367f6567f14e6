//! Deferred task scheduling
//!
//! Parameter batches, one-shot reads and live channel listeners all run as
//! deferred tasks. A deferred task never starts before the scheduling
//! caller's current turn is over, which is what lets several synchronous
//! parameter writes coalesce into one recomputation.

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tracing::error;

/// A unit of deferred work
pub type Task = BoxFuture<'static, ()>;

/// Runs tasks after the current cooperative turn
pub trait Scheduler: Send + Sync {
    fn defer(&self, task: Task);
}

/// Scheduler backed by the tokio runtime
///
/// Tasks are spawned and yield once before running their body.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler {
    handle: Option<Handle>,
}

impl TokioScheduler {
    /// Spawn onto whatever runtime is current when a task is deferred
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn onto a specific runtime
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn defer(&self, task: Task) {
        let deferred = async move {
            tokio::task::yield_now().await;
            task.await;
        };

        match &self.handle {
            Some(handle) => {
                handle.spawn(deferred);
            }
            None => match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(deferred);
                }
                Err(e) => error!("Dropping deferred task, no tokio runtime: {}", e),
            },
        }
    }
}

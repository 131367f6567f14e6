//! Readiness gate
//!
//! A single-slot future meaning "data for the current reference has been
//! delivered at least once". Entering the loading state re-arms it with a
//! fresh unresolved future; leaving it resolves that future exactly once.

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use crate::error::{SyncError, SyncResult};

/// Future handed to every `ready()` caller of one loading episode
pub type ReadyFuture = Shared<BoxFuture<'static, SyncResult<()>>>;

/// A shared future that is already settled
pub(crate) fn settled(result: SyncResult<()>) -> ReadyFuture {
    future::ready(result).boxed().shared()
}

/// A shared future settled through the returned sender
///
/// A dropped sender settles it successfully.
pub(crate) fn pending() -> (oneshot::Sender<SyncResult<()>>, ReadyFuture) {
    let (tx, rx) = oneshot::channel();
    let fut = rx.map(|result| result.unwrap_or(Ok(()))).boxed().shared();
    (tx, fut)
}

pub(crate) struct ReadyGate {
    loading: bool,
    resolver: Option<oneshot::Sender<SyncResult<()>>>,
    ready: ReadyFuture,
}

impl ReadyGate {
    pub(crate) fn new() -> Self {
        Self {
            loading: false,
            resolver: None,
            ready: settled(Ok(())),
        }
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.loading
    }

    /// Enter the loading state; no-op when already loading
    pub(crate) fn arm(&mut self) {
        if self.loading {
            return;
        }
        let (tx, fut) = pending();
        self.loading = true;
        self.resolver = Some(tx);
        self.ready = fut;
    }

    /// Leave the loading state successfully; no-op when not loading
    pub(crate) fn resolve(&mut self) {
        self.settle(Ok(()));
    }

    /// Leave the loading state with an error
    ///
    /// Outside a loading episode the error replaces the settled future so
    /// later `ready()` callers still observe it.
    pub(crate) fn fail(&mut self, error: SyncError) {
        if self.loading {
            self.settle(Err(error));
        } else {
            self.ready = settled(Err(error));
        }
    }

    /// Settle successfully, discarding any earlier failure
    pub(crate) fn reset(&mut self) {
        if self.loading {
            self.settle(Ok(()));
        } else {
            self.ready = settled(Ok(()));
        }
    }

    pub(crate) fn future(&self) -> ReadyFuture {
        self.ready.clone()
    }

    fn settle(&mut self, result: SyncResult<()>) {
        if !self.loading {
            return;
        }
        self.loading = false;
        if let Some(resolver) = self.resolver.take() {
            let _ = resolver.send(result);
        }
    }
}

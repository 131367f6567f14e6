//! Live-reference synchronization engine
//!
//! The engine binds a local store to whatever remote reference its
//! parameters currently describe:
//!
//! 1. Parameter writes schedule one deferred recomputation per batch
//! 2. The new reference is compared with the adopted one and dropped if
//!    equivalent
//! 3. A real change mints a `SourceId`, re-arms readiness, and re-opens the
//!    live channel when someone is observing
//! 4. Snapshots pass the pre-sync hook, are checked against the current
//!    `SourceId`, and are normalized into the store
//!
//! State lives behind a single mutex that is never held across an await.
//! Binding code (`Source::apply`, `with_store` readers) runs without it, so
//! it may call back into the engine.

mod channel;
mod gate;
mod scheduler;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

pub use channel::SourceId;
pub use gate::ReadyFuture;
pub use scheduler::{Scheduler, Task, TokioScheduler};

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::params::Params;
use crate::reference::{CollectionRef, Reference};
use crate::remote::RemoteStore;
use crate::snapshot::Snapshot;
use channel::LiveChannel;
use gate::ReadyGate;

/// Counter for engine labels
static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Result of deriving a reference from parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// The addressable collection, before any query refinement
    pub handle: Option<CollectionRef>,
    /// The reference to read and observe
    pub reference: Option<Reference>,
}

impl Resolution {
    /// No source
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(handle: CollectionRef, reference: Reference) -> Self {
        Self {
            handle: Some(handle),
            reference: Some(reference),
        }
    }
}

/// How an engine variant derives references and writes snapshots
#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// Local store the snapshots are normalized into
    type Store: Default + Send + Sync + 'static;

    /// Derive the reference from the current parameters
    fn resolve(&self, params: &Params) -> SyncResult<Resolution>;

    /// Hook awaited before every snapshot is applied
    async fn before_sync(&self) -> SyncResult<()>;

    /// Normalize a snapshot of `reference` into an empty store
    ///
    /// Runs without the engine lock held.
    fn apply(&self, reference: &Reference, snapshot: &Snapshot, store: &mut Self::Store);
}

type Batch = Shared<BoxFuture<'static, SyncResult<()>>>;

struct State<St> {
    params: Params,
    reference: Option<Reference>,
    handle: Option<CollectionRef>,
    /// Whether a resolution has ever been committed
    resolved: bool,
    source_id: Option<SourceId>,
    next_source_id: u64,
    channel: Option<LiveChannel>,
    observers: usize,
    /// One-shot fetch already issued for the current source
    fetch_issued: bool,
    first_snapshot_received: bool,
    gate: ReadyGate,
    /// Pending recomputation token
    batch: Option<Batch>,
    store: Arc<St>,
}

impl<St: Default> State<St> {
    fn new(params: Params) -> Self {
        Self {
            params,
            reference: None,
            handle: None,
            resolved: false,
            source_id: None,
            next_source_id: 0,
            channel: None,
            observers: 0,
            fetch_issued: false,
            first_snapshot_received: false,
            gate: ReadyGate::new(),
            batch: None,
            store: Arc::default(),
        }
    }
}

impl<St> State<St> {
    fn mint_source_id(&mut self) -> SourceId {
        self.next_source_id += 1;
        SourceId(self.next_source_id)
    }

    fn channel_is_current(&self) -> bool {
        match (&self.channel, self.source_id) {
            (Some(channel), Some(id)) => channel.tag == id,
            _ => false,
        }
    }

    fn path(&self) -> String {
        self.reference
            .as_ref()
            .map_or_else(|| "-".to_string(), Reference::path)
    }

    /// Forget the committed resolution so the next use resolves again
    fn invalidate(&mut self) {
        self.batch = None;
        self.resolved = false;
    }
}

/// Releases the batch token when its task is dropped before committing
struct BatchGuard<S: Source> {
    engine: Weak<Inner<S>>,
    armed: bool,
}

impl<S: Source> Drop for BatchGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(inner) = self.engine.upgrade() {
            warn!("{} Recomputation dropped before running", inner.label);
            inner.state.lock().invalidate();
        }
    }
}

pub(crate) struct Inner<S: Source> {
    label: String,
    source: S,
    remote: Arc<dyn RemoteStore>,
    scheduler: Arc<dyn Scheduler>,
    config: EngineConfig,
    events: broadcast::Sender<SyncEvent>,
    state: Mutex<State<S::Store>>,
}

impl<S: Source> Inner<S> {
    fn emit(&self, event: SyncEvent) {
        trace!("{} emit {}", self.label, event.name());
        let _ = self.events.send(event);
    }

    fn is_current(&self, tag: SourceId) -> bool {
        self.state.lock().source_id == Some(tag)
    }

    // --- Batching ---

    /// Schedule a recomputation unless one is already pending
    fn schedule_recompute(self: &Arc<Self>) {
        let (tx, batch) = gate::pending();
        {
            let mut st = self.state.lock();
            if st.batch.is_some() {
                trace!("{} Recomputation already pending", self.label);
                return;
            }
            st.batch = Some(batch);
        }

        let mut guard = BatchGuard {
            engine: Arc::downgrade(self),
            armed: true,
        };
        self.scheduler.defer(Box::pin(async move {
            if let Some(inner) = guard.engine.upgrade() {
                guard.armed = false;
                let result = inner.commit_batch();
                let _ = tx.send(result);
            }
        }));
    }

    /// Commit the pending batch
    ///
    /// A failed resolution leaves the engine unresolved, so later `ready()`
    /// and `observe()` calls report the error until parameters resolve again.
    fn commit_batch(self: &Arc<Self>) -> SyncResult<()> {
        let result = {
            let mut st = self.state.lock();
            st.batch = None;
            let result = self.recompute(&mut st);
            if result.is_err() {
                st.invalidate();
            }
            result
        };
        if let Err(err) = &result {
            warn!("{} Failed to resolve reference: {}", self.label, err);
            self.emit(SyncEvent::Error(err.clone()));
        }
        result.map(|_| ())
    }

    /// Await pending batches, including ones scheduled while awaiting
    async fn settle_batches(&self) -> SyncResult<()> {
        loop {
            let Some(batch) = self.state.lock().batch.clone() else {
                return Ok(());
            };
            batch.clone().await?;

            let mut st = self.state.lock();
            if st.batch.as_ref().is_some_and(|b| b.ptr_eq(&batch)) {
                // Settled without committing
                st.invalidate();
                return Ok(());
            }
        }
    }

    fn recompute(self: &Arc<Self>, st: &mut State<S::Store>) -> SyncResult<bool> {
        let resolution = self.source.resolve(&st.params)?;
        st.resolved = true;
        st.handle = resolution.handle;
        Ok(self.adopt(st, resolution.reference))
    }

    fn ensure_reference(self: &Arc<Self>, st: &mut State<S::Store>) -> SyncResult<()> {
        if !st.resolved {
            self.recompute(st)?;
        }
        Ok(())
    }

    fn handle(self: &Arc<Self>) -> SyncResult<Option<CollectionRef>> {
        let mut st = self.state.lock();
        self.ensure_reference(&mut st)?;
        Ok(st.handle.clone())
    }

    // --- Change gate ---

    /// Adopt a new reference; returns false when nothing observable changed
    fn adopt(self: &Arc<Self>, st: &mut State<S::Store>, reference: Option<Reference>) -> bool {
        match (&st.reference, &reference) {
            (None, None) => return false,
            (Some(current), Some(new)) if self.remote.references_equal(current, new) => {
                trace!("{} Ignore change source", self.label);
                return false;
            }
            _ => {}
        }

        info!(
            "{} Change source to {}",
            self.label,
            reference
                .as_ref()
                .map_or_else(|| "nothing".to_string(), |r| r.to_string())
        );
        st.fetch_issued = false;
        st.first_snapshot_received = false;
        st.reference = reference;
        self.emit(SyncEvent::Request);

        if st.reference.is_some() {
            let tag = st.mint_source_id();
            st.source_id = Some(tag);
            if st.observers > 0 {
                debug!("{} Change source -> update listeners", self.label);
                self.close_channel(st);
                self.open_channel(st);
            }
            self.set_loading(st, true);
        } else {
            st.source_id = None;
            self.close_channel(st);
            st.store = Arc::default();
            debug!("{} Change loading state: false", self.label);
            st.gate.reset();
            self.emit(SyncEvent::Load);
        }
        true
    }

    // --- Subscription manager ---

    fn set_observing(self: &Arc<Self>, st: &mut State<S::Store>, should_observe: bool) {
        if should_observe && st.channel_is_current() {
            trace!("{} Already listening to {}", self.label, st.path());
            return;
        }

        self.close_channel(st);

        if should_observe && st.reference.is_some() {
            self.emit(SyncEvent::Request);
            self.set_loading(st, true);
            self.open_channel(st);
        }
    }

    fn open_channel(self: &Arc<Self>, st: &mut State<S::Store>) {
        let (Some(reference), Some(tag)) = (st.reference.clone(), st.source_id) else {
            return;
        };

        debug!("{} Subscribe listeners on {} ({})", self.label, reference, tag);
        let (sink, events) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let cancel = self
            .remote
            .subscribe(&reference, self.config.read_options(), sink);
        st.channel = Some(LiveChannel::new(tag, cancel, stop_tx));

        let engine = Arc::downgrade(self);
        self.scheduler
            .defer(Box::pin(channel::listen(engine, tag, events, stop_rx)));
    }

    fn close_channel(&self, st: &mut State<S::Store>) {
        if let Some(mut channel) = st.channel.take() {
            debug!("{} Unsubscribe listeners ({})", self.label, channel.tag);
            channel.close();
        }
    }

    // --- Readiness ---

    fn set_loading(&self, st: &mut State<S::Store>, loading: bool) {
        if st.gate.is_loading() == loading {
            return;
        }
        debug!("{} Change loading state: {}", self.label, loading);
        if loading {
            st.gate.arm();
        } else {
            st.gate.resolve();
        }
    }

    /// Issue the one-shot read for the current source, at most once
    fn fetch_initial(self: &Arc<Self>, st: &mut State<S::Store>) {
        if st.fetch_issued {
            return;
        }
        let (Some(reference), Some(tag)) = (st.reference.clone(), st.source_id) else {
            st.store = Arc::default();
            return;
        };

        debug!("{} Fetch initial data from {}", self.label, reference);
        st.fetch_issued = true;
        if !st.gate.is_loading() {
            self.emit(SyncEvent::Request);
            self.set_loading(st, true);
        }

        let engine = Arc::downgrade(self);
        let remote = self.remote.clone();
        let options = self.config.read_options();
        self.scheduler.defer(Box::pin(async move {
            let result = remote.read(&reference, options).await;
            let Some(inner) = engine.upgrade() else {
                return;
            };
            match result {
                Ok(snapshot) => inner.deliver(tag, snapshot).await,
                Err(err) => inner.fail_episode(tag, err),
            }
        }));
    }

    // --- Snapshot delivery ---

    /// Run the pre-sync hook and normalize a snapshot for `tag`
    ///
    /// The tag is checked again after the hook since the source may have
    /// changed while it was running.
    pub(crate) async fn deliver(self: &Arc<Self>, tag: SourceId, snapshot: Snapshot) {
        if !self.is_current(tag) {
            debug!("{} Discarding snapshot for superseded {}", self.label, tag);
            return;
        }

        if let Err(err) = self.source.before_sync().await {
            self.fail_episode(tag, err);
            return;
        }

        let reference = {
            let st = self.state.lock();
            match (&st.reference, st.source_id == Some(tag)) {
                (Some(reference), true) => reference.clone(),
                _ => {
                    debug!("{} Discarding snapshot for superseded {}", self.label, tag);
                    return;
                }
            }
        };

        debug!(
            "{} Apply snapshot, {} documents from {}",
            self.label,
            snapshot.len(),
            reference
        );
        let mut store = S::Store::default();
        self.source.apply(&reference, &snapshot, &mut store);

        let mut st = self.state.lock();
        if st.source_id != Some(tag) {
            debug!("{} Discarding snapshot for superseded {}", self.label, tag);
            return;
        }
        st.store = Arc::new(store);
        st.first_snapshot_received = true;
        if st.gate.is_loading() {
            debug!("{} Change loading state: false", self.label);
        }
        // Also clears a failure left by an earlier delivery on this channel
        st.gate.reset();
        drop(st);

        self.emit(SyncEvent::Load);
        self.emit(SyncEvent::Sync);
    }

    /// The live channel for `tag` reported an error
    pub(crate) fn fail_channel(&self, tag: SourceId, message: String) {
        let err = {
            let mut st = self.state.lock();
            if st.source_id != Some(tag) {
                debug!("{} Ignoring error from superseded {}", self.label, tag);
                return;
            }
            if st.channel.as_ref().is_some_and(|c| c.tag == tag) {
                self.close_channel(&mut st);
            }
            SyncError::Snapshot {
                path: st.path(),
                message,
            }
        };
        self.fail_episode(tag, err);
    }

    /// End the loading episode for `tag` with an error
    fn fail_episode(&self, tag: SourceId, err: SyncError) {
        {
            let mut st = self.state.lock();
            if st.source_id != Some(tag) {
                debug!("{} Ignoring failure of superseded {}: {}", self.label, tag, err);
                return;
            }
            error!("{} {}", self.label, err);
            st.gate.fail(err.clone());
        }
        self.emit(SyncEvent::Load);
        self.emit(SyncEvent::Error(err));
    }
}

/// A live-reference engine over a `Source`
///
/// Cloning is cheap; clones share the same engine.
pub struct Engine<S: Source> {
    inner: Arc<Inner<S>>,
}

impl<S: Source> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Builder for engines
pub struct EngineBuilder<S: Source> {
    source: S,
    remote: Arc<dyn RemoteStore>,
    config: EngineConfig,
    scheduler: Arc<dyn Scheduler>,
    params: Params,
}

impl<S: Source> EngineBuilder<S> {
    pub fn new(source: S, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            source,
            remote,
            config: EngineConfig::default(),
            scheduler: Arc::new(TokioScheduler::new()),
            params: Params::new(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Initial parameters; resolution still waits for first use
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn build(self) -> Engine<S> {
        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        let label = self
            .config
            .label
            .clone()
            .unwrap_or_else(|| format!("engine-{}", id));
        let (events, _) = broadcast::channel(self.config.event_capacity.max(1));

        Engine {
            inner: Arc::new(Inner {
                label,
                source: self.source,
                remote: self.remote,
                scheduler: self.scheduler,
                config: self.config,
                events,
                state: Mutex::new(State::new(self.params)),
            }),
        }
    }
}

impl<S: Source> Engine<S> {
    /// Create an engine with default configuration
    pub fn with_source(source: S, remote: Arc<dyn RemoteStore>) -> Self {
        EngineBuilder::new(source, remote).build()
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.inner.remote
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner<S>> {
        Arc::downgrade(&self.inner)
    }

    // --- Parameters ---

    /// Current parameters
    pub fn params(&self) -> Params {
        self.inner.state.lock().params.clone()
    }

    /// Set one parameter and schedule a recomputation
    pub fn set_param(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.update_params(|params| {
            params.insert(key, value);
        });
    }

    /// Remove one parameter and schedule a recomputation
    pub fn remove_param(&self, key: &str) {
        self.update_params(|params| {
            params.remove(key);
        });
    }

    /// Edit parameters in place and schedule a recomputation
    pub fn update_params(&self, edit: impl FnOnce(&mut Params)) {
        edit(&mut self.inner.state.lock().params);
        self.inner.schedule_recompute();
    }

    /// Replace all parameters
    ///
    /// Fails with `InvalidParameter` unless `value` is a JSON object.
    pub fn set_params(&self, value: Value) -> SyncResult<()> {
        let params = Params::try_from(value)?;
        self.inner.state.lock().params = params;
        self.inner.schedule_recompute();
        Ok(())
    }

    // --- References ---

    /// Derive a reference from the current parameters without adopting it
    pub fn resolve(&self) -> SyncResult<Option<Reference>> {
        let params = self.params();
        Ok(self.inner.source.resolve(&params)?.reference)
    }

    /// The currently adopted reference
    pub fn reference(&self) -> Option<Reference> {
        self.inner.state.lock().reference.clone()
    }

    pub fn source_id(&self) -> Option<SourceId> {
        self.inner.state.lock().source_id
    }

    /// Commit pending batches and make sure a resolution exists
    pub(crate) async fn settle(&self) -> SyncResult<()> {
        self.inner.settle_batches().await?;
        let mut st = self.inner.state.lock();
        self.inner.ensure_reference(&mut st)
    }

    /// Request a recomputation and wait until it is committed
    pub async fn refresh(&self) -> SyncResult<()> {
        self.inner.schedule_recompute();
        self.inner.settle_batches().await
    }

    // --- Observation ---

    /// Register an interested consumer; the first one opens the live channel
    pub fn observe(&self) -> SyncResult<()> {
        let mut st = self.inner.state.lock();
        st.observers += 1;
        if st.observers == 1 {
            debug!("{} First observer", self.inner.label);
            if let Err(err) = self.inner.ensure_reference(&mut st) {
                st.observers = 0;
                return Err(err);
            }
            self.inner.set_observing(&mut st, true);
        }
        Ok(())
    }

    /// Drop an interested consumer; the last one closes the live channel
    ///
    /// Extra calls are ignored.
    pub fn unobserve(&self) {
        let mut st = self.inner.state.lock();
        if st.observers == 0 {
            trace!("{} unobserve without observers", self.inner.label);
            return;
        }
        st.observers -= 1;
        if st.observers == 0 {
            debug!("{} Last observer gone", self.inner.label);
            self.inner.set_observing(&mut st, false);
        }
    }

    pub fn is_observed(&self) -> bool {
        self.inner.state.lock().observers > 0
    }

    pub fn observer_count(&self) -> usize {
        self.inner.state.lock().observers
    }

    /// Whether a live channel is currently open
    pub fn is_listening(&self) -> bool {
        self.inner.state.lock().channel.is_some()
    }

    // --- Readiness ---

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().gate.is_loading()
    }

    /// Whether a snapshot for the current source has been applied
    pub fn has_snapshot(&self) -> bool {
        self.inner.state.lock().first_snapshot_received
    }

    /// Wait until data for the current reference has been delivered
    ///
    /// Pending parameter batches are awaited first. Without observers this
    /// issues a one-shot read (once per source) so the data still arrives.
    pub async fn ready(&self) -> SyncResult<()> {
        self.inner.settle_batches().await?;

        let ready = {
            let mut st = self.inner.state.lock();
            self.inner.ensure_reference(&mut st)?;
            if st.observers == 0 {
                self.inner.fetch_initial(&mut st);
            }
            st.gate.future()
        };
        ready.await
    }

    // --- Notifications & store ---

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Read the local store
    ///
    /// `read` sees the store as of the call and may use the engine freely.
    pub fn with_store<R>(&self, read: impl FnOnce(&S::Store) -> R) -> R {
        let store = self.inner.state.lock().store.clone();
        read(&store)
    }

    /// The unrefined collection handle of the current resolution
    pub fn handle(&self) -> SyncResult<Option<CollectionRef>> {
        self.inner.handle()
    }
}

/// Owner of a collection handle, held weakly by document models
pub(crate) trait HandleProvider: Send + Sync {
    fn collection_handle(self: Arc<Self>) -> SyncResult<Option<CollectionRef>>;
}

impl<S: Source> HandleProvider for Inner<S> {
    fn collection_handle(self: Arc<Self>) -> SyncResult<Option<CollectionRef>> {
        self.handle()
    }
}

//! Shared fixtures for engine scenario tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use livesync_core::{
    CancelHandle, CollectionRef, DocumentRef, Params, ReadOptions, Reference, RemoteDocument,
    RemoteStore, Snapshot, SnapshotEvent, SnapshotSink, SyncError, SyncEvent, SyncResult,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, oneshot};

/// Install a test subscriber once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Let deferred tasks run to completion
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Collection path taken from the `shelf` parameter
pub fn shelf(params: &Params) -> Option<String> {
    params.get_str("shelf").map(str::to_string)
}

pub fn shelf_ref(name: &str) -> Reference {
    Reference::from(CollectionRef::new(name))
}

pub fn doc(id: &str, data: Value) -> RemoteDocument {
    match data {
        Value::Object(map) => RemoteDocument::new(id, map),
        _ => RemoteDocument::new(id, Map::new()),
    }
}

pub fn snapshot(docs: Vec<RemoteDocument>) -> Snapshot {
    Snapshot::new(docs)
}

/// Names of every event received so far
pub fn drain(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    names
}

/// Every event received so far
pub fn drain_events(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

struct Channel {
    reference: Reference,
    sink: SnapshotSink,
    open: Arc<AtomicBool>,
}

struct PendingRead {
    reference: Reference,
    responder: oneshot::Sender<SyncResult<Snapshot>>,
}

#[derive(Default)]
struct Script {
    channels: Vec<Channel>,
    pending_reads: Vec<PendingRead>,
    served: Vec<(Reference, Snapshot)>,
    reads: usize,
    last_options: Option<ReadOptions>,
}

/// Remote store driven by hand
///
/// Live channels only deliver what the test pushes; reads block until the
/// test answers them unless a snapshot is being served for the reference.
#[derive(Clone, Default)]
pub struct ScriptedRemote {
    script: Arc<Mutex<Script>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every read of `reference` immediately with `snapshot`
    pub fn serve(&self, reference: Reference, snapshot: Snapshot) {
        self.script.lock().served.push((reference, snapshot));
    }

    /// Answer the oldest pending read of `reference`
    pub fn answer_read(&self, reference: &Reference, result: SyncResult<Snapshot>) -> bool {
        let pending = {
            let mut script = self.script.lock();
            let index = script
                .pending_reads
                .iter()
                .position(|p| &p.reference == reference);
            index.map(|i| script.pending_reads.remove(i))
        };
        match pending {
            Some(pending) => pending.responder.send(result).is_ok(),
            None => false,
        }
    }

    pub fn pending_reads(&self) -> Vec<Reference> {
        self.script
            .lock()
            .pending_reads
            .iter()
            .map(|p| p.reference.clone())
            .collect()
    }

    pub fn read_count(&self) -> usize {
        self.script.lock().reads
    }

    pub fn last_options(&self) -> Option<ReadOptions> {
        self.script.lock().last_options
    }

    pub fn subscribe_count(&self) -> usize {
        self.script.lock().channels.len()
    }

    /// References with a channel that has not been cancelled
    pub fn open_channels(&self) -> Vec<Reference> {
        self.script
            .lock()
            .channels
            .iter()
            .filter(|c| c.open.load(Ordering::SeqCst))
            .map(|c| c.reference.clone())
            .collect()
    }

    /// Push a snapshot into every open channel on `reference`
    pub fn push(&self, reference: &Reference, snapshot: Snapshot) -> usize {
        self.send(reference, || SnapshotEvent::Snapshot(snapshot.clone()))
    }

    /// Report a channel error on every open channel on `reference`
    pub fn fail(&self, reference: &Reference, message: &str) -> usize {
        self.send(reference, || SnapshotEvent::Error(message.to_string()))
    }

    fn send(&self, reference: &Reference, event: impl Fn() -> SnapshotEvent) -> usize {
        let script = self.script.lock();
        script
            .channels
            .iter()
            .filter(|c| &c.reference == reference && c.open.load(Ordering::SeqCst))
            .filter(|c| c.sink.send(event()).is_ok())
            .count()
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn read(&self, reference: &Reference, options: ReadOptions) -> SyncResult<Snapshot> {
        let receiver = {
            let mut script = self.script.lock();
            script.reads += 1;
            script.last_options = Some(options);
            if let Some((_, snapshot)) = script.served.iter().find(|(r, _)| r == reference) {
                return Ok(snapshot.clone());
            }
            let (responder, receiver) = oneshot::channel();
            script.pending_reads.push(PendingRead {
                reference: reference.clone(),
                responder,
            });
            receiver
        };
        receiver
            .await
            .unwrap_or_else(|_| Err(SyncError::remote("read abandoned")))
    }

    fn subscribe(
        &self,
        reference: &Reference,
        options: ReadOptions,
        sink: SnapshotSink,
    ) -> Box<dyn CancelHandle> {
        let open = Arc::new(AtomicBool::new(true));
        let mut script = self.script.lock();
        script.last_options = Some(options);
        script.channels.push(Channel {
            reference: reference.clone(),
            sink,
            open: open.clone(),
        });
        Box::new(move || open.store(false, Ordering::SeqCst))
    }

    async fn set(
        &self,
        _document: &DocumentRef,
        _data: Map<String, Value>,
        _merge: bool,
    ) -> SyncResult<()> {
        Ok(())
    }

    async fn update(&self, _document: &DocumentRef, _data: Map<String, Value>) -> SyncResult<()> {
        Ok(())
    }

    async fn delete(&self, _document: &DocumentRef) -> SyncResult<()> {
        Ok(())
    }
}

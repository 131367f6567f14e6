//! In-process remote store
//!
//! `MemoryRemote` keeps collections of JSON documents in memory and
//! implements the full `RemoteStore` contract: one-shot reads, live
//! channels re-evaluated on every write, and document writes. It also
//! supports failure injection so error paths can be exercised.
//!
//! Documents within a collection are ordered by id unless a query asks for
//! a different ordering.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::config::ReadOptions;
use crate::error::{SyncError, SyncResult};
use crate::reference::{CollectionRef, Direction, DocumentRef, Filter, FilterOp, Query, Reference};
use crate::remote::{CancelHandle, RemoteStore, SnapshotEvent, SnapshotSink};
use crate::snapshot::{RemoteDocument, Snapshot};

type Collection = BTreeMap<String, Map<String, Value>>;

struct Listener {
    id: u64,
    reference: Reference,
    sink: SnapshotSink,
}

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, Collection>,
    listeners: Vec<Listener>,
    next_listener_id: u64,
    /// Paths whose one-shot reads fail, with the message to report
    failing_reads: HashMap<String, String>,
    reads: usize,
    subscriptions: usize,
}

impl MemoryState {
    fn evaluate(&self, reference: &Reference) -> Snapshot {
        match reference {
            Reference::Document(doc) => {
                let data = self
                    .collections
                    .get(doc.collection().path())
                    .and_then(|c| c.get(doc.id()))
                    .cloned();
                Snapshot::single(RemoteDocument {
                    id: doc.id().to_string(),
                    data,
                })
            }
            Reference::Query(query) => Snapshot::new(self.run_query(query)),
        }
    }

    fn run_query(&self, query: &Query) -> Vec<RemoteDocument> {
        let Some(collection) = self.collections.get(query.collection().path()) else {
            return Vec::new();
        };

        let mut matches: Vec<(&String, &Map<String, Value>)> = collection
            .iter()
            .filter(|(_, data)| query.filters().iter().all(|f| filter_matches(f, data)))
            .collect();

        for order in query.ordering().iter().rev() {
            matches.sort_by(|(_, a), (_, b)| {
                let ord = compare_values(
                    a.get(&order.field).unwrap_or(&Value::Null),
                    b.get(&order.field).unwrap_or(&Value::Null),
                );
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }

        let limit = query.max_results().unwrap_or(usize::MAX);
        matches
            .into_iter()
            .take(limit)
            .map(|(id, data)| RemoteDocument::new(id.clone(), data.clone()))
            .collect()
    }

    /// Push fresh snapshots to every listener reading `collection`
    fn notify(&mut self, collection: &str) {
        let mut snapshots = Vec::new();
        for listener in &self.listeners {
            if listener.reference.collection().path() == collection {
                snapshots.push((listener.id, self.evaluate(&listener.reference)));
            }
        }

        let mut closed = Vec::new();
        for (id, snapshot) in snapshots {
            if let Some(listener) = self.listeners.iter().find(|l| l.id == id) {
                if listener.sink.send(SnapshotEvent::Snapshot(snapshot)).is_err() {
                    closed.push(id);
                }
            }
        }
        self.listeners.retain(|l| !closed.contains(&l.id));
    }
}

/// An in-memory document store
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document without going through the async API
    pub fn insert(&self, collection: &str, id: &str, data: Value) {
        let collection = CollectionRef::new(collection);
        let fields = match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let mut state = self.state.lock();
        state
            .collections
            .entry(collection.path().to_string())
            .or_default()
            .insert(id.to_string(), fields);
        state.notify(collection.path());
    }

    /// Fetch a stored document
    pub fn document(&self, collection: &str, id: &str) -> Option<Map<String, Value>> {
        let collection = CollectionRef::new(collection);
        self.state
            .lock()
            .collections
            .get(collection.path())
            .and_then(|c| c.get(id))
            .cloned()
    }

    /// Number of documents stored in a collection
    pub fn document_count(&self, collection: &str) -> usize {
        let collection = CollectionRef::new(collection);
        self.state
            .lock()
            .collections
            .get(collection.path())
            .map_or(0, |c| c.len())
    }

    /// Make one-shot reads of `path` fail with `message`
    pub fn fail_reads(&self, path: &str, message: &str) {
        self.state
            .lock()
            .failing_reads
            .insert(path.trim_matches('/').to_string(), message.to_string());
    }

    /// Report `message` on every live channel reading `path` and drop them
    pub fn fail_channels(&self, path: &str, message: &str) {
        let path = path.trim_matches('/');
        let mut state = self.state.lock();
        state.listeners.retain(|listener| {
            if listener.reference.path() == path {
                let _ = listener
                    .sink
                    .send(SnapshotEvent::Error(message.to_string()));
                false
            } else {
                true
            }
        });
    }

    /// One-shot reads served so far
    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    /// Live channels opened so far
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions
    }

    /// Live channels currently open
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

struct ListenerCancel {
    state: Weak<Mutex<MemoryState>>,
    id: u64,
}

impl CancelHandle for ListenerCancel {
    fn cancel(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.lock().listeners.retain(|l| l.id != self.id);
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn read(&self, reference: &Reference, _options: ReadOptions) -> SyncResult<Snapshot> {
        let mut state = self.state.lock();
        state.reads += 1;
        if let Some(message) = state.failing_reads.get(&reference.path()) {
            return Err(SyncError::Remote(message.clone()));
        }
        trace!("Memory read of {}", reference);
        Ok(state.evaluate(reference))
    }

    fn subscribe(
        &self,
        reference: &Reference,
        _options: ReadOptions,
        sink: SnapshotSink,
    ) -> Box<dyn CancelHandle> {
        let mut state = self.state.lock();
        state.next_listener_id += 1;
        state.subscriptions += 1;
        let id = state.next_listener_id;

        // Live channels start with the current contents
        let _ = sink.send(SnapshotEvent::Snapshot(state.evaluate(reference)));
        state.listeners.push(Listener {
            id,
            reference: reference.clone(),
            sink,
        });
        debug!("Memory listener {} opened on {}", id, reference);

        Box::new(ListenerCancel {
            state: Arc::downgrade(&self.state),
            id,
        })
    }

    async fn set(
        &self,
        document: &DocumentRef,
        data: Map<String, Value>,
        merge: bool,
    ) -> SyncResult<()> {
        let mut state = self.state.lock();
        let collection = state
            .collections
            .entry(document.collection().path().to_string())
            .or_default();
        match collection.get_mut(document.id()) {
            Some(existing) if merge => existing.extend(data),
            _ => {
                collection.insert(document.id().to_string(), data);
            }
        }
        state.notify(document.collection().path());
        Ok(())
    }

    async fn update(&self, document: &DocumentRef, data: Map<String, Value>) -> SyncResult<()> {
        let mut state = self.state.lock();
        let existing = state
            .collections
            .get_mut(document.collection().path())
            .and_then(|c| c.get_mut(document.id()))
            .ok_or_else(|| SyncError::Remote(format!("No document to update: {}", document)))?;
        existing.extend(data);
        state.notify(document.collection().path());
        Ok(())
    }

    async fn delete(&self, document: &DocumentRef) -> SyncResult<()> {
        let mut state = self.state.lock();
        if let Some(collection) = state.collections.get_mut(document.collection().path()) {
            collection.remove(document.id());
        }
        state.notify(document.collection().path());
        Ok(())
    }
}

fn filter_matches(filter: &Filter, data: &Map<String, Value>) -> bool {
    let Some(field) = data.get(&filter.field) else {
        return false;
    };
    let comparable = || same_kind(field, &filter.value);
    match filter.op {
        FilterOp::Equal => field == &filter.value,
        FilterOp::NotEqual => field != &filter.value,
        FilterOp::LessThan => comparable() && compare_values(field, &filter.value) == Ordering::Less,
        FilterOp::LessThanOrEqual => {
            comparable() && compare_values(field, &filter.value) != Ordering::Greater
        }
        FilterOp::GreaterThan => {
            comparable() && compare_values(field, &filter.value) == Ordering::Greater
        }
        FilterOp::GreaterThanOrEqual => {
            comparable() && compare_values(field, &filter.value) != Ordering::Less
        }
        FilterOp::ArrayContains => field
            .as_array()
            .is_some_and(|items| items.contains(&filter.value)),
        FilterOp::In => filter
            .value
            .as_array()
            .is_some_and(|candidates| candidates.contains(field)),
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    kind_rank(a) == kind_rank(b)
}

/// Total order over JSON values: null < bool < number < string < array < object
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x.len().cmp(&y.len()),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

//! Collection-oriented engine
//!
//! A `LiveCollection` keeps a `RecordList` in sync with a remote collection
//! or query. Bindings decide where the data lives:
//!
//! - `path(params)` locates a collection from parameters
//! - `collection(params)` is the statically declared fallback
//! - `query(handle, params)` narrows the collection (pass-through by default)

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::engine::{Engine, EngineBuilder, Resolution, Source};
use crate::error::{SyncError, SyncResult};
use crate::params::Params;
use crate::reference::{CollectionRef, DocumentRef, Reference};
use crate::remote::RemoteStore;
use crate::snapshot::{Record, RecordList, Snapshot};

/// Describes the remote data a `LiveCollection` follows
#[async_trait]
pub trait CollectionBinding: Send + Sync + 'static {
    /// Collection path derived from parameters
    fn path(&self, _params: &Params) -> Option<String> {
        None
    }

    /// Statically declared collection, used when `path` yields nothing
    fn collection(&self, _params: &Params) -> Option<CollectionRef> {
        None
    }

    /// Narrow the collection into the reference to follow
    fn query(&self, handle: &CollectionRef, _params: &Params) -> Option<Reference> {
        Some(Reference::from(handle.clone()))
    }

    /// Runs before every snapshot is written to the store
    async fn before_sync(&self) -> SyncResult<()> {
        Ok(())
    }
}

/// A fixed collection
impl CollectionBinding for CollectionRef {
    fn collection(&self, _params: &Params) -> Option<CollectionRef> {
        Some(self.clone())
    }
}

/// A closure mapping parameters to a collection path
impl<F> CollectionBinding for F
where
    F: Fn(&Params) -> Option<String> + Send + Sync + 'static,
{
    fn path(&self, params: &Params) -> Option<String> {
        self(params)
    }
}

/// Normalize every existing document of a snapshot, keeping order
pub fn normalize(snapshot: &Snapshot) -> Vec<Record> {
    snapshot
        .documents
        .iter()
        .filter_map(Record::from_document)
        .collect()
}

/// `Source` adapter for collection bindings
pub struct CollectionSource<B> {
    binding: B,
}

#[async_trait]
impl<B: CollectionBinding> Source for CollectionSource<B> {
    type Store = RecordList;

    fn resolve(&self, params: &Params) -> SyncResult<Resolution> {
        let handle = match self.binding.path(params) {
            Some(path) if !path.trim_matches('/').is_empty() => Some(CollectionRef::new(path)),
            _ => self.binding.collection(params),
        };
        let Some(handle) = handle else {
            return Ok(Resolution::none());
        };

        match self.binding.query(&handle, params) {
            Some(reference) => Ok(Resolution::new(handle, reference)),
            None => Err(SyncError::MissingQuery {
                path: handle.path().to_string(),
            }),
        }
    }

    async fn before_sync(&self) -> SyncResult<()> {
        self.binding.before_sync().await
    }

    fn apply(&self, _reference: &Reference, snapshot: &Snapshot, store: &mut RecordList) {
        store.reset(normalize(snapshot));
    }
}

/// Engine keeping a `RecordList` in sync with a collection or query
pub type LiveCollection<B> = Engine<CollectionSource<B>>;

impl<B: CollectionBinding> Engine<CollectionSource<B>> {
    pub fn new(binding: B, remote: Arc<dyn RemoteStore>) -> Self {
        Self::builder(binding, remote).build()
    }

    pub fn builder(binding: B, remote: Arc<dyn RemoteStore>) -> EngineBuilder<CollectionSource<B>> {
        EngineBuilder::new(CollectionSource { binding }, remote)
    }

    pub fn binding(&self) -> &B {
        &self.source().binding
    }

    /// Copy of the local records
    pub fn records(&self) -> Vec<Record> {
        self.with_store(RecordList::to_vec)
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.with_store(|records| records.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.with_store(RecordList::len)
    }

    pub fn is_empty(&self) -> bool {
        self.with_store(RecordList::is_empty)
    }

    /// Add a document with a generated id to the unrefined collection
    pub async fn add_document(&self, data: Map<String, Value>) -> SyncResult<DocumentRef> {
        self.settle().await?;
        let handle = self.handle()?.ok_or_else(|| SyncError::MissingReference {
            operation: "add".to_string(),
        })?;

        debug!("{} Add document to {}", self.label(), handle);
        self.remote().add(&handle, data).await
    }

    /// Read the current reference once without touching the local store
    pub async fn fetch(&self) -> SyncResult<Vec<Record>> {
        self.settle().await?;
        let Some(reference) = self.reference() else {
            return Ok(Vec::new());
        };

        debug!("{} Fetch {}", self.label(), reference);
        let snapshot = self
            .remote()
            .read(&reference, self.config().read_options())
            .await?;
        self.binding().before_sync().await?;
        Ok(normalize(&snapshot))
    }
}

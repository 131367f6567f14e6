//! Record-oriented engine
//!
//! A `LiveRecord` follows a single remote document. With an `id` parameter
//! the reference is the document `root/id`; otherwise the binding must
//! narrow the root collection with `query`, and `select_item` picks the
//! document out of each snapshot.

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::{Engine, EngineBuilder, Resolution, Source};
use crate::error::{SyncError, SyncResult};
use crate::params::Params;
use crate::reference::{CollectionRef, Reference};
use crate::remote::RemoteStore;
use crate::snapshot::{Record, RecordSlot, RemoteDocument, Snapshot};

/// Describes the remote document a `LiveRecord` follows
#[async_trait]
pub trait RecordBinding: Send + Sync + 'static {
    /// Root collection path derived from parameters
    fn root_path(&self, _params: &Params) -> Option<String> {
        None
    }

    /// Statically declared root, used when `root_path` yields nothing
    fn root(&self, _params: &Params) -> Option<CollectionRef> {
        None
    }

    /// Reference to follow when no `id` parameter is set
    fn query(&self, _root: &CollectionRef, _params: &Params) -> Option<Reference> {
        None
    }

    /// Pick the document out of a query snapshot
    fn select_item<'a>(&self, snapshot: &'a Snapshot) -> Option<&'a RemoteDocument> {
        snapshot.documents.first()
    }

    /// Runs before every snapshot is written to the store
    async fn before_sync(&self) -> SyncResult<()> {
        Ok(())
    }
}

impl RecordBinding for CollectionRef {
    fn root(&self, _params: &Params) -> Option<CollectionRef> {
        Some(self.clone())
    }
}

impl<F> RecordBinding for F
where
    F: Fn(&Params) -> Option<String> + Send + Sync + 'static,
{
    fn root_path(&self, params: &Params) -> Option<String> {
        self(params)
    }
}

/// `Source` adapter for record bindings
pub struct RecordSource<B> {
    binding: B,
}

#[async_trait]
impl<B: RecordBinding> Source for RecordSource<B> {
    type Store = RecordSlot;

    fn resolve(&self, params: &Params) -> SyncResult<Resolution> {
        let root = match self.binding.root_path(params) {
            Some(path) if !path.trim_matches('/').is_empty() => Some(CollectionRef::new(path)),
            _ => self.binding.root(params),
        };
        let Some(root) = root else {
            return Ok(Resolution::none());
        };

        if let Some(id) = params.id() {
            let document = root.doc(id);
            return Ok(Resolution::new(root, document.into()));
        }

        match self.binding.query(&root, params) {
            Some(reference) => Ok(Resolution::new(root, reference)),
            None => Err(SyncError::MissingQuery {
                path: root.path().to_string(),
            }),
        }
    }

    async fn before_sync(&self) -> SyncResult<()> {
        self.binding.before_sync().await
    }

    fn apply(&self, reference: &Reference, snapshot: &Snapshot, store: &mut RecordSlot) {
        let selected = if reference.is_document() {
            snapshot.documents.first()
        } else {
            self.binding.select_item(snapshot)
        };

        if let Some(record) = selected.and_then(Record::from_document) {
            store.reset(record);
        }
    }
}

/// Engine keeping a `RecordSlot` in sync with one remote document
pub type LiveRecord<B> = Engine<RecordSource<B>>;

impl<B: RecordBinding> Engine<RecordSource<B>> {
    pub fn new(binding: B, remote: Arc<dyn RemoteStore>) -> Self {
        Self::builder(binding, remote).build()
    }

    pub fn builder(binding: B, remote: Arc<dyn RemoteStore>) -> EngineBuilder<RecordSource<B>> {
        EngineBuilder::new(RecordSource { binding }, remote)
    }

    pub fn binding(&self) -> &B {
        &self.source().binding
    }

    /// Copy of the local record, if any
    pub fn record(&self) -> Option<Record> {
        self.with_store(|slot| slot.get().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemote;
    use crate::reference::DocumentRef;
    use serde_json::json;

    fn seeded() -> Arc<MemoryRemote> {
        let remote = MemoryRemote::new();
        remote.insert("users", "ann", json!({"name": "Ann", "age": 31}));
        remote.insert("users", "bob", json!({"name": "Bob", "age": 42}));
        remote.insert("users", "cy", json!({"name": "Cy", "age": 27}));
        Arc::new(remote)
    }

    struct Oldest {
        pick_last: bool,
    }

    impl RecordBinding for Oldest {
        fn root(&self, _params: &Params) -> Option<CollectionRef> {
            Some(CollectionRef::new("users"))
        }

        fn query(&self, root: &CollectionRef, _params: &Params) -> Option<Reference> {
            Some(root.query().order_by("age", crate::reference::Direction::Desc).into())
        }

        fn select_item<'a>(&self, snapshot: &'a Snapshot) -> Option<&'a RemoteDocument> {
            if self.pick_last {
                snapshot.documents.last()
            } else {
                snapshot.documents.first()
            }
        }
    }

    type ReadParams = Box<dyn Fn() -> Params + Send + Sync>;

    /// Picks the document named by the engine's own `pick` parameter
    struct Picked {
        params: Arc<parking_lot::Mutex<Option<ReadParams>>>,
    }

    impl RecordBinding for Picked {
        fn root(&self, _params: &Params) -> Option<CollectionRef> {
            Some(CollectionRef::new("users"))
        }

        fn query(&self, root: &CollectionRef, _params: &Params) -> Option<Reference> {
            Some(root.query().into())
        }

        fn select_item<'a>(&self, snapshot: &'a Snapshot) -> Option<&'a RemoteDocument> {
            let params = self.params.lock().as_ref().map(|read| read())?;
            let pick = params.get_str("pick")?;
            snapshot.documents.iter().find(|d| d.id == pick)
        }
    }

    #[test]
    fn test_id_param_addresses_document() {
        let engine = LiveRecord::new(CollectionRef::new("users"), seeded());
        engine.set_params(json!({"id": "ann"})).unwrap();

        let expected: DocumentRef = CollectionRef::new("users").doc("ann");
        assert_eq!(engine.resolve().unwrap(), Some(Reference::from(expected)));
    }

    #[test]
    fn test_missing_query_without_id() {
        let engine = LiveRecord::new(CollectionRef::new("users"), seeded());
        assert_eq!(
            engine.resolve(),
            Err(SyncError::MissingQuery {
                path: "users".to_string()
            })
        );
    }

    #[test]
    fn test_no_root_is_no_source() {
        let engine = LiveRecord::new(|_: &Params| -> Option<String> { None }, seeded());
        assert_eq!(engine.resolve().unwrap(), None);
    }

    #[tokio::test]
    async fn test_ready_loads_document() {
        let engine = LiveRecord::new(CollectionRef::new("users"), seeded());
        engine.set_param("id", "bob");
        engine.ready().await.unwrap();

        let record = engine.record().unwrap();
        assert_eq!(record.id, "bob");
        assert_eq!(record.get("name"), Some(&json!("Bob")));
    }

    #[tokio::test]
    async fn test_missing_document_clears_slot() {
        let engine = LiveRecord::new(CollectionRef::new("users"), seeded());
        engine.set_param("id", "nobody");
        engine.ready().await.unwrap();

        assert!(engine.record().is_none());
        assert!(!engine.is_loading());
    }

    #[tokio::test]
    async fn test_select_item_default_and_override() {
        let first = LiveRecord::new(Oldest { pick_last: false }, seeded());
        first.ready().await.unwrap();
        assert_eq!(first.record().unwrap().id, "bob");

        let last = LiveRecord::new(Oldest { pick_last: true }, seeded());
        last.ready().await.unwrap();
        assert_eq!(last.record().unwrap().id, "cy");
    }

    #[tokio::test]
    async fn test_select_item_may_read_engine_params() {
        let slot = Arc::new(parking_lot::Mutex::new(None));
        let engine = LiveRecord::new(
            Picked {
                params: slot.clone(),
            },
            seeded(),
        );
        let reader = engine.clone();
        *slot.lock() = Some(Box::new(move || reader.params()) as ReadParams);

        engine.set_param("pick", "cy");
        engine.ready().await.unwrap();
        assert_eq!(engine.record().unwrap().id, "cy");
    }
}

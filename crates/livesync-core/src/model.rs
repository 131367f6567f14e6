//! Single-document CRUD
//!
//! A `DocumentModel` reads and writes one remote document. Its root
//! collection comes from an owning engine, held weakly so a model never
//! keeps its collection alive, or from an explicit `CollectionRef`.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ReadOptions;
use crate::engine::{Engine, HandleProvider, Source};
use crate::error::{SyncError, SyncResult};
use crate::reference::{CollectionRef, DocumentRef, Reference};
use crate::remote::RemoteStore;
use crate::snapshot::{Record, ID_KEY};

/// Operation performed by `DocumentModel::sync`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMethod {
    Read,
    /// Write under a freshly minted id
    Create,
    /// Write the whole document, merging into it when `merge` is set
    Update { merge: bool },
    /// Change only the given fields of an existing document
    Patch,
    Delete,
}

impl SyncMethod {
    pub fn name(&self) -> &'static str {
        match self {
            SyncMethod::Read => "read",
            SyncMethod::Create => "create",
            SyncMethod::Update { .. } => "update",
            SyncMethod::Patch => "patch",
            SyncMethod::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a sync operation is addressed
#[derive(Debug, Clone, PartialEq)]
pub enum SyncTarget {
    Document(DocumentRef),
    /// The root itself, for models without an id
    Collection(CollectionRef),
}

impl SyncTarget {
    fn document(&self, method: SyncMethod) -> SyncResult<&DocumentRef> {
        match self {
            SyncTarget::Document(doc) => Ok(doc),
            SyncTarget::Collection(collection) => Err(SyncError::UnsupportedMethod(format!(
                "{} on collection {}",
                method, collection
            ))),
        }
    }
}

/// Hook awaited before every model sync
#[async_trait]
pub trait SyncHook: Send + Sync {
    async fn before_sync(&self, method: SyncMethod) -> SyncResult<()>;
}

enum Root {
    Detached,
    Fixed(CollectionRef),
    Owner(Weak<dyn HandleProvider>),
}

/// A record that can be read from and written to the remote store
pub struct DocumentModel {
    id: Option<String>,
    attributes: Map<String, Value>,
    root: Root,
    remote: Arc<dyn RemoteStore>,
    options: ReadOptions,
    hook: Option<Arc<dyn SyncHook>>,
}

impl DocumentModel {
    /// A model with no root; every sync fails with `MissingReference`
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            id: None,
            attributes: Map::new(),
            root: Root::Detached,
            remote,
            options: ReadOptions::default(),
            hook: None,
        }
    }

    /// A model rooted at a fixed collection
    pub fn with_root(remote: Arc<dyn RemoteStore>, root: CollectionRef) -> Self {
        Self {
            root: Root::Fixed(root),
            ..Self::new(remote)
        }
    }

    /// A model rooted at the collection handle of `engine`
    pub fn owned_by<S: Source>(engine: &Engine<S>) -> Self {
        let owner: Weak<dyn HandleProvider> = engine.downgrade();
        Self {
            root: Root::Owner(owner),
            options: engine.config().read_options(),
            ..Self::new(engine.remote().clone())
        }
    }

    pub fn from_record(mut self, record: Record) -> Self {
        self.id = Some(record.id);
        self.attributes = record.fields;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn SyncHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Not yet stored remotely
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Set an attribute; `id` is reserved and ignored
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key != ID_KEY {
            self.attributes.insert(key, value.into());
        }
    }

    pub fn to_record(&self) -> Option<Record> {
        self.id
            .as_ref()
            .map(|id| Record::new(id.clone(), self.attributes.clone()))
    }

    /// The root collection, if one is resolvable
    ///
    /// An owner that has been dropped yields no root.
    pub fn root(&self) -> SyncResult<Option<CollectionRef>> {
        match &self.root {
            Root::Detached => Ok(None),
            Root::Fixed(root) => Ok(Some(root.clone())),
            Root::Owner(owner) => match owner.upgrade() {
                Some(owner) => owner.collection_handle(),
                None => Ok(None),
            },
        }
    }

    /// Where `method` would be addressed
    ///
    /// `Create` mints a new document id in the root; everything else targets
    /// `root/id`, or the root itself when the model has no id.
    pub fn reference_for(&self, method: SyncMethod) -> SyncResult<Option<SyncTarget>> {
        let Some(root) = self.root()? else {
            return Ok(None);
        };

        let target = match (method, &self.id) {
            (SyncMethod::Create, _) => {
                let id = self.remote.create_document_id(&root);
                SyncTarget::Document(root.doc(id))
            }
            (_, Some(id)) => SyncTarget::Document(root.doc(id.clone())),
            (_, None) => SyncTarget::Collection(root),
        };
        Ok(Some(target))
    }

    /// Run `method` against the remote store
    ///
    /// `attrs` replaces the model attributes as the written data. Reads
    /// replace the attributes with the remote fields and creates adopt the
    /// minted id. Returns the resulting record.
    pub async fn sync(
        &mut self,
        method: SyncMethod,
        attrs: Option<Map<String, Value>>,
    ) -> SyncResult<Record> {
        let target = self
            .reference_for(method)?
            .ok_or_else(|| SyncError::MissingReference {
                operation: method.to_string(),
            })?;

        if let Some(hook) = &self.hook {
            hook.before_sync(method).await?;
        }

        let mut data = attrs.unwrap_or_else(|| self.attributes.clone());
        data.remove(ID_KEY);
        let document = target.document(method)?;
        debug!("Model {} on {}", method, document);

        match method {
            SyncMethod::Read => {
                let reference = Reference::Document(document.clone());
                let snapshot = self.remote.read(&reference, self.options).await?;
                let fields = snapshot
                    .documents
                    .into_iter()
                    .next()
                    .and_then(|d| d.data)
                    .unwrap_or_default();
                let record = Record::new(document.id(), fields);
                self.attributes = record.fields.clone();
                return Ok(record);
            }
            SyncMethod::Create => {
                self.remote.set(document, data, false).await?;
                self.id = Some(document.id().to_string());
            }
            SyncMethod::Update { merge } => self.remote.set(document, data, merge).await?,
            SyncMethod::Patch => self.remote.update(document, data).await?,
            SyncMethod::Delete => self.remote.delete(document).await?,
        }

        Ok(Record::new(document.id(), self.attributes.clone()))
    }

    pub async fn fetch(&mut self) -> SyncResult<Record> {
        self.sync(SyncMethod::Read, None).await
    }

    /// Create when new, otherwise overwrite
    pub async fn save(&mut self) -> SyncResult<Record> {
        let method = if self.is_new() {
            SyncMethod::Create
        } else {
            SyncMethod::Update { merge: false }
        };
        self.sync(method, None).await
    }

    pub async fn destroy(&mut self) -> SyncResult<()> {
        self.sync(SyncMethod::Delete, None).await.map(|_| ())
    }
}

impl fmt::Debug for DocumentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentModel")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .finish()
    }
}

//! Remote store client contract
//!
//! The engine never talks to a database directly. It consumes a
//! `RemoteStore` that can read a reference once, open a live channel on it,
//! and compare two references. Document writes are part of the same client
//! and are used by record CRUD.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::config::ReadOptions;
use crate::error::SyncResult;
use crate::reference::{CollectionRef, DocumentRef, Reference};
use crate::snapshot::Snapshot;

/// Events pushed by the remote client into an open live channel
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    /// A fresh snapshot of the observed reference
    Snapshot(Snapshot),
    /// The channel failed and will deliver nothing further
    Error(String),
}

/// Sending half of a live channel, handed to `RemoteStore::subscribe`
pub type SnapshotSink = mpsc::UnboundedSender<SnapshotEvent>;

/// Cancels a live channel
///
/// Cancelling twice must be harmless.
pub trait CancelHandle: Send {
    fn cancel(&mut self);
}

impl<F> CancelHandle for F
where
    F: FnMut() + Send,
{
    fn cancel(&mut self) {
        self()
    }
}

/// Client for a query-addressable document store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read a reference once
    async fn read(&self, reference: &Reference, options: ReadOptions) -> SyncResult<Snapshot>;

    /// Open a live channel that pushes snapshots of `reference` into `sink`
    fn subscribe(
        &self,
        reference: &Reference,
        options: ReadOptions,
        sink: SnapshotSink,
    ) -> Box<dyn CancelHandle>;

    /// Semantic equality of two references
    fn references_equal(&self, a: &Reference, b: &Reference) -> bool {
        a == b
    }

    /// Mint an identifier for a document about to be created
    fn create_document_id(&self, _collection: &CollectionRef) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Write a whole document, or merge into it when `merge` is set
    async fn set(
        &self,
        document: &DocumentRef,
        data: Map<String, Value>,
        merge: bool,
    ) -> SyncResult<()>;

    /// Patch fields of an existing document
    async fn update(&self, document: &DocumentRef, data: Map<String, Value>) -> SyncResult<()>;

    /// Delete a document
    async fn delete(&self, document: &DocumentRef) -> SyncResult<()>;

    /// Add a document with a generated id
    async fn add(
        &self,
        collection: &CollectionRef,
        data: Map<String, Value>,
    ) -> SyncResult<DocumentRef> {
        let document = collection.doc(self.create_document_id(collection));
        self.set(&document, data, false).await?;
        Ok(document)
    }
}

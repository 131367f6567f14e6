//! LiveSync Core Library
//!
//! This crate keeps local record stores in sync with a remote,
//! query-addressable document store. An engine derives a reference from a
//! mutable parameter set, follows it with a live channel or a one-shot read,
//! and normalizes every snapshot into its local store.
//!
//! # Architecture
//!
//! - **Engine**: the shared state machine (batching, change gate,
//!   subscription management, readiness)
//! - **RemoteStore**: the document store client, injected at construction
//!
//! # Quick Start
//!
//! ```text
//! let remote = Arc::new(MemoryRemote::new());
//! let books = LiveCollection::new(|p: &Params| p.get_str("shelf").map(String::from), remote);
//!
//! books.set_param("shelf", "books");
//! books.ready().await?;
//! let records = books.records();
//! ```
//!
//! # Modules
//!
//! - `engine`: Generic live-reference engine and scheduling
//! - `collection`: Collection-oriented engine (`LiveCollection`)
//! - `record`: Single-document engine (`LiveRecord`)
//! - `model`: Document CRUD bound to a collection
//! - `remote`: Remote store contract
//! - `memory`: In-process remote store
//! - `config`: Engine configuration

pub mod collection;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod memory;
pub mod model;
pub mod params;
pub mod record;
pub mod reference;
pub mod remote;
pub mod snapshot;

pub use collection::{CollectionBinding, LiveCollection};
pub use config::{EngineConfig, ReadOptions, ServerTimestamps};
pub use engine::{Engine, EngineBuilder, Resolution, Scheduler, Source, SourceId, TokioScheduler};
pub use error::{SyncError, SyncResult};
pub use events::SyncEvent;
pub use memory::MemoryRemote;
pub use model::{DocumentModel, SyncHook, SyncMethod, SyncTarget};
pub use params::Params;
pub use record::{LiveRecord, RecordBinding};
pub use reference::{CollectionRef, Direction, DocumentRef, FilterOp, Query, Reference};
pub use remote::{CancelHandle, RemoteStore, SnapshotEvent, SnapshotSink};
pub use snapshot::{Record, RecordList, RecordSlot, RemoteDocument, Snapshot};

//! Snapshots and normalized records
//!
//! A `Snapshot` is what the remote client hands over from a read or a live
//! channel. Normalization turns its documents into plain `Record`s which
//! the local stores (`RecordList`, `RecordSlot`) hold.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved key carrying the source-assigned identifier
pub const ID_KEY: &str = "id";

/// A document as delivered by the remote client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Source-assigned identifier
    pub id: String,
    /// Document fields; `None` when the document does not exist
    pub data: Option<Map<String, Value>>,
}

impl RemoteDocument {
    /// An existing document
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data: Some(data),
        }
    }

    /// A missing or deleted document
    pub fn missing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }
}

/// A point-in-time read of one or more remote documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub documents: Vec<RemoteDocument>,
}

impl Snapshot {
    pub fn new(documents: Vec<RemoteDocument>) -> Self {
        Self { documents }
    }

    /// A snapshot holding a single document
    pub fn single(document: RemoteDocument) -> Self {
        Self {
            documents: vec![document],
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// A normalized plain record: the source id plus the document fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        let mut fields = fields;
        fields.remove(ID_KEY);
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Normalize an existing remote document
    ///
    /// The source-assigned id wins over any `id` field stored in the data.
    /// Returns `None` for missing documents.
    pub fn from_document(document: &RemoteDocument) -> Option<Self> {
        let data = document.data.as_ref()?;
        Some(Self::new(document.id.clone(), data.clone()))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        if field == ID_KEY {
            return None;
        }
        self.fields.get(field)
    }

    /// Flatten into a single JSON object with the reserved `id` key
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(ID_KEY.to_string(), Value::String(self.id.clone()));
        Value::Object(map)
    }
}

/// Local ordered collection of records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordList {
    records: Vec<Record>,
}

impl RecordList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with exactly this sequence
    pub fn reset(&mut self, records: Vec<Record>) {
        self.records = records;
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Look up a record by id
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id.clone()).collect()
    }

    pub fn to_vec(&self) -> Vec<Record> {
        self.records.clone()
    }
}

/// Local single-record slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSlot {
    record: Option<Record>,
}

impl RecordSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole record (no field-level merge with prior contents)
    pub fn reset(&mut self, record: Record) {
        self.record = Some(record);
    }

    pub fn clear(&mut self) {
        self.record = None;
    }

    pub fn get(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_none()
    }
}

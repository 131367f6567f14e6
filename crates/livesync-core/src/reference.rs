//! Remote references
//!
//! Descriptors of "what remote data to read". A reference is built fresh
//! from parameters on every recomputation and never mutated afterwards.
//!
//! - `CollectionRef`: an addressable collection path
//! - `DocumentRef`: a single document inside a collection
//! - `Query`: a collection narrowed by filters, ordering and a limit
//! - `Reference`: what the engine adopts, either a query or a document

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An addressable collection path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    path: String,
}

impl CollectionRef {
    /// Create a collection reference, trimming surrounding slashes
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            path: path.trim_matches('/').to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The last path segment
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Reference a document inside this collection
    pub fn doc(&self, id: impl Into<String>) -> DocumentRef {
        DocumentRef {
            collection: self.clone(),
            id: id.into(),
        }
    }

    /// An unconstrained query over this collection
    pub fn query(&self) -> Query {
        Query::new(self.clone())
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// A single document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    collection: CollectionRef,
    id: String,
}

impl DocumentRef {
    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Full path, `collection/id`
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection.path, self.id)
    }

    /// A subcollection nested under this document
    pub fn subcollection(&self, name: &str) -> CollectionRef {
        CollectionRef::new(format!("{}/{}", self.path(), name))
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection.path, self.id)
    }
}

/// Comparison operators for query filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    ArrayContains,
    In,
}

/// A single field predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

/// Ordering clause
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A collection narrowed by filters, ordering and a limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    collection: CollectionRef,
    filters: Vec<Filter>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
}

impl Query {
    pub fn new(collection: CollectionRef) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Add a filter
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Shorthand for an equality filter
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Equal, value)
    }

    /// Add an ordering clause
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Limit the number of results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn collection(&self) -> &CollectionRef {
        &self.collection
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// True when the query reads the whole collection unchanged
    pub fn is_unconstrained(&self) -> bool {
        self.filters.is_empty() && self.order_by.is_empty() && self.limit.is_none()
    }
}

/// What the engine reads and observes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reference {
    Query(Query),
    Document(DocumentRef),
}

impl Reference {
    /// Path of the underlying collection or document
    pub fn path(&self) -> String {
        match self {
            Reference::Query(query) => query.collection.path.clone(),
            Reference::Document(doc) => doc.path(),
        }
    }

    pub fn is_document(&self) -> bool {
        matches!(self, Reference::Document(_))
    }

    /// The collection this reference reads from
    pub fn collection(&self) -> &CollectionRef {
        match self {
            Reference::Query(query) => &query.collection,
            Reference::Document(doc) => &doc.collection,
        }
    }
}

impl From<CollectionRef> for Reference {
    fn from(collection: CollectionRef) -> Self {
        Reference::Query(Query::new(collection))
    }
}

impl From<Query> for Reference {
    fn from(query: Query) -> Self {
        Reference::Query(query)
    }
}

impl From<DocumentRef> for Reference {
    fn from(doc: DocumentRef) -> Self {
        Reference::Document(doc)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Query(query) if query.is_unconstrained() => {
                write!(f, "{}", query.collection)
            }
            Reference::Query(query) => write!(
                f,
                "{} ({} filters, {} orderings)",
                query.collection,
                query.filters.len(),
                query.order_by.len()
            ),
            Reference::Document(doc) => write!(f, "{}", doc),
        }
    }
}

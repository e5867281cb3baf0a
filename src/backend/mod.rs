//! Boundary with the underlying document store.
//!
//! Everything above this module talks to the managed service through
//! [`DocumentBackend`]; the store's consistency model, query planner and
//! replication stay on the other side of this trait. [`memory::MemoryBackend`]
//! is the in-process reference implementation used by the test suite and the
//! emulator connector.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::core::{Document, Fields, Result, Value};

/// Per-commit write limit of the underlying store.
pub const MAX_BATCH_SIZE: usize = 500;

/// Write-side value: either a concrete value or one of the store's
/// sentinel markers.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    Value(Value),
    /// Server-assigned timestamp, resolved at commit time.
    ServerTimestamp,
    /// Removes the addressed field.
    Delete,
    /// Numeric increment applied server-side.
    Increment(i64),
    /// Adds elements not already present.
    ArrayUnion(Vec<Value>),
    /// Removes all matching elements.
    ArrayRemove(Vec<Value>),
}

impl From<Value> for FieldWrite {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Write payload. Keys may be dotted field paths when used with `update`.
pub type WriteFields = BTreeMap<String, FieldWrite>;

/// Lift a plain payload into a write payload.
pub fn write_fields(fields: Fields) -> WriteFields {
    fields
        .into_iter()
        .map(|(k, v)| (k, FieldWrite::Value(v)))
        .collect()
}

/// One operation inside a write batch.
#[derive(Debug, Clone)]
pub enum BatchWrite {
    Set {
        collection: String,
        id: String,
        fields: WriteFields,
        merge: bool,
    },
    Update {
        collection: String,
        id: String,
        fields: WriteFields,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl BatchWrite {
    pub fn document_id(&self) -> &str {
        match self {
            Self::Set { id, .. } | Self::Update { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}

// ============================================================================
// Query model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    ArrayContains,
    ArrayContainsAny,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }
}

/// Cursor pagination relative to the query's order-by values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorBound {
    StartAt,
    StartAfter,
    EndAt,
    EndBefore,
}

#[derive(Debug, Clone)]
pub struct Cursor {
    pub bound: CursorBound,
    pub values: Vec<Value>,
}

/// A query as handed to the store: translated almost verbatim into the
/// underlying client's builder calls.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub cursor: Option<Cursor>,
}

impl QuerySpec {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            cursor: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn order(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

// ============================================================================
// Backend traits
// ============================================================================

/// The document-store primitives this crate delegates to.
#[async_trait]
pub trait DocumentBackend: std::fmt::Debug + Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Create a document with a store-assigned ID; returns the ID.
    async fn add(&self, collection: &str, fields: WriteFields) -> Result<String>;

    /// Write a document at an explicit ID. With `merge`, existing fields not
    /// named in the payload survive; without it the document is replaced.
    async fn set(&self, collection: &str, id: &str, fields: WriteFields, merge: bool)
    -> Result<()>;

    /// Partial update addressed by (possibly dotted) field paths. Fails with
    /// not-found if the document does not exist.
    async fn update(&self, collection: &str, id: &str, fields: WriteFields) -> Result<()>;

    /// Deleting a missing document is a no-op, matching the store.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    async fn run_query(&self, spec: &QuerySpec) -> Result<Vec<Document>>;

    /// Server-side count of the documents a query matches.
    async fn count(&self, spec: &QuerySpec) -> Result<u64>;

    /// Commit up to [`MAX_BATCH_SIZE`] writes as one atomic unit.
    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> Result<()>;

    /// Open a read-then-conditionally-write transaction. Commit fails with
    /// ABORTED when a read document changed underneath it.
    async fn begin_transaction(&self) -> Result<Box<dyn BackendTransaction>>;
}

/// A single optimistic transaction: reads record versions, writes are
/// buffered until [`commit`](BackendTransaction::commit).
#[async_trait]
pub trait BackendTransaction: Send {
    async fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>>;

    fn set(&mut self, collection: &str, id: &str, fields: WriteFields);

    fn update(&mut self, collection: &str, id: &str, fields: WriteFields);

    fn delete(&mut self, collection: &str, id: &str);

    async fn commit(self: Box<Self>) -> Result<()>;
}

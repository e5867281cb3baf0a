//! In-memory reference backend.
//!
//! Implements the full [`DocumentBackend`] contract against process-local
//! state: versioned documents for optimistic transaction commits, dotted-path
//! updates, sentinel resolution and query evaluation. The test suite and the
//! emulator connector run against this backend.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    BackendTransaction, BatchWrite, CursorBound, Direction, DocumentBackend, FieldWrite, Filter,
    FilterOp, MAX_BATCH_SIZE, QuerySpec, WriteFields,
};
use crate::core::value::{get_path, remove_path, set_path};
use crate::core::{DbError, Document, ErrorCode, Fields, Result, Value};

#[derive(Debug, Clone)]
struct StoredDocument {
    fields: Fields,
    /// Bumped on every write; transactions validate against it at commit.
    version: u64,
}

type Store = HashMap<String, BTreeMap<String, StoredDocument>>;

/// Process-local document store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Store>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Write application
// ============================================================================

fn apply_field_write(fields: &mut Fields, path: &str, write: FieldWrite, now: DateTime<Utc>) {
    match write {
        FieldWrite::Value(v) => set_path(fields, path, v),
        FieldWrite::ServerTimestamp => set_path(fields, path, Value::Timestamp(now)),
        FieldWrite::Delete => {
            remove_path(fields, path);
        }
        FieldWrite::Increment(delta) => {
            let next = match get_path(fields, path) {
                Some(Value::Integer(i)) => Value::Integer(i + delta),
                Some(Value::Float(f)) => Value::Float(f + delta as f64),
                _ => Value::Integer(delta),
            };
            set_path(fields, path, next);
        }
        FieldWrite::ArrayUnion(items) => {
            let mut current = match get_path(fields, path) {
                Some(Value::Array(existing)) => existing.clone(),
                _ => Vec::new(),
            };
            for item in items {
                if !current.contains(&item) {
                    current.push(item);
                }
            }
            set_path(fields, path, Value::Array(current));
        }
        FieldWrite::ArrayRemove(items) => {
            let current = match get_path(fields, path) {
                Some(Value::Array(existing)) => existing.clone(),
                _ => Vec::new(),
            };
            let filtered: Vec<Value> =
                current.into_iter().filter(|v| !items.contains(v)).collect();
            set_path(fields, path, Value::Array(filtered));
        }
    }
}

fn apply_writes(fields: &mut Fields, writes: WriteFields, now: DateTime<Utc>) {
    for (path, write) in writes {
        apply_field_write(fields, &path, write, now);
    }
}

/// Apply one batch entry against the store. The caller holds the write lock.
fn apply_batch_write(store: &mut Store, write: BatchWrite, now: DateTime<Utc>) -> Result<()> {
    match write {
        BatchWrite::Set {
            collection,
            id,
            fields,
            merge,
        } => {
            let docs = store.entry(collection).or_default();
            let entry = docs.entry(id).or_insert_with(|| StoredDocument {
                fields: Fields::new(),
                version: 0,
            });
            if !merge {
                entry.fields = Fields::new();
            }
            apply_writes(&mut entry.fields, fields, now);
            entry.version += 1;
            Ok(())
        }
        BatchWrite::Update {
            collection,
            id,
            fields,
        } => {
            let doc = store
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(&id))
                .ok_or_else(|| DbError::not_found(&collection, &id))?;
            apply_writes(&mut doc.fields, fields, now);
            doc.version += 1;
            Ok(())
        }
        BatchWrite::Delete { collection, id } => {
            if let Some(docs) = store.get_mut(&collection) {
                docs.remove(&id);
            }
            Ok(())
        }
    }
}

// ============================================================================
// Query evaluation
// ============================================================================

fn filter_matches(fields: &Fields, filter: &Filter) -> bool {
    let current = get_path(fields, &filter.field);

    match filter.op {
        FilterOp::Eq => current == Some(&filter.value),
        // Documents missing the field never match, even for negated operators.
        FilterOp::Ne => match current {
            Some(v) => v != &filter.value,
            None => false,
        },
        FilterOp::Lt | FilterOp::Lte | FilterOp::Gt | FilterOp::Gte => match current {
            Some(v) => match v.compare(&filter.value) {
                Ok(ord) => match filter.op {
                    FilterOp::Lt => ord == Ordering::Less,
                    FilterOp::Lte => ord != Ordering::Greater,
                    FilterOp::Gt => ord == Ordering::Greater,
                    FilterOp::Gte => ord != Ordering::Less,
                    _ => unreachable!(),
                },
                // Cross-type comparisons simply do not match.
                Err(_) => false,
            },
            None => false,
        },
        FilterOp::In => match (&filter.value, current) {
            (Value::Array(candidates), Some(v)) => candidates.contains(v),
            _ => false,
        },
        FilterOp::NotIn => match (&filter.value, current) {
            (Value::Array(candidates), Some(v)) => !candidates.contains(v),
            _ => false,
        },
        FilterOp::ArrayContains => match current {
            Some(Value::Array(items)) => items.contains(&filter.value),
            _ => false,
        },
        FilterOp::ArrayContainsAny => match (current, &filter.value) {
            (Some(Value::Array(items)), Value::Array(candidates)) => {
                candidates.iter().any(|c| items.contains(c))
            }
            _ => false,
        },
    }
}

fn order_key(doc: &Document, order_by: &[super::OrderBy]) -> Vec<Value> {
    order_by
        .iter()
        .map(|o| get_path(&doc.fields, &o.field).cloned().unwrap_or(Value::Null))
        .collect()
}

fn compare_keys(a: &[Value], b: &[Value], order_by: &[super::OrderBy]) -> Ordering {
    for (i, order) in order_by.iter().enumerate() {
        let (Some(va), Some(vb)) = (a.get(i), b.get(i)) else {
            break;
        };
        let ord = va.compare(vb).unwrap_or(Ordering::Equal);
        let ord = match order.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn evaluate_query(store: &Store, spec: &QuerySpec) -> Result<Vec<Document>> {
    if spec.cursor.is_some() && spec.order_by.is_empty() {
        return Err(DbError::Query(
            "Cursor pagination requires at least one order-by field".into(),
        ));
    }

    let mut results: Vec<Document> = store
        .get(&spec.collection)
        .map(|docs| {
            docs.iter()
                .filter(|(_, stored)| {
                    spec.filters.iter().all(|f| filter_matches(&stored.fields, f))
                })
                .map(|(id, stored)| Document::new(id.clone(), stored.fields.clone()))
                .collect()
        })
        .unwrap_or_default();

    if !spec.order_by.is_empty() {
        results.sort_by(|a, b| {
            compare_keys(
                &order_key(a, &spec.order_by),
                &order_key(b, &spec.order_by),
                &spec.order_by,
            )
            // Document ID is the implicit final ordering component.
            .then_with(|| a.id.cmp(&b.id))
        });
    }

    if let Some(cursor) = &spec.cursor {
        results.retain(|doc| {
            let key = order_key(doc, &spec.order_by);
            let ord = compare_keys(&key, &cursor.values, &spec.order_by);
            match cursor.bound {
                CursorBound::StartAt => ord != Ordering::Less,
                CursorBound::StartAfter => ord == Ordering::Greater,
                CursorBound::EndAt => ord != Ordering::Greater,
                CursorBound::EndBefore => ord == Ordering::Less,
            }
        });
    }

    if let Some(offset) = spec.offset {
        results = results.into_iter().skip(offset).collect();
    }

    if let Some(limit) = spec.limit {
        results.truncate(limit);
    }

    Ok(results)
}

// ============================================================================
// DocumentBackend implementation
// ============================================================================

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let store = self.inner.read().await;
        Ok(store
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|stored| Document::new(id, stored.fields.clone())))
    }

    async fn add(&self, collection: &str, fields: WriteFields) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.set(collection, &id, fields, false).await?;
        Ok(id)
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: WriteFields,
        merge: bool,
    ) -> Result<()> {
        let mut store = self.inner.write().await;
        apply_batch_write(
            &mut store,
            BatchWrite::Set {
                collection: collection.to_string(),
                id: id.to_string(),
                fields,
                merge,
            },
            Utc::now(),
        )
    }

    async fn update(&self, collection: &str, id: &str, fields: WriteFields) -> Result<()> {
        let mut store = self.inner.write().await;
        apply_batch_write(
            &mut store,
            BatchWrite::Update {
                collection: collection.to_string(),
                id: id.to_string(),
                fields,
            },
            Utc::now(),
        )
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut store = self.inner.write().await;
        if let Some(docs) = store.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn run_query(&self, spec: &QuerySpec) -> Result<Vec<Document>> {
        let store = self.inner.read().await;
        evaluate_query(&store, spec)
    }

    async fn count(&self, spec: &QuerySpec) -> Result<u64> {
        let store = self.inner.read().await;
        Ok(evaluate_query(&store, spec)?.len() as u64)
    }

    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> Result<()> {
        if writes.len() > MAX_BATCH_SIZE {
            return Err(DbError::backend(
                ErrorCode::InvalidArgument,
                format!(
                    "Batch of {} writes exceeds the {}-write commit limit",
                    writes.len(),
                    MAX_BATCH_SIZE
                ),
            ));
        }

        let mut store = self.inner.write().await;

        // The commit is atomic: validate every update target first, then
        // apply. A single missing target fails the whole commit.
        for write in &writes {
            if let BatchWrite::Update { collection, id, .. } = write {
                let exists = store
                    .get(collection)
                    .map(|docs| docs.contains_key(id))
                    .unwrap_or(false);
                if !exists {
                    return Err(DbError::not_found(collection, id));
                }
            }
        }

        let now = Utc::now();
        for write in writes {
            apply_batch_write(&mut store, write, now)?;
        }
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn BackendTransaction>> {
        Ok(Box::new(MemoryTransaction {
            store: Arc::clone(&self.inner),
            reads: Vec::new(),
            writes: Vec::new(),
        }))
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// Optimistic transaction: reads record the observed version, writes are
/// buffered; commit re-validates every read and aborts on interference.
struct MemoryTransaction {
    store: Arc<RwLock<Store>>,
    reads: Vec<(String, String, Option<u64>)>,
    writes: Vec<BatchWrite>,
}

#[async_trait]
impl BackendTransaction for MemoryTransaction {
    async fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>> {
        let store = self.store.read().await;
        let stored = store.get(collection).and_then(|docs| docs.get(id));
        self.reads.push((
            collection.to_string(),
            id.to_string(),
            stored.map(|s| s.version),
        ));
        Ok(stored.map(|s| Document::new(id, s.fields.clone())))
    }

    fn set(&mut self, collection: &str, id: &str, fields: WriteFields) {
        self.writes.push(BatchWrite::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
            merge: false,
        });
    }

    fn update(&mut self, collection: &str, id: &str, fields: WriteFields) {
        self.writes.push(BatchWrite::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        });
    }

    fn delete(&mut self, collection: &str, id: &str) {
        self.writes.push(BatchWrite::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut store = self.store.write().await;

        for (collection, id, observed) in &self.reads {
            let current = store
                .get(collection)
                .and_then(|docs| docs.get(id))
                .map(|s| s.version);
            if current != *observed {
                return Err(DbError::backend(
                    ErrorCode::Aborted,
                    format!(
                        "Transaction conflict on '{}/{}': document changed during transaction",
                        collection, id
                    ),
                ));
            }
        }

        let now = Utc::now();
        for write in self.writes {
            apply_batch_write(&mut store, write, now)?;
        }
        Ok(())
    }
}

/// Connector producing process-local backends: the emulator path and the
/// test suite's default.
pub struct MemoryConnector;

#[async_trait]
impl crate::connection::Connector for MemoryConnector {
    async fn connect(
        &self,
        _credentials: &crate::connection::ResolvedCredentials,
    ) -> Result<Arc<dyn DocumentBackend>> {
        Ok(Arc::new(MemoryBackend::new()))
    }
}

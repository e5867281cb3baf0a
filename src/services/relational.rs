use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::backend::{
    BatchWrite, Direction, FieldWrite, Filter, FilterOp, MAX_BATCH_SIZE, OrderBy, QuerySpec,
    WriteFields,
};
use crate::connection::ConnectionManager;
use crate::core::sanitize::sanitize_payload;
use crate::core::types::{CREATED_AT_FIELD, DATA_FIELD, REFS_FIELD, UPDATED_AT_FIELD};
use crate::core::{
    DbError, Fields, RelationalDocument, Result, Value, validate_collection, validate_document_id,
};
use crate::retry::RetryPolicy;

/// What a toggle ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Created(String),
    Deleted(String),
}

/// Result of a find-or-create lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindOrCreateOutcome {
    pub id: String,
    pub created: bool,
}

/// CRUD over the `{data, refs}` relational-document convention.
///
/// Relations are references by string ID, never embedded sub-documents, so
/// one logical entity owns exactly one document and nothing is duplicated.
pub struct RelationalService {
    manager: Arc<ConnectionManager>,
    retry: RetryPolicy,
}

impl RelationalService {
    pub fn new(manager: Arc<ConnectionManager>, retry: RetryPolicy) -> Self {
        Self { manager, retry }
    }

    /// Create a relational document. `createdAt` and `updatedAt` are
    /// server-assigned.
    pub async fn create_relational(
        &self,
        collection: &str,
        data: Fields,
        refs: BTreeMap<String, String>,
    ) -> Result<String> {
        validate_collection(collection)?;
        sanitize_payload(&data)?;
        validate_refs(&refs)?;

        let fields = new_relational_fields(data, refs);
        self.retry
            .run("create_relational", || {
                let fields = fields.clone();
                async move {
                    let backend = self.manager.handle().await?;
                    backend.add(collection, fields).await
                }
            })
            .await
    }

    pub async fn read_relational(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<RelationalDocument>> {
        validate_collection(collection)?;
        validate_document_id(id)?;

        let doc = self
            .retry
            .run("read_relational", || async move {
                let backend = self.manager.handle().await?;
                backend.get(collection, id).await
            })
            .await?;

        doc.map(RelationalDocument::from_document).transpose()
    }

    /// Read with `data` and `refs` merged into one flat map plus the ID.
    pub async fn read_flattened(&self, collection: &str, id: &str) -> Result<Option<Fields>> {
        Ok(self
            .read_relational(collection, id)
            .await?
            .map(|doc| doc.flattened()))
    }

    /// Update individual `data` fields by dotted path; sibling data fields
    /// and the whole `refs` map are untouched.
    pub async fn update_data(&self, collection: &str, id: &str, changes: Fields) -> Result<()> {
        validate_collection(collection)?;
        validate_document_id(id)?;
        sanitize_payload(&changes)?;

        let mut writes = WriteFields::new();
        for (key, value) in changes {
            writes.insert(format!("{}.{}", DATA_FIELD, key), FieldWrite::Value(value));
        }
        self.update_relational_paths(collection, id, writes, "update_data")
            .await
    }

    /// Update individual `refs` entries by dotted path; sibling refs and the
    /// whole `data` map are untouched.
    pub async fn update_refs(
        &self,
        collection: &str,
        id: &str,
        changes: BTreeMap<String, String>,
    ) -> Result<()> {
        validate_collection(collection)?;
        validate_document_id(id)?;
        validate_refs(&changes)?;

        let mut writes = WriteFields::new();
        for (key, value) in changes {
            writes.insert(
                format!("{}.{}", REFS_FIELD, key),
                FieldWrite::Value(Value::Text(value)),
            );
        }
        self.update_relational_paths(collection, id, writes, "update_refs")
            .await
    }

    /// Combined data + refs update in one write.
    pub async fn update_relational(
        &self,
        collection: &str,
        id: &str,
        data_changes: Fields,
        ref_changes: BTreeMap<String, String>,
    ) -> Result<()> {
        validate_collection(collection)?;
        validate_document_id(id)?;
        sanitize_payload(&data_changes)?;
        validate_refs(&ref_changes)?;

        let mut writes = WriteFields::new();
        for (key, value) in data_changes {
            writes.insert(format!("{}.{}", DATA_FIELD, key), FieldWrite::Value(value));
        }
        for (key, value) in ref_changes {
            writes.insert(
                format!("{}.{}", REFS_FIELD, key),
                FieldWrite::Value(Value::Text(value)),
            );
        }
        self.update_relational_paths(collection, id, writes, "update_relational")
            .await
    }

    /// All documents pointing at `ref_value` through `ref_key`.
    pub async fn query_by_ref(
        &self,
        collection: &str,
        ref_key: &str,
        ref_value: &str,
    ) -> Result<Vec<RelationalDocument>> {
        self.query_by_ref_spec(collection, ref_key, ref_value, None, None)
            .await
    }

    pub async fn query_by_ref_limited(
        &self,
        collection: &str,
        ref_key: &str,
        ref_value: &str,
        limit: usize,
    ) -> Result<Vec<RelationalDocument>> {
        self.query_by_ref_spec(collection, ref_key, ref_value, Some(limit), None)
            .await
    }

    /// Same lookup, ordered by a `data` field.
    pub async fn query_by_ref_ordered(
        &self,
        collection: &str,
        ref_key: &str,
        ref_value: &str,
        order_field: &str,
        direction: Direction,
    ) -> Result<Vec<RelationalDocument>> {
        let order = OrderBy {
            field: format!("{}.{}", DATA_FIELD, order_field),
            direction,
        };
        self.query_by_ref_spec(collection, ref_key, ref_value, None, Some(order))
            .await
    }

    /// Documents matching every given ref.
    pub async fn query_by_refs(
        &self,
        collection: &str,
        refs: &BTreeMap<String, String>,
    ) -> Result<Vec<RelationalDocument>> {
        validate_collection(collection)?;
        if refs.is_empty() {
            return Err(DbError::Validation(
                "query_by_refs requires at least one ref".into(),
            ));
        }

        let spec = refs_query(collection, refs);
        let docs = self.run_query(spec, "query_by_refs").await?;
        docs.into_iter()
            .map(RelationalDocument::from_document)
            .collect()
    }

    /// Toggle the document identified by an exact ref set: delete it when
    /// present, create it (with empty data) when absent.
    ///
    /// The lookup and the write are separate operations; concurrent togglers
    /// can interleave. See the transaction service for conflict-safe writes.
    pub async fn toggle_relation(
        &self,
        collection: &str,
        refs: BTreeMap<String, String>,
    ) -> Result<ToggleOutcome> {
        validate_collection(collection)?;
        validate_refs(&refs)?;
        if refs.is_empty() {
            return Err(DbError::Validation(
                "toggle_relation requires at least one ref".into(),
            ));
        }

        match self.find_exact_refs(collection, &refs).await? {
            Some(existing) => {
                self.retry
                    .run("toggle_relation.delete", || {
                        let id = existing.id.clone();
                        async move {
                            let backend = self.manager.handle().await?;
                            backend.delete(collection, &id).await
                        }
                    })
                    .await?;
                debug!(collection, id = %existing.id, "Toggled relation off");
                Ok(ToggleOutcome::Deleted(existing.id))
            }
            None => {
                let id = self
                    .create_relational(collection, Fields::new(), refs)
                    .await?;
                debug!(collection, id = %id, "Toggled relation on");
                Ok(ToggleOutcome::Created(id))
            }
        }
    }

    /// Find the document matching every given ref, or create one.
    ///
    /// Lookup-then-create: two concurrent callers can both observe "not
    /// found" and both create.
    pub async fn find_or_create_with_refs(
        &self,
        collection: &str,
        data: Fields,
        refs: BTreeMap<String, String>,
    ) -> Result<FindOrCreateOutcome> {
        validate_collection(collection)?;
        sanitize_payload(&data)?;
        validate_refs(&refs)?;

        if let Some(existing) = self.find_exact_refs(collection, &refs).await? {
            return Ok(FindOrCreateOutcome {
                id: existing.id,
                created: false,
            });
        }

        let id = self.create_relational(collection, data, refs).await?;
        Ok(FindOrCreateOutcome { id, created: true })
    }

    /// Update the document matching the ref set, or create it. Same race
    /// window as `find_or_create_with_refs`.
    pub async fn upsert_with_refs(
        &self,
        collection: &str,
        data: Fields,
        refs: BTreeMap<String, String>,
    ) -> Result<FindOrCreateOutcome> {
        validate_collection(collection)?;
        sanitize_payload(&data)?;
        validate_refs(&refs)?;

        if let Some(existing) = self.find_exact_refs(collection, &refs).await? {
            self.update_data(collection, &existing.id, data).await?;
            return Ok(FindOrCreateOutcome {
                id: existing.id,
                created: false,
            });
        }

        let id = self.create_relational(collection, data, refs).await?;
        Ok(FindOrCreateOutcome { id, created: true })
    }

    /// Delete every document pointing at `ref_value` through `ref_key`,
    /// page by page. Returns the number of deleted documents.
    pub async fn cascade_delete_relational(
        &self,
        collection: &str,
        ref_key: &str,
        ref_value: &str,
    ) -> Result<usize> {
        validate_collection(collection)?;

        let mut deleted = 0usize;
        loop {
            let spec = QuerySpec::collection(collection)
                .filter(Filter::new(
                    format!("{}.{}", REFS_FIELD, ref_key),
                    FilterOp::Eq,
                    Value::Text(ref_value.to_string()),
                ))
                .limit(MAX_BATCH_SIZE);
            let page = self.run_query(spec, "cascade_delete.page").await?;
            if page.is_empty() {
                break;
            }
            let short_page = page.len() < MAX_BATCH_SIZE;

            let writes: Vec<BatchWrite> = page
                .iter()
                .map(|doc| BatchWrite::Delete {
                    collection: collection.to_string(),
                    id: doc.id.clone(),
                })
                .collect();
            self.retry
                .run("cascade_delete.commit", || {
                    let writes = writes.clone();
                    async move {
                        let backend = self.manager.handle().await?;
                        backend.commit_batch(writes).await
                    }
                })
                .await?;
            deleted += page.len();

            if short_page {
                break;
            }
        }

        debug!(collection, ref_key, ref_value, deleted, "Cascade delete finished");
        Ok(deleted)
    }

    /// Create many relational documents in write-batch-sized chunks.
    /// Chunk commits are strictly sequential.
    pub async fn batch_create_relational(
        &self,
        collection: &str,
        items: Vec<(Fields, BTreeMap<String, String>)>,
    ) -> Result<Vec<String>> {
        validate_collection(collection)?;

        let mut prepared = Vec::with_capacity(items.len());
        for (data, refs) in items {
            sanitize_payload(&data)?;
            validate_refs(&refs)?;
            prepared.push(new_relational_fields(data, refs));
        }

        let ids: Vec<String> = (0..prepared.len())
            .map(|_| Uuid::new_v4().to_string())
            .collect();

        for (chunk_ids, chunk_fields) in ids
            .chunks(MAX_BATCH_SIZE)
            .zip(prepared.chunks(MAX_BATCH_SIZE))
        {
            let writes: Vec<BatchWrite> = chunk_ids
                .iter()
                .zip(chunk_fields.iter())
                .map(|(id, fields)| BatchWrite::Set {
                    collection: collection.to_string(),
                    id: id.clone(),
                    fields: fields.clone(),
                    merge: false,
                })
                .collect();

            self.retry
                .run("batch_create_relational.commit", || {
                    let writes = writes.clone();
                    async move {
                        let backend = self.manager.handle().await?;
                        backend.commit_batch(writes).await
                    }
                })
                .await?;
        }

        Ok(ids)
    }

    /// Count documents per parent: a tally of `refs.<parent_key>` values
    /// across the collection.
    pub async fn aggregate_count_by_parent(
        &self,
        collection: &str,
        parent_key: &str,
    ) -> Result<BTreeMap<String, u64>> {
        validate_collection(collection)?;

        let spec = QuerySpec::collection(collection);
        let docs = self.run_query(spec, "aggregate_count_by_parent").await?;

        let path = format!("{}.{}", REFS_FIELD, parent_key);
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for doc in docs {
            if let Some(Value::Text(parent)) = doc.get(&path) {
                *counts.entry(parent.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn query_by_ref_spec(
        &self,
        collection: &str,
        ref_key: &str,
        ref_value: &str,
        limit: Option<usize>,
        order: Option<OrderBy>,
    ) -> Result<Vec<RelationalDocument>> {
        validate_collection(collection)?;
        if ref_key.is_empty() {
            return Err(DbError::Validation("Ref key cannot be empty".into()));
        }

        let mut spec = QuerySpec::collection(collection).filter(Filter::new(
            format!("{}.{}", REFS_FIELD, ref_key),
            FilterOp::Eq,
            Value::Text(ref_value.to_string()),
        ));
        if let Some(order) = order {
            spec = spec.order(order);
        }
        if let Some(limit) = limit {
            spec = spec.limit(limit);
        }

        let docs = self.run_query(spec, "query_by_ref").await?;
        docs.into_iter()
            .map(RelationalDocument::from_document)
            .collect()
    }

    /// Lookup by exact ref set: every given ref matches and no extra refs
    /// are present.
    async fn find_exact_refs(
        &self,
        collection: &str,
        refs: &BTreeMap<String, String>,
    ) -> Result<Option<RelationalDocument>> {
        let spec = refs_query(collection, refs);
        let docs = self.run_query(spec, "find_exact_refs").await?;

        for doc in docs {
            let relational = RelationalDocument::from_document(doc)?;
            if relational.refs.len() == refs.len() {
                return Ok(Some(relational));
            }
        }
        Ok(None)
    }

    async fn run_query(
        &self,
        spec: QuerySpec,
        operation: &str,
    ) -> Result<Vec<crate::core::Document>> {
        self.retry
            .run(operation, || {
                let spec = spec.clone();
                async move {
                    let backend = self.manager.handle().await?;
                    backend.run_query(&spec).await
                }
            })
            .await
    }

    async fn update_relational_paths(
        &self,
        collection: &str,
        id: &str,
        mut writes: WriteFields,
        operation: &str,
    ) -> Result<()> {
        let existing = self
            .retry
            .run("relational.check", || async move {
                let backend = self.manager.handle().await?;
                backend.get(collection, id).await
            })
            .await?;
        if existing.is_none() {
            return Err(DbError::not_found(collection, id));
        }

        writes.insert(UPDATED_AT_FIELD.to_string(), FieldWrite::ServerTimestamp);

        self.retry
            .run(operation, || {
                let writes = writes.clone();
                async move {
                    let backend = self.manager.handle().await?;
                    backend.update(collection, id, writes).await
                }
            })
            .await
    }
}

fn validate_refs(refs: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in refs {
        if key.is_empty() {
            return Err(DbError::Validation("Ref keys cannot be empty".into()));
        }
        if key.contains('.') {
            return Err(DbError::Validation(format!(
                "Ref key '{}' cannot contain '.'",
                key
            )));
        }
        if value.is_empty() {
            return Err(DbError::Validation(format!(
                "Ref '{}' cannot point at an empty ID",
                key
            )));
        }
    }
    Ok(())
}

fn refs_query(collection: &str, refs: &BTreeMap<String, String>) -> QuerySpec {
    let mut spec = QuerySpec::collection(collection);
    for (key, value) in refs {
        spec = spec.filter(Filter::new(
            format!("{}.{}", REFS_FIELD, key),
            FilterOp::Eq,
            Value::Text(value.clone()),
        ));
    }
    spec
}

/// Full field map of a fresh relational document.
fn new_relational_fields(data: Fields, refs: BTreeMap<String, String>) -> WriteFields {
    let refs_map: Fields = refs
        .into_iter()
        .map(|(k, v)| (k, Value::Text(v)))
        .collect();

    let mut fields = WriteFields::new();
    fields.insert(DATA_FIELD.to_string(), FieldWrite::Value(Value::Map(data)));
    fields.insert(
        REFS_FIELD.to_string(),
        FieldWrite::Value(Value::Map(refs_map)),
    );
    fields.insert(CREATED_AT_FIELD.to_string(), FieldWrite::ServerTimestamp);
    fields.insert(UPDATED_AT_FIELD.to_string(), FieldWrite::ServerTimestamp);
    fields
}

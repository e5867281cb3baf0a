use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{BatchWrite, FieldWrite, MAX_BATCH_SIZE, QuerySpec, WriteFields, write_fields};
use crate::connection::ConnectionManager;
use crate::core::sanitize::sanitize_payload;
use crate::core::types::{CREATED_AT_FIELD, DATA_FIELD, REFS_FIELD, UPDATED_AT_FIELD};
use crate::core::{
    BatchFailure, DbError, Document, Fields, Result, Value, validate_collection,
    validate_document_id,
};
use crate::retry::RetryPolicy;

/// Page size for full-collection scans; also the write-batch chunk size.
const SCAN_PAGE_SIZE: usize = MAX_BATCH_SIZE;

/// Tally of a mutating migration run. Individual document failures are
/// collected here, never thrown mid-scan.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: usize,
    pub failed: Vec<BatchFailure>,
}

/// Tally of a read-only validation scan.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub scanned: usize,
    pub valid: usize,
    pub invalid: usize,
    /// Per-document validation error sets.
    pub errors: Vec<(String, Vec<String>)>,
}

/// Schema-migration helpers.
///
/// Every helper operates by full-collection scan, paginated into
/// write-batch-sized chunks, one transformation per document.
pub struct MigrationService {
    manager: Arc<ConnectionManager>,
    retry: RetryPolicy,
}

impl MigrationService {
    pub fn new(manager: Arc<ConnectionManager>, retry: RetryPolicy) -> Self {
        Self { manager, retry }
    }

    /// Split one flat document into the `{data, refs}` shape.
    ///
    /// Keys named in `ref_keys` move to `refs` (their values must be string
    /// IDs); everything else moves to `data`. An existing `createdAt`
    /// timestamp survives; `updatedAt` is refreshed.
    pub async fn convert_to_relational(
        &self,
        collection: &str,
        id: &str,
        ref_keys: &[String],
    ) -> Result<()> {
        validate_collection(collection)?;
        validate_document_id(id)?;

        let doc = self
            .retry
            .run("convert.read", || async move {
                let backend = self.manager.handle().await?;
                backend.get(collection, id).await
            })
            .await?
            .ok_or_else(|| DbError::not_found(collection, id))?;

        let fields = relational_fields_from_flat(&doc, ref_keys)
            .map_err(|err| DbError::Migration(format!("'{}/{}': {}", collection, id, err)))?;

        self.retry
            .run("convert.write", || {
                let fields = fields.clone();
                async move {
                    let backend = self.manager.handle().await?;
                    backend.set(collection, id, fields, false).await
                }
            })
            .await
    }

    /// Convert every document in the collection to the relational shape.
    pub async fn batch_convert_to_relational(
        &self,
        collection: &str,
        ref_keys: &[String],
    ) -> Result<MigrationReport> {
        self.transform_collection(collection, "batch_convert", |doc| {
            relational_fields_from_flat(doc, ref_keys)
        })
        .await
    }

    /// Apply an arbitrary per-document transformation across the collection.
    /// The transform returns the full replacement payload.
    pub async fn batch_transform<F>(&self, collection: &str, transform: F) -> Result<MigrationReport>
    where
        F: Fn(&Document) -> Result<Fields> + Send + Sync,
    {
        self.transform_collection(collection, "batch_transform", |doc| {
            let fields = transform(doc)?;
            sanitize_payload(&fields)?;
            Ok(write_fields(fields))
        })
        .await
    }

    /// Add one field with the same value to every document.
    pub async fn add_field_to_all(
        &self,
        collection: &str,
        field: &str,
        value: Value,
    ) -> Result<MigrationReport> {
        validate_migration_field(field)?;
        self.update_collection(collection, "add_field_to_all", |_doc| {
            let mut writes = WriteFields::new();
            writes.insert(field.to_string(), FieldWrite::Value(value.clone()));
            Some(writes)
        })
        .await
    }

    /// Remove one field from every document that has it.
    pub async fn remove_field_from_all(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<MigrationReport> {
        validate_migration_field(field)?;
        self.update_collection(collection, "remove_field_from_all", |doc| {
            if doc.get(field).is_none() {
                return None;
            }
            let mut writes = WriteFields::new();
            writes.insert(field.to_string(), FieldWrite::Delete);
            Some(writes)
        })
        .await
    }

    /// Rename a field, preserving its value. Documents without the field
    /// are skipped, not failed.
    pub async fn rename_field(
        &self,
        collection: &str,
        from: &str,
        to: &str,
    ) -> Result<MigrationReport> {
        validate_migration_field(from)?;
        validate_migration_field(to)?;
        if from == to {
            return Err(DbError::Migration(
                "Source and target field names must differ".into(),
            ));
        }

        self.update_collection(collection, "rename_field", |doc| {
            let value = doc.get(from)?.clone();
            let mut writes = WriteFields::new();
            writes.insert(to.to_string(), FieldWrite::Value(value));
            writes.insert(from.to_string(), FieldWrite::Delete);
            Some(writes)
        })
        .await
    }

    /// Copy every document (same IDs) into another collection.
    pub async fn copy_collection(&self, source: &str, target: &str) -> Result<MigrationReport> {
        validate_collection(source)?;
        validate_collection(target)?;
        if source == target {
            return Err(DbError::Migration(
                "Source and target collections must differ".into(),
            ));
        }

        let mut report = MigrationReport::default();
        let mut offset = 0usize;

        loop {
            let page = self.scan_page(source, offset).await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            report.scanned += page_len;

            let writes: Vec<BatchWrite> = page
                .into_iter()
                .map(|doc| BatchWrite::Set {
                    collection: target.to_string(),
                    id: doc.id,
                    fields: write_fields(doc.fields),
                    merge: false,
                })
                .collect();
            self.commit_page("copy_collection", writes, &mut report).await;

            if page_len < SCAN_PAGE_SIZE {
                break;
            }
            offset += page_len;
        }

        debug!(source, target, migrated = report.migrated, "Collection copied");
        Ok(report)
    }

    /// Read-only scan: run a validator over every document and tally the
    /// results. Never mutates.
    pub async fn validate_migration<F>(
        &self,
        collection: &str,
        validator: F,
    ) -> Result<ValidationReport>
    where
        F: Fn(&Document) -> Vec<String> + Send + Sync,
    {
        validate_collection(collection)?;

        let mut report = ValidationReport::default();
        let mut offset = 0usize;

        loop {
            let page = self.scan_page(collection, offset).await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();

            for doc in &page {
                report.scanned += 1;
                let errors = validator(doc);
                if errors.is_empty() {
                    report.valid += 1;
                } else {
                    report.invalid += 1;
                    report.errors.push((doc.id.clone(), errors));
                }
            }

            if page_len < SCAN_PAGE_SIZE {
                break;
            }
            offset += page_len;
        }

        Ok(report)
    }

    // ------------------------------------------------------------------
    // Scan engine
    // ------------------------------------------------------------------

    async fn scan_page(&self, collection: &str, offset: usize) -> Result<Vec<Document>> {
        let spec = QuerySpec::collection(collection)
            .offset(offset)
            .limit(SCAN_PAGE_SIZE);
        self.retry
            .run("migration.scan", || {
                let spec = spec.clone();
                async move {
                    let backend = self.manager.handle().await?;
                    backend.run_query(&spec).await
                }
            })
            .await
    }

    /// Full-collection scan producing one replacement payload per document.
    /// Per-document transform failures are recorded and skipped.
    async fn transform_collection<F>(
        &self,
        collection: &str,
        operation: &str,
        transform: F,
    ) -> Result<MigrationReport>
    where
        F: Fn(&Document) -> Result<WriteFields> + Send + Sync,
    {
        validate_collection(collection)?;

        let mut report = MigrationReport::default();
        let mut offset = 0usize;

        loop {
            let page = self.scan_page(collection, offset).await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            report.scanned += page_len;

            let mut writes = Vec::with_capacity(page_len);
            for doc in &page {
                match transform(doc) {
                    Ok(fields) => writes.push(BatchWrite::Set {
                        collection: collection.to_string(),
                        id: doc.id.clone(),
                        fields,
                        merge: false,
                    }),
                    Err(err) => report.failed.push(BatchFailure {
                        id: doc.id.clone(),
                        error: err.to_string(),
                    }),
                }
            }
            self.commit_page(operation, writes, &mut report).await;

            if page_len < SCAN_PAGE_SIZE {
                break;
            }
            offset += page_len;
        }

        debug!(
            collection,
            operation,
            scanned = report.scanned,
            migrated = report.migrated,
            failed = report.failed.len(),
            "Migration scan finished"
        );
        Ok(report)
    }

    /// Full-collection scan producing one partial update per document;
    /// `None` skips the document without counting it as migrated.
    async fn update_collection<F>(
        &self,
        collection: &str,
        operation: &str,
        updates_for: F,
    ) -> Result<MigrationReport>
    where
        F: Fn(&Document) -> Option<WriteFields> + Send + Sync,
    {
        validate_collection(collection)?;

        let mut report = MigrationReport::default();
        let mut offset = 0usize;

        loop {
            let page = self.scan_page(collection, offset).await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            report.scanned += page_len;

            let writes: Vec<BatchWrite> = page
                .iter()
                .filter_map(|doc| {
                    updates_for(doc).map(|fields| BatchWrite::Update {
                        collection: collection.to_string(),
                        id: doc.id.clone(),
                        fields,
                    })
                })
                .collect();
            self.commit_page(operation, writes, &mut report).await;

            if page_len < SCAN_PAGE_SIZE {
                break;
            }
            offset += page_len;
        }

        Ok(report)
    }

    /// Commit one page of writes in batch-sized chunks, recording chunk
    /// failures per document and moving on.
    async fn commit_page(
        &self,
        operation: &str,
        writes: Vec<BatchWrite>,
        report: &mut MigrationReport,
    ) {
        for chunk in writes.chunks(MAX_BATCH_SIZE) {
            let result = self
                .retry
                .run(operation, || {
                    let chunk = chunk.to_vec();
                    async move {
                        let backend = self.manager.handle().await?;
                        backend.commit_batch(chunk).await
                    }
                })
                .await;

            match result {
                Ok(()) => report.migrated += chunk.len(),
                Err(err) => {
                    warn!(operation, error = %err, "Migration chunk failed, continuing scan");
                    let message = err.to_string();
                    for write in chunk {
                        report.failed.push(BatchFailure {
                            id: write.document_id().to_string(),
                            error: message.clone(),
                        });
                    }
                }
            }
        }
    }
}

fn validate_migration_field(field: &str) -> Result<()> {
    if field.is_empty() {
        return Err(DbError::Validation("Field name cannot be empty".into()));
    }
    if field.contains('.') {
        return Err(DbError::Validation(format!(
            "Migration helpers address top-level fields; '{}' contains '.'",
            field
        )));
    }
    Ok(())
}

/// Partition a flat document into the relational shape by explicit key list.
fn relational_fields_from_flat(doc: &Document, ref_keys: &[String]) -> Result<WriteFields> {
    let mut data = Fields::new();
    let mut refs = Fields::new();
    let mut created_at = None;

    for (key, value) in &doc.fields {
        if key == CREATED_AT_FIELD {
            if let Value::Timestamp(ts) = value {
                created_at = Some(*ts);
            }
            continue;
        }
        if key == UPDATED_AT_FIELD {
            continue;
        }
        if ref_keys.contains(key) {
            match value {
                Value::Text(s) | Value::Reference(s) => {
                    refs.insert(key.clone(), Value::Text(s.clone()));
                }
                other => {
                    return Err(DbError::Migration(format!(
                        "Ref key '{}' holds {}, expected a string ID",
                        key,
                        other.type_name()
                    )));
                }
            }
        } else {
            data.insert(key.clone(), value.clone());
        }
    }

    let mut fields = WriteFields::new();
    fields.insert(DATA_FIELD.to_string(), FieldWrite::Value(Value::Map(data)));
    fields.insert(REFS_FIELD.to_string(), FieldWrite::Value(Value::Map(refs)));
    fields.insert(
        CREATED_AT_FIELD.to_string(),
        match created_at {
            Some(ts) => FieldWrite::Value(Value::Timestamp(ts)),
            None => FieldWrite::ServerTimestamp,
        },
    );
    fields.insert(UPDATED_AT_FIELD.to_string(), FieldWrite::ServerTimestamp);
    Ok(fields)
}

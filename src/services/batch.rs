use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{BatchWrite, FieldWrite, MAX_BATCH_SIZE, QuerySpec, WriteFields, write_fields};
use crate::connection::ConnectionManager;
use crate::core::sanitize::sanitize_payload;
use crate::core::{
    BatchFailure, DbError, Fields, Result, validate_collection, validate_document_id,
};
use crate::retry::RetryPolicy;

/// Outcome of a batch operation.
///
/// Partial failure is a normal, non-throwing return: `success` is false and
/// `failed` lists the items that did not commit. Only total failure (zero
/// successes) escalates to a thrown batch error.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub success: bool,
    /// Writes that committed.
    pub count: usize,
    /// IDs written by create operations, in input order.
    pub ids: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

/// Chunked multi-document writes.
///
/// Input is split into chunks no larger than the store's per-commit write
/// limit; chunk commits are issued strictly sequentially to bound
/// outstanding writes.
pub struct BatchService {
    manager: Arc<ConnectionManager>,
    retry: RetryPolicy,
}

impl BatchService {
    pub fn new(manager: Arc<ConnectionManager>, retry: RetryPolicy) -> Self {
        Self { manager, retry }
    }

    /// Create many documents with generated IDs.
    pub async fn batch_create(&self, collection: &str, items: Vec<Fields>) -> Result<BatchResult> {
        validate_collection(collection)?;

        let mut writes = Vec::with_capacity(items.len());
        let mut ids = Vec::with_capacity(items.len());
        let mut failed = Vec::new();

        for data in items {
            let id = Uuid::new_v4().to_string();
            if let Err(err) = sanitize_payload(&data) {
                failed.push(BatchFailure {
                    id,
                    error: err.to_string(),
                });
                continue;
            }
            ids.push(id.clone());
            writes.push(BatchWrite::Set {
                collection: collection.to_string(),
                id,
                fields: write_fields(data),
                merge: false,
            });
        }

        self.commit_chunks("batch_create", writes, ids, failed).await
    }

    /// Write many documents at explicit IDs.
    pub async fn batch_set(
        &self,
        collection: &str,
        items: Vec<(String, Fields)>,
        merge: bool,
    ) -> Result<BatchResult> {
        validate_collection(collection)?;

        let mut writes = Vec::with_capacity(items.len());
        let mut failed = Vec::new();

        for (id, data) in items {
            if let Err(err) = validate_document_id(&id).and_then(|_| sanitize_payload(&data)) {
                failed.push(BatchFailure {
                    id,
                    error: err.to_string(),
                });
                continue;
            }
            writes.push(BatchWrite::Set {
                collection: collection.to_string(),
                id,
                fields: write_fields(data),
                merge,
            });
        }

        self.commit_chunks("batch_set", writes, Vec::new(), failed)
            .await
    }

    /// Update many documents. Each target's existence is checked up front;
    /// missing documents land in the failure list without aborting the rest.
    pub async fn batch_update(
        &self,
        collection: &str,
        items: Vec<(String, Fields)>,
    ) -> Result<BatchResult> {
        validate_collection(collection)?;

        let mut writes = Vec::with_capacity(items.len());
        let mut failed = Vec::new();

        for (id, data) in items {
            if let Err(err) = validate_document_id(&id).and_then(|_| sanitize_payload(&data)) {
                failed.push(BatchFailure {
                    id,
                    error: err.to_string(),
                });
                continue;
            }
            match self.exists(collection, &id).await {
                Ok(true) => writes.push(BatchWrite::Update {
                    collection: collection.to_string(),
                    id,
                    fields: write_fields(data),
                }),
                Ok(false) => failed.push(BatchFailure {
                    error: DbError::not_found(collection, &id).to_string(),
                    id,
                }),
                Err(err) => failed.push(BatchFailure {
                    id,
                    error: err.to_string(),
                }),
            }
        }

        self.commit_chunks("batch_update", writes, Vec::new(), failed)
            .await
    }

    pub async fn batch_delete(&self, collection: &str, ids: Vec<String>) -> Result<BatchResult> {
        validate_collection(collection)?;

        let mut writes = Vec::with_capacity(ids.len());
        let mut failed = Vec::new();

        for id in ids {
            if let Err(err) = validate_document_id(&id) {
                failed.push(BatchFailure {
                    id,
                    error: err.to_string(),
                });
                continue;
            }
            writes.push(BatchWrite::Delete {
                collection: collection.to_string(),
                id,
            });
        }

        self.commit_chunks("batch_delete", writes, Vec::new(), failed)
            .await
    }

    /// Apply a numeric increment to the same field of many documents.
    pub async fn batch_increment(
        &self,
        collection: &str,
        field: &str,
        items: Vec<(String, i64)>,
    ) -> Result<BatchResult> {
        validate_collection(collection)?;
        if field.is_empty() {
            return Err(DbError::Validation("Field name cannot be empty".into()));
        }

        let mut writes = Vec::with_capacity(items.len());
        let mut failed = Vec::new();

        for (id, delta) in items {
            if let Err(err) = validate_document_id(&id) {
                failed.push(BatchFailure {
                    id,
                    error: err.to_string(),
                });
                continue;
            }
            match self.exists(collection, &id).await {
                Ok(true) => {
                    let mut fields = WriteFields::new();
                    fields.insert(field.to_string(), FieldWrite::Increment(delta));
                    writes.push(BatchWrite::Update {
                        collection: collection.to_string(),
                        id,
                        fields,
                    });
                }
                Ok(false) => failed.push(BatchFailure {
                    error: DbError::not_found(collection, &id).to_string(),
                    id,
                }),
                Err(err) => failed.push(BatchFailure {
                    id,
                    error: err.to_string(),
                }),
            }
        }

        self.commit_chunks("batch_increment", writes, Vec::new(), failed)
            .await
    }

    /// Delete an entire collection: pull a bounded page, batch-delete it,
    /// repeat until a page comes back empty or short. Returns the number of
    /// deleted documents.
    pub async fn delete_collection(&self, collection: &str) -> Result<usize> {
        validate_collection(collection)?;

        let mut deleted = 0usize;
        loop {
            let spec = QuerySpec::collection(collection).limit(MAX_BATCH_SIZE);
            let page = self
                .retry
                .run("delete_collection.page", || {
                    let spec = spec.clone();
                    async move {
                        let backend = self.manager.handle().await?;
                        backend.run_query(&spec).await
                    }
                })
                .await?;
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
                .run("delete_collection.commit", || {
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

        debug!(collection, deleted, "Collection deleted");
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Chunked commit engine
    // ------------------------------------------------------------------

    async fn exists(&self, collection: &str, id: &str) -> Result<bool> {
        let doc = self
            .retry
            .run("batch.check", || async move {
                let backend = self.manager.handle().await?;
                backend.get(collection, id).await
            })
            .await?;
        Ok(doc.is_some())
    }

    /// Commit writes chunk by chunk, accumulating per-item failures.
    async fn commit_chunks(
        &self,
        operation: &str,
        writes: Vec<BatchWrite>,
        ids: Vec<String>,
        mut failed: Vec<BatchFailure>,
    ) -> Result<BatchResult> {
        let total = writes.len() + failed.len();
        let mut count = 0usize;

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
                Ok(()) => count += chunk.len(),
                Err(err) => {
                    warn!(operation, error = %err, size = chunk.len(), "Batch chunk failed");
                    let message = err.to_string();
                    for write in chunk {
                        failed.push(BatchFailure {
                            id: write.document_id().to_string(),
                            error: message.clone(),
                        });
                    }
                }
            }
        }

        if count == 0 && !failed.is_empty() {
            return Err(DbError::Batch {
                total,
                failed: failed.len(),
                failures: failed,
            });
        }

        Ok(BatchResult {
            success: failed.is_empty(),
            count,
            ids,
            failed,
        })
    }
}

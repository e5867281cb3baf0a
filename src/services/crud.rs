use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use lru::LruCache;
use tracing::debug;

use crate::backend::{Filter, FilterOp, QuerySpec, write_fields};
use crate::connection::ConnectionManager;
use crate::core::sanitize::sanitize_payload;
use crate::core::{
    DbError, Document, Fields, Result, Value, validate_collection, validate_document_id,
};
use crate::retry::RetryPolicy;

/// What an upsert ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Simple document CRUD.
///
/// Reads go through an optional LRU read-through cache; every write path
/// invalidates the touched entry.
pub struct CrudService {
    manager: Arc<ConnectionManager>,
    retry: RetryPolicy,
    cache: Option<StdMutex<LruCache<(String, String), Document>>>,
}

impl CrudService {
    pub fn new(manager: Arc<ConnectionManager>, retry: RetryPolicy) -> Self {
        let config = manager.config();
        let cache = if config.cache_enabled {
            NonZeroUsize::new(config.cache_capacity)
                .map(|capacity| StdMutex::new(LruCache::new(capacity)))
        } else {
            None
        };
        Self {
            manager,
            retry,
            cache,
        }
    }

    /// Create a document with a store-assigned ID; returns the ID.
    pub async fn create(&self, collection: &str, data: Fields) -> Result<String> {
        validate_collection(collection)?;
        sanitize_payload(&data)?;

        self.retry
            .run("create", || {
                let fields = write_fields(data.clone());
                async move {
                    let backend = self.manager.handle().await?;
                    backend.add(collection, fields).await
                }
            })
            .await
    }

    /// Write a document at an explicit ID. With `merge`, fields not named in
    /// the payload survive.
    pub async fn set(&self, collection: &str, id: &str, data: Fields, merge: bool) -> Result<()> {
        validate_collection(collection)?;
        validate_document_id(id)?;
        sanitize_payload(&data)?;

        self.retry
            .run("set", || {
                let fields = write_fields(data.clone());
                async move {
                    let backend = self.manager.handle().await?;
                    backend.set(collection, id, fields, merge).await
                }
            })
            .await?;

        self.invalidate(collection, id)?;
        Ok(())
    }

    pub async fn read(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        validate_collection(collection)?;
        validate_document_id(id)?;

        if let Some(hit) = self.cache_get(collection, id)? {
            debug!(collection, id, "Read served from cache");
            return Ok(Some(hit));
        }

        let doc = self
            .retry
            .run("read", || async move {
                let backend = self.manager.handle().await?;
                backend.get(collection, id).await
            })
            .await?;

        if let Some(doc) = &doc {
            self.cache_put(collection, id, doc.clone())?;
        }
        Ok(doc)
    }

    pub async fn exists(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self.read(collection, id).await?.is_some())
    }

    /// Partial update of named fields.
    ///
    /// Read-check-then-write: a missing document fails with not-found before
    /// the underlying update is issued.
    pub async fn update(&self, collection: &str, id: &str, changes: Fields) -> Result<()> {
        validate_collection(collection)?;
        validate_document_id(id)?;
        sanitize_payload(&changes)?;

        let existing = self
            .retry
            .run("update.check", || async move {
                let backend = self.manager.handle().await?;
                backend.get(collection, id).await
            })
            .await?;
        if existing.is_none() {
            return Err(DbError::not_found(collection, id));
        }

        self.retry
            .run("update", || {
                let fields = write_fields(changes.clone());
                async move {
                    let backend = self.manager.handle().await?;
                    backend.update(collection, id, fields).await
                }
            })
            .await?;

        self.invalidate(collection, id)?;
        Ok(())
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        validate_collection(collection)?;
        validate_document_id(id)?;

        self.retry
            .run("delete", || async move {
                let backend = self.manager.handle().await?;
                backend.delete(collection, id).await
            })
            .await?;

        self.invalidate(collection, id)?;
        Ok(())
    }

    /// Create-or-update decided by a prior existence read.
    ///
    /// The read and the write are separate operations: two concurrent
    /// upserters can both observe "absent" and both create. Callers that
    /// need atomicity belong on the transaction service.
    pub async fn upsert(
        &self,
        collection: &str,
        id: &str,
        data: Fields,
    ) -> Result<UpsertOutcome> {
        validate_collection(collection)?;
        validate_document_id(id)?;
        sanitize_payload(&data)?;

        if self.exists(collection, id).await? {
            self.update(collection, id, data).await?;
            Ok(UpsertOutcome::Updated)
        } else {
            self.set(collection, id, data, false).await?;
            Ok(UpsertOutcome::Created)
        }
    }

    pub async fn list(&self, collection: &str, limit: Option<usize>) -> Result<Vec<Document>> {
        validate_collection(collection)?;

        let mut spec = QuerySpec::collection(collection);
        if let Some(limit) = limit {
            spec = spec.limit(limit);
        }

        self.retry
            .run("list", || {
                let spec = spec.clone();
                async move {
                    let backend = self.manager.handle().await?;
                    backend.run_query(&spec).await
                }
            })
            .await
    }

    pub async fn count(&self, collection: &str) -> Result<u64> {
        validate_collection(collection)?;

        let spec = QuerySpec::collection(collection);
        self.retry
            .run("count", || {
                let spec = spec.clone();
                async move {
                    let backend = self.manager.handle().await?;
                    backend.count(&spec).await
                }
            })
            .await
    }

    /// First document where `field == value`, if any.
    pub async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Document>> {
        validate_collection(collection)?;

        let spec = QuerySpec::collection(collection)
            .filter(Filter::new(field, FilterOp::Eq, value.into()))
            .limit(1);

        let mut docs = self
            .retry
            .run("find_one", || {
                let spec = spec.clone();
                async move {
                    let backend = self.manager.handle().await?;
                    backend.run_query(&spec).await
                }
            })
            .await?;

        Ok(if docs.is_empty() {
            None
        } else {
            Some(docs.swap_remove(0))
        })
    }

    // ------------------------------------------------------------------
    // Cache plumbing
    // ------------------------------------------------------------------

    fn cache_get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let mut cache = cache.lock()?;
        Ok(cache
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }

    fn cache_put(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock()?;
            cache.put((collection.to_string(), id.to_string()), doc);
        }
        Ok(())
    }

    fn invalidate(&self, collection: &str, id: &str) -> Result<()> {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock()?;
            cache.pop(&(collection.to_string(), id.to_string()));
        }
        Ok(())
    }
}

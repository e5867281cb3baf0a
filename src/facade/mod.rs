//! The adapter façade: one object per logical database connection.

use std::sync::{Arc, OnceLock};

use crate::backend::memory::MemoryConnector;
use crate::connection::{ConnectionManager, ConnectionMetrics, Connector, DocBaseConfig};
use crate::core::Result;
use crate::retry::RetryPolicy;
use crate::services::{
    BatchService, CrudService, MigrationService, QueryService, RelationalService,
    TransactionService,
};

/// Convenience layer over the document store.
///
/// Owns one [`ConnectionManager`] and lazily constructs the six operation
/// services on top of it; all services share the manager's single backend
/// handle and the adapter-wide retry settings.
///
/// # Examples
///
/// ```
/// use docbase::{DocBase, DocBaseConfig, Fields, Value};
///
/// # tokio_test::block_on(async {
/// let db = DocBase::connect(DocBaseConfig::default()).await.unwrap();
///
/// let mut user = Fields::new();
/// user.insert("name".into(), Value::from("Alice"));
/// let id = db.crud().create("users", user).await.unwrap();
///
/// let doc = db.crud().read("users", &id).await.unwrap().unwrap();
/// assert_eq!(doc.get("name"), Some(&Value::from("Alice")));
/// # db.close().await;
/// # });
/// ```
pub struct DocBase {
    manager: Arc<ConnectionManager>,
    crud: OnceLock<Arc<CrudService>>,
    relational: OnceLock<Arc<RelationalService>>,
    query: OnceLock<Arc<QueryService>>,
    batch: OnceLock<Arc<BatchService>>,
    transactions: OnceLock<Arc<TransactionService>>,
    migration: OnceLock<Arc<MigrationService>>,
}

impl std::fmt::Debug for DocBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocBase").finish_non_exhaustive()
    }
}

impl DocBase {
    /// Build an adapter against the in-process emulator backend.
    ///
    /// Fails fast on configuration problems or an incompatible host
    /// runtime; no connection is opened until first use.
    pub fn new(config: DocBaseConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(MemoryConnector))
    }

    /// Build an adapter with an explicit connector (the managed client, an
    /// emulator, a test double).
    pub fn with_connector(config: DocBaseConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let manager = Arc::new(ConnectionManager::new(config, connector)?);
        Ok(Self {
            manager,
            crud: OnceLock::new(),
            relational: OnceLock::new(),
            query: OnceLock::new(),
            batch: OnceLock::new(),
            transactions: OnceLock::new(),
            migration: OnceLock::new(),
        })
    }

    /// Build and eagerly connect.
    pub async fn connect(config: DocBaseConfig) -> Result<Self> {
        let db = Self::new(config)?;
        db.manager.initialize().await?;
        Ok(db)
    }

    pub async fn connect_with(
        config: DocBaseConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let db = Self::with_connector(config, connector)?;
        db.manager.initialize().await?;
        Ok(db)
    }

    fn retry_policy(&self) -> RetryPolicy {
        let config = self.manager.config();
        RetryPolicy::new(config.retry_enabled, config.retry.clone())
    }

    pub fn crud(&self) -> Arc<CrudService> {
        Arc::clone(self.crud.get_or_init(|| {
            Arc::new(CrudService::new(
                Arc::clone(&self.manager),
                self.retry_policy(),
            ))
        }))
    }

    pub fn relational(&self) -> Arc<RelationalService> {
        Arc::clone(self.relational.get_or_init(|| {
            Arc::new(RelationalService::new(
                Arc::clone(&self.manager),
                self.retry_policy(),
            ))
        }))
    }

    pub fn query(&self) -> Arc<QueryService> {
        Arc::clone(self.query.get_or_init(|| {
            Arc::new(QueryService::new(
                Arc::clone(&self.manager),
                self.retry_policy(),
            ))
        }))
    }

    pub fn batch(&self) -> Arc<BatchService> {
        Arc::clone(self.batch.get_or_init(|| {
            Arc::new(BatchService::new(
                Arc::clone(&self.manager),
                self.retry_policy(),
            ))
        }))
    }

    pub fn transactions(&self) -> Arc<TransactionService> {
        Arc::clone(self.transactions.get_or_init(|| {
            Arc::new(TransactionService::new(
                Arc::clone(&self.manager),
                self.retry_policy(),
            ))
        }))
    }

    pub fn migration(&self) -> Arc<MigrationService> {
        Arc::clone(self.migration.get_or_init(|| {
            Arc::new(MigrationService::new(
                Arc::clone(&self.manager),
                self.retry_policy(),
            ))
        }))
    }

    /// Idempotent connect; reuses the existing handle when already
    /// connected.
    pub async fn initialize(&self) -> Result<()> {
        self.manager.initialize().await.map(|_| ())
    }

    pub async fn close(&self) {
        self.manager.close().await;
    }

    pub async fn is_connected(&self) -> bool {
        self.manager.is_connected().await
    }

    pub async fn metrics(&self) -> ConnectionMetrics {
        self.manager.metrics().await
    }

    pub fn config(&self) -> &DocBaseConfig {
        self.manager.config()
    }

    /// The lifecycle manager, for callers that need direct control.
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }
}

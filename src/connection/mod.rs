//! Connection lifecycle management.
//!
//! One [`ConnectionManager`] owns the single backend handle of an adapter
//! instance: it guards against incompatible host runtimes, connects lazily,
//! reuses the handle across calls, watches for idleness in the background and
//! reconnects transparently when the connection has gone stale.

pub mod config;
pub mod credentials;

pub use config::DocBaseConfig;
pub use credentials::{Credentials, ResolvedCredentials, ServiceAccount};

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
// tokio's Instant (not std's) so idle tracking follows paused test time.
use tokio::time::Instant;
use tracing::{debug, info};

use crate::backend::DocumentBackend;
use crate::core::{DbError, Result};

/// Marker variable injected by host runtimes the store client cannot run on.
const RUNTIME_MARKER_VAR: &str = "EDGE_RUNTIME";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
    Closed,
}

/// Builds a backend handle from resolved credentials.
///
/// The managed client lives behind this seam; tests and the emulator use
/// [`crate::backend::memory::MemoryConnector`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        credentials: &ResolvedCredentials,
    ) -> Result<Arc<dyn DocumentBackend>>;
}

/// Connection statistics as reported to health checks.
#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    pub is_connected: bool,
    pub last_activity: Option<DateTime<Utc>>,
    pub idle_time: Duration,
    pub operation_count: u64,
}

struct Inner {
    state: ConnectionState,
    /// Set by the idle monitor; observed (and cleared) by the next
    /// `handle()` call, which reconnects lazily.
    stale: bool,
    handle: Option<Arc<dyn DocumentBackend>>,
    last_activity: Option<Instant>,
    last_activity_at: Option<DateTime<Utc>>,
    operation_count: u64,
}

pub struct ConnectionManager {
    config: DocBaseConfig,
    connector: Arc<dyn Connector>,
    inner: Arc<RwLock<Inner>>,
    monitor: StdMutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Fails fast with a configuration or incompatible-runtime error before
    /// any connection attempt.
    pub fn new(config: DocBaseConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        guard_runtime()?;
        config.validate().map_err(DbError::Config)?;

        Ok(Self {
            config,
            connector,
            inner: Arc::new(RwLock::new(Inner {
                state: ConnectionState::Uninitialized,
                stale: false,
                handle: None,
                last_activity: None,
                last_activity_at: None,
                operation_count: 0,
            })),
            monitor: StdMutex::new(None),
        })
    }

    pub fn config(&self) -> &DocBaseConfig {
        &self.config
    }

    /// Connect, or reuse the existing handle.
    ///
    /// Idempotent: a second call while connected refreshes the activity
    /// timestamp and returns the same handle without opening another
    /// underlying connection. The write lock is held across the connect so
    /// concurrent initializers cannot race into duplicate connections.
    pub async fn initialize(&self) -> Result<Arc<dyn DocumentBackend>> {
        let mut inner = self.inner.write().await;

        if inner.state == ConnectionState::Connected && !inner.stale {
            if let Some(handle) = &inner.handle {
                let handle = Arc::clone(handle);
                touch(&mut inner);
                return Ok(handle);
            }
        }

        inner.state = ConnectionState::Connecting;
        let resolved = match self.config.credentials.resolve() {
            Ok(resolved) => resolved,
            Err(err) => {
                inner.state = ConnectionState::Uninitialized;
                return Err(err);
            }
        };

        match self.connector.connect(&resolved).await {
            Ok(handle) => {
                inner.state = ConnectionState::Connected;
                inner.stale = false;
                inner.handle = Some(Arc::clone(&handle));
                inner.operation_count = 0;
                touch(&mut inner);
                info!(
                    project = resolved.project_id.as_deref().unwrap_or("<ambient>"),
                    "Store connection initialized"
                );
                drop(inner);

                if self.config.pooling_enabled {
                    self.ensure_monitor();
                }
                Ok(handle)
            }
            Err(err) => {
                inner.state = ConnectionState::Uninitialized;
                inner.handle = None;
                Err(DbError::Connection(format!(
                    "Failed to initialize store client: {}",
                    err
                )))
            }
        }
    }

    /// The handle every operation goes through.
    ///
    /// Re-initializes when not connected or flagged stale (lazy reconnect).
    /// Each successful return bumps the operation count and refreshes the
    /// activity timestamp; nothing else mutates the metrics.
    pub async fn handle(&self) -> Result<Arc<dyn DocumentBackend>> {
        {
            let mut inner = self.inner.write().await;
            if inner.state == ConnectionState::Connected && !inner.stale {
                if let Some(handle) = &inner.handle {
                    let handle = Arc::clone(handle);
                    self.record_operation(&mut inner);
                    return Ok(handle);
                }
            }
            if inner.stale {
                debug!("Stale connection observed, reconnecting lazily");
            }
        }

        let handle = self.initialize().await?;
        let mut inner = self.inner.write().await;
        self.record_operation(&mut inner);
        Ok(handle)
    }

    /// Stop the idle monitor, release the handle, and mark the connection
    /// closed. Closing twice is a no-op.
    pub async fn close(&self) {
        if let Ok(mut guard) = self.monitor.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }

        let mut inner = self.inner.write().await;
        if inner.state == ConnectionState::Closed {
            return;
        }
        inner.state = ConnectionState::Closed;
        inner.stale = false;
        inner.handle = None;
        inner.last_activity = None;
        inner.last_activity_at = None;
        inner.operation_count = 0;
        info!("Store connection closed");
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    pub async fn is_connected(&self) -> bool {
        let inner = self.inner.read().await;
        inner.state == ConnectionState::Connected && !inner.stale
    }

    pub async fn metrics(&self) -> ConnectionMetrics {
        let inner = self.inner.read().await;
        ConnectionMetrics {
            is_connected: inner.state == ConnectionState::Connected && !inner.stale,
            last_activity: inner.last_activity_at,
            idle_time: inner
                .last_activity
                .map(|at| at.elapsed())
                .unwrap_or_default(),
            operation_count: inner.operation_count,
        }
    }

    fn record_operation(&self, inner: &mut Inner) {
        if self.config.metrics_enabled {
            inner.operation_count += 1;
        }
        touch(inner);
    }

    /// Spawn the idle monitor once. It only flags staleness; the actual
    /// reconnect happens on the next `handle()` call. The task is aborted
    /// on close so the runtime never counts it as outstanding work.
    fn ensure_monitor(&self) {
        let Ok(mut guard) = self.monitor.lock() else {
            return;
        };
        if guard.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let period = self.config.idle_timeout;
        let max_idle = self.config.max_idle_time;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut state = inner.write().await;
                if state.state != ConnectionState::Connected || state.stale {
                    continue;
                }
                let idle = state
                    .last_activity
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                if idle > max_idle {
                    info!(
                        idle_ms = idle.as_millis() as u64,
                        "Connection idle past threshold, flagged for lazy reconnect"
                    );
                    state.stale = true;
                }
            }
        });
        *guard = Some(task);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.monitor.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

fn touch(inner: &mut Inner) {
    inner.last_activity = Some(Instant::now());
    inner.last_activity_at = Some(Utc::now());
}

fn guard_runtime() -> Result<()> {
    check_runtime_marker(std::env::var(RUNTIME_MARKER_VAR))
}

/// Fail only on confirmed presence of the marker; an unreadable value is
/// treated as absent.
fn check_runtime_marker(
    marker: std::result::Result<String, std::env::VarError>,
) -> Result<()> {
    match marker {
        Ok(value) => Err(DbError::IncompatibleRuntime(format!(
            "Host runtime '{}' does not support the store client; a full server runtime is required",
            if value.is_empty() { RUNTIME_MARKER_VAR } else { value.as_str() }
        ))),
        Err(std::env::VarError::NotUnicode(_)) => Ok(()),
        Err(std::env::VarError::NotPresent) => Ok(()),
    }
}

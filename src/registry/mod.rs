//! Named-instance registry.
//!
//! A process typically wants several independent adapters (per tenant, per
//! environment). The registry is an explicit owned container with explicit
//! lifecycle, not ambient global state: construct one, pass it around.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::connection::{ConnectionMetrics, DocBaseConfig};
use crate::core::{DbError, Result};
use crate::facade::DocBase;

/// Health snapshot of one instance.
#[derive(Debug, Clone)]
pub struct InstanceHealth {
    pub connected: bool,
    pub operation_count: u64,
    pub idle_time: Duration,
}

/// Aggregated health report. `healthy` is the AND of every instance's
/// connected flag.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub instances: BTreeMap<String, InstanceHealth>,
}

/// Directory of named adapter instances.
///
/// Names are unique; the first created instance becomes the default unless
/// explicitly overridden; entries leave the map only on explicit close.
#[derive(Default)]
pub struct InstanceRegistry {
    instances: RwLock<HashMap<String, Arc<DocBase>>>,
    default_name: RwLock<Option<String>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new instance under `name`.
    ///
    /// A name collision is loud but not fatal: the existing instance is
    /// returned unchanged (never silently reconfigured) and a warning is
    /// logged.
    pub async fn create_instance(
        &self,
        name: &str,
        config: DocBaseConfig,
    ) -> Result<Arc<DocBase>> {
        if name.is_empty() {
            return Err(DbError::Validation("Instance name cannot be empty".into()));
        }

        let mut instances = self.instances.write().await;
        if let Some(existing) = instances.get(name) {
            warn!(
                name,
                "Instance already registered; returning the existing instance unchanged"
            );
            return Ok(Arc::clone(existing));
        }

        let instance = Arc::new(DocBase::new(config)?);
        instances.insert(name.to_string(), Arc::clone(&instance));
        info!(name, "Instance registered");

        let mut default = self.default_name.write().await;
        if default.is_none() {
            *default = Some(name.to_string());
        }

        Ok(instance)
    }

    pub async fn get_instance(&self, name: &str) -> Result<Arc<DocBase>> {
        let instances = self.instances.read().await;
        instances.get(name).cloned().ok_or_else(|| {
            let mut available: Vec<&str> = instances.keys().map(String::as_str).collect();
            available.sort_unstable();
            DbError::Config(format!(
                "Unknown instance '{}'. Available instances: [{}]",
                name,
                available.join(", ")
            ))
        })
    }

    pub async fn get_default(&self) -> Result<Arc<DocBase>> {
        let default = self.default_name.read().await;
        match default.as_deref() {
            Some(name) => self.get_instance(name).await,
            None => Err(DbError::Config(
                "No instances registered; create one before requesting the default".into(),
            )),
        }
    }

    pub async fn set_default(&self, name: &str) -> Result<()> {
        let instances = self.instances.read().await;
        if !instances.contains_key(name) {
            return Err(DbError::Config(format!(
                "Cannot set default: instance '{}' is not registered",
                name
            )));
        }
        drop(instances);

        *self.default_name.write().await = Some(name.to_string());
        Ok(())
    }

    pub async fn has_instance(&self, name: &str) -> bool {
        self.instances.read().await.contains_key(name)
    }

    pub async fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.read().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Close one instance and remove it from the map. When it was the
    /// default, the alphabetically first remaining instance takes over.
    pub async fn close_instance(&self, name: &str) -> Result<()> {
        let instance = {
            let mut instances = self.instances.write().await;
            instances.remove(name).ok_or_else(|| {
                DbError::Config(format!("Cannot close unknown instance '{}'", name))
            })?
        };
        instance.close().await;
        info!(name, "Instance closed");

        let mut default = self.default_name.write().await;
        if default.as_deref() == Some(name) {
            let instances = self.instances.read().await;
            let mut names: Vec<&String> = instances.keys().collect();
            names.sort_unstable();
            *default = names.first().map(|n| (*n).to_string());
        }
        Ok(())
    }

    /// Close every instance concurrently, bounded by the largest configured
    /// shutdown timeout. Instances are removed from the map either way.
    pub async fn close_all(&self) -> Result<()> {
        let drained: Vec<(String, Arc<DocBase>)> = {
            let mut instances = self.instances.write().await;
            instances.drain().collect()
        };
        *self.default_name.write().await = None;

        if drained.is_empty() {
            return Ok(());
        }

        let deadline = drained
            .iter()
            .map(|(_, db)| db.config().shutdown_timeout)
            .max()
            .unwrap_or(Duration::from_secs(30));

        let closes = drained.iter().map(|(_, db)| db.close());
        match tokio::time::timeout(deadline, join_all(closes)).await {
            Ok(_) => {
                info!(count = drained.len(), "All instances closed");
                Ok(())
            }
            Err(_) => {
                warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    "Shutdown deadline exceeded while closing instances"
                );
                Err(DbError::Connection(
                    "Shutdown deadline exceeded while closing instances".into(),
                ))
            }
        }
    }

    pub async fn get_instance_metrics(&self, name: &str) -> Result<ConnectionMetrics> {
        let instance = self.get_instance(name).await?;
        Ok(instance.metrics().await)
    }

    pub async fn get_all_metrics(&self) -> BTreeMap<String, ConnectionMetrics> {
        let instances: Vec<(String, Arc<DocBase>)> = {
            let map = self.instances.read().await;
            map.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
        };

        let mut metrics = BTreeMap::new();
        for (name, instance) in instances {
            metrics.insert(name, instance.metrics().await);
        }
        metrics
    }

    /// One report across all instances; healthy only when every instance is
    /// connected.
    pub async fn health_check(&self) -> HealthReport {
        let metrics = self.get_all_metrics().await;

        let mut healthy = true;
        let mut instances = BTreeMap::new();
        for (name, m) in metrics {
            healthy &= m.is_connected;
            instances.insert(
                name,
                InstanceHealth {
                    connected: m.is_connected,
                    operation_count: m.operation_count,
                    idle_time: m.idle_time,
                },
            );
        }

        HealthReport { healthy, instances }
    }

    /// Test-teardown hammer: close and forget everything, ignoring errors.
    pub async fn reset(&self) {
        let _ = self.close_all().await;
    }
}

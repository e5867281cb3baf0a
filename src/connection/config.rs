use std::time::Duration;

use super::credentials::Credentials;
use crate::retry::RetryConfig;

/// Adapter configuration.
///
/// Covers credentials, pooling, retries, caching and shutdown behavior.
/// Built once and shared by every service of one adapter instance.
#[derive(Debug, Clone)]
pub struct DocBaseConfig {
    /// Credential source; ambient environment defaults when not set.
    pub credentials: Credentials,

    /// Reuse one connection across calls and run the idle monitor.
    pub pooling_enabled: bool,

    /// Idle-monitor period.
    pub idle_timeout: Duration,

    /// Inactivity threshold after which the connection is flagged stale.
    pub max_idle_time: Duration,

    /// Wrap store calls in the backoff executor.
    pub retry_enabled: bool,

    /// Shared retry settings (no per-call override).
    pub retry: RetryConfig,

    /// Read-through document cache on CRUD reads.
    pub cache_enabled: bool,

    /// Cache capacity in documents.
    pub cache_capacity: usize,

    /// Track operation counts and activity timestamps.
    pub metrics_enabled: bool,

    /// Hard deadline for closing all instances at shutdown.
    pub shutdown_timeout: Duration,
}

impl DocBaseConfig {
    pub fn new() -> Self {
        Self {
            credentials: Credentials::Ambient,
            pooling_enabled: true,
            idle_timeout: Duration::from_secs(300),
            max_idle_time: Duration::from_secs(600),
            retry_enabled: true,
            retry: RetryConfig::default(),
            cache_enabled: false,
            cache_capacity: 1000,
            metrics_enabled: true,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn pooling(mut self, enabled: bool) -> Self {
        self.pooling_enabled = enabled;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_idle_time(mut self, max_idle: Duration) -> Self {
        self.max_idle_time = max_idle;
        self
    }

    pub fn retry_enabled(mut self, enabled: bool) -> Self {
        self.retry_enabled = enabled;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate configuration before any connection attempt.
    pub fn validate(&self) -> Result<(), String> {
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be > 0".to_string());
        }
        if self.max_idle_time.is_zero() {
            return Err("max_idle_time must be > 0".to_string());
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be >= 1.0".to_string());
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err("initial_delay cannot exceed max_delay".to_string());
        }
        if self.cache_enabled && self.cache_capacity == 0 {
            return Err("cache_capacity must be > 0 when the cache is enabled".to_string());
        }
        Ok(())
    }
}

impl Default for DocBaseConfig {
    fn default() -> Self {
        Self::new()
    }
}

//! Retry-with-exponential-backoff execution wrapper.
//!
//! Every fallible store operation in this crate funnels through
//! [`RetryPolicy::run`]. The delay sequence is deterministic (no jitter):
//! `initial, initial*m, initial*m^2, ...`, each term clamped to `max_delay`,
//! so tests can assert the exact schedule under paused time.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::core::{DbError, Result};

/// Immutable retry settings, supplied once at adapter construction and
/// shared by reference across all operation services.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retry budget. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

/// Execute `op`, retrying transient failures with exponential backoff.
///
/// Non-retryable errors propagate immediately without consuming retry
/// budget. When the budget is exhausted the last error is wrapped in
/// [`DbError::RetriesExhausted`] together with the operation name and the
/// total attempt count.
pub async fn execute_with_retry<T, F, Fut>(
    operation: &str,
    config: &RetryConfig,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = config.initial_delay.min(config.max_delay);
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempts <= config.max_retries => {
                warn!(
                    operation,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, backing off"
                );
                sleep(delay).await;
                delay = delay
                    .mul_f64(config.backoff_multiplier)
                    .min(config.max_delay);
            }
            Err(err) if err.is_retryable() => {
                return Err(DbError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts,
                    source: Box::new(err),
                });
            }
            Err(err) => return Err(err),
        }
    }
}

/// The retry-enabled flag and its config, as held by every operation
/// service.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(enabled: bool, config: RetryConfig) -> Self {
        Self { enabled, config }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            config: RetryConfig::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` under this policy.
    ///
    /// With retry disabled this is a true passthrough: one call, the
    /// original error surfaces unmodified, never rewrapped as
    /// retries-exhausted.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.enabled {
            return op().await;
        }
        execute_with_retry(operation, &self.config, op).await
    }
}

//! Retry with backoff behind a circuit breaker
//!
//! Every database round trip of an export goes through
//! [`ResilientExecutor::execute`]:
//! - an open circuit fails fast with `CircuitOpen` without calling the operation
//! - each attempt runs under a timeout
//! - transient failures are retried with exponential backoff and jitter
//! - a final failure counts against the breaker
//!
//! The breaker mutex is only held to make a decision, never across the
//! operation or a backoff sleep.

pub mod circuit_breaker;

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{ExportError, Result};

pub use circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitState};

/// Largest jitter added to a backoff delay, as a fraction of the delay
const MAX_JITTER_FRACTION: f64 = 0.25;

/// Retry budget and delays
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Limit for a single attempt
    pub attempt_timeout: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            attempt_timeout: config.query_timeout(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`, without jitter:
    /// `min(max_delay, base_delay * 2^attempt)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Backoff plus a random jitter of up to a quarter of it.
    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let max_jitter = delay.mul_f64(MAX_JITTER_FRACTION);
        let jitter = rand::thread_rng().gen_range(0.0..=1.0);
        delay + max_jitter.mul_f64(jitter)
    }
}

/// Runs database operations with retries and a shared circuit breaker
pub struct ResilientExecutor {
    policy: RetryPolicy,
    breaker: Mutex<CircuitBreaker>,
}

impl ResilientExecutor {
    pub fn new(config: &RetryConfig) -> Self {
        Self::with_policy(RetryPolicy::from(config), BreakerSettings::from(config))
    }

    pub fn with_policy(policy: RetryPolicy, settings: BreakerSettings) -> Self {
        Self {
            policy,
            breaker: Mutex::new(CircuitBreaker::new(settings)),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn state(&self) -> CircuitState {
        self.breaker.lock().await.state()
    }

    async fn admit(&self, name: &str) -> Result<()> {
        let mut breaker = self.breaker.lock().await;
        breaker.admit(Instant::now()).map_err(|retry_after| {
            warn!("Circuit open, rejecting {} (retry after {:?})", name, retry_after);
            ExportError::CircuitOpen { retry_after }
        })
    }

    /// Run `op` with retries
    ///
    /// # Arguments
    /// * `name` - Operation name used in logs and timeout errors
    /// * `op` - Produces a fresh future for every attempt
    ///
    /// # Returns
    /// * `Result<T>` - The first successful result, or the last error
    pub async fn execute<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            self.admit(name).await?;

            let outcome = match tokio::time::timeout(self.policy.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ExportError::Timeout {
                    operation: name.to_string(),
                    after: self.policy.attempt_timeout,
                }),
            };

            match outcome {
                Ok(value) => {
                    self.breaker.lock().await.record_success();
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff_with_jitter(attempt);
                    attempt += 1;
                    warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        name, e, attempt, self.policy.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.breaker.lock().await.record_failure(Instant::now());
                    return Err(e);
                }
            }
        }
    }
}

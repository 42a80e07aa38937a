//! Bounded exponential retry for remote drive operations.
//!
//! Transient (network-class) failures are retried with exponential
//! backoff; every other error surfaces immediately. The sync entry point
//! reports only the final outcome.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Retry policy applied to each remote operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Exponential multiplier applied to the delay after each attempt
    pub exp: f64,
    /// Base delay in seconds before the first retry
    pub delay: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            exp: 1.2,
            delay: 6.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.delay * self.exp.powi(attempt as i32))
    }
}

/// Run `op`, retrying transient failures per `config`.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_network() && attempt + 1 < config.max_attempts => {
                let wait = config.backoff(attempt);
                tracing::debug!(attempt, ?wait, "transient failure, retrying: {err}");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

//! Fixed-delay retry for transient failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use threadvault_shared::{CrawlConfig, Result};

/// How many times to try an operation and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn from_config(config: &CrawlConfig) -> Self {
        Self::new(config.max_attempts, config.retry_delay)
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Only errors whose class is transient are retried. `op` receives the
/// 1-based attempt number.
pub async fn retry_fixed<T, F, Fut>(label: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    target_item = label,
                    attempt,
                    max_attempts,
                    delay_secs = policy.delay.as_secs_f64(),
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(target_item = label, attempts = attempt, error = %e, "retries exhausted");
                }
                return Err(e);
            }
        }
    }
}

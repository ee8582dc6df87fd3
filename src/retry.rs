//! Retry policies for fallible async operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl RetryPolicy {
    /// A single attempt with no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_delay: Duration::ZERO,
        }
    }

    /// One attempt plus exactly one retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 2,
            backoff_delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

/// Runs `operation` until it succeeds or the policy is exhausted.
///
/// Every failed attempt that will be retried is logged as a warning naming
/// `what`. The last error is returned unchanged.
pub async fn retry_async<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!(attempt, "Failed {}: {}. Retrying.", what, err);
                attempt += 1;
                if !policy.backoff_delay.is_zero() {
                    sleep(policy.backoff_delay).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}

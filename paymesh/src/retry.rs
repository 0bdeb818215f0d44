use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::Result;

/// Quadratic backoff: `attempt²` seconds
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt).saturating_pow(2))
}

/// Bounded retry with quadratic backoff scaled by `base`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay unit; `Duration::from_secs(1)` reproduces [`backoff`]
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt.saturating_pow(2))
    }
}

/// Run `op` until it succeeds, fails with an unrecoverable error, or
/// `policy.max_attempts` is exhausted. The last error is returned.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_recoverable() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                error!("{} failed after {} attempts: {}", what, attempt, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    what, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

//! Fixed-delay retry policy for backend calls

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded, fixed-delay retry policy.
///
/// `max_attempts` counts the first call, so `max_attempts = 1` never retries.
/// Errors rejected by the predicate are returned immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    retryable: fn(&Error) -> bool,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            retryable: Error::is_transient,
        }
    }

    /// Never retry
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn with_predicate(mut self, retryable: fn(&Error) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is_retryable(&self, err: &Error) -> bool {
        (self.retryable)(err)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && self.is_retryable(&err) => {
                    debug!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Retrying after error: {}",
                        err
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => {
                    if attempt >= self.max_attempts && self.max_attempts > 1 {
                        warn!(label, attempts = attempt, "Giving up: {}", err);
                    }
                    return Err(err);
                }
            }
        }
    }
}

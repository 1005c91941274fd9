//! Reconnect policy for the initial connect.

use std::future::Future;
use std::time::Duration;

use log::{info, warn};

use crate::error::Result;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,

    /// Delay before the second attempt.
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, initial_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (0 is the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(16)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `attempt` until it succeeds, fails for good, or attempts run out.
    ///
    /// Only errors that report [`is_transient`](crate::Error::is_transient)
    /// are retried; everything else is returned at once.
    pub async fn run<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut n = 1;
        loop {
            match attempt().await {
                Ok(value) => {
                    if n > 1 {
                        info!("{} succeeded on attempt {}/{}", what, n, attempts);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && n < attempts => {
                    let delay = self.backoff(n - 1);
                    warn!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        what, n, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    n += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

//! Bounded retry with exponential backoff.
//!
//! Wraps a single fallible async operation (one backend `send`) and retries
//! it in place. Queue-level retries of whole jobs live in [`crate::queue`];
//! the two layers never share state.

use std::{fmt, future::Future, time::Duration};

use courier_core::Clock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Retry policy for one delivery attempt against one backend.
///
/// Makes up to `max_attempts` calls. After the failure of call `n` (0-based)
/// it waits `base_delay * 2^n` before the next call. There is no jitter and
/// no wait after the final failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of calls, including the first one.
    pub max_attempts: u32,

    /// Delay after the first failure; doubles after each further failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(100) }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and base delay.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay }
    }

    /// Backoff to wait after the failure of the call with this 0-based index.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt_index.min(31));
        self.base_delay.saturating_mul(multiplier)
    }

    /// Runs `operation` until it succeeds or the attempt budget is spent.
    ///
    /// Returns the first success immediately. When every call fails, the
    /// error of the last call is returned unchanged. A zero budget is treated
    /// as a single attempt.
    pub async fn retry<T, E, F, Fut>(&self, clock: &dyn Clock, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt_index = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt_index + 1 >= max_attempts => return Err(error),
                Err(error) => {
                    let delay = self.delay_for(attempt_index);
                    debug!(
                        attempt = attempt_index + 1,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "attempt failed, backing off"
                    );
                    clock.sleep(delay).await;
                    attempt_index += 1;
                },
            }
        }
    }
}

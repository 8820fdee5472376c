//! Retry helpers with exponential backoff.
//!
//! Used by event consumers to ride out transient failures before giving up,
//! and by the webhook delivery worker to compute the schedule for deferred
//! re-attempts.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles each attempt after that
    pub initial_backoff: Duration,
    /// Cap on the exponential growth
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Backoff to wait after the given failed attempt (1-based).
    ///
    /// Attempt 1 waits `initial_backoff`, attempt 2 waits twice that, and
    /// so on, capped at `max_backoff`. Callers that persist a retry
    /// schedule (rather than sleeping in-process) use this to compute the
    /// next due time.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let factor = 1u64 << shift;
        self.initial_backoff
            .checked_mul(factor as u32)
            .map(|d| d.min(self.max_backoff))
            .unwrap_or(self.max_backoff)
    }
}

/// Retry a fallible async operation with exponential backoff.
///
/// Returns the first `Ok`, or the last `Err` once `max_attempts` is
/// exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Send,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        context = %context,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        context = %context,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let backoff = config.backoff_for_attempt(attempt);

                warn!(
                    context = %context,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "Operation failed, retrying with backoff"
                );

                sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn backoff_schedule_doubles_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };

        assert_eq!(config.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.backoff_for_attempt(4), Duration::from_millis(500));
        assert_eq!(config.backoff_for_attempt(10), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retry_succeeds_first_attempt() {
        let config = RetryConfig::default();
        let result =
            retry_with_backoff(|| async { Ok::<_, String>(42) }, &config, "test_operation").await;

        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn retry_succeeds_after_failures() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        };
        let attempts = Arc::new(Mutex::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    let mut count = attempts.lock().unwrap();
                    *count += 1;
                    if *count < 3 {
                        Err(format!("attempt {}", *count))
                    } else {
                        Ok(42)
                    }
                }
            },
            &config,
            "test_operation",
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(*attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn retry_fails_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
        };

        let result = retry_with_backoff(
            || async { Err::<i32, _>("persistent error") },
            &config,
            "test_operation",
        )
        .await;

        assert_eq!(result, Err("persistent error"));
    }
}

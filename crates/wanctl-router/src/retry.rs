//! Retry with exponential backoff for transient router failures.
//!
//! Schedule with the defaults: attempt 1 immediate, attempt 2 after
//! ~1s, attempt 3 after ~2s; each delay gets 0-50% jitter and is capped
//! at 10s. Non-retryable failures surface immediately.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;

use crate::error::RouterError;

/// Backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No retries; for tests and oneshot probes.
    pub fn none() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before the attempt *after* `attempt` (1-based), jittered.
    fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64()
            * self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let jittered = if self.jitter {
            base + base * rand::rng().random_range(0.0..0.5)
        } else {
            base
        };
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `op` under `policy`, retrying transient failures.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RouterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RouterError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        what,
                        attempt,
                        max_attempts = policy.max_attempts,
                        "command succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                tracing::debug!(what, error = %e, "non-retryable failure");
                return Err(e);
            }
            Err(e) if attempt >= policy.max_attempts => {
                tracing::error!(
                    what,
                    attempts = policy.max_attempts,
                    error = %e,
                    "command failed after all attempts"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_s = delay.as_secs_f64(),
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> RouterError {
        RouterError::Timeout {
            timeout: Duration::from_secs(1),
        }
    }

    fn fatal() -> RouterError {
        RouterError::CommandFailed {
            status: 255,
            stderr: "Permission denied (publickey)".into(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(10),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn succeeds_on_later_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_skip_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(fatal()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(5), Duration::from_secs(10));
    }

    #[test]
    fn jitter_stays_within_half_of_base() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.delay_after(1).as_secs_f64();
            assert!((1.0..=1.5).contains(&d), "jittered delay out of range: {d}");
        }
    }
}

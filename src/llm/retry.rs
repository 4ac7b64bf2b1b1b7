//! Retry with exponential backoff for model calls.
//!
//! Transient failures are retried with jittered exponential backoff. Every
//! wait is checked against the task deadline first: if the backoff delay
//! would overrun the deadline, the call fails fast instead of sleeping into
//! a guaranteed timeout.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::client::ModelError;

/// Backoff configuration for transient model failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial call.
    pub max_retries: u32,
    /// Base delay for the first retry.
    pub base: Duration,
    /// Backoff multiplier per attempt.
    pub multiplier: f64,
    /// Jitter ratio applied symmetrically (0.25 = ±25%).
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_ratio: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self {
            max_retries,
            base,
            ..Default::default()
        }
    }

    /// Delay before retry `attempt` (1-based). A server-provided
    /// retry-after hint overrides the computed backoff.
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }
        let exp = self.base.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let jitter = 1.0 + (fastrand::f64() * 2.0 - 1.0) * self.jitter_ratio;
        Duration::from_secs_f64((exp * jitter).max(0.0))
    }

    /// Run `op`, retrying transient failures until the budget or the task
    /// deadline runs out.
    pub async fn run<T, F, Fut>(&self, deadline: Instant, mut op: F) -> Result<T, ModelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if Instant::now() >= deadline {
                return Err(ModelError::DeadlineExceeded);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay(attempt, err.retry_after());
                    if Instant::now() + delay >= deadline {
                        debug!(attempt, "backoff would overrun task deadline, failing fast");
                        return Err(ModelError::DeadlineExceeded);
                    }
                    debug!(attempt, ?delay, error = %err, "retrying model call");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_exponentially_with_jitter() {
        let policy = RetryPolicy::default();
        for attempt in 1..=3u32 {
            let expected = 1.0 * 2f64.powi(attempt as i32 - 1);
            let delay = policy.delay(attempt, None).as_secs_f64();
            assert!(delay >= expected * 0.75 - 1e-9, "attempt {attempt}: {delay}");
            assert!(delay <= expected * 1.25 + 1e-9, "attempt {attempt}: {delay}");
        }
    }

    #[test]
    fn test_delay_honors_hint() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay(1, Some(Duration::from_millis(1500))),
            Duration::from_millis(1500)
        );
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_secs(5);
        let result: Result<(), _> = policy
            .run(deadline, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ModelError::InvalidRequest("bad payload".into())) }
            })
            .await;
        assert!(matches!(result, Err(ModelError::InvalidRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_secs(5);
        let result = policy
            .run(deadline, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ModelError::Connection("reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_secs(5);
        let result: Result<(), _> = policy
            .run(deadline, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ModelError::Api {
                        status: 503,
                        message: "overloaded".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(ModelError::Api { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deadline_prevents_backoff_sleep() {
        let policy = RetryPolicy::new(5, Duration::from_secs(10));
        let calls = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_millis(50);
        let started = std::time::Instant::now();
        let result: Result<(), _> = policy
            .run(deadline, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ModelError::Connection("down".into())) }
            })
            .await;
        assert!(matches!(result, Err(ModelError::DeadlineExceeded)));
        // Failed fast instead of sleeping the 10 s backoff.
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Bounded exponential backoff for transient failures.
//!
//! Fetches inside a cycle retry through [`with_retry`]; the worker loop
//! reuses [`RetryConfig::delay_for_attempt`] to space out whole cycles
//! after consecutive failures. Both paths share the same cap so a flaky
//! upstream never pushes delays past a known bound.

use std::future::Future;
use std::time::Duration;

/// Backoff strategy for retries.
#[derive(Clone, Debug, Default)]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed,
    /// Exponential backoff with jitter: delay = min(base * 2^attempt + jitter, max).
    #[default]
    ExponentialWithJitter,
}

/// Retry configuration.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first (1 = no retries).
    pub max_attempts: u32,
    /// Base delay, doubled per attempt under exponential backoff.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3, // 1 initial + 2 retries
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            backoff: BackoffStrategy::ExponentialWithJitter,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            base,
            cap,
            backoff: BackoffStrategy::ExponentialWithJitter,
        }
    }

    /// Delay before retrying after the given zero-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match &self.backoff {
            BackoffStrategy::Fixed => self.base.min(self.cap),
            BackoffStrategy::ExponentialWithJitter => {
                let base_ms = self.base.as_millis() as u64;
                let cap_ms = self.cap.as_millis() as u64;
                let backed = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
                let total = backed.saturating_add(random_jitter(backed / 2)).min(cap_ms);
                Duration::from_millis(total)
            }
        }
    }
}

/// Random jitter in `0..=max_jitter`.
fn random_jitter(max_jitter: u64) -> u64 {
    if max_jitter == 0 {
        return 0;
    }
    use rand::Rng;
    rand::thread_rng().gen_range(0..=max_jitter)
}

/// Trait for errors that may be retryable.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// Execute an async operation with retries.
/// Only retries on transient errors (as determined by the [`IsRetryable`] impl).
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error: Option<E> = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = config.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    max = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient error"
                );
                last_error = Some(e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.expect("retry loop should have returned an error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            backoff: BackoffStrategy::Fixed,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let call_count = Arc::new(AtomicU32::new(0));
        let count = call_count.clone();

        let result: Result<&str, TestError> = with_retry(&fast_config(3), || {
            count.fetch_add(1, Ordering::SeqCst);
            async { Ok("success") }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_on_transient_error() {
        let call_count = Arc::new(AtomicU32::new(0));
        let count = call_count.clone();

        let result: Result<&str, TestError> = with_retry(&fast_config(3), || {
            let attempt = count.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(TestError { retryable: true })
                } else {
                    Ok("success after retries")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success after retries");
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_error() {
        let call_count = Arc::new(AtomicU32::new(0));
        let count = call_count.clone();

        let result: Result<&str, TestError> = with_retry(&fast_config(3), || {
            count.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { retryable: false }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_are_clamped_to_one() {
        let call_count = Arc::new(AtomicU32::new(0));
        let count = call_count.clone();

        let result: Result<&str, TestError> = with_retry(&fast_config(0), || {
            count.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { retryable: true }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exponential_delays_grow_and_cap() {
        let config = RetryConfig::new(5, Duration::from_millis(100), Duration::from_secs(1));

        // attempt 0: 100ms base + jitter up to 50ms
        let d0 = config.delay_for_attempt(0);
        assert!(d0 >= Duration::from_millis(100) && d0 <= Duration::from_millis(150));

        // attempt 2: 400ms base + jitter up to 200ms
        let d2 = config.delay_for_attempt(2);
        assert!(d2 >= Duration::from_millis(400) && d2 <= Duration::from_millis(600));

        // far attempts saturate at the cap
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }
}

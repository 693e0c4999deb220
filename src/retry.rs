//! Timeout and retry combinators
//!
//! Both are stateless and wrap any async call, including pool operations:
//!
//! ```
//! use esox_resilience::{with_retry, with_timeout, PoolError, RetryPolicy};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let policy = RetryPolicy::new()
//!     .with_max_attempts(3)
//!     .with_base_delay(Duration::from_millis(1));
//!
//! let value = with_retry(&policy, PoolError::is_transient, || {
//!     with_timeout(Duration::from_secs(1), async { Ok::<_, PoolError>(42) })
//! })
//! .await;
//! assert_eq!(value, Ok(42));
//! # }
//! ```

use crate::errors::PoolError;

use std::future::Future;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Exponential backoff settings for [`with_retry`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryPolicy {
    /// Total number of attempts, the first call included
    pub max_attempts: usize,

    /// Delay after the first failed attempt
    pub base_delay: Duration,

    /// Multiplier applied to the delay after every further failure
    pub backoff_factor: f64,

    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to sleep after the given failed attempt (1-based)
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resilience::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::new().with_max_delay(Duration::from_secs(3));
    /// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
    /// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
    /// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(3));
    /// ```
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let factor = self.backoff_factor.max(1.0).powi(exponent);
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Run `fut`, abandoning it once `duration` has passed.
///
/// The future is dropped on timeout, which cancels the underlying work, and
/// [`PoolError::Timeout`] is returned through the caller's error type.
pub async fn with_timeout<F, T, E>(duration: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<PoolError>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(PoolError::Timeout(duration).into()),
    }
}

/// Call `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts. The last error is returned in the latter case.
pub async fn with_retry<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_retryable(&err) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapses() {
        let result: Result<(), PoolError> = with_timeout(Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(PoolError::Timeout(Duration::from_millis(100))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_work() {
        let finished = AtomicUsize::new(0);
        let _: Result<(), PoolError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success_with_backoff() {
        let calls = &AtomicUsize::new(0);
        let policy = RetryPolicy::new()
            .with_max_attempts(4)
            .with_base_delay(Duration::from_millis(100));
        let start = Instant::now();

        let result = with_retry(&policy, PoolError::is_transient, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(PoolError::factory("refused"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(310));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_returns_last_error() {
        let calls = &AtomicUsize::new(0);
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(10));

        let result: Result<(), PoolError> = with_retry(&policy, PoolError::is_transient, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(PoolError::factory(format!("attempt {n}")))
        })
        .await;

        assert_eq!(result, Err(PoolError::factory("attempt 2")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = &AtomicUsize::new(0);
        let policy = RetryPolicy::new().with_max_attempts(5);

        let result: Result<(), PoolError> = with_retry(&policy, PoolError::is_transient, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PoolError::PoolClosed)
        })
        .await;

        assert_eq!(result, Err(PoolError::PoolClosed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_secs(1))
            .with_backoff_factor(2.0)
            .with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(100), Duration::from_secs(5));
    }
}

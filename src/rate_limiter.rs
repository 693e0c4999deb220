//! Sliding-window rate limiting

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window rate limiter
///
/// At most `max_calls` calls are admitted within any trailing `time_window`.
///
/// # Examples
///
/// ```
/// use esox_resilience::RateLimiter;
/// use std::time::Duration;
///
/// let limiter = RateLimiter::new(2, Duration::from_secs(1));
/// assert!(limiter.try_acquire());
/// assert!(limiter.try_acquire());
/// assert!(!limiter.can_make_call());
/// assert_eq!(limiter.remaining_calls(), 0);
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    time_window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter. A `max_calls` of zero is treated as one.
    pub fn new(max_calls: usize, time_window: Duration) -> Self {
        let max_calls = max_calls.max(1);
        Self {
            max_calls,
            time_window,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    /// Wait until a slot is free in the trailing window, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_record() {
                Ok(()) => return,
                Err(wait) => wait,
            };
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            // The lock is released here; the slot is re-checked after waking
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a slot if one is free, without waiting
    pub fn try_acquire(&self) -> bool {
        self.try_record().is_ok()
    }

    /// Whether a call right now would be admitted
    pub fn can_make_call(&self) -> bool {
        if self.time_window.is_zero() {
            return true;
        }
        let mut calls = self.calls.lock();
        Self::prune(&mut calls, Instant::now(), self.time_window);
        calls.len() < self.max_calls
    }

    /// Number of calls that would be admitted right now
    pub fn remaining_calls(&self) -> usize {
        if self.time_window.is_zero() {
            return self.max_calls;
        }
        let mut calls = self.calls.lock();
        Self::prune(&mut calls, Instant::now(), self.time_window);
        self.max_calls.saturating_sub(calls.len())
    }

    /// Forget all recorded calls
    pub fn reset(&self) {
        self.calls.lock().clear();
    }

    /// Timestamps currently counted against the window, oldest first
    pub fn recorded_calls(&self) -> Vec<Instant> {
        let mut calls = self.calls.lock();
        Self::prune(&mut calls, Instant::now(), self.time_window);
        calls.iter().copied().collect()
    }

    /// Record a call if there is room, otherwise return how long to wait
    fn try_record(&self) -> Result<(), Duration> {
        if self.time_window.is_zero() {
            return Ok(());
        }

        let now = Instant::now();
        let mut calls = self.calls.lock();
        Self::prune(&mut calls, now, self.time_window);

        if calls.len() < self.max_calls {
            calls.push_back(now);
            return Ok(());
        }

        let wait = calls
            .front()
            .map(|oldest| self.time_window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or_default();
        // Never spin on a zero wait
        Err(wait.max(Duration::from_millis(1)))
    }

    fn prune(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = calls.front() {
            if now.duration_since(*oldest) >= window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}

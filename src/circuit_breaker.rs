//! Circuit breaker pattern implementation

use crate::config::CircuitBreakerConfig;
use crate::errors::PoolError;

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Circuit breaker state
///
/// # Examples
///
/// ```
/// use esox_resilience::{CircuitBreaker, CircuitBreakerState};
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
/// assert_eq!(breaker.state(), CircuitBreakerState::Closed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum CircuitBreakerState {
    /// Circuit is closed - normal operation
    Closed,

    /// Circuit is open - failing fast
    Open,

    /// Circuit is half-open - testing recovery
    HalfOpen,
}

/// Point-in-time view of a breaker, for health endpoints
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CircuitBreakerStatus {
    pub state: CircuitBreakerState,
    pub failure_count: usize,
    pub failure_threshold: usize,
    pub half_open_successes: usize,
    pub recovery_timeout: Duration,
    pub time_since_last_failure: Option<Duration>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: usize,
    half_open_successes: usize,
    last_failure_time: Option<Instant>,
}

/// Circuit breaker for protecting against cascading failures
///
/// All transitions happen under one mutex, so a caller never observes a
/// half-applied transition.
///
/// # Examples
///
/// ```
/// use esox_resilience::CircuitBreaker;
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
///
/// // Record failures
/// breaker.record_failure();
/// breaker.record_failure();
/// breaker.record_failure();
///
/// // Circuit should be open after threshold
/// assert!(!breaker.can_execute());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(failure_threshold: usize, recovery_timeout: Duration) -> Self {
        Self::with_config(
            "default",
            CircuitBreakerConfig::new()
                .with_failure_threshold(failure_threshold)
                .with_recovery_timeout(recovery_timeout),
        )
    }

    /// Create a named circuit breaker from a full configuration
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                half_open_successes: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Get the current state
    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    /// Consecutive failures recorded since the last success
    pub fn failure_count(&self) -> usize {
        self.inner.lock().failure_count
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether a call may go through.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// here and lets the call through as a trial.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|time| time.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitBreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    tracing::info!(breaker = %self.name, "Circuit breaker half-open, allowing trial call");
                }
                elapsed
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitBreakerState::Closed => {
                inner.failure_count = 0;
            }
            CircuitBreakerState::HalfOpen => {
                inner.failure_count = 0;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitBreakerState::Closed;
                    inner.half_open_successes = 0;
                    tracing::info!(breaker = %self.name, "Circuit breaker closed");
                }
            }
            CircuitBreakerState::Open => {}
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitBreakerState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitBreakerState::Open;
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitBreakerState::HalfOpen => {
                // Any failure in half-open immediately opens the circuit
                inner.state = CircuitBreakerState::Open;
                inner.half_open_successes = 0;
                tracing::warn!(breaker = %self.name, "Trial call failed, circuit breaker re-opened");
            }
            CircuitBreakerState::Open => {}
        }
    }

    /// Run `op` through the breaker.
    ///
    /// Fails fast with [`PoolError::CircuitOpen`] while the circuit is open.
    /// The call is bounded by `call_timeout`; a timeout counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<PoolError>,
    {
        if !self.can_execute() {
            return Err(PoolError::CircuitOpen.into());
        }

        match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure();
                Err(err)
            }
            Err(_) => {
                self.record_failure();
                Err(PoolError::Timeout(self.config.call_timeout).into())
            }
        }
    }

    /// Snapshot for health reporting
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.inner.lock();
        CircuitBreakerStatus {
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            half_open_successes: inner.half_open_successes,
            recovery_timeout: self.config.recovery_timeout,
            time_since_last_failure: inner.last_failure_time.map(|time| time.elapsed()),
        }
    }

    /// Reset the circuit breaker
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitBreakerState::Closed;
        inner.failure_count = 0;
        inner.half_open_successes = 0;
        inner.last_failure_time = None;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_config("default", CircuitBreakerConfig::default())
    }
}

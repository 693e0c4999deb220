//! Pool and circuit breaker configuration options

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for a [`CircuitBreaker`](crate::CircuitBreaker)
///
/// # Examples
///
/// ```
/// use esox_resilience::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::new()
///     .with_failure_threshold(3)
///     .with_recovery_timeout(Duration::from_secs(10));
///
/// assert_eq!(config.failure_threshold, 3);
/// assert_eq!(config.success_threshold, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: usize,

    /// Consecutive half-open successes that close the circuit again
    pub success_threshold: usize,

    /// How long the circuit stays open before a trial call is allowed
    pub recovery_timeout: Duration,

    /// Upper bound for a single call made through the breaker
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Check the values for consistency
    pub fn validate(&self) -> PoolResult<()> {
        if self.failure_threshold == 0 {
            return Err(PoolError::InvalidConfiguration(
                "circuit breaker failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(PoolError::InvalidConfiguration(
                "circuit breaker success_threshold must be greater than 0".to_string(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "circuit breaker call_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for connection pool behavior
///
/// # Examples
///
/// ```
/// use esox_resilience::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_size(20)
///     .with_min_size(2)
///     .with_acquire_timeout(Duration::from_secs(5))
///     .with_retry_delays(Duration::from_millis(500), Duration::from_secs(30));
///
/// assert_eq!(config.max_size, 20);
/// assert_eq!(config.min_size, 2);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Maximum number of resources (active + available)
    pub max_size: usize,

    /// Number of resources created on initialization
    pub min_size: usize,

    /// First delay of the recovery backoff
    pub base_retry_delay: Duration,

    /// Cap for the recovery backoff
    pub max_retry_delay: Duration,

    /// Recovery attempts before the recovery loop cools down
    pub max_reconnect_attempts: usize,

    /// Pause after `max_reconnect_attempts` failed recoveries
    pub reconnect_cooldown: Duration,

    /// How often the recovery loop looks at a healthy pool
    pub recovery_check_interval: Duration,

    /// Interval between liveness probes
    pub health_check_interval: Duration,

    /// Bound for waiting on a free resource
    pub acquire_timeout: Duration,

    /// Bound for a single factory `create` call
    pub create_timeout: Duration,

    /// Bound for a single factory `destroy` call
    pub destroy_timeout: Duration,

    /// Settings of the embedded circuit breaker
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_size: 1,
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(60),
            max_reconnect_attempts: 10,
            reconnect_cooldown: Duration::from_secs(300),
            recovery_check_interval: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(30),
            create_timeout: Duration::from_secs(10),
            destroy_timeout: Duration::from_secs(5),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resilience::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_size(50);
    /// assert_eq!(config.max_size, 50);
    /// ```
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the number of resources kept warm
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set the recovery backoff range
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_retry_delay = base;
        self.max_retry_delay = max;
        self
    }

    /// Set the reconnect ceiling and the cooldown that follows it
    pub fn with_reconnect_limit(mut self, attempts: usize, cooldown: Duration) -> Self {
        self.max_reconnect_attempts = attempts;
        self.reconnect_cooldown = cooldown;
        self
    }

    pub fn with_recovery_check_interval(mut self, interval: Duration) -> Self {
        self.recovery_check_interval = interval;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    pub fn with_destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    /// Replace the embedded circuit breaker settings
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Check the values for consistency
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_size == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_size must be greater than 0".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(PoolError::InvalidConfiguration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.base_retry_delay > self.max_retry_delay {
            return Err(PoolError::InvalidConfiguration(
                "base_retry_delay must not exceed max_retry_delay".to_string(),
            ));
        }
        let timeouts = [
            ("acquire_timeout", self.acquire_timeout),
            ("create_timeout", self.create_timeout),
            ("destroy_timeout", self.destroy_timeout),
            ("health_check_interval", self.health_check_interval),
            ("recovery_check_interval", self.recovery_check_interval),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(PoolError::InvalidConfiguration(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        self.circuit_breaker.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PoolConfiguration::default().validate().is_ok());
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = PoolConfiguration::new().with_max_size(2).with_min_size(3);
        assert!(matches!(
            config.validate(),
            Err(PoolError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = PoolConfiguration::new().with_create_timeout(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("create_timeout"));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = PoolConfiguration::new()
            .with_circuit_breaker(CircuitBreakerConfig::new().with_failure_threshold(0));
        assert!(config.validate().is_err());
    }
}

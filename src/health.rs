//! Health and status reporting for connection pools

use crate::circuit_breaker::{CircuitBreakerState, CircuitBreakerStatus};

use std::time::{Duration, SystemTime};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Resource counts of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConnectionCounts {
    /// Resources currently checked out
    pub active: usize,

    /// Idle resources waiting in the queue
    pub available: usize,

    /// Active + available + creations in flight
    pub total: usize,

    pub max: usize,
    pub min: usize,
}

/// Failure bookkeeping that drives the recovery loop
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecoveryMetrics {
    pub consecutive_failures: usize,

    /// Delay the recovery loop waits after its next failed attempt
    pub current_retry_delay: Duration,

    pub last_failure_time: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MonitoringInfo {
    /// Last successful liveness probe
    pub last_health_check: Option<SystemTime>,
    pub health_check_interval: Duration,
}

/// Liveness of the two supervised loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BackgroundTasks {
    pub recovery_running: bool,
    pub health_monitor_running: bool,
}

/// Full status of a connection pool, as consumed by health endpoints
///
/// # Examples
///
/// ```
/// use esox_resilience::{ConnectionPool, FnFactory, PoolConfiguration, PoolError};
///
/// # #[tokio::main]
/// # async fn main() {
/// let factory = FnFactory::new(
///     || async { Ok::<_, PoolError>(1u32) },
///     |_: u32| async { Ok::<_, PoolError>(()) },
/// );
/// let pool = ConnectionPool::new("example", factory, PoolConfiguration::default()).unwrap();
/// pool.initialize().await.unwrap();
///
/// let status = pool.status();
/// assert!(status.healthy);
/// assert!(status.is_operational());
/// assert_eq!(status.connections.available, 1);
/// pool.close().await;
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolStatus {
    pub name: String,
    pub healthy: bool,
    pub closed: bool,
    pub initialized: bool,

    /// A re-initialization is running right now
    pub recovering: bool,

    pub connections: ConnectionCounts,
    pub recovery: RecoveryMetrics,
    pub monitoring: MonitoringInfo,
    pub background_tasks: BackgroundTasks,
    pub circuit_breaker: CircuitBreakerStatus,
}

impl PoolStatus {
    /// Whether acquisitions are expected to succeed right now
    pub fn is_operational(&self) -> bool {
        self.healthy
            && !self.closed
            && self.circuit_breaker.state != CircuitBreakerState::Open
    }

    /// Current pool utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.connections.max > 0 {
            self.connections.active as f64 / self.connections.max as f64
        } else {
            0.0
        }
    }

    /// Human-readable problems, empty for a pool in good shape
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.closed {
            warnings.push("Pool is closed".to_string());
        } else if !self.healthy {
            warnings.push(format!(
                "Pool is unhealthy after {} consecutive failures",
                self.recovery.consecutive_failures
            ));
        }

        if self.recovering {
            warnings.push("Recovery in progress".to_string());
        }

        match self.circuit_breaker.state {
            CircuitBreakerState::Open => warnings.push("Circuit breaker is open".to_string()),
            CircuitBreakerState::HalfOpen => {
                warnings.push("Circuit breaker is half-open".to_string())
            }
            CircuitBreakerState::Closed => {}
        }

        let utilization = self.utilization();
        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
        }

        if self.initialized && !self.closed {
            if !self.background_tasks.recovery_running {
                warnings.push("Recovery loop is not running".to_string());
            }
            if !self.background_tasks.health_monitor_running {
                warnings.push("Health monitor is not running".to_string());
            }
        }

        warnings
    }
}

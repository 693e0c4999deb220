//! Metrics collection and export for connection pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Metrics data for a pool
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
///
/// {
///     let _conn = pool.acquire().await.unwrap();
///     let metrics = pool.metrics();
///     assert_eq!(metrics.total_acquired, 1);
///     assert_eq!(metrics.active_connections, 1);
/// }
/// pool.close().await;
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolMetrics {
    /// Total resources handed out
    pub total_acquired: u64,

    /// Total resources given back
    pub total_released: u64,

    /// Resources created by the factory
    pub total_created: u64,

    /// Resources destroyed through the factory
    pub total_destroyed: u64,

    /// Failed or timed out `create` calls
    pub creation_failures: u64,

    /// Acquisitions that gave up waiting
    pub acquire_timeouts: u64,

    pub health_checks_passed: u64,
    pub health_checks_failed: u64,

    /// Successful re-initializations
    pub recoveries: u64,

    /// Current active resources
    pub active_connections: usize,

    /// Current available resources
    pub available_connections: usize,

    /// Pool utilization ratio (0.0 to 1.0)
    pub utilization: f64,

    /// Maximum pool size
    pub max_size: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("acquire_timeouts".to_string(), self.acquire_timeouts.to_string());
        metrics.insert("health_checks_passed".to_string(), self.health_checks_passed.to_string());
        metrics.insert("health_checks_failed".to_string(), self.health_checks_failed.to_string());
        metrics.insert("recoveries".to_string(), self.recoveries.to_string());
        metrics.insert("active_connections".to_string(), self.active_connections.to_string());
        metrics.insert("available_connections".to_string(), self.available_connections.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_size".to_string(), self.max_size.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "prometheus")]
pub struct MetricsExporter;

#[cfg(feature = "prometheus")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_resilience::{ConnectionPool, FnFactory, PoolConfiguration, PoolError};
    /// use std::collections::HashMap;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let factory = FnFactory::new(
    ///     || async { Ok::<_, PoolError>(1u32) },
    ///     |_: u32| async { Ok::<_, PoolError>(()) },
    /// );
    /// let pool = ConnectionPool::new("db", factory, PoolConfiguration::default()).unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus(Some(&tags)).unwrap();
    /// assert!(output.contains("resilience_pool_connections_active"));
    /// assert!(output.contains("service=\"api\""));
    /// # }
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let registry = Registry::new();
        let opts = |name: &str, help: &str| {
            let mut opts = Opts::new(name, help).const_label("pool", pool_name);
            if let Some(tags) = tags {
                for (key, value) in tags {
                    opts = opts.const_label(key.as_str(), value.as_str());
                }
            }
            opts
        };

        let gauges = [
            ("resilience_pool_connections_active", "Current active connections", metrics.active_connections),
            ("resilience_pool_connections_available", "Current available connections", metrics.available_connections),
            ("resilience_pool_connections_max", "Maximum pool size", metrics.max_size),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(opts(name, help))?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(opts("resilience_pool_utilization", "Pool utilization ratio"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let counters = [
            ("resilience_pool_acquired_total", "Total connections acquired", metrics.total_acquired),
            ("resilience_pool_released_total", "Total connections released", metrics.total_released),
            ("resilience_pool_created_total", "Total connections created", metrics.total_created),
            ("resilience_pool_destroyed_total", "Total connections destroyed", metrics.total_destroyed),
            ("resilience_pool_creation_failures_total", "Failed connection creations", metrics.creation_failures),
            ("resilience_pool_acquire_timeouts_total", "Acquisitions that timed out", metrics.acquire_timeouts),
            ("resilience_pool_health_checks_passed_total", "Passed liveness probes", metrics.health_checks_passed),
            ("resilience_pool_health_checks_failed_total", "Failed liveness probes", metrics.health_checks_failed),
            ("resilience_pool_recoveries_total", "Successful re-initializations", metrics.recoveries),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help))?;
            counter.inc_by(value);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    pub acquired: AtomicU64,
    pub released: AtomicU64,
    pub created: AtomicU64,
    pub destroyed: AtomicU64,
    pub creation_failures: AtomicU64,
    pub acquire_timeouts: AtomicU64,
    pub health_checks_passed: AtomicU64,
    pub health_checks_failed: AtomicU64,
    pub recoveries: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, active: usize, available: usize, max_size: usize) -> PoolMetrics {
        let utilization = if max_size > 0 {
            active as f64 / max_size as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_acquired: self.acquired.load(Ordering::Relaxed),
            total_released: self.released.load(Ordering::Relaxed),
            total_created: self.created.load(Ordering::Relaxed),
            total_destroyed: self.destroyed.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            health_checks_passed: self.health_checks_passed.load(Ordering::Relaxed),
            health_checks_failed: self.health_checks_failed.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            active_connections: active,
            available_connections: available,
            utilization,
            max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_export() {
        let tracker = MetricsTracker::new();
        MetricsTracker::incr(&tracker.acquired);
        MetricsTracker::incr(&tracker.acquired);
        MetricsTracker::incr(&tracker.created);

        let metrics = tracker.get_metrics(1, 3, 4);
        assert_eq!(metrics.total_acquired, 2);
        assert_eq!(metrics.total_created, 1);
        assert!((metrics.utilization - 0.25).abs() < f64::EPSILON);

        let exported = metrics.export();
        assert_eq!(exported.get("total_acquired").map(String::as_str), Some("2"));
        assert_eq!(exported.get("utilization").map(String::as_str), Some("0.25"));
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_prometheus_export() {
        let tracker = MetricsTracker::new();
        MetricsTracker::incr(&tracker.recoveries);
        let metrics = tracker.get_metrics(2, 1, 5);

        let output = MetricsExporter::export_prometheus(&metrics, "orders", None).unwrap();
        assert!(output.contains("# TYPE resilience_pool_connections_active gauge"));
        assert!(output.contains("resilience_pool_connections_active{pool=\"orders\"} 2"));
        assert!(output.contains("resilience_pool_recoveries_total{pool=\"orders\"} 1"));
    }
}

//! # Esox Resilience
//!
//! Resilience primitives for async Rust services: a self-healing connection
//! pool, a circuit breaker, a sliding-window rate limiter, retry with
//! exponential backoff, a bounded task pool, and a registry for coordinated
//! resource cleanup at shutdown.
//!
//! ## Features
//!
//! - Bounded pool of factory-created resources with RAII return (Drop trait)
//! - Background recovery with exponential backoff and a reconnect ceiling
//! - Periodic liveness probes and a full status snapshot for health endpoints
//! - Circuit breaker gating resource creation
//! - Sliding-window rate limiting
//! - Retry and timeout helpers
//! - Concurrency-bounded task execution with graceful shutdown
//! - Prometheus metrics export
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_resilience::{ConnectionPool, FnFactory, PoolConfiguration, PoolError};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), PoolError> {
//! let factory = FnFactory::new(
//!     || async { Ok::<_, PoolError>(String::from("connection")) },
//!     |_conn: String| async { Ok::<_, PoolError>(()) },
//! );
//! let pool = ConnectionPool::new("db", factory, PoolConfiguration::default())?;
//! pool.initialize().await?;
//! {
//!     let conn = pool.acquire().await?;
//!     println!("Got: {}", *conn);
//!     // Connection automatically returned when `conn` goes out of scope
//! }
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

mod circuit_breaker;
mod config;
mod errors;
mod factory;
mod health;
mod metrics;
mod pool;
mod rate_limiter;
mod recovery;
mod resource_manager;
mod retry;
mod task_pool;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitBreakerStatus};
pub use config::{CircuitBreakerConfig, PoolConfiguration};
pub use errors::{PoolError, PoolResult};
pub use factory::{FnFactory, ResourceFactory};
pub use health::{BackgroundTasks, ConnectionCounts, MonitoringInfo, PoolStatus, RecoveryMetrics};
#[cfg(feature = "prometheus")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{ConnectionPool, PooledConnection};
pub use rate_limiter::RateLimiter;
pub use resource_manager::{CleanupReport, ResourceId, ResourceManager};
pub use retry::{with_retry, with_timeout, RetryPolicy};
pub use task_pool::{TaskId, TaskPool};

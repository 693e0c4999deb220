// Esox Resilience demo
// Wires a pool, rate limiter, task pool and resource manager together
// against a simulated backend that can be switched off.

use async_trait::async_trait;
use esox_resilience::{
    with_retry, ConnectionPool, PoolConfiguration, PoolError, PoolResult, RateLimiter,
    ResourceFactory, ResourceManager, RetryPolicy, TaskPool,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pretends to open connections to a backend that may be down
struct SimulatedBackend {
    up: Arc<AtomicBool>,
    next_id: AtomicU64,
}

#[async_trait]
impl ResourceFactory for SimulatedBackend {
    type Resource = String;

    async fn create(&self) -> PoolResult<String> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if !self.up.load(Ordering::SeqCst) {
            return Err(PoolError::factory("backend unreachable"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(format!("conn-{id}"))
    }

    async fn destroy(&self, _conn: String) -> PoolResult<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), PoolError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Esox Resilience v{} ===", env!("CARGO_PKG_VERSION"));

    let up = Arc::new(AtomicBool::new(true));
    let backend = SimulatedBackend {
        up: Arc::clone(&up),
        next_id: AtomicU64::new(1),
    };
    let config = PoolConfiguration::new()
        .with_min_size(1)
        .with_max_size(3)
        .with_retry_delays(Duration::from_millis(100), Duration::from_secs(2))
        .with_health_check_interval(Duration::from_secs(1))
        .with_acquire_timeout(Duration::from_secs(2));

    let pool = Arc::new(ConnectionPool::new("demo", backend, config)?);
    let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(1)));
    let tasks = Arc::new(TaskPool::new("demo-workers", 2));
    let resources = ResourceManager::new();

    let for_cleanup = Arc::clone(&pool);
    resources.register_with_cleanup(&for_cleanup, |pool| async move {
        pool.close().await;
        Ok(())
    });

    pool.initialize().await?;

    println!("\nRunning 6 rate-limited queries on 2 workers:");
    let mut handles = Vec::new();
    for query in 0..6 {
        let pool = Arc::clone(&pool);
        let limiter = Arc::clone(&limiter);
        let tasks = Arc::clone(&tasks);
        handles.push(tokio::spawn(async move {
            tasks
                .submit(async move {
                    limiter.acquire().await;
                    let conn = pool.acquire().await?;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, PoolError>(format!("query {query} on {}", *conn))
                })
                .await?
        }));
    }
    for handle in handles {
        match handle.await {
            Ok(Ok(line)) => println!("  {line}"),
            Ok(Err(err)) => println!("  query failed: {err}"),
            Err(err) => println!("  worker panicked: {err}"),
        }
    }

    println!("\nSimulating an outage:");
    up.store(false, Ordering::SeqCst);
    pool.close().await;
    match pool.acquire().await {
        Ok(_) => println!("  unexpected connection during outage"),
        Err(err) => println!("  acquire while down: {err}"),
    }

    up.store(true, Ordering::SeqCst);
    let policy = RetryPolicy::new()
        .with_max_attempts(5)
        .with_base_delay(Duration::from_millis(50));
    let conn = with_retry(&policy, PoolError::is_transient, || pool.acquire()).await;
    match conn {
        Ok(conn) => println!("  back online with {}", *conn),
        Err(err) => println!("  still down: {err}"),
    }

    let status = pool.status();
    println!("\nPool status:");
    println!("  healthy: {}", status.healthy);
    println!("  operational: {}", status.is_operational());
    println!(
        "  connections: {} active, {} available, max {}",
        status.connections.active, status.connections.available, status.connections.max
    );
    println!("  breaker: {:?}", status.circuit_breaker.state);
    for warning in status.warnings() {
        println!("  warning: {warning}");
    }

    #[cfg(feature = "prometheus")]
    match pool.export_metrics_prometheus(None) {
        Ok(text) => println!("\nMetrics:\n{text}"),
        Err(err) => println!("\nMetrics export failed: {err}"),
    }

    let drained = tasks.shutdown(Duration::from_secs(1)).await;
    let report = resources.cleanup_all().await;
    println!(
        "Shutdown: tasks drained = {drained}, cleanups ok = {}, failed = {}",
        report.succeeded, report.failed
    );

    Ok(())
}

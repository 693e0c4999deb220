//! Pool recovery examples

use async_trait::async_trait;
use esox_resilience::{ConnectionPool, PoolConfiguration, PoolError, PoolResult, ResourceFactory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// A database that can be taken offline
#[derive(Clone, Default)]
struct FlakyDatabase {
    down: Arc<AtomicBool>,
}

impl FlakyDatabase {
    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceFactory for FlakyDatabase {
    type Resource = u32;

    async fn create(&self) -> PoolResult<u32> {
        if self.down.load(Ordering::SeqCst) {
            Err(PoolError::factory("database unreachable"))
        } else {
            Ok(7)
        }
    }

    async fn destroy(&self, _conn: u32) -> PoolResult<()> {
        Ok(())
    }
}

fn fast_config() -> PoolConfiguration {
    PoolConfiguration::new()
        .with_retry_delays(Duration::from_millis(100), Duration::from_millis(800))
        .with_recovery_check_interval(Duration::from_millis(100))
        .with_health_check_interval(Duration::from_millis(200))
}

#[tokio::main]
async fn main() {
    println!("=== Esox Resilience - Pool Recovery Examples ===\n");

    // Example 1: Background recovery after an outage
    background_recovery().await;

    // Example 2: Reopen a closed pool on the next acquire
    reopen_on_acquire().await;

    // Example 3: Manual override
    force_reopen().await;
}

async fn background_recovery() {
    println!("1. Background Recovery:");
    let db = FlakyDatabase::default();
    db.set_down(true);
    let pool = ConnectionPool::new("orders", db.clone(), fast_config()).unwrap();

    if let Err(err) = pool.initialize().await {
        println!("   Initialize failed: {err}");
    }
    sleep(Duration::from_millis(500)).await;
    let status = pool.status();
    println!(
        "   While down: healthy={}, failures={}, next delay={:?}",
        status.healthy, status.recovery.consecutive_failures, status.recovery.current_retry_delay
    );

    db.set_down(false);
    sleep(Duration::from_secs(1)).await;
    println!("   After the outage: healthy={}", pool.is_healthy());
    pool.close().await;
    println!();
}

async fn reopen_on_acquire() {
    println!("2. Reopen On Acquire:");
    let pool = ConnectionPool::new("orders", FlakyDatabase::default(), fast_config()).unwrap();
    pool.initialize().await.unwrap();

    pool.close().await;
    println!("   Closed: {}", pool.is_closed());

    {
        let conn = pool.acquire().await.unwrap();
        println!("   Acquired {} without reopening by hand", *conn);
    }
    println!("   Closed: {}", pool.is_closed());
    pool.close().await;
    println!();
}

async fn force_reopen() {
    println!("3. Force Reopen:");
    let db = FlakyDatabase::default();
    db.set_down(true);
    let config = fast_config().with_retry_delays(Duration::from_secs(30), Duration::from_secs(60));
    let pool = ConnectionPool::new("orders", db.clone(), config).unwrap();

    let _ = pool.initialize().await;
    db.set_down(false);
    match pool.force_reopen().await {
        Ok(()) => println!("   Reopened without waiting 30s: healthy={}", pool.is_healthy()),
        Err(err) => println!("   Reopen failed: {err}"),
    }
    pool.close().await;
}

//! Task pool and shutdown examples

use esox_resilience::{ResourceManager, TaskPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[tokio::main]
async fn main() {
    println!("=== Esox Resilience - Task Pool Examples ===\n");

    // Example 1: Bounded concurrency
    bounded_concurrency().await;

    // Example 2: Graceful shutdown with cleanup
    graceful_shutdown().await;
}

async fn bounded_concurrency() {
    println!("1. Bounded Concurrency:");
    let pool = Arc::new(TaskPool::new("workers", 2));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..6 {
        let pool = Arc::clone(&pool);
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .await
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }

    println!(
        "   6 tasks, limit 2: peak={} elapsed={:?}",
        peak.load(Ordering::SeqCst),
        start.elapsed()
    );
    pool.shutdown(Duration::from_secs(1)).await;
    println!();
}

async fn graceful_shutdown() {
    println!("2. Graceful Shutdown:");
    let pool = Arc::new(TaskPool::new("background", 4));
    let manager = ResourceManager::new();

    for _ in 0..3 {
        let _ = pool.submit_background(async {
            sleep(Duration::from_secs(60)).await;
        });
    }
    println!("   Background tasks running: {}", pool.active_count());

    manager.register_with_cleanup(&pool, |pool| async move {
        let drained = pool.shutdown(Duration::from_millis(500)).await;
        println!("   Task pool drained in time: {drained}");
        Ok(())
    });

    let report = manager.cleanup_all().await;
    println!(
        "   Cleanup report: succeeded={}, failed={}, skipped={}",
        report.succeeded, report.failed, report.skipped
    );
    println!("   Background tasks left: {}", pool.active_count());
}

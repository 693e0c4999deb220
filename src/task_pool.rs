//! Bounded concurrent task execution with graceful shutdown

use crate::errors::{PoolError, PoolResult};

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Identifier of a background task
pub type TaskId = u64;

/// Removes a task from the active set however its future ends
struct ActiveEntry {
    active: Arc<DashMap<TaskId, Instant>>,
    id: TaskId,
}

impl Drop for ActiveEntry {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

/// Runs tasks under a concurrency ceiling
///
/// Both awaited and background tasks share the same gate of
/// `max_concurrent` slots. After [`shutdown`](TaskPool::shutdown) new work is
/// rejected and running work is cancelled.
///
/// # Examples
///
/// ```
/// use esox_resilience::TaskPool;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = TaskPool::new("workers", 4);
/// let answer = pool.submit(async { 6 * 7 }).await.unwrap();
/// assert_eq!(answer, 42);
///
/// assert!(pool.shutdown(Duration::from_secs(1)).await);
/// assert!(pool.submit(async {}).await.is_err());
/// # }
/// ```
pub struct TaskPool {
    name: String,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    active: Arc<DashMap<TaskId, Instant>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    shutting_down: AtomicBool,
    next_id: AtomicU64,
}

impl TaskPool {
    /// Create a pool running at most `max_concurrent` tasks at once (minimum 1)
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            name: name.into(),
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            active: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `task` once a slot is free and return its output
    pub async fn submit<F, T>(&self, task: F) -> PoolResult<T>
    where
        F: Future<Output = T>,
    {
        self.check_accepting()?;

        let _permit = tokio::select! {
            permit = self.semaphore.acquire() => permit.map_err(|_| PoolError::ShuttingDown)?,
            () = self.cancel.cancelled() => return Err(PoolError::ShuttingDown),
        };

        tokio::select! {
            output = task => Ok(output),
            () = self.cancel.cancelled() => Err(PoolError::Cancelled),
        }
    }

    /// Run blocking work on the blocking thread pool, behind the same gate.
    ///
    /// Blocking code cannot be interrupted: on shutdown the caller gets
    /// [`PoolError::Cancelled`] while the thread finishes on its own.
    pub async fn submit_blocking<F, T>(&self, work: F) -> PoolResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match self.submit(tokio::task::spawn_blocking(work)).await? {
            Ok(output) => Ok(output),
            Err(err) if err.is_cancelled() => Err(PoolError::Cancelled),
            Err(err) => Err(PoolError::TaskFailed(err.to_string())),
        }
    }

    /// Start fire-and-forget work tracked until it completes or is cancelled
    pub fn submit_background<F>(&self, task: F) -> PoolResult<TaskId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.check_accepting()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active.insert(id, Instant::now());

        let entry = ActiveEntry {
            active: Arc::clone(&self.active),
            id,
        };
        let semaphore = Arc::clone(&self.semaphore);
        let cancel = self.cancel.clone();
        let name = self.name.clone();

        self.tracker.spawn(async move {
            let _entry = entry;
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(pool = %name, task_id = id, "Background task cancelled");
                }
                () = async {
                    if let Ok(_permit) = semaphore.acquire().await {
                        task.await;
                    }
                } => {}
            }
        });

        Ok(id)
    }

    /// Stop accepting work, cancel everything tracked, and wait up to
    /// `timeout` for it to wind down. Returns whether it finished in time.
    ///
    /// Calling it again is harmless and reports the same outcome.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::info!(
                pool = %self.name,
                active = self.active.len(),
                "Shutting down task pool"
            );
        }

        self.cancel.cancel();
        self.semaphore.close();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    pool = %self.name,
                    remaining = self.tracker.len(),
                    "Task pool shutdown timed out"
                );
                false
            }
        }
    }

    /// Number of background tasks not yet finished
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Free slots in the concurrency gate
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    fn check_accepting(&self) -> PoolResult<()> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Concurrency {
        running: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
    }

    impl Concurrency {
        async fn run(&self, duration: Duration) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(duration).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_submit_returns_output() {
        let pool = TaskPool::new("test", 2);
        let value = pool.submit(async { "done" }).await.unwrap();
        assert_eq!(value, "done");
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_respects_ceiling() {
        let pool = Arc::new(TaskPool::new("test", 2));
        let stats = Arc::new(Concurrency::default());

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = Arc::clone(&pool);
            let stats = Arc::clone(&stats);
            handles.push(tokio::spawn(async move {
                pool.submit(async { stats.run(Duration::from_millis(100)).await })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(stats.peak.load(Ordering::SeqCst), 2);
        assert_eq!(stats.finished.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_bound_and_shutdown_cancels() {
        let pool = TaskPool::new("test", 3);
        let stats = Arc::new(Concurrency::default());

        for _ in 0..5 {
            let stats = Arc::clone(&stats);
            pool.submit_background(async move { stats.run(Duration::from_secs(3600)).await })
                .unwrap();
        }
        assert_eq!(pool.active_count(), 5);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.running.load(Ordering::SeqCst), 3);

        let start = Instant::now();
        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(start.elapsed() <= Duration::from_secs(1));
        assert_eq!(pool.active_count(), 0);
        assert_eq!(stats.finished.load(Ordering::SeqCst), 0);
        assert!(stats.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_background_removed_on_completion() {
        let pool = TaskPool::new("test", 2);
        let (tx, rx) = tokio::sync::oneshot::channel();
        pool.submit_background(async move {
            let _ = tx.send(());
        })
        .unwrap();
        rx.await.unwrap();

        // the entry is dropped right after the body finishes
        for _ in 0..10 {
            if pool.active_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_after_shutdown_and_is_idempotent() {
        let pool = TaskPool::new("test", 2);
        assert!(pool.shutdown(Duration::from_millis(100)).await);
        assert!(pool.shutdown(Duration::from_millis(100)).await);
        assert!(pool.is_shutting_down());

        assert_eq!(pool.submit(async { 1 }).await, Err(PoolError::ShuttingDown));
        assert_eq!(
            pool.submit_background(async {}),
            Err(PoolError::ShuttingDown)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_submit_is_cancelled() {
        let pool = Arc::new(TaskPool::new("test", 1));
        let worker = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.submit(tokio::time::sleep(Duration::from_secs(3600)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.shutdown(Duration::from_secs(1)).await;
        assert_eq!(worker.await.unwrap(), Err(PoolError::Cancelled));
    }

    #[tokio::test]
    async fn test_submit_blocking() {
        let pool = TaskPool::new("test", 2);
        let sum = pool
            .submit_blocking(|| (1..=10u64).sum::<u64>())
            .await
            .unwrap();
        assert_eq!(sum, 55);

        let panicked = pool
            .submit_blocking(|| -> u64 { panic!("worker blew up") })
            .await;
        assert!(matches!(panicked, Err(PoolError::TaskFailed(_))));
    }
}

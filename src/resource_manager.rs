//! Registry of resources torn down together at shutdown

use crate::errors::PoolResult;

use dashmap::DashMap;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinSet;

/// Identifier handed out by [`ResourceManager::register`]
pub type ResourceId = u64;

type CleanupFuture = Pin<Box<dyn Future<Output = PoolResult<()>> + Send>>;
type CleanupFn = Box<dyn FnOnce() -> Option<CleanupFuture> + Send + Sync>;

struct Entry {
    resource: Weak<dyn Any + Send + Sync>,
    cleanup: Option<CleanupFn>,
}

/// Outcome of [`ResourceManager::cleanup_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Cleanups that completed without error
    pub succeeded: usize,
    /// Cleanups that returned an error or panicked
    pub failed: usize,
    /// Entries whose resource was already dropped, or that had no cleanup
    pub skipped: usize,
}

/// Keeps non-owning references to resources plus their async cleanups
///
/// The manager never keeps a resource alive: entries hold a [`Weak`], and a
/// cleanup only runs if its resource still exists at teardown.
///
/// # Examples
///
/// ```
/// use esox_resilience::ResourceManager;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let manager = ResourceManager::new();
/// let cache = Arc::new(vec![1, 2, 3]);
/// manager.register_with_cleanup(&cache, |cache| async move {
///     println!("flushing {} entries", cache.len());
///     Ok(())
/// });
///
/// let report = manager.cleanup_all().await;
/// assert_eq!(report.succeeded, 1);
/// assert!(manager.is_shutting_down());
/// # }
/// ```
pub struct ResourceManager {
    entries: DashMap<ResourceId, Entry>,
    shutting_down: AtomicBool,
    next_id: AtomicU64,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            shutting_down: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Track a resource without a cleanup callback.
    ///
    /// Returns `None` once the manager is shutting down.
    pub fn register<R>(&self, resource: &Arc<R>) -> Option<ResourceId>
    where
        R: Send + Sync + 'static,
    {
        let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(resource) as Weak<dyn Any + Send + Sync>;
        self.insert(weak, None)
    }

    /// Track a resource and the async cleanup to run for it at teardown.
    ///
    /// Returns `None` once the manager is shutting down.
    pub fn register_with_cleanup<R, F, Fut>(&self, resource: &Arc<R>, cleanup: F) -> Option<ResourceId>
    where
        R: Send + Sync + 'static,
        F: FnOnce(Arc<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PoolResult<()>> + Send + 'static,
    {
        let target = Arc::downgrade(resource);
        let weak: Weak<dyn Any + Send + Sync> = target.clone() as Weak<dyn Any + Send + Sync>;
        let cleanup: CleanupFn = Box::new(move || {
            target
                .upgrade()
                .map(|resource| Box::pin(cleanup(resource)) as CleanupFuture)
        });
        self.insert(weak, Some(cleanup))
    }

    /// Stop tracking a resource; its cleanup will not run
    pub fn unregister(&self, id: ResourceId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Run every registered cleanup concurrently, then clear the registry.
    ///
    /// Failures are logged and counted, never propagated. Later calls find
    /// an empty registry and return an empty report.
    pub async fn cleanup_all(&self) -> CleanupReport {
        self.shutting_down.store(true, Ordering::SeqCst);

        let ids: Vec<ResourceId> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut report = CleanupReport::default();
        let mut cleanups = JoinSet::new();

        for id in ids {
            let Some((_, entry)) = self.entries.remove(&id) else {
                continue;
            };
            match entry.cleanup.and_then(|cleanup| cleanup()) {
                Some(fut) => {
                    cleanups.spawn(async move { (id, fut.await) });
                }
                None => report.skipped += 1,
            }
        }

        while let Some(joined) = cleanups.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.succeeded += 1,
                Ok((id, Err(err))) => {
                    report.failed += 1;
                    tracing::warn!(resource_id = id, error = %err, "Resource cleanup failed");
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(error = %err, "Resource cleanup panicked");
                }
            }
        }

        if report != CleanupReport::default() {
            tracing::info!(
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                "Resource cleanup finished"
            );
        }
        report
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of registered resources still alive
    pub fn live_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.resource.strong_count() > 0)
            .count()
    }

    fn insert(&self, resource: Weak<dyn Any + Send + Sync>, cleanup: Option<CleanupFn>) -> Option<ResourceId> {
        if self.is_shutting_down() {
            tracing::debug!("Registration rejected, resource manager is shutting down");
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, Entry { resource, cleanup });
        Some(id)
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

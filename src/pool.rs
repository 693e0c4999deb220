//! Self-healing connection pool

use crate::circuit_breaker::CircuitBreaker;
use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::factory::ResourceFactory;
use crate::health::{BackgroundTasks, ConnectionCounts, MonitoringInfo, PoolStatus, RecoveryMetrics};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::recovery;
use crate::retry::with_timeout;

use crossbeam::queue::ArrayQueue;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A pooled connection that automatically returns to the pool when dropped
pub struct PooledConnection<F: ResourceFactory> {
    resource: Option<F::Resource>,
    id: u64,
    discard: bool,
    pool: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> PooledConnection<F> {
    /// Pool-local identifier of the underlying resource
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Destroy the resource instead of returning it, e.g. after an I/O error
    pub fn discard(mut self) {
        self.discard = true;
    }

    /// Take the resource out of the pool for good.
    ///
    /// The pool stops counting it, so a replacement may be created.
    pub fn detach(mut self) -> Option<F::Resource> {
        let resource = self.resource.take()?;
        self.pool.active.remove(&self.id);
        self.pool.release_capacity();
        Some(resource)
    }
}

impl<F: ResourceFactory> Deref for PooledConnection<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("Connection already released")
    }
}

impl<F: ResourceFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("Connection already released")
    }
}

impl<F: ResourceFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(self.id, resource, self.discard);
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for PooledConnection<F>
where
    F::Resource: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .finish()
    }
}

pub(crate) struct Slot<T> {
    id: u64,
    resource: T,
}

/// Mutable pool bookkeeping, always changed under one lock
#[derive(Debug)]
pub(crate) struct PoolState {
    /// Active + available + creations in flight
    pub total: usize,
    pub initialized: bool,
    pub closed: bool,
    pub healthy: bool,
    pub recovering: bool,
    pub consecutive_failures: usize,
    pub current_retry_delay: Duration,
    pub last_failure_time: Option<SystemTime>,
    pub last_health_check: Option<SystemTime>,
}

impl PoolState {
    pub fn record_failure(&mut self) {
        self.healthy = false;
        self.consecutive_failures += 1;
        self.last_failure_time = Some(SystemTime::now());
    }

    pub fn reset_failures(&mut self, base_delay: Duration) {
        self.consecutive_failures = 0;
        self.current_retry_delay = base_delay;
    }
}

struct BackgroundHandles {
    cancel: CancellationToken,
    recovery: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
}

fn is_running(handle: &Option<JoinHandle<()>>) -> bool {
    handle.as_ref().is_some_and(|handle| !handle.is_finished())
}

/// Capacity taken for a creation in flight, given back unless committed
struct Reservation<'a, F: ResourceFactory> {
    pool: &'a PoolInner<F>,
    committed: bool,
}

impl<F: ResourceFactory> Reservation<'_, F> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl<F: ResourceFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if !self.committed {
            self.pool.release_capacity();
        }
    }
}

/// Clears `recovering` when a re-initialization ends, including when its
/// future is dropped half way
struct RecoveringFlag<'a, F: ResourceFactory> {
    pool: &'a PoolInner<F>,
}

impl<F: ResourceFactory> Drop for RecoveringFlag<'_, F> {
    fn drop(&mut self) {
        self.pool.state.lock().recovering = false;
    }
}

pub(crate) struct PoolInner<F: ResourceFactory> {
    pub(crate) name: String,
    pub(crate) factory: F,
    pub(crate) config: PoolConfiguration,
    available: ArrayQueue<Slot<F::Resource>>,
    active: DashMap<u64, Instant>,
    pub(crate) state: Mutex<PoolState>,
    released: Notify,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) metrics: MetricsTracker,
    init_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<BackgroundHandles>,
    next_id: AtomicU64,
}

impl<F: ResourceFactory> PoolInner<F> {
    /// Take one unit of capacity if the pool holds fewer than `limit`
    fn reserve(&self, limit: usize) -> Option<Reservation<'_, F>> {
        {
            let mut state = self.state.lock();
            if state.total >= limit {
                return None;
            }
            state.total += 1;
        }
        Some(Reservation {
            pool: self,
            committed: false,
        })
    }

    fn release_capacity(&self) {
        {
            let mut state = self.state.lock();
            state.total = state.total.saturating_sub(1);
        }
        self.released.notify_waiters();
    }

    async fn create_resource(&self) -> PoolResult<Slot<F::Resource>> {
        match with_timeout(self.config.create_timeout, self.factory.create()).await {
            Ok(resource) => {
                MetricsTracker::incr(&self.metrics.created);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(pool = %self.name, connection_id = id, "Created connection");
                Ok(Slot { id, resource })
            }
            Err(err) => {
                MetricsTracker::incr(&self.metrics.creation_failures);
                Err(err)
            }
        }
    }

    /// Destroy a resource the pool has stopped tracking and free its capacity
    async fn destroy_resource(&self, resource: F::Resource) {
        if let Err(err) = with_timeout(self.config.destroy_timeout, self.factory.destroy(resource)).await {
            tracing::warn!(pool = %self.name, error = %err, "Failed to destroy connection");
        }
        MetricsTracker::incr(&self.metrics.destroyed);
        self.release_capacity();
    }

    fn spawn_destroy(self: &Arc<Self>, resource: F::Resource) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(self);
                handle.spawn(async move { pool.destroy_resource(resource).await });
            }
            Err(_) => {
                tracing::debug!(pool = %self.name, "No runtime available, dropping connection");
                drop(resource);
                self.release_capacity();
            }
        }
    }

    /// Called from `PooledConnection::drop`
    fn release(self: &Arc<Self>, id: u64, resource: F::Resource, discard: bool) {
        MetricsTracker::incr(&self.metrics.released);

        // Active and available change together under the state lock
        let rejected = {
            let state = self.state.lock();
            self.active.remove(&id);
            if discard || state.closed {
                Some(resource)
            } else {
                self.available
                    .push(Slot { id, resource })
                    .err()
                    .map(|slot| slot.resource)
            }
        };

        match rejected {
            Some(resource) => {
                tracing::debug!(pool = %self.name, connection_id = id, discard, "Destroying released connection");
                self.spawn_destroy(resource);
            }
            None => {
                tracing::debug!(pool = %self.name, connection_id = id, "Released connection");
                self.released.notify_waiters();
            }
        }
    }

    /// Destroy every idle resource, returning how many were drained
    async fn drain_available(&self) -> usize {
        let mut drained = 0;
        while let Some(slot) = self.available.pop() {
            self.destroy_resource(slot.resource).await;
            drained += 1;
        }
        drained
    }

    /// Create resources until the pool holds `min_size` of them
    async fn fill_to_min(&self) -> PoolResult<()> {
        while let Some(reservation) = self.reserve(self.config.min_size) {
            let slot = self.create_resource().await?;
            reservation.commit();
            if let Err(slot) = self.available.push(slot) {
                self.destroy_resource(slot.resource).await;
            }
            self.released.notify_waiters();
        }
        Ok(())
    }

    fn mark_initialized(&self) {
        let mut state = self.state.lock();
        state.initialized = true;
        state.closed = false;
        state.healthy = true;
        state.reset_failures(self.config.base_retry_delay);
    }

    fn mark_failed(&self) -> usize {
        let mut state = self.state.lock();
        state.record_failure();
        state.consecutive_failures
    }

    /// Drain idle resources and fill back to `min_size`.
    ///
    /// Without `force`, a pool that is already healthy and open is left alone,
    /// so concurrent callers do not rebuild it twice.
    pub(crate) async fn reinitialize(self: &Arc<Self>, force: bool) -> PoolResult<()> {
        let _init = self.init_lock.lock().await;
        {
            let mut state = self.state.lock();
            if !force && state.initialized && !state.closed && state.healthy {
                return Ok(());
            }
            state.recovering = true;
        }
        let recovering = RecoveringFlag { pool: &**self };

        let result = async {
            let drained = self.drain_available().await;
            tracing::debug!(pool = %self.name, drained, "Re-initializing pool");
            self.fill_to_min().await
        }
        .await;
        drop(recovering);

        match &result {
            Ok(()) => {
                self.mark_initialized();
                self.breaker.reset();
                MetricsTracker::incr(&self.metrics.recoveries);
                tracing::info!(pool = %self.name, "Pool recovered");
            }
            Err(err) => {
                let failures = self.mark_failed();
                tracing::warn!(pool = %self.name, failures, error = %err, "Pool re-initialization failed");
            }
        }

        self.ensure_background_tasks();
        result
    }

    /// Start whichever supervised loop is not running
    pub(crate) fn ensure_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if tasks.cancel.is_cancelled() {
            tasks.cancel = CancellationToken::new();
        }

        if !is_running(&tasks.recovery) {
            tasks.recovery = Some(tokio::spawn(recovery::recovery_loop(
                Arc::downgrade(self),
                tasks.cancel.clone(),
            )));
        }
        if !is_running(&tasks.health) {
            tasks.health = Some(tokio::spawn(recovery::health_monitor_loop(
                Arc::downgrade(self),
                tasks.cancel.clone(),
            )));
        }
    }

    fn background_tasks(&self) -> BackgroundTasks {
        let tasks = self.tasks.lock();
        let live = !tasks.cancel.is_cancelled();
        BackgroundTasks {
            recovery_running: live && is_running(&tasks.recovery),
            health_monitor_running: live && is_running(&tasks.health),
        }
    }
}

/// Bounded pool of externally created resources that heals itself
///
/// Resources come from a [`ResourceFactory`]. The pool keeps `min_size` of
/// them warm, creates more on demand up to `max_size`, and runs two background
/// loops: one probes the factory, the other rebuilds the pool with
/// exponential backoff once it is unhealthy. A closed pool is reopened by the
/// next [`acquire`](ConnectionPool::acquire) if the factory works again.
///
/// Cloning is cheap and every clone refers to the same pool.
pub struct ConnectionPool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.inner.name)
            .field("active", &self.active_count())
            .field("available", &self.available_count())
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl<F: ResourceFactory> ConnectionPool<F> {
    /// Create an empty pool. Nothing is created until
    /// [`initialize`](Self::initialize) or the first acquisition.
    pub fn new(name: impl Into<String>, factory: F, config: PoolConfiguration) -> PoolResult<Self> {
        config.validate()?;
        let name = name.into();

        tracing::debug!(
            pool = %name,
            min_size = config.min_size,
            max_size = config.max_size,
            "Created connection pool"
        );

        let breaker = CircuitBreaker::with_config(name.clone(), config.circuit_breaker.clone());
        let state = PoolState {
            total: 0,
            initialized: false,
            closed: false,
            healthy: false,
            recovering: false,
            consecutive_failures: 0,
            current_retry_delay: config.base_retry_delay,
            last_failure_time: None,
            last_health_check: None,
        };

        Ok(Self {
            inner: Arc::new(PoolInner {
                available: ArrayQueue::new(config.max_size),
                active: DashMap::new(),
                state: Mutex::new(state),
                released: Notify::new(),
                breaker,
                metrics: MetricsTracker::new(),
                init_lock: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(BackgroundHandles {
                    cancel: CancellationToken::new(),
                    recovery: None,
                    health: None,
                }),
                next_id: AtomicU64::new(1),
                name,
                factory,
                config,
            }),
        })
    }

    /// Fill the pool to `min_size` and start the background loops.
    ///
    /// Does nothing on an initialized, open pool. On failure the loops are
    /// started anyway so recovery keeps trying, and the factory error is
    /// returned.
    pub async fn initialize(&self) -> PoolResult<()> {
        let inner = &self.inner;
        let result = {
            let _init = inner.init_lock.lock().await;
            {
                let state = inner.state.lock();
                if state.initialized && !state.closed {
                    return Ok(());
                }
            }

            let result = inner.fill_to_min().await;
            match &result {
                Ok(()) => {
                    inner.mark_initialized();
                    tracing::info!(
                        pool = %inner.name,
                        min_size = inner.config.min_size,
                        "Pool initialized"
                    );
                }
                Err(err) => {
                    let failures = inner.mark_failed();
                    tracing::warn!(pool = %inner.name, failures, error = %err, "Pool initialization failed");
                }
            }
            result
        };

        inner.ensure_background_tasks();
        result
    }

    /// Get a connection, waiting up to `acquire_timeout` for one to free up.
    ///
    /// The connection goes back to the pool when the returned guard drops.
    pub async fn acquire(&self) -> PoolResult<PooledConnection<F>> {
        self.validate_state().await?;

        if !self.inner.breaker.can_execute() {
            tracing::debug!(pool = %self.inner.name, "Circuit open, rejecting acquisition");
            return Err(PoolError::CircuitOpen);
        }

        // On-demand initialization creates resources, so it feeds the breaker
        if !self.inner.state.lock().initialized {
            match self.initialize().await {
                Ok(()) => self.inner.breaker.record_success(),
                Err(err) => {
                    self.inner.breaker.record_failure();
                    return Err(err);
                }
            }
        }

        let timeout = self.inner.config.acquire_timeout;
        let slot = match tokio::time::timeout(timeout, self.acquire_slot()).await {
            Ok(slot) => slot?,
            Err(_) => {
                MetricsTracker::incr(&self.inner.metrics.acquire_timeouts);
                tracing::warn!(
                    pool = %self.inner.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for a connection"
                );
                return Err(PoolError::Timeout(timeout));
            }
        };

        self.inner.active.insert(slot.id, Instant::now());
        MetricsTracker::incr(&self.inner.metrics.acquired);
        tracing::debug!(pool = %self.inner.name, connection_id = slot.id, "Acquired connection");

        Ok(PooledConnection {
            resource: Some(slot.resource),
            id: slot.id,
            discard: false,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Reopen a closed pool on the spot, or fail without blocking
    async fn validate_state(&self) -> PoolResult<()> {
        if !self.inner.state.lock().closed {
            return Ok(());
        }

        tracing::info!(pool = %self.inner.name, "Pool is closed, attempting immediate recovery");
        match self.inner.reinitialize(false).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(pool = %self.inner.name, error = %err, "Immediate recovery failed");
                self.inner.ensure_background_tasks();
                Err(PoolError::PoolClosed)
            }
        }
    }

    async fn acquire_slot(&self) -> PoolResult<Slot<F::Resource>> {
        let inner = &self.inner;

        loop {
            // Registered before checking so a release in between is not missed
            let released = inner.released.notified();

            if inner.state.lock().closed {
                return Err(PoolError::PoolClosed);
            }

            if let Some(slot) = inner.available.pop() {
                inner.breaker.record_success();
                return Ok(slot);
            }

            if let Some(reservation) = inner.reserve(inner.config.max_size) {
                return match inner.breaker.call(|| inner.create_resource()).await {
                    Ok(slot) => {
                        reservation.commit();
                        Ok(slot)
                    }
                    Err(err) => {
                        drop(reservation);
                        if matches!(err, PoolError::Timeout(_)) {
                            if let Some(slot) = inner.available.pop() {
                                tracing::debug!(
                                    pool = %inner.name,
                                    "Creation timed out, using a connection released meanwhile"
                                );
                                return Ok(slot);
                            }
                        }
                        tracing::warn!(pool = %inner.name, error = %err, "Failed to create connection");
                        Err(err)
                    }
                };
            }

            tracing::debug!(pool = %inner.name, "Pool exhausted, waiting for a release");
            released.await;
        }
    }

    /// Close the pool: stop the loops and destroy idle connections.
    ///
    /// Connections still checked out are destroyed when they are dropped.
    /// Closing twice is harmless.
    pub async fn close(&self) {
        let inner = &self.inner;
        {
            let mut tasks = inner.tasks.lock();
            tasks.cancel.cancel();
            for handle in [tasks.recovery.take(), tasks.health.take()].into_iter().flatten() {
                handle.abort();
            }
        }

        let _init = inner.init_lock.lock().await;
        let was_closed = {
            let mut state = inner.state.lock();
            let was_closed = state.closed;
            state.closed = true;
            state.healthy = false;
            state.initialized = false;
            state.recovering = false;
            was_closed
        };
        inner.released.notify_waiters();

        let drained = inner.drain_available().await;
        if !was_closed {
            tracing::info!(pool = %inner.name, drained, "Pool closed");
        }
    }

    /// Manual override: clear failure state and rebuild the pool now,
    /// without waiting for the backoff.
    pub async fn force_reopen(&self) -> PoolResult<()> {
        tracing::info!(pool = %self.inner.name, "Force reopening pool");
        {
            let mut state = self.inner.state.lock();
            state.reset_failures(self.inner.config.base_retry_delay);
            state.closed = false;
        }
        self.inner.breaker.reset();
        self.inner.reinitialize(true).await
    }

    /// Restart whichever background loop has stopped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure_background_tasks(&self) {
        self.inner.ensure_background_tasks();
    }

    /// Manually close the embedded circuit breaker
    pub fn reset_circuit_breaker(&self) {
        tracing::info!(pool = %self.inner.name, "Circuit breaker reset");
        self.inner.breaker.reset();
    }

    /// Snapshot of the pool for health endpoints
    pub fn status(&self) -> PoolStatus {
        let inner = &self.inner;
        let background_tasks = inner.background_tasks();
        let state = inner.state.lock();
        let active = inner.active.len();
        let available = inner.available.len();

        PoolStatus {
            name: inner.name.clone(),
            healthy: state.healthy,
            closed: state.closed,
            initialized: state.initialized,
            recovering: state.recovering,
            connections: ConnectionCounts {
                active,
                available,
                total: state.total,
                max: inner.config.max_size,
                min: inner.config.min_size,
            },
            recovery: RecoveryMetrics {
                consecutive_failures: state.consecutive_failures,
                current_retry_delay: state.current_retry_delay,
                last_failure_time: state.last_failure_time,
            },
            monitoring: MonitoringInfo {
                last_health_check: state.last_health_check,
                health_check_interval: inner.config.health_check_interval,
            },
            background_tasks,
            circuit_breaker: inner.breaker.status(),
        }
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.get_metrics(
            self.active_count(),
            self.available_count(),
            self.inner.config.max_size,
        )
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.metrics().export()
    }

    /// Export metrics in Prometheus format, labelled with the pool name
    #[cfg(feature = "prometheus")]
    pub fn export_metrics_prometheus(
        &self,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        crate::metrics::MetricsExporter::export_prometheus(&self.metrics(), &self.inner.name, tags)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.inner.config
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// Get available count
    pub fn available_count(&self) -> usize {
        self.inner.available.len()
    }

    /// Get active count
    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.state.lock().healthy
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::FnFactory;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn counting_factory(
        counter: Arc<AtomicUsize>,
    ) -> impl ResourceFactory<Resource = usize> {
        FnFactory::new(
            move || {
                let counter = Arc::clone(&counter);
                async move { Ok::<_, PoolError>(counter.fetch_add(1, Ordering::SeqCst)) }
            },
            |_: usize| async { Ok::<_, PoolError>(()) },
        )
    }

    #[tokio::test]
    async fn test_initialize_fills_min_size() {
        let created = Arc::new(AtomicUsize::new(0));
        let config = PoolConfiguration::new().with_min_size(2).with_max_size(4);
        let pool = ConnectionPool::new("test", counting_factory(Arc::clone(&created)), config).unwrap();

        pool.initialize().await.unwrap();
        pool.initialize().await.unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available_count(), 2);
        let status = pool.status();
        assert!(status.healthy && status.initialized);
        assert!(status.background_tasks.recovery_running);
        assert!(status.background_tasks.health_monitor_running);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_connection_returns_on_drop() {
        let created = Arc::new(AtomicUsize::new(0));
        let pool = ConnectionPool::new(
            "test",
            counting_factory(Arc::clone(&created)),
            PoolConfiguration::default(),
        )
        .unwrap();

        {
            let conn = pool.acquire().await.unwrap();
            assert_eq!(*conn, 0);
            assert_eq!(pool.active_count(), 1);
            assert_eq!(pool.available_count(), 0);
        }

        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.available_count(), 1);

        let again = pool.acquire().await.unwrap();
        assert_eq!(*again, 0);
        assert_eq!(created.load(Ordering::SeqCst), 1);
        drop(again);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_discard_and_detach_free_capacity() {
        let created = Arc::new(AtomicUsize::new(0));
        let config = PoolConfiguration::new().with_min_size(0).with_max_size(1);
        let pool = ConnectionPool::new("test", counting_factory(Arc::clone(&created)), config).unwrap();

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.detach(), Some(0));
        assert_eq!(pool.status().connections.total, 0);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(*conn, 1);
        conn.discard();
        for _ in 0..50 {
            if pool.status().connections.total == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.status().connections.total, 0);
        assert_eq!(pool.available_count(), 0);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_invalid_configuration_rejected() {
        let config = PoolConfiguration::new().with_max_size(0);
        let result = ConnectionPool::new("test", counting_factory(Arc::new(AtomicUsize::new(0))), config);
        assert!(matches!(result, Err(PoolError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let pool = ConnectionPool::new(
            "test",
            counting_factory(Arc::new(AtomicUsize::new(0))),
            PoolConfiguration::new().with_min_size(2),
        )
        .unwrap();
        pool.initialize().await.unwrap();

        pool.close().await;
        let first = pool.status();
        pool.close().await;
        let second = pool.status();

        assert!(first.closed && !first.healthy);
        assert_eq!(first.connections, second.connections);
        assert_eq!(second.connections.available, 0);
        assert!(!second.background_tasks.recovery_running);
        assert_eq!(pool.metrics().total_destroyed, 2);
    }

    fn stalling_factory(stalled: Arc<AtomicBool>) -> impl ResourceFactory<Resource = usize> {
        FnFactory::new(
            move || {
                let stalled = Arc::clone(&stalled);
                async move {
                    if stalled.load(Ordering::SeqCst) {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Err(PoolError::factory("backend stalled"))
                    } else {
                        Ok::<usize, PoolError>(0)
                    }
                }
            },
            |_: usize| async { Ok::<_, PoolError>(()) },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_background_recovery_clears_recovering() {
        let stalled = Arc::new(AtomicBool::new(true));
        let config = PoolConfiguration::new().with_health_check_interval(Duration::from_secs(3600));
        let pool = ConnectionPool::new("test", stalling_factory(Arc::clone(&stalled)), config).unwrap();

        assert!(pool.initialize().await.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pool.status().recovering);

        pool.close().await;
        let status = pool.status();
        assert!(status.closed);
        assert!(!status.recovering);
        assert!(!status.background_tasks.recovery_running);
        assert!(!status.background_tasks.health_monitor_running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_reopen_clears_recovering() {
        let stalled = Arc::new(AtomicBool::new(false));
        let config = PoolConfiguration::new().with_health_check_interval(Duration::from_secs(3600));
        let pool = ConnectionPool::new("test", stalling_factory(Arc::clone(&stalled)), config).unwrap();
        pool.initialize().await.unwrap();
        pool.close().await;

        stalled.store(true, Ordering::SeqCst);
        let abandoned = tokio::time::timeout(Duration::from_millis(100), pool.acquire()).await;
        assert!(abandoned.is_err());
        assert!(!pool.status().recovering);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let status = pool.status();
        assert!(status.closed);
        assert!(!status.recovering);
    }
}

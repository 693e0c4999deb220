//! Background supervision for connection pools
//!
//! Each pool runs two loops: the recovery loop rebuilds an unhealthy pool
//! with exponential backoff, and the health monitor probes the factory with a
//! throwaway resource. Both hold a [`Weak`] reference to the pool, so they end
//! once every pool handle is gone, and both stop when their
//! [`CancellationToken`] fires.

use crate::factory::ResourceFactory;
use crate::metrics::MetricsTracker;
use crate::pool::PoolInner;
use crate::retry::with_timeout;

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

pub(crate) async fn recovery_loop<F: ResourceFactory>(pool: Weak<PoolInner<F>>, cancel: CancellationToken) {
    let mut attempts = 0;

    loop {
        let pause = {
            let Some(inner) = pool.upgrade() else {
                break;
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                pause = inner.recovery_step(&mut attempts) => pause,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    tracing::debug!("Recovery loop stopped");
}

pub(crate) async fn health_monitor_loop<F: ResourceFactory>(pool: Weak<PoolInner<F>>, cancel: CancellationToken) {
    loop {
        let interval = match pool.upgrade() {
            Some(inner) => inner.config.health_check_interval,
            None => break,
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(inner) = pool.upgrade() else {
            break;
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = inner.health_probe() => {}
        }
    }

    tracing::debug!("Health monitor stopped");
}

impl<F: ResourceFactory> PoolInner<F> {
    /// One pass of the recovery loop, returning how long to sleep afterwards
    async fn recovery_step(self: &Arc<Self>, attempts: &mut usize) -> Duration {
        let needs_recovery = {
            let state = self.state.lock();
            !state.healthy && !state.recovering && state.consecutive_failures > 0
        };
        if !needs_recovery {
            *attempts = 0;
            return self.config.recovery_check_interval;
        }

        *attempts += 1;
        if *attempts > self.config.max_reconnect_attempts {
            tracing::error!(
                pool = %self.name,
                attempts = *attempts - 1,
                cooldown_ms = self.config.reconnect_cooldown.as_millis() as u64,
                "Reconnect attempts exhausted, cooling down"
            );
            *attempts = 0;
            return self.config.reconnect_cooldown;
        }

        tracing::info!(pool = %self.name, attempt = *attempts, "Attempting pool recovery");
        match self.reinitialize(false).await {
            Ok(()) => {
                *attempts = 0;
                self.config.recovery_check_interval
            }
            Err(err) => {
                let delay = {
                    let mut state = self.state.lock();
                    let delay = state.current_retry_delay;
                    state.current_retry_delay = delay.saturating_mul(2).min(self.config.max_retry_delay);
                    delay
                };
                tracing::warn!(
                    pool = %self.name,
                    attempt = *attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Pool recovery failed, backing off"
                );
                delay
            }
        }
    }

    /// Create and destroy a throwaway resource to check the factory
    async fn health_probe(&self) {
        {
            let state = self.state.lock();
            if state.closed || state.recovering {
                return;
            }
        }

        let result = async {
            let resource = with_timeout(self.config.create_timeout, self.factory.create()).await?;
            with_timeout(self.config.destroy_timeout, self.factory.destroy(resource)).await
        }
        .await;

        match result {
            Ok(()) => {
                MetricsTracker::incr(&self.metrics.health_checks_passed);
                let mut state = self.state.lock();
                state.last_health_check = Some(SystemTime::now());
                if state.initialized && !state.closed {
                    if !state.healthy {
                        tracing::info!(pool = %self.name, "Health check passed, pool is healthy again");
                    }
                    state.healthy = true;
                    state.reset_failures(self.config.base_retry_delay);
                }
            }
            Err(err) => {
                MetricsTracker::incr(&self.metrics.health_checks_failed);
                let failures = {
                    let mut state = self.state.lock();
                    state.record_failure();
                    state.consecutive_failures
                };
                tracing::warn!(pool = %self.name, failures, error = %err, "Health check failed");
            }
        }
    }
}

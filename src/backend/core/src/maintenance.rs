//! Bounded loops for periodic maintenance.
//!
//! Cleanup tasks run a batch step repeatedly until nothing is left, capped by
//! an iteration count and a timeout measured on the injected [`Clock`]. Tests
//! drive the clock instead of sleeping.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::{until, Clock};
use crate::error::{JobgateError, Result};
use crate::lease::{in_lock, LockOptions};
use crate::store::SharedStoreRef;

/// Caps for [`loop_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    /// Maximum number of steps
    pub limit: u32,
    pub timeout: Duration,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            limit: 1000,
            timeout: Duration::from_secs(45 * 60),
        }
    }
}

impl LoopLimits {
    pub fn new(limit: u32, timeout: Duration) -> Self {
        Self { limit, timeout }
    }
}

/// Run `step` until it returns `false` (no more work).
///
/// Returns `true` when the work finished and `false` when the iteration cap
/// or the timeout stopped the loop first.
///
/// # Errors
///
/// `InvalidInput` for a zero `limit`; otherwise the first error from `step`.
pub async fn loop_until<F, Fut>(clock: &dyn Clock, limits: LoopLimits, mut step: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    if limits.limit == 0 {
        return Err(JobgateError::invalid_input("Loop limit must be greater than zero"));
    }

    let started = clock.now();
    for iteration in 1..=limits.limit {
        if !step().await? {
            debug!(iterations = iteration, "Loop finished");
            return Ok(true);
        }
        if until(started, clock.now()) >= limits.timeout {
            info!(iterations = iteration, timeout = ?limits.timeout, "Loop stopped at timeout");
            return Ok(false);
        }
    }

    info!(limit = limits.limit, "Loop stopped at iteration limit");
    Ok(false)
}

/// A singleton batch cleanup: [`loop_until`] under an exclusive lease.
#[derive(Debug, Clone)]
pub struct LeasedBatchTask {
    pub lease_key: String,
    pub lock: LockOptions,
    pub limits: LoopLimits,
}

impl LeasedBatchTask {
    /// Defaults sized for hourly cleanups: a 50 minute lease taken with one
    /// retry, and up to 1000 steps within 45 minutes.
    pub fn new(lease_key: impl Into<String>) -> Self {
        Self {
            lease_key: lease_key.into(),
            lock: LockOptions::default()
                .with_ttl(Duration::from_secs(50 * 60))
                .with_retries(1),
            limits: LoopLimits::default(),
        }
    }

    pub fn with_lock(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_limits(mut self, limits: LoopLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run the loop while holding the lease.
    ///
    /// # Errors
    ///
    /// `LockNotAcquired` if another process holds the lease, plus anything
    /// [`loop_until`] returns.
    pub async fn execute<F, Fut>(&self, store: &SharedStoreRef, clock: &dyn Clock, step: F) -> Result<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let limits = self.limits;
        in_lock(store, &self.lease_key, &self.lock, |_| loop_until(clock, limits, step)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorCode;
    use crate::lease::BackoffStrategy;
    use crate::store::InMemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_finishes_when_work_runs_out() {
        let clock = ManualClock::starting_now();
        let remaining = &AtomicU32::new(3);

        let finished = loop_until(&clock, LoopLimits::new(10, Duration::from_secs(60)), || async move {
            Ok(remaining.fetch_sub(1, Ordering::SeqCst) > 1)
        })
        .await
        .unwrap();

        assert!(finished);
        assert_eq!(remaining.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stops_at_limit() {
        let clock = ManualClock::starting_now();
        let steps = &AtomicU32::new(0);

        let finished = loop_until(&clock, LoopLimits::new(5, Duration::from_secs(60)), || async move {
            steps.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
        .await
        .unwrap();

        assert!(!finished);
        assert_eq!(steps.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_stops_at_timeout() {
        let clock = ManualClock::starting_now();
        let steps = AtomicU32::new(0);

        let finished = loop_until(&clock, LoopLimits::new(100, Duration::from_secs(60)), || {
            steps.fetch_add(1, Ordering::SeqCst);
            clock.advance(Duration::from_secs(25));
            async { Ok(true) }
        })
        .await
        .unwrap();

        assert!(!finished);
        assert_eq!(steps.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let clock = ManualClock::starting_now();
        let error = loop_until(&clock, LoopLimits::new(0, Duration::from_secs(1)), || async {
            Ok(false)
        })
        .await
        .unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_step_error_propagates() {
        let clock = ManualClock::starting_now();
        let error = loop_until(&clock, LoopLimits::default(), || async {
            Err::<bool, _>(JobgateError::internal("boom"))
        })
        .await
        .unwrap_err();
        assert_eq!(error.code(), ErrorCode::InternalError);
    }

    #[tokio::test]
    async fn test_leased_task_skips_when_held() {
        let store: SharedStoreRef = Arc::new(InMemoryStore::new());
        let clock = ManualClock::starting_now();
        store
            .set_if_absent("cleanup", "other", Duration::from_secs(60))
            .await
            .unwrap();

        let task = LeasedBatchTask::new("cleanup").with_lock(
            LockOptions::default()
                .with_retries(1)
                .with_backoff(BackoffStrategy::fixed(1)),
        );
        let error = task
            .execute(&store, &clock, || async { Ok(false) })
            .await
            .unwrap_err();

        assert_eq!(error.code(), ErrorCode::LockNotAcquired);
    }

    #[tokio::test]
    async fn test_leased_task_runs_and_releases() {
        let store: SharedStoreRef = Arc::new(InMemoryStore::new());
        let clock = ManualClock::starting_now();
        let steps = &AtomicU32::new(0);

        let finished = LeasedBatchTask::new("cleanup")
            .execute(&store, &clock, || async move {
                Ok(steps.fetch_add(1, Ordering::SeqCst) < 2)
            })
            .await
            .unwrap();

        assert!(finished);
        assert_eq!(steps.load(Ordering::SeqCst), 3);
        assert_eq!(store.get("cleanup").await.unwrap(), None);
    }
}

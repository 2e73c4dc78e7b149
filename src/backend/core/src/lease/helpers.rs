//! Run a block while holding a named lock.

use futures::FutureExt;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, warn};

use super::backoff::BackoffStrategy;
use super::exclusive_lease::ExclusiveLease;
use crate::config::LeaseConfig;
use crate::error::{JobgateError, Result};
use crate::store::SharedStoreRef;
use crate::telemetry::EngineMetrics;

/// How long to hold a lock and how hard to try for it.
#[derive(Debug, Clone, PartialEq)]
pub struct LockOptions {
    pub ttl: Duration,
    /// Attempts after the first one
    pub retries: u32,
    pub backoff: BackoffStrategy,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            retries: 10,
            backoff: BackoffStrategy::default(),
        }
    }
}

impl From<&LeaseConfig> for LockOptions {
    fn from(config: &LeaseConfig) -> Self {
        Self {
            ttl: config.ttl,
            retries: config.retries,
            backoff: config.backoff_strategy(),
        }
    }
}

impl LockOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Run `block` while holding the lock at `key`.
///
/// Makes up to `1 + retries` acquire attempts, waiting per the backoff
/// between them. `block` receives `true` if at least one retry was needed.
/// The lock is released after `block` completes, including when it panics.
///
/// # Errors
///
/// - `InvalidInput` if `key` is empty
/// - `LockNotAcquired` once every attempt found the lock held
/// - store errors during acquisition, which are never treated as success
pub async fn in_lock<F, Fut, T>(
    store: &SharedStoreRef,
    key: &str,
    options: &LockOptions,
    block: F,
) -> Result<T>
where
    F: FnOnce(bool) -> Fut,
    Fut: Future<Output = T>,
{
    let lease = ExclusiveLease::new(store.clone(), key, options.ttl)?;

    let mut attempt: u32 = 0;
    loop {
        if lease.try_obtain().await?.is_some() {
            EngineMetrics::record_lease_attempt("acquired");
            break;
        }
        if attempt >= options.retries {
            EngineMetrics::record_lease_attempt("exhausted");
            return Err(JobgateError::lock_not_acquired(key, attempt + 1));
        }
        EngineMetrics::record_lease_attempt("contended");
        tokio::time::sleep(options.backoff.delay_for_attempt(attempt)).await;
        attempt += 1;
    }

    let retried = attempt > 0;
    debug!(lease_key = %key, retried = retried, "Lock obtained");

    let result = AssertUnwindSafe(block(retried)).catch_unwind().await;

    if let Err(e) = lease.release().await {
        warn!(lease_key = %key, error = %e, "Failed to release lock, it will expire");
    }

    match result {
        Ok(value) => Ok(value),
        Err(panic) => resume_unwind(panic),
    }
}

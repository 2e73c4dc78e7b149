//! Shared key-value store.
//!
//! Every operation touches exactly one key and is atomic on that key. That
//! is the only coordination the engine relies on between worker processes.
//!
//! Two kinds of value live in the store:
//! - plain string keys with an optional TTL (dedup records, leases, job status)
//! - timestamped sets with a set-level TTL (running sets)

pub mod memory;
pub mod redis_store;

pub use self::memory::InMemoryStore;
pub use self::redis_store::RedisStore;

use crate::clock::SharedClock;
use crate::config::{Config, StoreBackend};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A member of a timestamped set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetMember {
    pub member: String,
    /// When the member was first added
    pub added_at: DateTime<Utc>,
}

/// Atomic single-key operations over a shared store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Add `member`, keeping its original timestamp if already present, and
    /// reset the set's TTL. Returns whether the member was new.
    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<bool>;

    /// Remove members; absent members are ignored. Returns the number removed.
    async fn set_remove(&self, key: &str, members: &[String]) -> Result<u64>;

    async fn set_count(&self, key: &str) -> Result<u64>;

    async fn set_members(&self, key: &str) -> Result<Vec<SetMember>>;

    /// Store `value` only if `key` is absent. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remaining TTL, or `None` if the key is absent or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete `key` only if it currently holds `expected`.
    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool>;

    /// Reset the TTL of `key` only if it currently holds `expected`.
    async fn expire_if_eq(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool>;
}

/// Shared store handle.
pub type SharedStoreRef = Arc<dyn SharedStore>;

/// Build the store selected by configuration.
pub async fn connect(config: &Config, clock: SharedClock) -> Result<SharedStoreRef> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::with_clock(clock))),
        StoreBackend::Redis => Ok(Arc::new(RedisStore::new(&config.redis, clock).await?)),
    }
}

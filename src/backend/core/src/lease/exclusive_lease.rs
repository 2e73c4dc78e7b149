//! TTL-bound distributed mutex.
//!
//! A lease is a plain store key holding the holder's token. It is acquired
//! with set-if-absent and released or renewed only by the token holder, so a
//! holder whose lease expired and was taken over cannot disturb the new one.

use std::time::Duration;
use uuid::Uuid;

use crate::error::{JobgateError, Result};
use crate::store::{SharedStore, SharedStoreRef};

/// One would-be holder of the lease at `key`.
pub struct ExclusiveLease {
    store: SharedStoreRef,
    key: String,
    ttl: Duration,
    token: String,
}

impl std::fmt::Debug for ExclusiveLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveLease")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ExclusiveLease {
    /// A lease with a fresh random token.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `key` is empty.
    pub fn new(store: SharedStoreRef, key: impl Into<String>, ttl: Duration) -> Result<Self> {
        Self::with_token(store, key, ttl, Uuid::new_v4().to_string())
    }

    /// A lease acting for an existing token.
    pub fn with_token(
        store: SharedStoreRef,
        key: impl Into<String>,
        ttl: Duration,
        token: impl Into<String>,
    ) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(JobgateError::invalid_input("Lease key needs to be specified"));
        }
        Ok(Self {
            store,
            key,
            ttl,
            token: token.into(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Acquire the lease. Returns the token on success.
    pub async fn try_obtain(&self) -> Result<Option<String>> {
        let obtained = self.store.set_if_absent(&self.key, &self.token, self.ttl).await?;
        Ok(obtained.then(|| self.token.clone()))
    }

    /// Extend the TTL if this token still holds the lease.
    pub async fn renew(&self) -> Result<bool> {
        self.store.expire_if_eq(&self.key, &self.token, self.ttl).await
    }

    /// Whether anyone holds the lease.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.store.get(&self.key).await?.is_some())
    }

    pub async fn ttl(&self) -> Result<Option<Duration>> {
        self.store.ttl(&self.key).await
    }

    /// Token of the current holder.
    pub async fn holder(&self) -> Result<Option<String>> {
        self.store.get(&self.key).await
    }

    /// Release the lease if this token holds it.
    pub async fn release(&self) -> Result<bool> {
        Self::cancel(self.store.as_ref(), &self.key, &self.token).await
    }

    /// Release the lease at `key` if `token` holds it.
    pub async fn cancel(store: &dyn SharedStore, key: &str, token: &str) -> Result<bool> {
        store.delete_if_eq(key, token).await
    }
}

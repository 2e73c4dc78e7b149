//! Per-job status keys.
//!
//! A `job_status:{id}` key is written when a job is submitted and removed
//! when it completes. A missing key means the job is no longer live, either
//! finished or lost long enough ago for the key to expire. The registry uses
//! this to reconcile its running sets.

use async_trait::async_trait;
use std::time::Duration;

use super::job::JobId;
use super::registry::LivenessProbe;
use crate::config::StatusConfig;
use crate::error::Result;
use crate::store::SharedStoreRef;

pub fn status_key(id: &str) -> String {
    format!("job_status:{}", id)
}

/// Tracks which jobs are still live.
pub struct JobStatusTracker {
    store: SharedStoreRef,
    ttl: Duration,
}

impl JobStatusTracker {
    pub fn new(store: SharedStoreRef) -> Self {
        Self::with_config(store, &StatusConfig::default())
    }

    pub fn with_config(store: SharedStoreRef, config: &StatusConfig) -> Self {
        Self {
            store,
            ttl: config.ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mark `id` live for `ttl`.
    pub async fn set(&self, id: &JobId, ttl: Duration) -> Result<()> {
        let key = status_key(id.as_str());
        // Refresh a key that is already present
        if !self.store.set_if_absent(&key, "1", ttl).await? {
            self.store.expire_if_eq(&key, "1", ttl).await?;
        }
        Ok(())
    }

    /// Mark `id` live for the configured TTL.
    pub async fn track(&self, id: &JobId) -> Result<()> {
        self.set(id, self.ttl).await
    }

    pub async fn unset(&self, id: &JobId) -> Result<()> {
        self.store.delete(&status_key(id.as_str())).await?;
        Ok(())
    }

    pub async fn is_running(&self, id: &JobId) -> Result<bool> {
        Ok(self.store.get(&status_key(id.as_str())).await?.is_some())
    }
}

#[async_trait]
impl LivenessProbe for JobStatusTracker {
    async fn completed(&self, ids: &[String]) -> Result<Vec<String>> {
        let mut completed = Vec::new();
        for id in ids {
            if self.store.get(&status_key(id)).await?.is_none() {
                completed.push(id.clone());
            }
        }
        Ok(completed)
    }

    /// Write a status key for a registered job unless one is already live.
    /// An existing key keeps its TTL.
    async fn started(&self, id: &str) -> Result<()> {
        self.store.set_if_absent(&status_key(id), "1", self.ttl).await?;
        Ok(())
    }

    async fn finished(&self, id: &str) -> Result<()> {
        self.store.delete(&status_key(id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_track_and_unset() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = JobStatusTracker::new(store);
        let id = JobId::new();

        tracker.track(&id).await.unwrap();
        assert!(tracker.is_running(&id).await.unwrap());

        tracker.unset(&id).await.unwrap();
        assert!(!tracker.is_running(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_completed_reports_expired_and_missing() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let tracker = JobStatusTracker::new(store);

        let live = JobId::from("live");
        let short = JobId::from("short");
        tracker.set(&live, Duration::from_secs(3600)).await.unwrap();
        tracker.set(&short, Duration::from_secs(60)).await.unwrap();
        clock.advance(Duration::from_secs(61));

        let ids = vec!["live".to_string(), "short".to_string(), "never".to_string()];
        let completed = tracker.completed(&ids).await.unwrap();

        assert_eq!(completed, vec!["short".to_string(), "never".to_string()]);
    }

    #[tokio::test]
    async fn test_set_refreshes_ttl() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let tracker = JobStatusTracker::new(store);
        let id = JobId::from("refresh");

        tracker.set(&id, Duration::from_secs(60)).await.unwrap();
        clock.advance(Duration::from_secs(50));
        tracker.set(&id, Duration::from_secs(60)).await.unwrap();
        clock.advance(Duration::from_secs(50));

        assert!(tracker.is_running(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_started_keeps_existing_ttl() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let tracker = JobStatusTracker::new(store);

        tracker.started("fresh").await.unwrap();
        assert!(tracker.is_running(&JobId::from("fresh")).await.unwrap());

        tracker.set(&JobId::from("short"), Duration::from_secs(60)).await.unwrap();
        tracker.started("short").await.unwrap();
        clock.advance(Duration::from_secs(61));
        assert!(!tracker.is_running(&JobId::from("short")).await.unwrap());

        tracker.finished("fresh").await.unwrap();
        assert!(!tracker.is_running(&JobId::from("fresh")).await.unwrap());
    }
}

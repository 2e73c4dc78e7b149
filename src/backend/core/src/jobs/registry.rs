//! Running-job registry for one job kind.
//!
//! A sorted set at `{job_kind}:running` maps job identifiers to their
//! registration time. `count()` is eventually consistent and only feeds
//! capacity arithmetic. Entries left behind by crashed processes are removed
//! by [`JobRegistry::clean_up`], and the set-level TTL bounds the damage if
//! clean-up never runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::job::JobId;
use crate::clock::SharedClock;
use crate::config::RegistryConfig;
use crate::error::Result;
use crate::store::SharedStoreRef;

/// Oracle telling the registry which identifiers are no longer live.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// The subset of `ids` with no live backing execution.
    async fn completed(&self, ids: &[String]) -> Result<Vec<String>>;

    /// `id` was registered. A probe that judges liveness from its own
    /// records must make `id` read as live from here on.
    async fn started(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    /// `id` was removed from the registry.
    async fn finished(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

/// One registered job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningJob {
    pub id: JobId,
    pub registered_at: DateTime<Utc>,
}

pub fn running_key(job_kind: &str) -> String {
    format!("{}:running", job_kind)
}

/// Distributed set of in-flight job identifiers for one job kind.
#[derive(Clone)]
pub struct JobRegistry {
    store: SharedStoreRef,
    clock: SharedClock,
    job_kind: String,
    key: String,
    entry_ttl: Duration,
    clean_up_batch_size: usize,
    probe: Option<Arc<dyn LivenessProbe>>,
}

impl JobRegistry {
    pub fn new(store: SharedStoreRef, clock: SharedClock, job_kind: impl Into<String>) -> Self {
        Self::with_config(store, clock, job_kind, &RegistryConfig::default())
    }

    pub fn with_config(
        store: SharedStoreRef,
        clock: SharedClock,
        job_kind: impl Into<String>,
        config: &RegistryConfig,
    ) -> Self {
        let job_kind = job_kind.into();
        Self {
            key: running_key(&job_kind),
            store,
            clock,
            job_kind,
            entry_ttl: config.entry_ttl,
            clean_up_batch_size: config.clean_up_batch_size.max(1),
            probe: None,
        }
    }

    /// Consult `probe` during clean-up in addition to entry age.
    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn job_kind(&self) -> &str {
        &self.job_kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Idempotent. Refreshes the set TTL and tells the probe, if any, that
    /// `id` is live.
    pub async fn register(&self, id: &JobId) -> Result<()> {
        self.store
            .set_add(&self.key, id.as_str(), self.entry_ttl)
            .await?;
        if let Some(probe) = &self.probe {
            probe.started(id.as_str()).await?;
        }
        Ok(())
    }

    /// Idempotent; removing an absent id is not an error.
    pub async fn remove(&self, id: &JobId) -> Result<()> {
        self.store
            .set_remove(&self.key, &[id.as_str().to_string()])
            .await?;
        if let Some(probe) = &self.probe {
            probe.finished(id.as_str()).await?;
        }
        Ok(())
    }

    pub async fn count(&self) -> Result<u64> {
        self.store.set_count(&self.key).await
    }

    pub async fn running_ids(&self) -> Result<Vec<RunningJob>> {
        Ok(self
            .store
            .set_members(&self.key)
            .await?
            .into_iter()
            .map(|member| RunningJob {
                id: JobId::from(member.member),
                registered_at: member.added_at,
            })
            .collect())
    }

    /// Remove entries whose execution is known to be dead: older than the
    /// entry TTL, or reported completed by the liveness probe. Returns the
    /// number removed.
    pub async fn clean_up(&self) -> Result<u64> {
        let members = self.store.set_members(&self.key).await?;
        if members.is_empty() {
            return Ok(0);
        }

        // No cutoff when the TTL reaches past the representable range
        let cutoff = chrono::Duration::from_std(self.entry_ttl)
            .ok()
            .and_then(|ttl| self.clock.now().checked_sub_signed(ttl));
        let (stale, live): (Vec<_>, Vec<_>) = members
            .into_iter()
            .partition(|member| cutoff.map_or(false, |cutoff| member.added_at <= cutoff));

        let mut dead: Vec<String> = stale.into_iter().map(|member| member.member).collect();

        if let Some(probe) = &self.probe {
            let candidates: Vec<String> = live.into_iter().map(|member| member.member).collect();
            for chunk in candidates.chunks(self.clean_up_batch_size) {
                dead.extend(probe.completed(chunk).await?);
            }
        }

        let mut removed = 0;
        for chunk in dead.chunks(self.clean_up_batch_size) {
            removed += self.store.set_remove(&self.key, chunk).await?;
        }

        if removed > 0 {
            debug!(job_kind = %self.job_kind, removed = removed, "Cleaned up dead running jobs");
        }
        Ok(removed)
    }
}

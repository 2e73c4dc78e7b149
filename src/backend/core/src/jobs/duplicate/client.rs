//! Submission-side deduplication.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{DedupPolicies, DuplicateJob};
use crate::clock::SharedClock;
use crate::error::Result;
use crate::jobs::job::{JobDescriptor, JobId};
use crate::jobs::transport::{SharedTransport, Transport};
use crate::store::SharedStoreRef;
use crate::telemetry::EngineMetrics;

/// Marks submissions equivalent to a not-yet-executed owner.
#[derive(Clone)]
pub struct DeduplicationClient {
    store: SharedStoreRef,
    clock: SharedClock,
    policies: DedupPolicies,
}

impl DeduplicationClient {
    pub fn new(store: SharedStoreRef, clock: SharedClock, policies: DedupPolicies) -> Self {
        Self {
            store,
            clock,
            policies,
        }
    }

    pub fn policies(&self) -> &DedupPolicies {
        &self.policies
    }

    /// Claim the dedup record for `job` or set its `duplicate_of`.
    ///
    /// Never fails: a store error leaves the job unmarked.
    pub async fn call(&self, job: &mut JobDescriptor) {
        let now = self.clock.now();
        let options = self.policies.for_kind(&job.job_kind);
        let duplicate_job = DuplicateJob::new(job, options);

        if !duplicate_job.applies(now) {
            return;
        }

        let checked = duplicate_job.check(self.store.as_ref(), now).await;
        match checked {
            Ok(None) => {
                debug!(
                    job_kind = %job.job_kind,
                    job_id = %job.id,
                    "Job owns its idempotency key"
                );
            }
            Ok(Some(owner)) => {
                info!(
                    job_kind = %job.job_kind,
                    job_id = %job.id,
                    duplicate_of = %owner,
                    "Duplicate job"
                );
                EngineMetrics::record_duplicate(&job.job_kind);
                job.duplicate_of = Some(owner);
            }
            Err(e) => {
                warn!(
                    job_kind = %job.job_kind,
                    job_id = %job.id,
                    error = %e,
                    "Deduplication check failed, submitting unmarked"
                );
            }
        }
    }
}

/// A [`Transport`] that runs the deduplication client on every submission.
pub struct DeduplicatingTransport {
    inner: SharedTransport,
    client: DeduplicationClient,
}

impl DeduplicatingTransport {
    pub fn new(inner: SharedTransport, client: DeduplicationClient) -> Self {
        Self { inner, client }
    }

    pub fn into_shared(self) -> SharedTransport {
        Arc::new(self)
    }
}

#[async_trait]
impl Transport for DeduplicatingTransport {
    async fn submit(&self, mut job: JobDescriptor) -> Result<JobId> {
        self.client.call(&mut job).await;
        self.inner.submit(job).await
    }

    async fn submit_batch(&self, mut jobs: Vec<JobDescriptor>) -> Result<Vec<JobId>> {
        // In order, so later copies in the batch see earlier ones.
        for job in jobs.iter_mut() {
            self.client.call(job).await;
        }
        self.inner.submit_batch(jobs).await
    }

    async fn submit_at(
        &self,
        at: chrono::DateTime<chrono::Utc>,
        mut job: JobDescriptor,
    ) -> Result<JobId> {
        job.scheduled_at = Some(at);
        self.client.call(&mut job).await;
        self.inner.submit_at(at, job).await
    }

    async fn queue_size(&self, job_kind: &str) -> Result<u64> {
        self.inner.queue_size(job_kind).await
    }
}

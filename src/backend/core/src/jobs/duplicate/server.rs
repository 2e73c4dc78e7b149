//! Execution-side deduplication: releases the owner's record.

use futures::FutureExt;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use super::{DedupPolicies, DeduplicateStrategy, DuplicateJob};
use crate::jobs::job::JobDescriptor;
use crate::store::SharedStoreRef;

/// Deletes a dedup record when its owner starts (`until_executing`) or
/// finishes (`until_executed`). Records are only ever deleted by their owner.
#[derive(Clone)]
pub struct DeduplicationServer {
    store: SharedStoreRef,
    policies: DedupPolicies,
}

impl DeduplicationServer {
    pub fn new(store: SharedStoreRef, policies: DedupPolicies) -> Self {
        Self { store, policies }
    }

    /// Run `work` for `job`, releasing its record at the point its strategy
    /// dictates.
    pub async fn around<F, T>(&self, job: &JobDescriptor, work: F) -> T
    where
        F: Future<Output = T>,
    {
        match self.policies.for_kind(&job.job_kind).strategy {
            DeduplicateStrategy::None => work.await,
            DeduplicateStrategy::UntilExecuting => {
                self.release(job).await;
                work.await
            }
            DeduplicateStrategy::UntilExecuted => {
                let result = AssertUnwindSafe(work).catch_unwind().await;
                self.release(job).await;
                match result {
                    Ok(value) => value,
                    Err(panic) => resume_unwind(panic),
                }
            }
        }
    }

    async fn release(&self, job: &JobDescriptor) {
        let options = self.policies.for_kind(&job.job_kind);
        let duplicate_job = DuplicateJob::new(job, options);

        match duplicate_job.release(self.store.as_ref()).await {
            Ok(true) => {
                debug!(job_kind = %job.job_kind, job_id = %job.id, "Released idempotency key");
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    job_kind = %job.job_kind,
                    job_id = %job.id,
                    error = %e,
                    "Failed to release idempotency key"
                );
            }
        }
    }
}

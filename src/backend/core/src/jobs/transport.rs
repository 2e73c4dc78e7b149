//! Job transport seam.
//!
//! The broker itself is external. The engine only needs to submit
//! descriptors and to know how many of a kind are already waiting.
//! [`InMemoryTransport`] is the in-process implementation used by the
//! [`JobExecutor`](super::JobExecutor) and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::job::{JobDescriptor, JobId};
use super::status::JobStatusTracker;
use crate::clock::{SharedClock, SystemClock};
use crate::error::Result;

/// Submission side of a job queue.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, job: JobDescriptor) -> Result<JobId>;

    /// Submit several jobs in one call, in order.
    async fn submit_batch(&self, jobs: Vec<JobDescriptor>) -> Result<Vec<JobId>>;

    /// Submit a job to run at `at`.
    async fn submit_at(&self, at: DateTime<Utc>, mut job: JobDescriptor) -> Result<JobId> {
        job.scheduled_at = Some(at);
        self.submit(job).await
    }

    /// Jobs of `job_kind` waiting to be picked up. Scheduled jobs not yet
    /// due are excluded.
    async fn queue_size(&self, job_kind: &str) -> Result<u64>;
}

/// Shared transport handle.
pub type SharedTransport = Arc<dyn Transport>;

/// In-process transport with per-kind FIFO queues and a scheduled set.
pub struct InMemoryTransport {
    ready: Mutex<HashMap<String, VecDeque<JobDescriptor>>>,
    scheduled: Mutex<Vec<JobDescriptor>>,
    clock: SharedClock,
    status: Option<Arc<JobStatusTracker>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            ready: Mutex::new(HashMap::new()),
            scheduled: Mutex::new(Vec::new()),
            clock,
            status: None,
        }
    }

    /// Write a status key for every submitted job.
    pub fn with_status_tracker(mut self, status: Arc<JobStatusTracker>) -> Self {
        self.status = Some(status);
        self
    }

    /// Pop the next ready job of `job_kind`, promoting due scheduled jobs first.
    pub async fn dequeue(&self, job_kind: &str) -> Option<JobDescriptor> {
        self.promote_due().await;
        let mut ready = self.ready.lock().await;
        ready.get_mut(job_kind).and_then(VecDeque::pop_front)
    }

    /// Move scheduled jobs whose time has come to their ready queue.
    pub async fn promote_due(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<JobDescriptor> = {
            let mut scheduled = self.scheduled.lock().await;
            let (due, waiting): (Vec<_>, Vec<_>) =
                scheduled.drain(..).partition(|job| !job.is_scheduled(now));
            *scheduled = waiting;
            due
        };

        let promoted = due.len();
        if promoted > 0 {
            let mut ready = self.ready.lock().await;
            for job in due {
                ready.entry(job.job_kind.clone()).or_default().push_back(job);
            }
            debug!(promoted = promoted, "Promoted scheduled jobs");
        }
        promoted
    }

    /// Snapshot of the ready queue for `job_kind`, in delivery order.
    pub async fn ready_jobs(&self, job_kind: &str) -> Vec<JobDescriptor> {
        self.ready
            .lock()
            .await
            .get(job_kind)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of jobs held for a future time.
    pub async fn scheduled_jobs(&self) -> Vec<JobDescriptor> {
        self.scheduled.lock().await.clone()
    }

    async fn push(&self, mut job: JobDescriptor) -> JobId {
        let now = self.clock.now();
        job.enqueued_at = Some(now);
        let id = job.id.clone();

        if let Some(status) = &self.status {
            if let Err(e) = status.track(&id).await {
                warn!(job_id = %id, error = %e, "Failed to write job status");
            }
        }

        if job.is_scheduled(now) {
            self.scheduled.lock().await.push(job);
        } else {
            let mut ready = self.ready.lock().await;
            ready.entry(job.job_kind.clone()).or_default().push_back(job);
        }
        id
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn submit(&self, job: JobDescriptor) -> Result<JobId> {
        Ok(self.push(job).await)
    }

    async fn submit_batch(&self, jobs: Vec<JobDescriptor>) -> Result<Vec<JobId>> {
        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            ids.push(self.push(job).await);
        }
        Ok(ids)
    }

    async fn queue_size(&self, job_kind: &str) -> Result<u64> {
        Ok(self
            .ready
            .lock()
            .await
            .get(job_kind)
            .map_or(0, |queue| queue.len() as u64))
    }
}

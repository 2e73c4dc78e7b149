//! Capacity-limited, self-perpetuating workers.
//!
//! A job kind declares how many of its jobs may run at once and how much
//! backlog is left. Each invocation does at most one unit of work and then
//! re-submits itself while backlog remains, so a backlog is drained by a
//! chain of short jobs rather than a long-lived loop. An external scheduler
//! kicks the chain off with [`LimitedCapacityWorker::perform_with_capacity`].
//!
//! ```text
//!   Idle ──submit──▶ Pending ──capacity?──┬──▶ Skipped
//!                                         └──▶ Running ──┬──▶ Draining (re-enqueue)
//!                                                        ├──▶ Terminal
//!                                                        └──▶ Failed
//! ```
//!
//! Workers coordinate only through [`JobRegistry`] counts, which may be
//! stale. The concurrency cap is a target that can be briefly overshot.
//! Registry and queue-size failures fail open and read as zero.

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use super::executor::JobHandler;
use super::job::{JobDescriptor, JobId, JobResult};
use super::registry::JobRegistry;
use super::transport::SharedTransport;
use crate::error::{JobgateError, Result};
use crate::telemetry::metrics::{
    MetricsSink, MAX_RUNNING_JOBS_GAUGE, REMAINING_WORK_GAUGE, RUNNING_JOBS_GAUGE,
};
use crate::telemetry::{EngineMetrics, JobTimer};

/// Contract supplied by each capacity-limited job kind.
#[async_trait]
pub trait LimitedCapacityJob: Send + Sync {
    /// Job kind identity.
    fn kind(&self) -> &str;

    /// Concurrency cap. Zero or negative disables the kind.
    fn max_running_jobs(&self) -> i64;

    /// Approximate backlog still to be processed. Best effort: used only to
    /// throttle, never as an exact bound.
    async fn remaining_work_count(&self, args: &[Value]) -> u64;

    /// Perform one unit of work.
    async fn perform_work(&self, args: &[Value]) -> JobResult;
}

/// Result of one [`LimitedCapacityWorker::perform`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformOutcome {
    /// No capacity; nothing was registered or performed
    Skipped,
    /// Work succeeded; `re_enqueued` tells whether the drain chain continues
    Completed { re_enqueued: bool },
}

/// Drives one [`LimitedCapacityJob`] against a registry, transport and
/// metrics sink.
pub struct LimitedCapacityWorker {
    job: Arc<dyn LimitedCapacityJob>,
    registry: JobRegistry,
    transport: SharedTransport,
    metrics: Arc<dyn MetricsSink>,
}

impl LimitedCapacityWorker {
    pub fn new(
        job: Arc<dyn LimitedCapacityJob>,
        registry: JobRegistry,
        transport: SharedTransport,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            job,
            registry,
            transport,
            metrics,
        }
    }

    pub fn kind(&self) -> &str {
        self.job.kind()
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Run one invocation.
    ///
    /// The registry entry for `id` is removed and metrics are reported on
    /// every path, including skips, failures and panics. A work failure is
    /// returned as [`ErrorCode::WorkFailure`](crate::error::ErrorCode) and is
    /// never retried or re-enqueued here.
    pub async fn perform(&self, id: &JobId, args: &[Value]) -> Result<PerformOutcome> {
        if !self.has_capacity().await {
            debug!(job_kind = %self.kind(), job_id = %id, "No capacity, skipping");
            EngineMetrics::record_capacity_skip(self.kind());
            self.release(id).await;
            self.report_metrics(args).await;
            return Ok(PerformOutcome::Skipped);
        }

        if let Err(e) = self.registry.register(id).await {
            warn!(job_kind = %self.kind(), job_id = %id, error = %e, "Failed to register running job");
        }

        let timer = JobTimer::start(self.kind());
        let result = AssertUnwindSafe(self.job.perform_work(args))
            .catch_unwind()
            .await;
        timer.finish(matches!(result, Ok(Ok(()))));

        self.release(id).await;
        self.report_metrics(args).await;

        match result {
            Ok(Ok(())) => {
                let re_enqueued = self.re_enqueue(args).await?;
                Ok(PerformOutcome::Completed { re_enqueued })
            }
            Ok(Err(job_error)) => {
                let error = JobgateError::work_failed(self.kind(), id.as_str(), job_error);
                error.log();
                Err(error)
            }
            Err(panic) => resume_unwind(panic),
        }
    }

    /// Fan out up to the free capacity. Submits
    /// `min(remaining_work_count, remaining_capacity)` copies of `args` in
    /// one batch and returns how many were submitted.
    pub async fn perform_with_capacity(&self, args: &[Value]) -> Result<usize> {
        if let Err(e) = self.registry.clean_up().await {
            warn!(job_kind = %self.kind(), error = %e, "Failed to clean up running jobs");
        }
        self.report_metrics(args).await;

        let remaining_work = self.job.remaining_work_count(args).await;
        let capacity = self.remaining_capacity().await;
        let count = remaining_work.min(capacity) as usize;

        if count == 0 {
            return Ok(0);
        }

        let copies = (0..count)
            .map(|_| JobDescriptor::new(self.kind(), args.to_vec()))
            .collect();
        self.transport.submit_batch(copies).await?;

        debug!(job_kind = %self.kind(), submitted = count, "Fanned out limited capacity jobs");
        Ok(count)
    }

    /// `max(max_running_jobs - running - queued, 0)`. Copies already waiting
    /// in the transport count against capacity.
    pub async fn remaining_capacity(&self) -> u64 {
        let queued = match self.transport.queue_size(self.kind()).await {
            Ok(size) => size,
            Err(e) => {
                warn!(job_kind = %self.kind(), error = %e, "Failed to read queue size");
                0
            }
        };
        let free = self.job.max_running_jobs() - self.running_jobs_count().await as i64 - queued as i64;
        free.max(0) as u64
    }

    /// Whether another job may start, ignoring queued copies.
    pub async fn has_capacity(&self) -> bool {
        self.job.max_running_jobs() - (self.running_jobs_count().await as i64) > 0
    }

    pub async fn running_jobs_count(&self) -> u64 {
        match self.registry.count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(job_kind = %self.kind(), error = %e, "Failed to count running jobs");
                0
            }
        }
    }

    /// Submit one more copy unless the backlog is empty.
    pub async fn re_enqueue(&self, args: &[Value]) -> Result<bool> {
        if self.job.remaining_work_count(args).await == 0 {
            return Ok(false);
        }

        self.transport
            .submit(JobDescriptor::new(self.kind(), args.to_vec()))
            .await?;
        Ok(true)
    }

    /// Publish running, max and remaining gauges for this kind.
    pub async fn report_metrics(&self, args: &[Value]) {
        let labels = [("worker", self.kind())];
        let running = self.running_jobs_count().await;
        let remaining = self.job.remaining_work_count(args).await;

        self.metrics.set_gauge(RUNNING_JOBS_GAUGE, &labels, running as f64);
        self.metrics
            .set_gauge(MAX_RUNNING_JOBS_GAUGE, &labels, self.job.max_running_jobs() as f64);
        self.metrics.set_gauge(REMAINING_WORK_GAUGE, &labels, remaining as f64);
    }

    async fn release(&self, id: &JobId) {
        if let Err(e) = self.registry.remove(id).await {
            warn!(job_kind = %self.kind(), job_id = %id, error = %e, "Failed to remove running job");
        }
    }
}

#[async_trait]
impl JobHandler for LimitedCapacityWorker {
    async fn handle(&self, job: &JobDescriptor) -> Result<()> {
        self.perform(&job.id, &job.args).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SharedClock};
    use crate::jobs::job::JobError;
    use crate::jobs::transport::{InMemoryTransport, Transport};
    use crate::store::InMemoryStore;
    use crate::telemetry::InMemoryMetricsSink;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingJob {
        max: i64,
        remaining: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl LimitedCapacityJob for CountingJob {
        fn kind(&self) -> &str {
            "counting"
        }

        fn max_running_jobs(&self) -> i64 {
            self.max
        }

        async fn remaining_work_count(&self, _args: &[Value]) -> u64 {
            self.remaining.load(Ordering::SeqCst)
        }

        async fn perform_work(&self, _args: &[Value]) -> JobResult {
            if self.fail {
                return Err(JobError::new("boom"));
            }
            let _ = self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            Ok(())
        }
    }

    fn worker(
        max: i64,
        remaining: u64,
        fail: bool,
    ) -> (LimitedCapacityWorker, Arc<InMemoryTransport>, Arc<InMemoryMetricsSink>) {
        let clock: SharedClock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
        let transport = Arc::new(InMemoryTransport::with_clock(clock.clone()));
        let metrics = Arc::new(InMemoryMetricsSink::new());
        let job = Arc::new(CountingJob {
            max,
            remaining: AtomicU64::new(remaining),
            fail,
        });
        let registry = JobRegistry::new(store, clock, "counting");
        let worker = LimitedCapacityWorker::new(job, registry, transport.clone(), metrics.clone());
        (worker, transport, metrics)
    }

    #[tokio::test]
    async fn test_negative_max_gives_zero_capacity() {
        let (worker, _, _) = worker(-3, 10, false);
        assert_eq!(worker.remaining_capacity().await, 0);
        assert!(!worker.has_capacity().await);
    }

    #[tokio::test]
    async fn test_completed_without_backlog_does_not_re_enqueue() {
        let (worker, transport, _) = worker(2, 1, false);

        let outcome = worker.perform(&JobId::new(), &[json!(1)]).await.unwrap();

        assert_eq!(outcome, PerformOutcome::Completed { re_enqueued: false });
        assert_eq!(transport.queue_size("counting").await.unwrap(), 0);
        assert_eq!(worker.running_jobs_count().await, 0);
    }

    #[tokio::test]
    async fn test_failure_is_not_re_enqueued() {
        let (worker, transport, metrics) = worker(2, 5, true);

        let error = worker.perform(&JobId::new(), &[]).await.unwrap_err();

        assert_eq!(error.code(), crate::error::ErrorCode::WorkFailure);
        assert_eq!(error.job_error().map(|e| e.message.as_str()), Some("boom"));
        assert_eq!(transport.queue_size("counting").await.unwrap(), 0);
        assert_eq!(worker.running_jobs_count().await, 0);
        assert_eq!(
            metrics.gauge(REMAINING_WORK_GAUGE, &[("worker", "counting")]),
            Some(5.0)
        );
    }
}

//! End-to-end tests: fan-out, execution and drain of a backlog.
//!
//! Tests cover:
//! - Draining a backlog through the executor
//! - Running-set and status cleanup after the drain
//! - Failures counted without stopping the drain
//! - Maintenance loops guarding registry clean-up

use async_trait::async_trait;
use jobgate_core::clock::{ManualClock, SharedClock};
use jobgate_core::error::JobgateError;
use jobgate_core::jobs::{
    DedupOptions, DedupPolicies, DeduplicationServer, InMemoryTransport, JobError, JobExecutor,
    JobRegistry, JobResult, JobStatusTracker, LimitedCapacityJob, LimitedCapacityWorker,
    SharedTransport, Transport,
};
use jobgate_core::maintenance::{LeasedBatchTask, LoopLimits};
use jobgate_core::store::{InMemoryStore, SharedStoreRef};
use jobgate_core::telemetry::metrics::REMAINING_WORK_GAUGE;
use jobgate_core::telemetry::InMemoryMetricsSink;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Fixtures
// ============================================================================

const KIND: &str = "thumbnail";

struct ThumbnailJob {
    max_running: i64,
    pending: AtomicU64,
    processed: AtomicU64,
    fail_every: u64,
}

#[async_trait]
impl LimitedCapacityJob for ThumbnailJob {
    fn kind(&self) -> &str {
        KIND
    }

    fn max_running_jobs(&self) -> i64 {
        self.max_running
    }

    async fn remaining_work_count(&self, _args: &[Value]) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    async fn perform_work(&self, _args: &[Value]) -> JobResult {
        if self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            return Ok(());
        }
        let n = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(JobError::new("image decode failed"));
        }
        Ok(())
    }
}

struct Pipeline {
    job: Arc<ThumbnailJob>,
    store: SharedStoreRef,
    registry: JobRegistry,
    transport: Arc<InMemoryTransport>,
    status: Arc<JobStatusTracker>,
    metrics: Arc<InMemoryMetricsSink>,
    worker: Arc<LimitedCapacityWorker>,
    executor: JobExecutor,
}

fn pipeline(max_running: i64, pending: u64, fail_every: u64) -> Pipeline {
    let clock: SharedClock = Arc::new(ManualClock::starting_now());
    let store: SharedStoreRef = Arc::new(InMemoryStore::with_clock(clock.clone()));
    let status = Arc::new(JobStatusTracker::new(store.clone()));
    let transport = Arc::new(
        InMemoryTransport::with_clock(clock.clone()).with_status_tracker(status.clone()),
    );
    let job = Arc::new(ThumbnailJob {
        max_running,
        pending: AtomicU64::new(pending),
        processed: AtomicU64::new(0),
        fail_every,
    });
    let registry = JobRegistry::new(store.clone(), clock, KIND).with_probe(status.clone());
    let metrics = Arc::new(InMemoryMetricsSink::new());
    let worker = Arc::new(LimitedCapacityWorker::new(
        job.clone(),
        registry.clone(),
        transport.clone() as SharedTransport,
        metrics.clone(),
    ));
    let policies = DedupPolicies::new(DedupOptions::until_executing()).with_limited_capacity(KIND);
    let executor = JobExecutor::new(transport.clone())
        .with_dedup_server(DeduplicationServer::new(store.clone(), policies))
        .with_status_tracker(status.clone())
        .with_handler(KIND, worker.clone());

    Pipeline {
        job,
        store,
        registry,
        transport,
        status,
        metrics,
        worker,
        executor,
    }
}

// ============================================================================
// Drain Tests
// ============================================================================

#[tokio::test]
async fn test_drain_processes_entire_backlog() {
    let p = pipeline(3, 7, 0);

    let submitted = p.worker.perform_with_capacity(&[json!("bucket-a")]).await.unwrap();
    assert_eq!(submitted, 3);

    let report = p.executor.drain(KIND, 100).await.unwrap();

    assert!(report.emptied);
    assert_eq!(report.failed, 0);
    assert_eq!(p.job.processed.load(Ordering::SeqCst), 7);
    assert_eq!(p.job.pending.load(Ordering::SeqCst), 0);
    assert_eq!(p.registry.count().await.unwrap(), 0);
    assert_eq!(p.transport.queue_size(KIND).await.unwrap(), 0);
    assert_eq!(
        p.metrics.gauge(REMAINING_WORK_GAUGE, &[("worker", KIND)]),
        Some(0.0)
    );
}

#[tokio::test]
async fn test_drain_clears_job_status() {
    let p = pipeline(2, 2, 0);
    p.worker.perform_with_capacity(&[]).await.unwrap();
    let ids: Vec<_> = p
        .transport
        .ready_jobs(KIND)
        .await
        .into_iter()
        .map(|job| job.id)
        .collect();
    for id in &ids {
        assert!(p.status.is_running(id).await.unwrap());
    }

    p.executor.drain(KIND, 100).await.unwrap();

    for id in &ids {
        assert!(!p.status.is_running(id).await.unwrap());
    }
}

#[tokio::test]
async fn test_failures_stop_only_their_chain() {
    let p = pipeline(2, 6, 3);
    p.worker.perform_with_capacity(&[]).await.unwrap();

    let report = p.executor.drain(KIND, 100).await.unwrap();

    assert!(report.emptied);
    assert_eq!(report.failed, 2);
    assert_eq!(p.job.pending.load(Ordering::SeqCst), 0);
    assert_eq!(p.registry.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_drain_respects_iteration_cap() {
    let p = pipeline(1, 50, 0);
    p.worker.perform_with_capacity(&[]).await.unwrap();

    let report = p.executor.drain(KIND, 10).await.unwrap();

    assert!(!report.emptied);
    assert_eq!(report.executed(), 10);
    assert_eq!(p.job.pending.load(Ordering::SeqCst), 40);
    assert_eq!(p.transport.queue_size(KIND).await.unwrap(), 1);
}

#[tokio::test]
async fn test_second_fan_out_tops_up_to_capacity() {
    let p = pipeline(4, 20, 0);

    assert_eq!(p.worker.perform_with_capacity(&[]).await.unwrap(), 4);
    assert_eq!(p.worker.perform_with_capacity(&[]).await.unwrap(), 0);

    p.executor.run_next(KIND).await.unwrap();
    // The finished job re-enqueued itself, so the queue is still full
    assert_eq!(p.worker.perform_with_capacity(&[]).await.unwrap(), 0);
}

// ============================================================================
// Maintenance Tests
// ============================================================================

#[tokio::test]
async fn test_leased_clean_up_loop() {
    let p = pipeline(5, 0, 0);
    let clock = ManualClock::starting_now();
    let registry = p.registry.clone();

    let finished = LeasedBatchTask::new("thumbnail:clean_up")
        .with_limits(LoopLimits::new(5, Duration::from_secs(60)))
        .execute(&p.store, &clock, || {
            let registry = registry.clone();
            async move { Ok::<_, JobgateError>(registry.clean_up().await? > 0) }
        })
        .await
        .unwrap();

    assert!(finished);
}

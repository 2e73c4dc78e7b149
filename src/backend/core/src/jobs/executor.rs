//! In-process job executor.
//!
//! Pulls descriptors from an [`InMemoryTransport`] and runs them through the
//! registered [`JobHandler`] for their kind. Each execution is wrapped by the
//! dedup server hook, and the job's status key is removed afterwards.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::duplicate::DeduplicationServer;
use super::job::{JobDescriptor, JobId};
use super::status::JobStatusTracker;
use super::transport::InMemoryTransport;
use crate::error::{JobgateError, Result};

/// Executes one delivered job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobDescriptor) -> Result<()>;
}

/// What one [`JobExecutor::run_next`] call did.
#[derive(Debug)]
pub enum RunOutcome {
    /// Nothing ready for this kind
    Idle,
    Succeeded(JobId),
    Failed(JobId, JobgateError),
}

/// Totals from [`JobExecutor::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: u64,
    pub failed: u64,
    /// Whether the queue ran dry before the iteration cap
    pub emptied: bool,
}

impl DrainReport {
    pub fn executed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Dispatches queued jobs to handlers by kind.
pub struct JobExecutor {
    transport: Arc<InMemoryTransport>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    dedup: Option<DeduplicationServer>,
    status: Option<Arc<JobStatusTracker>>,
}

impl JobExecutor {
    pub fn new(transport: Arc<InMemoryTransport>) -> Self {
        Self {
            transport,
            handlers: HashMap::new(),
            dedup: None,
            status: None,
        }
    }

    pub fn with_dedup_server(mut self, dedup: DeduplicationServer) -> Self {
        self.dedup = Some(dedup);
        self
    }

    pub fn with_status_tracker(mut self, status: Arc<JobStatusTracker>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn register(&mut self, job_kind: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_kind.into(), handler);
    }

    pub fn with_handler(mut self, job_kind: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.register(job_kind, handler);
        self
    }

    /// Execute the next ready job of `job_kind`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if no handler is registered for `job_kind`. Failures of
    /// the job itself are reported as [`RunOutcome::Failed`].
    #[instrument(skip(self))]
    pub async fn run_next(&self, job_kind: &str) -> Result<RunOutcome> {
        let handler = self
            .handlers
            .get(job_kind)
            .cloned()
            .ok_or_else(|| JobgateError::unknown_job_kind(job_kind))?;

        let Some(job) = self.transport.dequeue(job_kind).await else {
            return Ok(RunOutcome::Idle);
        };

        let result = match &self.dedup {
            Some(dedup) => dedup.around(&job, handler.handle(&job)).await,
            None => handler.handle(&job).await,
        };

        if let Some(status) = &self.status {
            if let Err(e) = status.unset(&job.id).await {
                warn!(job_kind = %job.job_kind, job_id = %job.id, error = %e, "Failed to clear job status");
            }
        }

        Ok(match result {
            Ok(()) => RunOutcome::Succeeded(job.id),
            Err(e) => RunOutcome::Failed(job.id, e),
        })
    }

    /// Run jobs of `job_kind` until none are ready or `max_iterations` ran.
    pub async fn drain(&self, job_kind: &str, max_iterations: u64) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        while report.executed() < max_iterations {
            match self.run_next(job_kind).await? {
                RunOutcome::Idle => {
                    report.emptied = true;
                    break;
                }
                RunOutcome::Succeeded(_) => report.succeeded += 1,
                RunOutcome::Failed(_, _) => report.failed += 1,
            }
        }

        info!(
            job_kind = %job_kind,
            succeeded = report.succeeded,
            failed = report.failed,
            emptied = report.emptied,
            "Drain finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::job::JobError;
    use crate::jobs::transport::Transport;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl JobHandler for EchoHandler {
        async fn handle(&self, job: &JobDescriptor) -> Result<()> {
            if job.args.first() == Some(&json!("fail")) {
                return Err(JobgateError::work_failed(
                    &job.job_kind,
                    job.id.as_str(),
                    JobError::new("asked to fail"),
                ));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unknown_kind_is_invalid_input() {
        let executor = JobExecutor::new(Arc::new(InMemoryTransport::new()));
        let error = executor.run_next("nope").await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_drain_counts_outcomes() {
        let transport = Arc::new(InMemoryTransport::new());
        for arg in ["ok", "fail", "ok"] {
            transport
                .submit(JobDescriptor::new("echo", vec![json!(arg)]))
                .await
                .unwrap();
        }
        let executor = JobExecutor::new(transport).with_handler("echo", Arc::new(EchoHandler));

        let report = executor.drain("echo", 10).await.unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(report.emptied);
    }

    #[tokio::test]
    async fn test_drain_stops_at_cap() {
        let transport = Arc::new(InMemoryTransport::new());
        for _ in 0..5 {
            transport
                .submit(JobDescriptor::new("echo", vec![]))
                .await
                .unwrap();
        }
        let executor =
            JobExecutor::new(transport.clone()).with_handler("echo", Arc::new(EchoHandler));

        let report = executor.drain("echo", 3).await.unwrap();

        assert_eq!(report.executed(), 3);
        assert!(!report.emptied);
        assert_eq!(transport.queue_size("echo").await.unwrap(), 2);
    }
}

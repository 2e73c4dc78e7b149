//! Background job engine.
//!
//! - **Registry**: per-kind set of running job identifiers with reconciliation
//! - **Limited capacity**: capacity-bounded workers that drain a backlog by
//!   re-submitting themselves
//! - **Duplicate**: idempotency keys that mark redundant submissions
//! - **Status**: per-job liveness keys
//! - **Transport / Executor**: the submission seam and an in-process dispatcher
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  submit ──▶ DeduplicatingTransport ──▶ Transport ──▶ JobExecutor          │
//! │                  │                                      │                 │
//! │                  ▼                                      ▼                 │
//! │          dedup:{kind}:{hash}              DeduplicationServer hook        │
//! │                                                         │                 │
//! │                                                         ▼                 │
//! │                                       LimitedCapacityWorker::perform      │
//! │                                         │ register / remove    │ gauges   │
//! │                                         ▼                      ▼          │
//! │                                   {kind}:running          MetricsSink     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobgate_core::jobs::{LimitedCapacityJob, LimitedCapacityWorker, JobRegistry};
//!
//! struct ExportJob;
//!
//! #[async_trait]
//! impl LimitedCapacityJob for ExportJob {
//!     fn kind(&self) -> &str { "export" }
//!     fn max_running_jobs(&self) -> i64 { 10 }
//!     async fn remaining_work_count(&self, _args: &[Value]) -> u64 { pending_exports().await }
//!     async fn perform_work(&self, _args: &[Value]) -> JobResult { export_next().await }
//! }
//!
//! let registry = JobRegistry::new(store, clock, "export");
//! let worker = LimitedCapacityWorker::new(Arc::new(ExportJob), registry, transport, metrics);
//!
//! // From a cron tick:
//! worker.perform_with_capacity(&[]).await?;
//! ```

pub mod duplicate;
pub mod executor;
pub mod job;
pub mod limited_capacity;
pub mod registry;
pub mod status;
pub mod transport;

pub use duplicate::{
    DedupOptions, DedupPolicies, DeduplicateStrategy, DeduplicatingTransport,
    DeduplicationClient, DeduplicationServer, DUPLICATE_KEY_TTL,
};
pub use executor::{DrainReport, JobExecutor, JobHandler, RunOutcome};
pub use job::{JobDescriptor, JobError, JobId, JobResult};
pub use limited_capacity::{LimitedCapacityJob, LimitedCapacityWorker, PerformOutcome};
pub use registry::{JobRegistry, LivenessProbe, RunningJob};
pub use status::JobStatusTracker;
pub use transport::{InMemoryTransport, SharedTransport, Transport};

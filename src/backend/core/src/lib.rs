#![allow(clippy::result_large_err)]
//! # Jobgate Core
//!
//! Capacity-limited background job engine over a shared key-value store.
//!
//! ## Architecture
//!
//! - **Registry**: per-kind set of running job ids with time-based and
//!   liveness-based reconciliation
//! - **Limited Capacity Worker**: bounds concurrent jobs per kind and drains a
//!   backlog by re-submitting itself
//! - **Deduplication**: idempotency keys that mark redundant submissions
//! - **Exclusive Lease**: TTL-bound mutex for singleton maintenance tasks
//! - **Maintenance**: bounded loops over an injected clock
//! - **Store**: the shared store seam, backed by Redis or memory
//! - **Telemetry**: structured logging and Prometheus gauges

pub mod clock;
pub mod config;
pub mod error;
pub mod jobs;
pub mod lease;
pub mod maintenance;
pub mod store;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, JobgateError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, JobgateError, Result};
    pub use crate::jobs::{
        DedupOptions, DedupPolicies, DeduplicateStrategy, DeduplicatingTransport,
        DeduplicationClient, DeduplicationServer, InMemoryTransport, JobDescriptor, JobError,
        JobExecutor, JobHandler, JobId, JobRegistry, JobResult, JobStatusTracker,
        LimitedCapacityJob, LimitedCapacityWorker, PerformOutcome, SharedTransport, Transport,
    };
    pub use crate::lease::{in_lock, BackoffStrategy, ExclusiveLease, LockOptions};
    pub use crate::maintenance::{loop_until, LeasedBatchTask, LoopLimits};
    pub use crate::store::{InMemoryStore, RedisStore, SharedStore, SharedStoreRef};
    pub use crate::telemetry::{InMemoryMetricsSink, MetricsSink, PrometheusSink};
}

//! Duplicate job suppression.
//!
//! Two submissions are equivalent when they share a job kind and have the
//! same canonicalized arguments. The first one to claim the idempotency key
//! owns the dedup record. Later equivalent submissions are annotated with
//! `duplicate_of` and still delivered; nothing is ever dropped here.
//!
//! ```text
//!  submit ──▶ DeduplicationClient ──▶ Transport ──▶ executor
//!               │ set-if-absent            │
//!               ▼                          ▼
//!        dedup:{kind}:{hash} ◀──── DeduplicationServer
//!                                  (delete if owner)
//! ```

pub mod client;
pub mod duplicate_job;
pub mod server;

pub use client::{DeduplicatingTransport, DeduplicationClient};
pub use duplicate_job::{canonicalize, dedup_key, idempotency_hash, DuplicateJob};
pub use server::DeduplicationServer;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::DedupConfig;

/// Default lifetime of a dedup record.
pub const DUPLICATE_KEY_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// When a dedup record is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeduplicateStrategy {
    /// No deduplication
    None,
    /// Released when the owner starts executing
    #[default]
    UntilExecuting,
    /// Released when the owner finishes, whether it succeeded or not
    UntilExecuted,
}

/// Deduplication settings for one job kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupOptions {
    pub strategy: DeduplicateStrategy,

    /// Whether future-scheduled jobs take part
    #[serde(default)]
    pub including_scheduled: bool,

    #[serde(default = "default_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

fn default_ttl() -> Duration {
    DUPLICATE_KEY_TTL
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            strategy: DeduplicateStrategy::default(),
            including_scheduled: false,
            ttl: DUPLICATE_KEY_TTL,
        }
    }
}

impl DedupOptions {
    pub fn none() -> Self {
        Self {
            strategy: DeduplicateStrategy::None,
            ..Default::default()
        }
    }

    pub fn until_executing() -> Self {
        Self::default()
    }

    pub fn until_executed() -> Self {
        Self {
            strategy: DeduplicateStrategy::UntilExecuted,
            ..Default::default()
        }
    }

    pub fn including_scheduled(mut self) -> Self {
        self.including_scheduled = true;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.strategy != DeduplicateStrategy::None
    }
}

impl From<&DedupConfig> for DedupOptions {
    fn from(config: &DedupConfig) -> Self {
        Self {
            strategy: config.default_strategy,
            including_scheduled: config.including_scheduled,
            ttl: config.ttl,
        }
    }
}

/// Per-kind policy table with a fallback.
#[derive(Debug, Clone, Default)]
pub struct DedupPolicies {
    default: DedupOptions,
    per_kind: HashMap<String, DedupOptions>,
}

impl DedupPolicies {
    pub fn new(default: DedupOptions) -> Self {
        Self {
            default,
            per_kind: HashMap::new(),
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(DedupOptions::from(config))
    }

    pub fn with_policy(mut self, job_kind: impl Into<String>, options: DedupOptions) -> Self {
        self.set(job_kind, options);
        self
    }

    /// Exempt a limited-capacity kind, whose fan-out copies share args.
    pub fn with_limited_capacity(self, job_kind: impl Into<String>) -> Self {
        self.with_policy(job_kind, DedupOptions::none())
    }

    pub fn set(&mut self, job_kind: impl Into<String>, options: DedupOptions) {
        self.per_kind.insert(job_kind.into(), options);
    }

    pub fn for_kind(&self, job_kind: &str) -> &DedupOptions {
        self.per_kind.get(job_kind).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_lookup_falls_back_to_default() {
        let policies = DedupPolicies::default()
            .with_policy("export", DedupOptions::until_executed().including_scheduled())
            .with_policy("drain", DedupOptions::none());

        assert_eq!(
            policies.for_kind("export").strategy,
            DeduplicateStrategy::UntilExecuted
        );
        assert!(policies.for_kind("export").including_scheduled);
        assert!(!policies.for_kind("drain").is_enabled());
        assert_eq!(policies.for_kind("other"), &DedupOptions::default());
    }

    #[test]
    fn test_limited_capacity_kinds_exempt() {
        let policies = DedupPolicies::new(DedupOptions::until_executed())
            .with_limited_capacity("thumbnail");

        assert_eq!(policies.for_kind("thumbnail").strategy, DeduplicateStrategy::None);
        assert!(policies.for_kind("mail").is_enabled());
    }

    #[test]
    fn test_strategy_serde() {
        let strategy: DeduplicateStrategy = serde_json::from_str("\"until_executed\"").unwrap();
        assert_eq!(strategy, DeduplicateStrategy::UntilExecuted);
        assert_eq!(
            serde_json::to_string(&DeduplicateStrategy::None).unwrap(),
            "\"none\""
        );
    }
}

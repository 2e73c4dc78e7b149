//! Configuration management.
//!
//! Loaded from an optional file plus `JOBGATE__*` environment variables,
//! e.g. `JOBGATE__REDIS__URL=redis://cache:6379` or
//! `JOBGATE__REGISTRY__ENTRY_TTL=6h`.

use crate::error::{JobgateError, Result};
use crate::jobs::DeduplicateStrategy;
use crate::lease::BackoffStrategy;
use crate::telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "JOBGATE";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Which shared store backs registries, dedup records and leases
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub lease: LeaseConfig,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; only coordinates workers inside one process
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Namespace prepended to every key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// TTL of a running set, refreshed on every registration. Also the age
    /// after which an entry is treated as leaked.
    #[serde(default = "default_entry_ttl", with = "humantime_serde")]
    pub entry_ttl: Duration,

    /// Max identifiers removed per store call during clean-up
    #[serde(default = "default_clean_up_batch_size")]
    pub clean_up_batch_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            entry_ttl: default_entry_ttl(),
            clean_up_batch_size: default_clean_up_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Strategy for job kinds without an explicit policy
    #[serde(default)]
    pub default_strategy: DeduplicateStrategy,

    /// Whether future-scheduled jobs take part in deduplication by default
    #[serde(default)]
    pub including_scheduled: bool,

    /// Base lifetime of a dedup record
    #[serde(default = "default_dedup_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            default_strategy: DeduplicateStrategy::default(),
            including_scheduled: false,
            ttl: default_dedup_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    #[serde(default = "default_lease_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Extra attempts after the first failed acquire
    #[serde(default = "default_lease_retries")]
    pub retries: u32,

    #[serde(default = "default_lease_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    #[serde(default)]
    pub backoff: BackoffKind,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: default_lease_ttl(),
            retries: default_lease_retries(),
            retry_delay: default_lease_retry_delay(),
            backoff: BackoffKind::default(),
        }
    }
}

impl LeaseConfig {
    /// The backoff strategy these settings describe.
    pub fn backoff_strategy(&self) -> BackoffStrategy {
        let delay_ms = self.retry_delay.as_millis() as u64;
        match self.backoff {
            BackoffKind::Fixed => BackoffStrategy::Fixed { delay_ms },
            BackoffKind::Linear => BackoffStrategy::Linear {
                initial_ms: delay_ms,
                increment_ms: delay_ms,
                max_ms: delay_ms.saturating_mul(10),
            },
            BackoffKind::Exponential => BackoffStrategy::Exponential {
                initial_ms: delay_ms,
                multiplier: 2.0,
                max_ms: delay_ms.saturating_mul(100),
            },
            BackoffKind::ExponentialWithJitter => BackoffStrategy::ExponentialWithJitter {
                initial_ms: delay_ms,
                multiplier: 2.0,
                max_ms: delay_ms.saturating_mul(100),
                jitter_factor: 0.2,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Linear,
    Exponential,
    ExponentialWithJitter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Lifetime of a `job_status:{id}` key
    #[serde(default = "default_status_ttl", with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            ttl: default_status_ttl(),
        }
    }
}

// Default value functions
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "jobgate:".to_string() }
fn default_entry_ttl() -> Duration { Duration::from_secs(6 * 60 * 60) }
fn default_clean_up_batch_size() -> usize { 1000 }
fn default_dedup_ttl() -> Duration { Duration::from_secs(6 * 60 * 60) }
fn default_lease_ttl() -> Duration { Duration::from_secs(60) }
fn default_lease_retries() -> u32 { 10 }
fn default_lease_retry_delay() -> Duration { Duration::from_millis(10) }
fn default_status_ttl() -> Duration { Duration::from_secs(30 * 60) }

impl Config {
    /// Load configuration from `.env` and the environment.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.registry.clean_up_batch_size == 0 {
            return Err(JobgateError::configuration(
                "registry.clean_up_batch_size must be greater than zero",
            ));
        }
        if self.registry.entry_ttl.is_zero() {
            return Err(JobgateError::configuration("registry.entry_ttl must be non-zero"));
        }
        if self.dedup.ttl.is_zero() {
            return Err(JobgateError::configuration("dedup.ttl must be non-zero"));
        }
        if self.lease.ttl.as_millis() == 0 {
            return Err(JobgateError::configuration(
                "lease.ttl must be at least one millisecond",
            ));
        }
        if self.status.ttl.is_zero() {
            return Err(JobgateError::configuration("status.ttl must be non-zero"));
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

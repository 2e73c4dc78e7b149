//! Engine handles shared by all store-backed commands.

use anyhow::{Context, Result};
use jobgate_core::clock::{SharedClock, SystemClock};
use jobgate_core::config::Config;
use jobgate_core::jobs::{JobRegistry, JobStatusTracker};
use jobgate_core::store::{self, SharedStoreRef};
use jobgate_core::telemetry::{init_logging as init_engine_logging, LogFormat, LoggingConfig};
use std::path::Path;
use std::sync::Arc;

/// Load engine configuration from `path` if given, else from the environment.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load().context("Failed to load configuration from environment")?,
    };
    Ok(config)
}

/// Send engine logs to stderr. Quiet unless `verbose`.
pub fn init_logging(verbose: bool) -> Result<()> {
    let config = LoggingConfig {
        level: if verbose { "debug" } else { "warn" }.to_string(),
        format: LogFormat::Compact,
        include_location: false,
        ..Default::default()
    };
    init_engine_logging(&config, "cli")
}

pub struct EngineContext {
    pub config: Config,
    pub store: SharedStoreRef,
    pub clock: SharedClock,
}

impl EngineContext {
    pub async fn connect(config: Config) -> Result<Self> {
        let clock: SharedClock = Arc::new(SystemClock);
        let store = store::connect(&config, clock.clone())
            .await
            .with_context(|| format!("Failed to connect to the {:?} store", config.store.backend))?;
        Ok(Self {
            config,
            store,
            clock,
        })
    }

    /// Registry for `job_kind`, consulting job status keys during clean-up.
    pub fn registry(&self, job_kind: &str) -> JobRegistry {
        JobRegistry::with_config(
            self.store.clone(),
            self.clock.clone(),
            job_kind,
            &self.config.registry,
        )
        .with_probe(Arc::new(self.status_tracker()))
    }

    pub fn status_tracker(&self) -> JobStatusTracker {
        JobStatusTracker::with_config(self.store.clone(), &self.config.status)
    }
}

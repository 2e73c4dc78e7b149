//! Prometheus metrics for capacity-limited workers, deduplication and leases.
//!
//! Workers report their gauges through the [`MetricsSink`] seam so the
//! running/max/remaining values can be asserted in tests. Counters and the
//! job duration histogram go straight through the `metrics` facade.
//!
//! # Example
//!
//! ```rust,no_run
//! use jobgate_core::telemetry::metrics::{MetricsSink, PrometheusSink};
//!
//! let sink = PrometheusSink;
//! sink.set_gauge("limited_capacity_worker_running_jobs", &[("worker", "export")], 3.0);
//! ```

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Label,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════════
// Metric Names
// ═══════════════════════════════════════════════════════════════════════════════

pub const RUNNING_JOBS_GAUGE: &str = "limited_capacity_worker_running_jobs";
pub const MAX_RUNNING_JOBS_GAUGE: &str = "limited_capacity_worker_max_running_jobs";
pub const REMAINING_WORK_GAUGE: &str = "limited_capacity_worker_remaining_work_count";

pub const DUPLICATE_JOBS_TOTAL: &str = "jobgate_duplicate_jobs_total";
pub const LEASE_ATTEMPTS_TOTAL: &str = "jobgate_lease_attempts_total";
pub const CAPACITY_SKIPS_TOTAL: &str = "jobgate_capacity_skips_total";
pub const JOB_DURATION_SECONDS: &str = "jobgate_job_duration_seconds";

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,

    /// Histogram buckets for job durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            endpoint: default_metrics_endpoint(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_endpoint() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle onto the installed Prometheus recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry with no recorder installed.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Initialize the metrics subsystem.
///
/// # Errors
///
/// Returns an error if the buckets are invalid or a recorder is already
/// installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new();

    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;

    register_metric_descriptions();

    tracing::info!(
        service_name = %service_name,
        endpoint = %config.endpoint,
        "Metrics initialized"
    );

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

/// Register all metric descriptions.
fn register_metric_descriptions() {
    // Worker gauges
    describe_gauge!(RUNNING_JOBS_GAUGE, "Jobs currently registered as running per worker");
    describe_gauge!(MAX_RUNNING_JOBS_GAUGE, "Configured concurrency cap per worker");
    describe_gauge!(REMAINING_WORK_GAUGE, "Backlog still to be drained per worker");

    // Counters
    describe_counter!("jobgate_errors_total", "Total number of errors by code");
    describe_counter!(DUPLICATE_JOBS_TOTAL, "Submissions marked as duplicates");
    describe_counter!(LEASE_ATTEMPTS_TOTAL, "Exclusive lease attempts by outcome");
    describe_counter!(CAPACITY_SKIPS_TOTAL, "Invocations skipped for lack of capacity");

    describe_histogram!(JOB_DURATION_SECONDS, "Job execution duration in seconds");
}

// ═══════════════════════════════════════════════════════════════════════════════
// Gauge Sink
// ═══════════════════════════════════════════════════════════════════════════════

/// Destination for worker gauges.
pub trait MetricsSink: Send + Sync {
    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Sink backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let labels: Vec<Label> = labels
            .iter()
            .map(|(k, v)| Label::new(k.to_string(), v.to_string()))
            .collect();
        gauge!(name.to_string(), labels).set(value);
    }
}

/// Sink that keeps the last value per name and label set.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    gauges: Mutex<BTreeMap<(String, Vec<(String, String)>), f64>>,
    writes: Mutex<Vec<(String, f64)>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value written for `name` with exactly `labels`.
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges.lock().get(&Self::key(name, labels)).copied()
    }

    /// Number of writes to `name`, across all label sets.
    pub fn write_count(&self, name: &str) -> usize {
        self.writes.lock().iter().filter(|(n, _)| n == name).count()
    }

    fn key(name: &str, labels: &[(&str, &str)]) -> (String, Vec<(String, String)>) {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        (name.to_string(), labels)
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.gauges.lock().insert(Self::key(name, labels), value);
        self.writes.lock().push((name.to_string(), value));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Counters
// ═══════════════════════════════════════════════════════════════════════════════

/// Counters emitted by the engine.
pub struct EngineMetrics;

impl EngineMetrics {
    pub fn record_duplicate(job_kind: &str) {
        counter!(DUPLICATE_JOBS_TOTAL, "job_kind" => job_kind.to_string()).increment(1);
    }

    pub fn record_capacity_skip(job_kind: &str) {
        counter!(CAPACITY_SKIPS_TOTAL, "job_kind" => job_kind.to_string()).increment(1);
    }

    /// `outcome` is one of `acquired`, `contended`, `exhausted`.
    pub fn record_lease_attempt(outcome: &'static str) {
        counter!(LEASE_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
    }
}

/// Times one job execution into the duration histogram.
pub struct JobTimer {
    start: Instant,
    job_kind: String,
}

impl JobTimer {
    pub fn start(job_kind: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            job_kind: job_kind.into(),
        }
    }

    /// Finish and record, labelled by outcome.
    pub fn finish(self, success: bool) -> Duration {
        let duration = self.start.elapsed();

        histogram!(
            JOB_DURATION_SECONDS,
            "job_kind" => self.job_kind,
            "outcome" => if success { "success" } else { "failure" }
        )
        .record(duration.as_secs_f64());

        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.endpoint, "0.0.0.0:9090");
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_disabled_registry_renders_nothing() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        let registry = init_metrics(&config, "test").unwrap();
        assert!(!registry.is_enabled());
        assert_eq!(registry.render(), "");
    }

    #[test]
    fn test_in_memory_sink_keeps_last_value() {
        let sink = InMemoryMetricsSink::new();
        sink.set_gauge(RUNNING_JOBS_GAUGE, &[("worker", "export")], 1.0);
        sink.set_gauge(RUNNING_JOBS_GAUGE, &[("worker", "export")], 4.0);
        sink.set_gauge(RUNNING_JOBS_GAUGE, &[("worker", "import")], 2.0);

        assert_eq!(sink.gauge(RUNNING_JOBS_GAUGE, &[("worker", "export")]), Some(4.0));
        assert_eq!(sink.gauge(RUNNING_JOBS_GAUGE, &[("worker", "import")]), Some(2.0));
        assert_eq!(sink.gauge(MAX_RUNNING_JOBS_GAUGE, &[("worker", "export")]), None);
        assert_eq!(sink.write_count(RUNNING_JOBS_GAUGE), 3);
    }

    #[test]
    fn test_job_timer() {
        let timer = JobTimer::start("export");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.finish(true).as_millis() >= 5);
    }
}

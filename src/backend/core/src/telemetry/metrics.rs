//! Prometheus metrics for jobs, the pool and HTTP requests.
//!
//! Job metrics are emitted with the `metrics` macros where the events happen
//! (runner, pool, engine). This module installs the Prometheus recorder,
//! describes every metric, and renders the scrape output.
//!
//! # Example
//!
//! ```rust,no_run
//! use trainyard_core::telemetry::metrics::RequestDurationHistogram;
//!
//! RequestDurationHistogram::record("GET", "/api/v1/jobs", 200, 0.004);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for durations (in seconds)
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
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

/// Spans sub-second steps up to hour-long jobs.
fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0,
    ]
}

/// Handle to the installed recorder.
#[derive(Clone, Default)]
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
    /// A registry with no recorder; `render` returns an empty string.
    pub fn disabled() -> Self {
        Self::default()
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

/// Install the Prometheus recorder.
///
/// # Errors
///
/// Fails on invalid buckets or when a global recorder is already installed.
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

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    // Jobs
    describe_counter!("trainyard_jobs_submitted_total", "Jobs accepted, by kind");
    describe_counter!(
        "trainyard_jobs_rejected_total",
        "Submissions refused by admission control, by reason"
    );
    describe_counter!(
        "trainyard_jobs_finished_total",
        "Jobs that reached a terminal state, by kind and status"
    );
    describe_histogram!(
        "trainyard_job_duration_seconds",
        Unit::Seconds,
        "Wall-clock time from start to terminal state"
    );
    describe_histogram!(
        "trainyard_step_duration_seconds",
        Unit::Seconds,
        "Time spent in a single executor step"
    );
    describe_counter!(
        "trainyard_jobs_evicted_total",
        "Terminal jobs dropped by the retention sweep"
    );

    // Pool
    describe_gauge!("trainyard_jobs_running", "Jobs currently running");
    describe_gauge!("trainyard_queue_depth", "Jobs waiting for a concurrency slot");

    // Errors
    describe_counter!("trainyard_errors_total", "Errors by code and category");

    // HTTP
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_counter!("http_requests_total", "Total number of HTTP requests");
}

/// Request duration histogram for HTTP requests.
pub struct RequestDurationHistogram;

impl RequestDurationHistogram {
    /// Record a request duration.
    pub fn record(method: &str, path: &str, status_code: u16, duration_seconds: f64) {
        histogram!(
            "http_request_duration_seconds",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_code" => status_code.to_string(),
        )
        .record(duration_seconds);

        counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_code" => status_code.to_string(),
        )
        .increment(1);
    }

    /// Start timing a request.
    pub fn start(method: &str, path: &str) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
            method: method.to_string(),
            path: path.to_string(),
        }
    }
}

/// Timer for measuring request durations.
pub struct RequestTimer {
    start: Instant,
    method: String,
    path: String,
}

impl RequestTimer {
    /// Finish timing and record the duration.
    pub fn finish(self, status_code: u16) {
        RequestDurationHistogram::record(
            &self.method,
            &self.path,
            status_code,
            self.start.elapsed().as_secs_f64(),
        );
    }
}

//! Telemetry: structured logging and Prometheus metrics.
//!
//! - **Logging**: JSON/pretty/compact output through `tracing-subscriber`
//! - **Metrics**: Prometheus recorder for job, pool and HTTP metrics
//!
//! # Example
//!
//! ```rust,no_run
//! use trainyard_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! let config = TelemetryConfig::default();
//! let handle = init_telemetry(&config).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, SpanEventConfig};
pub use metrics::{init_metrics, MetricsConfig, MetricsRegistry, RequestDurationHistogram};

use serde::Deserialize;

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Service version
    #[serde(default = "default_service_version")]
    pub service_version: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_version: default_service_version(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "trainyard".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_environment() -> String {
    std::env::var("TRAINYARD_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Initialize metrics, then logging.
///
/// Call once at startup.
///
/// # Errors
///
/// Returns an error if either component fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    let metrics = init_metrics(&config.metrics, &config.service_name)?;

    init_logging(&config.logging, &config.environment)?;

    ::tracing::info!(
        service_name = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        metrics_enabled = metrics.is_enabled(),
        "Telemetry initialized"
    );

    Ok(TelemetryHandle { metrics })
}

/// Handle returned by [`init_telemetry`].
#[derive(Debug, Clone)]
pub struct TelemetryHandle {
    /// Metrics handle for rendering the scrape endpoint
    pub metrics: MetricsRegistry,
}

impl TelemetryHandle {
    pub fn shutdown(self) {
        ::tracing::info!("Telemetry shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "trainyard");
        assert!(!config.service_version.is_empty());
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: TelemetryConfig =
            serde_json::from_str(r#"{"environment": "production", "logging": {"level": "warn"}}"#)
                .unwrap();
        assert_eq!(config.environment, "production");
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.service_name, "trainyard");
    }
}

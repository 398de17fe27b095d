//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Result, TrainyardError};
use crate::telemetry::TelemetryConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Job engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging and metrics configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Jobs allowed to run at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Accepted jobs allowed to wait for a slot
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    /// How long shutdown waits for running jobs
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// How long terminal jobs stay queryable
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,

    /// Period of the retention sweep
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Optional wall-clock limit per job, checked between steps
    #[serde(default, with = "humantime_serde")]
    pub job_deadline: Option<Duration>,

    /// Simulated time per training epoch
    #[serde(default = "default_training_step_delay", with = "humantime_serde")]
    pub training_step_delay: Duration,

    /// Simulated time per optimization trial
    #[serde(default = "default_optimization_step_delay", with = "humantime_serde")]
    pub optimization_step_delay: Duration,

    /// Simulated time per hyperparameter trial
    #[serde(default = "default_tuning_step_delay", with = "humantime_serde")]
    pub tuning_step_delay: Duration,

    /// Capacity of the job event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_queue_depth: default_max_queue_depth(),
            shutdown_timeout: default_shutdown_timeout(),
            retention: default_retention(),
            sweep_interval: default_sweep_interval(),
            job_deadline: None,
            training_step_delay: default_training_step_delay(),
            optimization_step_delay: default_optimization_step_delay(),
            tuning_step_delay: default_tuning_step_delay(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl EngineConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(TrainyardError::invalid_config("engine.max_concurrent_jobs", "must be positive"));
        }
        if self.max_queue_depth == 0 {
            return Err(TrainyardError::invalid_config("engine.max_queue_depth", "must be positive"));
        }
        if self.event_buffer == 0 {
            return Err(TrainyardError::invalid_config("engine.event_buffer", "must be positive"));
        }
        if self.sweep_interval.is_zero() {
            return Err(TrainyardError::invalid_config("engine.sweep_interval", "must be non-zero"));
        }
        Ok(())
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_concurrent_jobs() -> usize {
    16
}

fn default_max_queue_depth() -> usize {
    256
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retention() -> Duration {
    Duration::from_secs(3600)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_training_step_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_optimization_step_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_tuning_step_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_event_buffer() -> usize {
    1024
}

impl Config {
    /// Load configuration from `.env` and the environment.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("TRAINYARD").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.engine.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides on top.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("TRAINYARD").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.engine.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.max_concurrent_jobs, 16);
        assert_eq!(engine.max_queue_depth, 256);
        assert_eq!(engine.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(engine.retention, Duration::from_secs(3600));
        assert_eq!(engine.training_step_delay, Duration::from_secs(1));
        assert_eq!(engine.optimization_step_delay, Duration::from_millis(500));
        assert_eq!(engine.tuning_step_delay, Duration::from_millis(200));
        assert!(engine.job_deadline.is_none());
        assert!(engine.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let engine = EngineConfig {
            max_concurrent_jobs: 0,
            ..Default::default()
        };
        let err = engine.validate().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidConfiguration);

        let engine = EngineConfig {
            max_queue_depth: 0,
            ..Default::default()
        };
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_from_file_parses_humantime() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9191

[engine]
max_concurrent_jobs = 4
shutdown_timeout = "5s"
job_deadline = "10m"
training_step_delay = "250ms"

[telemetry]
service_name = "trainyard-test"
"#
        )
        .unwrap();

        let cfg = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.server.port, 9191);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.engine.max_concurrent_jobs, 4);
        assert_eq!(cfg.engine.max_queue_depth, 256);
        assert_eq!(cfg.engine.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(cfg.engine.job_deadline, Some(Duration::from_secs(600)));
        assert_eq!(cfg.engine.training_step_delay, Duration::from_millis(250));
        assert_eq!(cfg.telemetry.service_name, "trainyard-test");
    }

    #[test]
    fn test_from_file_rejects_invalid_engine() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine]\nmax_queue_depth = 0").unwrap();
        assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
    }
}

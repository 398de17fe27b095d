#![allow(clippy::result_large_err)]
//! # Trainyard Core
//!
//! Orchestration engine for long-running training and optimization jobs.
//!
//! ## Architecture
//!
//! - **Jobs**: registry, per-job runner state machine, bounded pool with admission control
//! - **Executors**: pluggable step implementations keyed by job kind
//! - **API**: REST endpoints and a Server-Sent Events stream of job events
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, TrainyardError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, EngineConfig};
    pub use crate::error::{ErrorCode, ErrorContext, Result, TrainyardError};
    pub use crate::jobs::{
        ExecutorRegistry, JobEngine, JobEvent, JobEventKind, JobFilter, JobId, JobKind,
        JobOutcome, JobSpec, JobStatus, JobSubmission, JobSummary, MetricSnapshot,
        ProgressSnapshot, StepContext, StepError, StepExecutor,
    };
}

//! Job orchestration.
//!
//! ```text
//!  submit ──▶ JobEngine ──▶ JobPool queue ──▶ dispatcher ──▶ JobRunner ──▶ StepExecutor
//!                │                                              │
//!                └──── JobRegistry ◀──── progress / cancel ─────┘
//! ```
//!
//! - **Registry**: concurrent store of job records
//! - **Runner**: per-job state machine, cancellation checked at step boundaries
//! - **Pool**: bounded queue with admission control and a concurrency limit
//! - **Executors**: pluggable per-kind step implementations

pub mod builtin;
pub mod cancellation;
pub mod engine;
pub mod events;
pub mod executor;
pub mod job;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod results;
pub mod runner;

pub use builtin::{
    trial_parameters, SimulatedOptimizationExecutor, SimulatedTrainingExecutor, SimulatedTuningExecutor,
    TrialParameter, OPTIMIZATION_BASELINE,
};
pub use cancellation::CancellationFlag;
pub use engine::{EngineStats, JobCounts, JobEngine, JobFilter};
pub use events::{EventBus, JobEvent, JobEventKind};
pub use executor::{ExecutorRegistry, StepContext, StepError, StepExecutor, PARAMETER_PREFIX};
pub use job::{
    JobId, JobKind, JobRecord, JobSpec, JobStatus, JobSubmission, JobSummary, MetricSnapshot,
    ModelType, OptimizationAlgorithm, OptimizationType, ParameterGrid, StepRecord, TuningMethod,
};
pub use pool::{Admission, JobPool, PoolConfig, PoolStats};
pub use progress::ProgressSnapshot;
pub use registry::JobRegistry;
pub use results::{JobOutcome, ResultUnavailable};
pub use runner::JobRunner;

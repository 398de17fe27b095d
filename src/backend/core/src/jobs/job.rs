//! Job definitions.
//!
//! This module provides the data model shared by every part of the engine:
//!
//! - **JobId / JobKind / JobStatus**: identity, discriminator and lifecycle state
//! - **JobSpec**: kind-tagged submission parameters with validation
//! - **JobRecord**: the authoritative state of one job, owned by the registry
//! - **StepRecord**: one entry of a job's append-only history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, TrainyardError};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Discriminator selecting the step executor and the meaning of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// One step is one epoch
    Training,
    /// One step is one optimization trial
    Optimization,
    /// One step is one hyperparameter trial
    HyperparameterTuning,
}

impl JobKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Optimization => "optimization",
            Self::HyperparameterTuning => "hyperparameter_tuning",
        }
    }

    /// Upper bound on `total_steps` accepted for this kind.
    pub const fn max_steps(&self) -> u32 {
        match self {
            Self::Training => 100,
            Self::Optimization | Self::HyperparameterTuning => 1000,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is accepted and waiting for a worker
    Pending,
    /// Job is executing steps
    Running,
    /// All steps finished
    Completed,
    /// A step failed or the deadline passed
    Failed,
    /// Cancellation was observed at a step boundary
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// The complete transition graph. Terminal states have no outgoing edges.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Spec
// ═══════════════════════════════════════════════════════════════════════════════

/// Model family a training job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    CodeReview,
    Rag,
    MultiHop,
    Classification,
    Generation,
}

impl ModelType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CodeReview => "code_review",
            Self::Rag => "rag",
            Self::MultiHop => "multi_hop",
            Self::Classification => "classification",
            Self::Generation => "generation",
        }
    }
}

/// What a training job adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationType {
    PromptOptimization,
    WeightOptimization,
    HybridOptimization,
}

impl OptimizationType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PromptOptimization => "prompt_optimization",
            Self::WeightOptimization => "weight_optimization",
            Self::HybridOptimization => "hybrid_optimization",
        }
    }
}

/// Search strategy an optimization job uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationAlgorithm {
    BootstrapFewShot,
    RandomSearch,
    BayesianOptimization,
    GeneticAlgorithm,
    ReinforcementLearning,
}

/// How a tuning job walks its hyperparameter grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningMethod {
    /// Combinations in order, wrapping when trials outnumber them
    GridSearch,
    /// Combinations in a fixed scrambled order
    RandomSearch,
}

/// Candidate values per hyperparameter name.
pub type ParameterGrid = BTreeMap<String, Vec<f64>>;

/// Kind-tagged submission parameters.
///
/// Serialized with a `kind` tag, so `{"kind": "training", "epochs": 5}` is a valid spec.
/// Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSpec {
    Training {
        #[serde(default = "default_model_type")]
        model_type: ModelType,
        #[serde(default = "default_epochs")]
        epochs: u32,
        #[serde(default = "default_batch_size")]
        batch_size: u32,
        #[serde(default = "default_learning_rate")]
        learning_rate: f64,
        #[serde(default = "default_optimization_type")]
        optimization_type: OptimizationType,
    },
    Optimization {
        #[serde(default = "default_target_module")]
        target_module: String,
        #[serde(default = "default_algorithm")]
        optimization_algorithm: OptimizationAlgorithm,
        #[serde(default = "default_max_iterations")]
        max_iterations: u32,
        #[serde(default = "default_evaluation_metric")]
        evaluation_metric: String,
    },
    HyperparameterTuning {
        #[serde(default = "default_target_model")]
        target_model: String,
        #[serde(default = "default_parameter_grid")]
        hyperparameters: ParameterGrid,
        #[serde(default = "default_tuning_method")]
        tuning_method: TuningMethod,
        #[serde(default = "default_cross_validation_folds")]
        cross_validation_folds: u32,
        #[serde(default = "default_evaluation_metric")]
        evaluation_metric: String,
        #[serde(default = "default_max_trials")]
        max_trials: u32,
    },
}

fn default_model_type() -> ModelType {
    ModelType::Classification
}

fn default_epochs() -> u32 {
    10
}

fn default_batch_size() -> u32 {
    32
}

fn default_learning_rate() -> f64 {
    1e-5
}

fn default_optimization_type() -> OptimizationType {
    OptimizationType::PromptOptimization
}

fn default_target_module() -> String {
    "default".to_string()
}

fn default_algorithm() -> OptimizationAlgorithm {
    OptimizationAlgorithm::BootstrapFewShot
}

fn default_max_iterations() -> u32 {
    100
}

fn default_evaluation_metric() -> String {
    "accuracy".to_string()
}

fn default_target_model() -> String {
    "default".to_string()
}

fn default_parameter_grid() -> ParameterGrid {
    ParameterGrid::from([
        ("learning_rate".to_string(), vec![0.01, 0.001, 0.0001]),
        ("batch_size".to_string(), vec![32.0, 64.0, 128.0]),
    ])
}

fn default_tuning_method() -> TuningMethod {
    TuningMethod::GridSearch
}

fn default_cross_validation_folds() -> u32 {
    5
}

fn default_max_trials() -> u32 {
    100
}

impl JobSpec {
    /// Training spec with every parameter at its default.
    pub fn training() -> Self {
        Self::Training {
            model_type: default_model_type(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            optimization_type: default_optimization_type(),
        }
    }

    /// Optimization spec with every parameter at its default.
    pub fn optimization() -> Self {
        Self::Optimization {
            target_module: default_target_module(),
            optimization_algorithm: default_algorithm(),
            max_iterations: default_max_iterations(),
            evaluation_metric: default_evaluation_metric(),
        }
    }

    /// Hyperparameter tuning spec with every parameter at its default.
    pub fn tuning() -> Self {
        Self::HyperparameterTuning {
            target_model: default_target_model(),
            hyperparameters: default_parameter_grid(),
            tuning_method: default_tuning_method(),
            cross_validation_folds: default_cross_validation_folds(),
            evaluation_metric: default_evaluation_metric(),
            max_trials: default_max_trials(),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Self::Training { .. } => JobKind::Training,
            Self::Optimization { .. } => JobKind::Optimization,
            Self::HyperparameterTuning { .. } => JobKind::HyperparameterTuning,
        }
    }

    /// Step count implied by the spec: epochs, iterations or trials.
    pub fn default_steps(&self) -> u32 {
        match self {
            Self::Training { epochs, .. } => *epochs,
            Self::Optimization { max_iterations, .. } => *max_iterations,
            Self::HyperparameterTuning { max_trials, .. } => *max_trials,
        }
    }

    /// Short human label shown in listings.
    pub fn label(&self) -> String {
        match self {
            Self::Training { model_type, .. } => model_type.as_str().to_string(),
            Self::Optimization { target_module, .. } => target_module.clone(),
            Self::HyperparameterTuning { target_model, .. } => target_model.clone(),
        }
    }

    /// Check every parameter against its accepted range.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Training {
                epochs,
                batch_size,
                learning_rate,
                ..
            } => {
                if !(1..=JobKind::Training.max_steps()).contains(epochs) {
                    return Err(TrainyardError::invalid_field("epochs", "must be between 1 and 100"));
                }
                if !(1..=128).contains(batch_size) {
                    return Err(TrainyardError::invalid_field("batch_size", "must be between 1 and 128"));
                }
                if !learning_rate.is_finite() || !(1e-7..=1e-2).contains(learning_rate) {
                    return Err(TrainyardError::invalid_field(
                        "learning_rate",
                        "must be between 1e-7 and 1e-2",
                    ));
                }
            }
            Self::Optimization {
                target_module,
                max_iterations,
                evaluation_metric,
                ..
            } => {
                if target_module.trim().is_empty() {
                    return Err(TrainyardError::invalid_field("target_module", "must not be empty"));
                }
                if !(1..=JobKind::Optimization.max_steps()).contains(max_iterations) {
                    return Err(TrainyardError::invalid_field(
                        "max_iterations",
                        "must be between 1 and 1000",
                    ));
                }
                if evaluation_metric.trim().is_empty() {
                    return Err(TrainyardError::invalid_field("evaluation_metric", "must not be empty"));
                }
            }
            Self::HyperparameterTuning {
                target_model,
                hyperparameters,
                cross_validation_folds,
                evaluation_metric,
                max_trials,
                ..
            } => {
                if target_model.trim().is_empty() {
                    return Err(TrainyardError::invalid_field("target_model", "must not be empty"));
                }
                if hyperparameters.is_empty() {
                    return Err(TrainyardError::invalid_field(
                        "hyperparameters",
                        "must name at least one parameter",
                    ));
                }
                for (name, values) in hyperparameters {
                    if name.trim().is_empty() {
                        return Err(TrainyardError::invalid_field("hyperparameters", "names must not be empty"));
                    }
                    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
                        return Err(TrainyardError::invalid_field(
                            "hyperparameters",
                            format!("'{}' needs at least one finite candidate", name),
                        ));
                    }
                }
                if !(2..=20).contains(cross_validation_folds) {
                    return Err(TrainyardError::invalid_field(
                        "cross_validation_folds",
                        "must be between 2 and 20",
                    ));
                }
                if evaluation_metric.trim().is_empty() {
                    return Err(TrainyardError::invalid_field("evaluation_metric", "must not be empty"));
                }
                if !(1..=JobKind::HyperparameterTuning.max_steps()).contains(max_trials) {
                    return Err(TrainyardError::invalid_field("max_trials", "must be between 1 and 1000"));
                }
            }
        }
        Ok(())
    }
}

/// A request to run a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    #[serde(flatten)]
    pub spec: JobSpec,

    /// Overrides the step count implied by the spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
}

impl JobSubmission {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            spec,
            total_steps: None,
        }
    }

    pub fn with_total_steps(mut self, total_steps: u32) -> Self {
        self.total_steps = Some(total_steps);
        self
    }

    /// Validate the spec and resolve the step count the job will run.
    pub fn resolve(&self) -> Result<u32> {
        self.spec.validate()?;
        let total = self.total_steps.unwrap_or_else(|| self.spec.default_steps());
        let max = self.spec.kind().max_steps();
        if total == 0 || total > max {
            return Err(TrainyardError::invalid_field(
                "total_steps",
                format!("must be between 1 and {}", max),
            ));
        }
        Ok(total)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// History
// ═══════════════════════════════════════════════════════════════════════════════

/// Named numeric metrics produced by one step.
pub type MetricSnapshot = BTreeMap<String, f64>;

/// One entry of a job's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based step index
    pub step_index: u32,
    pub metrics: MetricSnapshot,
    pub timestamp: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// Authoritative state of one job.
///
/// Only the owning runner changes `status`, `current_step`, `history` and the
/// metric fields. `cancel_requested` is the single field written from outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub total_steps: u32,
    pub current_step: u32,
    pub history: Vec<StepRecord>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub baseline_metric: Option<f64>,
    pub best_metric: Option<f64>,
    /// Step that produced `best_metric`
    pub best_step: Option<u32>,
    pub cancel_requested: bool,
    /// Registry insertion order
    pub sequence: u64,
}

impl JobRecord {
    pub fn new(id: JobId, spec: JobSpec, total_steps: u32, sequence: u64) -> Self {
        Self {
            id,
            kind: spec.kind(),
            spec,
            status: JobStatus::Pending,
            total_steps,
            current_step: 0,
            history: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
            baseline_metric: None,
            best_metric: None,
            best_step: None,
            cancel_requested: false,
            sequence,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, stamping `started_at` or `ended_at` as the graph requires.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(TrainyardError::invalid_state_transition(self.id, self.status, next));
        }
        self.status = next;
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    /// Transition to `Failed` and record the cause.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Failed, now)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Wall time between start and end, if both are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn latest_metrics(&self) -> Option<&MetricSnapshot> {
        self.history.last().map(|s| &s.metrics)
    }

    /// Completed fraction in percent.
    pub fn percent(&self) -> f64 {
        f64::from(self.current_step) * 100.0 / f64::from(self.total_steps.max(1))
    }
}

/// Compact listing row for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub kind: JobKind,
    pub label: String,
    pub status: JobStatus,
    pub current_step: u32,
    pub total_steps: u32,
    pub percent: f64,
    pub best_metric: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.id,
            kind: record.kind,
            label: record.spec.label(),
            status: record.status,
            current_step: record.current_step,
            total_steps: record.total_steps,
            percent: record.percent(),
            best_metric: record.best_metric,
            created_at: record.created_at,
            started_at: record.started_at,
        }
    }
}

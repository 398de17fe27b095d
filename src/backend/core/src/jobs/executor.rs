//! Step executor abstraction.
//!
//! The engine knows nothing about what a step does. Each [`JobKind`] maps to an
//! implementation of [`StepExecutor`] that turns one step into a metric
//! snapshot or an error.
//!
//! Metrics named `param.<name>` record a parameter value the step evaluated.
//! They are reported back as the best parameters of a completed job.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::job::{JobId, JobKind, JobSpec, MetricSnapshot};
use crate::error::{Result, TrainyardError};

/// Prefix marking a metric as an evaluated parameter.
pub const PARAMETER_PREFIX: &str = "param.";

/// Failure of a single step.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    /// The step could not produce metrics. The job fails.
    #[error("step {step} failed: {message}")]
    Failed { step: u32, message: String },

    /// The executor saw the cancellation token and stopped before finishing.
    #[error("step {step} aborted by cancellation")]
    Cancelled { step: u32 },
}

impl StepError {
    pub fn failed(step: u32, message: impl Into<String>) -> Self {
        Self::Failed {
            step,
            message: message.into(),
        }
    }
}

/// Everything an executor may look at while running one step.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub job_id: JobId,
    pub spec: JobSpec,
    /// 1-based index of the step being executed
    pub step: u32,
    pub total_steps: u32,
    /// Metrics of the previous step, if any
    pub previous: Option<MetricSnapshot>,
    /// Best primary metric so far
    pub best_metric: Option<f64>,
    pub baseline_metric: Option<f64>,
    pub cancel: CancellationToken,
}

impl StepContext {
    /// Fraction of the job complete once this step finishes.
    pub fn progress(&self) -> f64 {
        f64::from(self.step) / f64::from(self.total_steps.max(1))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for `duration` unless cancellation fires first.
    pub async fn cancellable_sleep(&self, duration: std::time::Duration) -> std::result::Result<(), StepError> {
        if duration.is_zero() {
            return if self.is_cancelled() {
                Err(StepError::Cancelled { step: self.step })
            } else {
                Ok(())
            };
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(StepError::Cancelled { step: self.step }),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// One unit of work per step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Metric compared across steps to track the best result. Higher is better.
    fn primary_metric(&self) -> &'static str;

    /// Reference value improvements are measured against. When `None`, the first
    /// step's primary metric becomes the baseline.
    fn baseline(&self, _spec: &JobSpec) -> Option<f64> {
        None
    }

    async fn execute_step(&self, ctx: &StepContext) -> std::result::Result<MetricSnapshot, StepError>;
}

/// Executors keyed by job kind.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<JobKind, Arc<dyn StepExecutor>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executor for `kind`.
    pub fn register(&mut self, kind: JobKind, executor: Arc<dyn StepExecutor>) -> &mut Self {
        self.executors.insert(kind, executor);
        self
    }

    pub fn with(mut self, kind: JobKind, executor: Arc<dyn StepExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    pub fn get(&self, kind: JobKind) -> Result<Arc<dyn StepExecutor>> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or_else(|| TrainyardError::executor_not_registered(kind))
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.executors.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Constant;

    #[async_trait]
    impl StepExecutor for Constant {
        fn primary_metric(&self) -> &'static str {
            "value"
        }

        async fn execute_step(&self, ctx: &StepContext) -> std::result::Result<MetricSnapshot, StepError> {
            Ok(MetricSnapshot::from([("value".to_string(), f64::from(ctx.step))]))
        }
    }

    fn context(step: u32, total: u32) -> StepContext {
        StepContext {
            job_id: JobId::new(),
            spec: JobSpec::training(),
            step,
            total_steps: total,
            previous: None,
            best_metric: None,
            baseline_metric: None,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ExecutorRegistry::new().with(JobKind::Training, Arc::new(Constant));
        assert!(registry.contains(JobKind::Training));
        assert!(registry.get(JobKind::Training).is_ok());

        let err = registry.get(JobKind::Optimization).err().unwrap();
        assert_eq!(err.code(), crate::error::ErrorCode::ExecutorNotRegistered);
    }

    #[test]
    fn test_context_progress() {
        assert_eq!(context(2, 4).progress(), 0.5);
        assert_eq!(context(4, 4).progress(), 1.0);
    }

    #[tokio::test]
    async fn test_default_baseline_is_none() {
        let executor = Constant;
        assert!(executor.baseline(&JobSpec::training()).is_none());
        let metrics = executor.execute_step(&context(3, 5)).await.unwrap();
        assert_eq!(metrics.get("value"), Some(&3.0));
    }

    #[tokio::test]
    async fn test_cancellable_sleep_aborts() {
        let ctx = context(1, 1);
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        let result = ctx.cancellable_sleep(Duration::from_secs(30)).await;
        assert_eq!(result, Err(StepError::Cancelled { step: 1 }));
    }

    #[tokio::test]
    async fn test_cancellable_sleep_zero_duration() {
        let ctx = context(1, 1);
        assert!(ctx.cancellable_sleep(Duration::ZERO).await.is_ok());
        ctx.cancel.cancel();
        assert!(ctx.cancellable_sleep(Duration::ZERO).await.is_err());
    }

    #[test]
    fn test_step_error_display() {
        let err = StepError::failed(3, "loss diverged");
        assert_eq!(err.to_string(), "step 3 failed: loss diverged");
    }
}

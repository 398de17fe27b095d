//! Built-in simulated step executors.
//!
//! Each produces deterministic metrics after a configurable delay. They stand
//! in for real training epochs, optimization trials and hyperparameter trials.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::executor::{ExecutorRegistry, StepContext, StepError, StepExecutor, PARAMETER_PREFIX};
use super::job::{JobKind, JobSpec, MetricSnapshot, ParameterGrid, TuningMethod};

/// Score optimization jobs start from.
pub const OPTIMIZATION_BASELINE: f64 = 0.5;

/// Simulated training: one step is one epoch.
#[derive(Debug, Clone)]
pub struct SimulatedTrainingExecutor {
    /// Time spent per epoch
    pub step_delay: Duration,
}

impl SimulatedTrainingExecutor {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

impl Default for SimulatedTrainingExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl StepExecutor for SimulatedTrainingExecutor {
    fn primary_metric(&self) -> &'static str {
        "accuracy"
    }

    async fn execute_step(&self, ctx: &StepContext) -> Result<MetricSnapshot, StepError> {
        ctx.cancellable_sleep(self.step_delay).await?;

        let progress = ctx.progress();
        Ok(MetricSnapshot::from([
            ("loss".to_string(), 1.0 - progress * 0.8),
            ("accuracy".to_string(), progress * 0.9),
            ("epoch".to_string(), f64::from(ctx.step)),
        ]))
    }
}

/// Simulated optimization: one step is one trial.
#[derive(Debug, Clone)]
pub struct SimulatedOptimizationExecutor {
    /// Time spent per trial
    pub step_delay: Duration,
}

impl SimulatedOptimizationExecutor {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

impl Default for SimulatedOptimizationExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl StepExecutor for SimulatedOptimizationExecutor {
    fn primary_metric(&self) -> &'static str {
        "score"
    }

    fn baseline(&self, _spec: &JobSpec) -> Option<f64> {
        Some(OPTIMIZATION_BASELINE)
    }

    async fn execute_step(&self, ctx: &StepContext) -> Result<MetricSnapshot, StepError> {
        ctx.cancellable_sleep(self.step_delay).await?;

        let baseline = ctx.baseline_metric.unwrap_or(OPTIMIZATION_BASELINE);
        let score = baseline + ctx.progress() * 0.4 + f64::from(ctx.step - 1) * 0.001;
        let best = ctx.best_metric.map_or(score, |best| best.max(score));

        Ok(MetricSnapshot::from([
            ("iteration".to_string(), f64::from(ctx.step)),
            ("score".to_string(), score),
            ("best_score".to_string(), best),
            ("improvement".to_string(), best - baseline),
        ]))
    }
}

/// Simulated hyperparameter search: one step is one trial of one grid combination.
///
/// A trial scores 0.92 when every parameter sits at the middle of its candidate
/// list and falls linearly to 0.85 as parameters move to either end.
#[derive(Debug, Clone)]
pub struct SimulatedTuningExecutor {
    /// Time spent per trial
    pub step_delay: Duration,
}

impl SimulatedTuningExecutor {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

impl Default for SimulatedTuningExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

#[async_trait]
impl StepExecutor for SimulatedTuningExecutor {
    fn primary_metric(&self) -> &'static str {
        "score"
    }

    async fn execute_step(&self, ctx: &StepContext) -> Result<MetricSnapshot, StepError> {
        let JobSpec::HyperparameterTuning {
            hyperparameters,
            tuning_method,
            ..
        } = &ctx.spec
        else {
            return Err(StepError::failed(ctx.step, "not a hyperparameter tuning job"));
        };

        ctx.cancellable_sleep(self.step_delay).await?;

        let trial = trial_parameters(hyperparameters, *tuning_method, ctx.step);
        let penalty = trial.iter().map(|t| t.distance_from_middle).sum::<f64>() / trial.len().max(1) as f64;
        let score = 0.92 - 0.07 * penalty;
        let best = ctx.best_metric.map_or(score, |best| best.max(score));

        let mut metrics = MetricSnapshot::from([
            ("trial".to_string(), f64::from(ctx.step)),
            ("score".to_string(), score),
            ("best_score".to_string(), best),
        ]);
        for t in trial {
            metrics.insert(format!("{}{}", PARAMETER_PREFIX, t.name), t.value);
        }
        Ok(metrics)
    }
}

/// One parameter value picked for a trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialParameter {
    pub name: String,
    pub value: f64,
    /// 0 at the middle of the candidate list, 1 at either end
    pub distance_from_middle: f64,
}

/// Grid combination evaluated by the 1-based `trial`.
///
/// Combinations are numbered in mixed radix over the grid's parameter names.
/// Grid search takes them in order and wraps. Random search visits them in a
/// fixed scrambled order, so the same trial always gets the same combination.
pub fn trial_parameters(grid: &ParameterGrid, method: TuningMethod, trial: u32) -> Vec<TrialParameter> {
    let combinations = grid
        .values()
        .try_fold(1u64, |acc, values| acc.checked_mul(values.len().max(1) as u64))
        .unwrap_or(u64::MAX);
    let ordinal = u64::from(trial.saturating_sub(1));
    let mut index = match method {
        TuningMethod::GridSearch => ordinal % combinations,
        TuningMethod::RandomSearch => scramble(ordinal) % combinations,
    };

    grid.iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(name, values)| {
            let len = values.len() as u64;
            let position = (index % len) as usize;
            index /= len;
            let distance_from_middle = if values.len() > 1 {
                ((position as f64 / (values.len() - 1) as f64) - 0.5).abs() * 2.0
            } else {
                0.0
            };
            TrialParameter {
                name: name.clone(),
                value: values[position],
                distance_from_middle,
            }
        })
        .collect()
}

/// splitmix64 finalizer.
fn scramble(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl ExecutorRegistry {
    /// Registry with every simulated executor installed.
    pub fn with_builtin(
        training_delay: Duration,
        optimization_delay: Duration,
        tuning_delay: Duration,
    ) -> Self {
        Self::new()
            .with(
                JobKind::Training,
                Arc::new(SimulatedTrainingExecutor::new(training_delay)),
            )
            .with(
                JobKind::Optimization,
                Arc::new(SimulatedOptimizationExecutor::new(optimization_delay)),
            )
            .with(
                JobKind::HyperparameterTuning,
                Arc::new(SimulatedTuningExecutor::new(tuning_delay)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::JobId;
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;

    fn context(spec: JobSpec, step: u32, total: u32) -> StepContext {
        StepContext {
            job_id: JobId::new(),
            spec,
            step,
            total_steps: total,
            previous: None,
            best_metric: None,
            baseline_metric: None,
            cancel: CancellationToken::new(),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn parameters_by_name(trial: &[TrialParameter]) -> BTreeMap<String, f64> {
        trial.iter().map(|t| (t.name.clone(), t.value)).collect()
    }

    #[tokio::test]
    async fn test_training_metrics_curve() {
        let executor = SimulatedTrainingExecutor::new(Duration::ZERO);
        let metrics = executor
            .execute_step(&context(JobSpec::training(), 5, 10))
            .await
            .unwrap();
        assert!(approx(metrics["accuracy"], 0.45));
        assert!(approx(metrics["loss"], 0.6));
        assert!(approx(metrics["epoch"], 5.0));

        let last = executor
            .execute_step(&context(JobSpec::training(), 10, 10))
            .await
            .unwrap();
        assert!(approx(last["accuracy"], 0.9));
        assert!(approx(last["loss"], 0.2));
    }

    #[tokio::test]
    async fn test_optimization_metrics_curve() {
        let executor = SimulatedOptimizationExecutor::new(Duration::ZERO);
        assert_eq!(executor.baseline(&JobSpec::optimization()), Some(0.5));

        let mut ctx = context(JobSpec::optimization(), 2, 4);
        ctx.baseline_metric = Some(0.5);
        ctx.best_metric = Some(0.9);
        let metrics = executor.execute_step(&ctx).await.unwrap();
        assert!(approx(metrics["score"], 0.5 + 0.5 * 0.4 + 0.001));
        assert!(approx(metrics["best_score"], 0.9));
        assert!(approx(metrics["improvement"], 0.4));
        assert!(approx(metrics["iteration"], 2.0));
    }

    #[tokio::test]
    async fn test_simulated_step_observes_cancellation() {
        let executor = SimulatedTrainingExecutor::new(Duration::from_secs(60));
        let ctx = context(JobSpec::training(), 1, 3);
        ctx.cancel.cancel();
        let err = executor.execute_step(&ctx).await.unwrap_err();
        assert_eq!(err, StepError::Cancelled { step: 1 });
    }

    #[tokio::test]
    async fn test_first_optimization_trial_has_no_iteration_bonus() {
        let executor = SimulatedOptimizationExecutor::new(Duration::ZERO);
        let mut ctx = context(JobSpec::optimization(), 1, 10);
        ctx.baseline_metric = Some(0.5);
        let metrics = executor.execute_step(&ctx).await.unwrap();
        assert!(approx(metrics["score"], 0.5 + 0.1 * 0.4));
    }

    #[test]
    fn test_grid_search_walks_combinations_in_order() {
        let grid = ParameterGrid::from([
            ("batch_size".to_string(), vec![32.0, 64.0, 128.0]),
            ("learning_rate".to_string(), vec![0.01, 0.001, 0.0001]),
        ]);

        let first = parameters_by_name(&trial_parameters(&grid, TuningMethod::GridSearch, 1));
        assert_eq!(first["batch_size"], 32.0);
        assert_eq!(first["learning_rate"], 0.01);

        let second = parameters_by_name(&trial_parameters(&grid, TuningMethod::GridSearch, 2));
        assert_eq!(second["batch_size"], 64.0);
        assert_eq!(second["learning_rate"], 0.01);

        let middle = trial_parameters(&grid, TuningMethod::GridSearch, 5);
        assert!(middle.iter().all(|t| t.distance_from_middle == 0.0));

        let wrapped = trial_parameters(&grid, TuningMethod::GridSearch, 10);
        assert_eq!(wrapped, trial_parameters(&grid, TuningMethod::GridSearch, 1));
    }

    #[test]
    fn test_random_search_is_deterministic_and_in_grid() {
        let grid = ParameterGrid::from([("dropout".to_string(), vec![0.1, 0.2, 0.3, 0.4])]);
        for trial in 1..=20 {
            let a = trial_parameters(&grid, TuningMethod::RandomSearch, trial);
            let b = trial_parameters(&grid, TuningMethod::RandomSearch, trial);
            assert_eq!(a, b);
            assert!(grid["dropout"].contains(&a[0].value));
        }
    }

    #[tokio::test]
    async fn test_tuning_trial_scores() {
        let executor = SimulatedTuningExecutor::new(Duration::ZERO);
        let corner = executor
            .execute_step(&context(JobSpec::tuning(), 1, 9))
            .await
            .unwrap();
        assert!(approx(corner["score"], 0.85));
        assert!(approx(corner["trial"], 1.0));
        assert!(approx(corner["param.batch_size"], 32.0));
        assert!(approx(corner["param.learning_rate"], 0.01));

        let centre = executor
            .execute_step(&context(JobSpec::tuning(), 5, 9))
            .await
            .unwrap();
        assert!(approx(centre["score"], 0.92));
        assert!(approx(centre["param.batch_size"], 64.0));
        assert!(approx(centre["param.learning_rate"], 0.001));
    }

    #[tokio::test]
    async fn test_tuning_executor_rejects_other_specs() {
        let executor = SimulatedTuningExecutor::new(Duration::ZERO);
        let err = executor
            .execute_step(&context(JobSpec::training(), 1, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Failed { step: 1, .. }));
    }

    #[test]
    fn test_builtin_registry_covers_all_kinds() {
        let registry = ExecutorRegistry::with_builtin(Duration::ZERO, Duration::ZERO, Duration::ZERO);
        assert!(registry.contains(JobKind::Training));
        assert!(registry.contains(JobKind::Optimization));
        assert!(registry.contains(JobKind::HyperparameterTuning));
    }
}

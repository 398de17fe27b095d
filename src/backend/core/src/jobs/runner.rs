//! Job runner: the state machine that drives one job to a terminal state.
//!
//! # Cancellation latency
//!
//! Cancellation is checked strictly before each step begins. A request that
//! arrives while a step is in flight takes effect at the next boundary, so at
//! most one step's work is committed after cancellation was requested. The
//! step context carries the job's cancellation token; an executor that watches
//! it can abort the in-flight step, in which case that step is not credited.
//!
//! The optional job deadline follows the same discipline: it is checked at
//! step boundaries and never pre-empts a running step.
//!
//! # Panics
//!
//! A panicking step fails its job and leaves the rest of the pool running.
//! This relies on unwinding: under `panic = "abort"` the whole process dies
//! instead, so no profile in this workspace may set it.

use chrono::Utc;
use futures::FutureExt;
use metrics::{counter, histogram};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::events::{EventBus, JobEvent, JobEventKind};
use super::executor::{ExecutorRegistry, StepContext, StepError, StepExecutor};
use super::job::{JobId, JobKind, JobRecord, JobStatus};
use super::progress;
use super::registry::JobRegistry;
use crate::error::{Result, TrainyardError};

/// What the runner decided at a step boundary.
enum Boundary {
    Proceed(StepContext),
    Cancelled { at_step: u32 },
    DeadlineExceeded { at_step: u32, error: String },
}

/// Drives jobs through `Pending → Running → terminal`.
#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    executors: Arc<ExecutorRegistry>,
    events: EventBus,
    deadline: Option<Duration>,
}

impl JobRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        executors: Arc<ExecutorRegistry>,
        events: EventBus,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            executors,
            events,
            deadline,
        }
    }

    /// Run the job to completion and return the terminal status it reached.
    ///
    /// Step failures are recorded on the job and never returned as errors. An
    /// `Err` means the job could not be driven at all (unknown id, or a record
    /// that was already terminal).
    #[tracing::instrument(name = "job", skip_all, fields(job_id = %id))]
    pub async fn run(&self, id: JobId) -> Result<JobStatus> {
        let snapshot = self.registry.get(id)?;
        let kind = snapshot.kind;
        let cancel = self.registry.cancellation_token(id)?;

        let executor = match self.executors.get(kind) {
            Ok(executor) => executor,
            Err(err) => return self.fail_before_start(id, kind, err.user_message().to_string()),
        };

        if !self.start(id, kind, executor.as_ref())? {
            return Ok(JobStatus::Cancelled);
        }

        let started = Instant::now();
        let total_steps = snapshot.total_steps;

        for step in 1..=total_steps {
            let ctx = match self.boundary(id, step, started, &cancel)? {
                Boundary::Proceed(ctx) => ctx,
                Boundary::Cancelled { at_step } => {
                    self.finish(kind, JobStatus::Cancelled, started);
                    self.events.publish(JobEvent::new(id, kind, JobEventKind::Cancelled { at_step }));
                    tracing::info!(job_id = %id, kind = %kind, at_step, "Job cancelled");
                    return Ok(JobStatus::Cancelled);
                }
                Boundary::DeadlineExceeded { at_step, error } => {
                    self.finish(kind, JobStatus::Failed, started);
                    tracing::warn!(job_id = %id, kind = %kind, at_step, error = %error, "Job deadline exceeded");
                    self.events.publish(JobEvent::new(id, kind, JobEventKind::Failed { at_step, error }));
                    return Ok(JobStatus::Failed);
                }
            };

            let step_started = Instant::now();
            let outcome = AssertUnwindSafe(executor.execute_step(&ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(StepError::failed(step, "step executor panicked")));
            histogram!("trainyard_step_duration_seconds", "kind" => kind.as_str())
                .record(step_started.elapsed().as_secs_f64());

            match outcome {
                Ok(metrics) => {
                    let primary = executor.primary_metric();
                    let record = self.registry.update(id, |r| {
                        progress::record_step(r, metrics, primary, Utc::now())
                    })?;
                    tracing::debug!(job_id = %id, kind = %kind, step, total_steps, "Step completed");
                    self.events.publish(JobEvent::new(
                        id,
                        kind,
                        JobEventKind::StepCompleted {
                            step: record.step_index,
                            total_steps,
                            metrics: record.metrics,
                        },
                    ));
                }
                Err(StepError::Cancelled { .. }) => {
                    let at_step = step - 1;
                    self.registry
                        .update(id, |r| r.transition(JobStatus::Cancelled, Utc::now()))?;
                    self.finish(kind, JobStatus::Cancelled, started);
                    tracing::info!(job_id = %id, kind = %kind, at_step, "Job cancelled during step");
                    self.events.publish(JobEvent::new(id, kind, JobEventKind::Cancelled { at_step }));
                    return Ok(JobStatus::Cancelled);
                }
                Err(err @ StepError::Failed { .. }) => {
                    let error = err.to_string();
                    self.registry.update(id, |r| r.fail(error.clone(), Utc::now()))?;
                    self.finish(kind, JobStatus::Failed, started);
                    tracing::warn!(job_id = %id, kind = %kind, step, error = %error, "Job failed");
                    self.events.publish(JobEvent::new(
                        id,
                        kind,
                        JobEventKind::Failed {
                            at_step: step - 1,
                            error,
                        },
                    ));
                    return Ok(JobStatus::Failed);
                }
            }
        }

        self.registry
            .update(id, |r| r.transition(JobStatus::Completed, Utc::now()))?;
        self.finish(kind, JobStatus::Completed, started);
        tracing::info!(job_id = %id, kind = %kind, steps = total_steps, "Job completed");
        self.events.publish(JobEvent::new(
            id,
            kind,
            JobEventKind::Completed {
                steps_completed: total_steps,
            },
        ));
        Ok(JobStatus::Completed)
    }

    /// `Pending → Running`, or `Pending → Cancelled` when the flag is already set.
    /// Returns whether the job started.
    fn start(&self, id: JobId, kind: JobKind, executor: &dyn StepExecutor) -> Result<bool> {
        let started = self.registry.update(id, |r| {
            let now = Utc::now();
            if r.cancel_requested {
                r.transition(JobStatus::Cancelled, now)?;
                return Ok(false);
            }
            r.transition(JobStatus::Running, now)?;
            r.baseline_metric = executor.baseline(&r.spec);
            Ok(true)
        })?;

        if started {
            metrics::gauge!("trainyard_jobs_running").increment(1.0);
            tracing::info!(job_id = %id, kind = %kind, "Job started");
            self.events.publish(JobEvent::new(id, kind, JobEventKind::Started));
        } else {
            counter!("trainyard_jobs_finished_total", "kind" => kind.as_str(), "status" => JobStatus::Cancelled.as_str())
                .increment(1);
            tracing::info!(job_id = %id, kind = %kind, "Job cancelled before start");
            self.events.publish(JobEvent::new(id, kind, JobEventKind::Cancelled { at_step: 0 }));
        }
        Ok(started)
    }

    /// Check the cancellation flag and the deadline, then build the step context.
    /// Terminal transitions decided here are applied under the same lock.
    fn boundary(
        &self,
        id: JobId,
        step: u32,
        started: Instant,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<Boundary> {
        let deadline = self.deadline;
        self.registry.update(id, |r: &mut JobRecord| {
            let now = Utc::now();
            if r.cancel_requested {
                r.transition(JobStatus::Cancelled, now)?;
                return Ok(Boundary::Cancelled { at_step: r.current_step });
            }
            if let Some(limit) = deadline {
                let elapsed = started.elapsed();
                if elapsed >= limit {
                    let error = TrainyardError::deadline_exceeded(elapsed, limit).user_message().to_string();
                    r.fail(error.clone(), now)?;
                    return Ok(Boundary::DeadlineExceeded {
                        at_step: r.current_step,
                        error,
                    });
                }
            }
            Ok(Boundary::Proceed(StepContext {
                job_id: id,
                spec: r.spec.clone(),
                step,
                total_steps: r.total_steps,
                previous: r.latest_metrics().cloned(),
                best_metric: r.best_metric,
                baseline_metric: r.baseline_metric,
                cancel: cancel.clone(),
            }))
        })
    }

    /// No executor for the kind: the job cannot run, so it goes straight through
    /// `Running` to `Failed` with the reason recorded.
    fn fail_before_start(&self, id: JobId, kind: JobKind, error: String) -> Result<JobStatus> {
        self.registry.update(id, |r| {
            let now = Utc::now();
            r.transition(JobStatus::Running, now)?;
            r.fail(error.clone(), now)
        })?;
        counter!("trainyard_jobs_finished_total", "kind" => kind.as_str(), "status" => JobStatus::Failed.as_str())
            .increment(1);
        tracing::error!(job_id = %id, kind = %kind, error = %error, "Job has no executor");
        self.events.publish(JobEvent::new(id, kind, JobEventKind::Failed { at_step: 0, error }));
        Ok(JobStatus::Failed)
    }

    /// Metrics bookkeeping for a job that ran and reached `status`.
    fn finish(&self, kind: JobKind, status: JobStatus, started: Instant) {
        metrics::gauge!("trainyard_jobs_running").decrement(1.0);
        counter!("trainyard_jobs_finished_total", "kind" => kind.as_str(), "status" => status.as_str())
            .increment(1);
        histogram!("trainyard_job_duration_seconds", "kind" => kind.as_str())
            .record(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::executor::StepExecutor;
    use crate::jobs::job::{JobSpec, MetricSnapshot};
    use async_trait::async_trait;

    /// Reports `step / 10` as accuracy and fails on `fail_on`, if set.
    struct Scripted {
        fail_on: Option<u32>,
        panic_on: Option<u32>,
    }

    #[async_trait]
    impl StepExecutor for Scripted {
        fn primary_metric(&self) -> &'static str {
            "accuracy"
        }

        async fn execute_step(&self, ctx: &StepContext) -> std::result::Result<MetricSnapshot, StepError> {
            if self.fail_on == Some(ctx.step) {
                return Err(StepError::failed(ctx.step, "scripted failure"));
            }
            if self.panic_on == Some(ctx.step) {
                panic!("scripted panic");
            }
            Ok(MetricSnapshot::from([("accuracy".to_string(), f64::from(ctx.step) / 10.0)]))
        }
    }

    fn runner_with(executor: Scripted, deadline: Option<Duration>) -> (JobRunner, Arc<JobRegistry>) {
        let registry = Arc::new(JobRegistry::new());
        let executors = Arc::new(ExecutorRegistry::new().with(JobKind::Training, Arc::new(executor)));
        let runner = JobRunner::new(registry.clone(), executors, EventBus::new(64), deadline);
        (runner, registry)
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let (runner, registry) = runner_with(Scripted { fail_on: None, panic_on: None }, None);
        let id = registry.create(JobSpec::training(), 3).unwrap();

        assert_eq!(runner.run(id).await.unwrap(), JobStatus::Completed);
        let record = registry.get(id).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.current_step, 3);
        assert_eq!(record.history.len(), 3);
        assert!(record.started_at.is_some());
        assert!(record.ended_at.is_some());
        assert_eq!(record.baseline_metric, Some(0.1));
        assert_eq!(record.best_metric, Some(0.3));
        let indices: Vec<u32> = record.history.iter().map(|s| s.step_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failure_gets_no_credit() {
        let (runner, registry) = runner_with(Scripted { fail_on: Some(3), panic_on: None }, None);
        let id = registry.create(JobSpec::training(), 5).unwrap();

        assert_eq!(runner.run(id).await.unwrap(), JobStatus::Failed);
        let record = registry.get(id).unwrap();
        assert_eq!(record.current_step, 2);
        assert_eq!(record.history.len(), 2);
        assert!(record.error.unwrap().contains("scripted failure"));
        assert!(record.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_panicking_executor_fails_job() {
        let (runner, registry) = runner_with(Scripted { fail_on: None, panic_on: Some(2) }, None);
        let id = registry.create(JobSpec::training(), 4).unwrap();

        assert_eq!(runner.run(id).await.unwrap(), JobStatus::Failed);
        let record = registry.get(id).unwrap();
        assert_eq!(record.current_step, 1);
        assert!(record.error.unwrap().contains("panicked"));
    }

    #[test]
    fn test_no_profile_aborts_on_panic() {
        let manifests = [
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../../Cargo.toml")),
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml")),
        ];
        for manifest in manifests {
            let settings: String = manifest.split_whitespace().collect();
            assert!(!settings.contains("panic=\"abort\""), "a profile sets panic = \"abort\"");
        }
    }

    #[tokio::test]
    async fn test_panic_fails_only_its_own_job() {
        let (runner, registry) = runner_with(Scripted { fail_on: None, panic_on: Some(1) }, None);
        let panicking = registry.create(JobSpec::training(), 2).unwrap();
        let healthy_runner = JobRunner::new(
            registry.clone(),
            Arc::new(ExecutorRegistry::new().with(
                JobKind::Training,
                Arc::new(Scripted { fail_on: None, panic_on: None }),
            )),
            EventBus::new(64),
            None,
        );
        let healthy = registry.create(JobSpec::training(), 2).unwrap();

        let (a, b) = tokio::join!(
            tokio::spawn({
                let runner = runner.clone();
                async move { runner.run(panicking).await }
            }),
            tokio::spawn(async move { healthy_runner.run(healthy).await }),
        );
        assert_eq!(a.unwrap().unwrap(), JobStatus::Failed);
        assert_eq!(b.unwrap().unwrap(), JobStatus::Completed);
        assert_eq!(registry.get(healthy).unwrap().current_step, 2);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let (runner, registry) = runner_with(Scripted { fail_on: None, panic_on: None }, None);
        let id = registry.create(JobSpec::training(), 3).unwrap();
        assert!(registry.request_cancel(id));

        assert_eq!(runner.run(id).await.unwrap(), JobStatus::Cancelled);
        let record = registry.get(id).unwrap();
        assert_eq!(record.current_step, 0);
        assert!(record.started_at.is_none());
        assert!(record.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_deadline_checked_at_boundary() {
        let (runner, registry) = runner_with(Scripted { fail_on: None, panic_on: None }, Some(Duration::ZERO));
        let id = registry.create(JobSpec::training(), 3).unwrap();

        assert_eq!(runner.run(id).await.unwrap(), JobStatus::Failed);
        let record = registry.get(id).unwrap();
        assert_eq!(record.current_step, 0);
        assert!(record.error.unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn test_missing_executor_fails_job() {
        let (runner, registry) = runner_with(Scripted { fail_on: None, panic_on: None }, None);
        let id = registry.create(JobSpec::optimization(), 3).unwrap();

        assert_eq!(runner.run(id).await.unwrap(), JobStatus::Failed);
        let record = registry.get(id).unwrap();
        assert!(record.error.unwrap().contains("optimization"));
    }

    #[tokio::test]
    async fn test_rerun_of_terminal_job_is_rejected() {
        let (runner, registry) = runner_with(Scripted { fail_on: None, panic_on: None }, None);
        let id = registry.create(JobSpec::training(), 1).unwrap();
        runner.run(id).await.unwrap();

        let err = runner.run(id).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidStateTransition);
        assert_eq!(registry.get(id).unwrap().current_step, 1);
    }

    #[tokio::test]
    async fn test_events_follow_lifecycle() {
        let (runner, registry) = runner_with(Scripted { fail_on: None, panic_on: None }, None);
        let mut rx = runner.events.subscribe();
        let id = registry.create(JobSpec::training(), 2).unwrap();
        runner.run(id).await.unwrap();

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(names, vec!["started", "step_completed", "step_completed", "completed"]);
    }
}

//! Job Engine - the facade request handlers talk to.
//!
//! Wires the registry, executors, event bus and pool together and exposes the
//! job operations: submit, progress, list, cancel, result, subscribe and stats.

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::{EventBus, JobEvent, JobEventKind};
use super::executor::ExecutorRegistry;
use super::job::{JobId, JobKind, JobStatus, JobSubmission, JobSummary};
use super::pool::{JobPool, PoolConfig, PoolStats};
use super::progress::ProgressSnapshot;
use super::registry::JobRegistry;
use super::results::{self, JobOutcome};
use super::runner::JobRunner;
use crate::config::EngineConfig;
use crate::error::{Result, TrainyardError};

/// Optional filters for [`JobEngine::list_jobs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
}

/// Number of known jobs per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Engine-wide statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub jobs: JobCounts,
    pub pool: PoolStats,
    pub event_subscribers: usize,
}

/// Owns every moving part of job execution.
pub struct JobEngine {
    config: EngineConfig,
    registry: Arc<JobRegistry>,
    executors: Arc<ExecutorRegistry>,
    events: EventBus,
    pool: JobPool,
    shutdown: CancellationToken,
}

impl JobEngine {
    /// Build the engine and start its pool. Must be called inside a tokio runtime.
    pub fn new(config: EngineConfig, executors: ExecutorRegistry) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(JobRegistry::new());
        let executors = Arc::new(executors);
        let events = EventBus::new(config.event_buffer);
        let runner = JobRunner::new(
            registry.clone(),
            executors.clone(),
            events.clone(),
            config.job_deadline,
        );
        let pool = JobPool::start(
            PoolConfig {
                max_concurrent_jobs: config.max_concurrent_jobs,
                max_queue_depth: config.max_queue_depth,
                shutdown_timeout: config.shutdown_timeout,
                name: "jobs".to_string(),
            },
            runner,
            registry.clone(),
        );

        tracing::info!(executors = ?executors, "Job engine started");

        Ok(Self {
            config,
            registry,
            executors,
            events,
            pool,
            shutdown: CancellationToken::new(),
        })
    }

    /// Engine with the simulated executors for every kind, using the configured delays.
    pub fn with_builtin(config: EngineConfig) -> Result<Self> {
        let executors = ExecutorRegistry::with_builtin(
            config.training_step_delay,
            config.optimization_step_delay,
            config.tuning_step_delay,
        );
        Self::new(config, executors)
    }

    /// Validate and enqueue a job. Returns as soon as the job is queued.
    ///
    /// # Errors
    ///
    /// - `ValidationError`/`InvalidInput` for a bad spec or step count
    /// - `ExecutorNotRegistered` when nothing can run the job's kind
    /// - `ResourceExhausted` when the queue is full; no record is created
    /// - `ShuttingDown` once shutdown has started
    pub fn submit_job(&self, submission: JobSubmission) -> Result<JobId> {
        let total_steps = submission.resolve()?;
        let kind = submission.spec.kind();
        self.executors.get(kind)?;

        let admission = self.pool.reserve()?;
        let id = self.registry.create(submission.spec, total_steps)?;

        counter!("trainyard_jobs_submitted_total", "kind" => kind.as_str()).increment(1);
        tracing::info!(job_id = %id, kind = %kind, total_steps, "Job submitted");
        self.events
            .publish(JobEvent::new(id, kind, JobEventKind::Submitted { total_steps }));

        admission.dispatch(id);
        Ok(id)
    }

    pub fn get_progress(&self, id: JobId) -> Result<ProgressSnapshot> {
        let record = self.registry.get(id)?;
        Ok(ProgressSnapshot::from_record(&record, Utc::now()))
    }

    /// Summaries in submission order.
    pub fn list_jobs(&self, filter: JobFilter) -> Vec<JobSummary> {
        self.registry
            .list_filtered(filter.status, filter.kind)
            .iter()
            .map(JobSummary::from)
            .collect()
    }

    /// Request cancellation. `false` when the job is unknown, finished, or
    /// already being cancelled.
    pub fn cancel_job(&self, id: JobId) -> bool {
        let accepted = self.registry.request_cancel(id);
        if accepted {
            tracing::info!(job_id = %id, "Cancellation requested");
        } else {
            tracing::debug!(job_id = %id, "Cancellation ignored");
        }
        accepted
    }

    /// Final outcome of a completed job.
    ///
    /// # Errors
    ///
    /// `JobNotFound` for unknown ids, `ResultNotReady` for any other status.
    pub fn get_result(&self, id: JobId) -> Result<JobOutcome> {
        let record = self.registry.get(id)?;
        results::aggregate(&record)
            .map_err(|unavailable| TrainyardError::result_not_ready(id, unavailable.status))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> EngineStats {
        let by_status = self.registry.count_by_status();
        let count = |status: JobStatus| by_status.get(&status).copied().unwrap_or(0);
        EngineStats {
            jobs: JobCounts {
                total: self.registry.len(),
                pending: count(JobStatus::Pending),
                running: count(JobStatus::Running),
                completed: count(JobStatus::Completed),
                failed: count(JobStatus::Failed),
                cancelled: count(JobStatus::Cancelled),
            },
            pool: self.pool.stats(),
            event_subscribers: self.events.subscriber_count(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_accepting(&self) -> bool {
        self.pool.is_accepting()
    }

    /// Cancelled once `shutdown` starts. Long-lived consumers such as event streams stop on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Evict terminal jobs whose retention has expired.
    pub fn sweep_expired(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.config.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let evicted = self.registry.evict_finished_before(cutoff);
        if evicted > 0 {
            counter!("trainyard_jobs_evicted_total").increment(evicted as u64);
            tracing::info!(evicted, remaining = self.registry.len(), "Evicted expired jobs");
        }
        evicted
    }

    /// Run `sweep_expired` every `sweep_interval` until shutdown.
    pub fn spawn_retention_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = self.config.sweep_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = engine.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        engine.sweep_expired();
                    }
                }
            }
            tracing::debug!("Retention sweeper stopped");
        })
    }

    /// Stop admission, cancel every unfinished job and wait for the pool.
    ///
    /// Returns whether all runners finished within `shutdown_timeout`.
    pub async fn shutdown(&self) -> bool {
        self.pool.stop_admission();
        self.shutdown.cancel();

        let active = self.registry.active_ids();
        let cancelled = active
            .iter()
            .filter(|id| self.registry.request_cancel(**id))
            .count();
        tracing::info!(active = active.len(), cancelled, "Shutting down job engine");

        self.pool.shutdown().await
    }
}

impl std::fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngine")
            .field("config", &self.config)
            .field("jobs", &self.registry.len())
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::job::JobSpec;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            training_step_delay: Duration::from_millis(1),
            optimization_step_delay: Duration::from_millis(1),
            tuning_step_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    async fn wait_terminal(engine: &JobEngine, id: JobId) -> ProgressSnapshot {
        for _ in 0..500 {
            let snapshot = engine.get_progress(id).unwrap();
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_submit_runs_to_completion() {
        let engine = JobEngine::with_builtin(fast_config()).unwrap();
        let id = engine
            .submit_job(JobSubmission::new(JobSpec::optimization()).with_total_steps(4))
            .unwrap();

        let snapshot = wait_terminal(&engine, id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.total_steps, 4);

        let outcome = engine.get_result(id).unwrap();
        assert_eq!(outcome.steps_completed, 4);
        assert_eq!(outcome.baseline_metric, Some(0.5));
        assert!(outcome.improvement.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_spec() {
        let engine = JobEngine::with_builtin(fast_config()).unwrap();
        let err = engine
            .submit_job(JobSubmission::new(JobSpec::training()).with_total_steps(0))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert!(engine.list_jobs(JobFilter::default()).is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_executor() {
        let engine = JobEngine::new(fast_config(), ExecutorRegistry::new()).unwrap();
        let err = engine.submit_job(JobSubmission::new(JobSpec::training())).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecutorNotRegistered);
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let engine = JobEngine::with_builtin(fast_config()).unwrap();
        let id = JobId::new();
        assert_eq!(engine.get_progress(id).unwrap_err().code(), ErrorCode::JobNotFound);
        assert_eq!(engine.get_result(id).unwrap_err().code(), ErrorCode::JobNotFound);
        assert!(!engine.cancel_job(id));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let engine = JobEngine::with_builtin(fast_config()).unwrap();
        let a = engine
            .submit_job(JobSubmission::new(JobSpec::training()).with_total_steps(1))
            .unwrap();
        let b = engine
            .submit_job(JobSubmission::new(JobSpec::optimization()).with_total_steps(1))
            .unwrap();
        wait_terminal(&engine, a).await;
        wait_terminal(&engine, b).await;

        let all = engine.list_jobs(JobFilter::default());
        assert_eq!(all.iter().map(|s| s.job_id).collect::<Vec<_>>(), vec![a, b]);

        let training = engine.list_jobs(JobFilter {
            kind: Some(JobKind::Training),
            ..Default::default()
        });
        assert_eq!(training.len(), 1);
        assert_eq!(training[0].job_id, a);

        let running = engine.list_jobs(JobFilter {
            status: Some(JobStatus::Running),
            ..Default::default()
        });
        assert!(running.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_respects_retention() {
        let engine = JobEngine::with_builtin(EngineConfig {
            retention: Duration::ZERO,
            ..fast_config()
        })
        .unwrap();
        let id = engine
            .submit_job(JobSubmission::new(JobSpec::training()).with_total_steps(1))
            .unwrap();
        wait_terminal(&engine, id).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(engine.sweep_expired(), 1);
        assert_eq!(engine.get_progress(id).unwrap_err().code(), ErrorCode::JobNotFound);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_jobs() {
        let engine = JobEngine::with_builtin(fast_config()).unwrap();
        assert!(engine.shutdown().await);
        assert!(!engine.is_accepting());
        let err = engine.submit_job(JobSubmission::new(JobSpec::training())).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ShuttingDown);
    }

    #[tokio::test]
    async fn test_stats_count_by_status() {
        let engine = JobEngine::with_builtin(fast_config()).unwrap();
        let id = engine
            .submit_job(JobSubmission::new(JobSpec::training()).with_total_steps(2))
            .unwrap();
        wait_terminal(&engine, id).await;

        let stats = engine.stats();
        assert_eq!(stats.jobs.total, 1);
        assert_eq!(stats.jobs.completed, 1);
        assert_eq!(stats.pool.submitted, 1);
    }
}

//! Integration tests for admission control and the concurrency bound.
//!
//! Tests cover:
//! - Rejection when the queue is full
//! - Running jobs never exceed `max_concurrent_jobs`
//! - Queued jobs start as slots free up
//! - Pool counters

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use trainyard_core::config::EngineConfig;
use trainyard_core::error::ErrorCode;
use trainyard_core::jobs::{
    ExecutorRegistry, JobEngine, JobFilter, JobId, JobKind, JobSpec, JobStatus, JobSubmission,
    MetricSnapshot, StepContext, StepError, StepExecutor,
};

// ============================================================================
// Test Executor
// ============================================================================

/// Blocks each step on `gate` and tracks how many steps are in flight at once.
struct CountingExecutor {
    gate: Arc<Semaphore>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl CountingExecutor {
    fn new(gate: Arc<Semaphore>) -> Self {
        Self {
            gate,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StepExecutor for CountingExecutor {
    fn primary_metric(&self) -> &'static str {
        "accuracy"
    }

    async fn execute_step(&self, ctx: &StepContext) -> Result<MetricSnapshot, StepError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(StepError::Cancelled { step: ctx.step }),
            permit = self.gate.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    Ok(MetricSnapshot::from([("accuracy".to_string(), 0.5)]))
                }
                Err(_) => Err(StepError::failed(ctx.step, "gate closed")),
            },
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn engine(
    max_concurrent_jobs: usize,
    max_queue_depth: usize,
) -> (JobEngine, Arc<Semaphore>, Arc<CountingExecutor>) {
    let gate = Arc::new(Semaphore::new(0));
    let executor = Arc::new(CountingExecutor::new(gate.clone()));
    let engine = JobEngine::new(
        EngineConfig {
            max_concurrent_jobs,
            max_queue_depth,
            ..Default::default()
        },
        ExecutorRegistry::new().with(JobKind::Training, executor.clone()),
    )
    .unwrap();
    (engine, gate, executor)
}

fn one_step() -> JobSubmission {
    JobSubmission::new(JobSpec::training()).with_total_steps(1)
}

async fn wait_status(engine: &JobEngine, id: JobId, status: JobStatus) {
    for _ in 0..1000 {
        if engine.get_progress(id).unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("job {} never reached {}", id, status);
}

async fn wait_all_terminal(engine: &JobEngine, ids: &[JobId]) {
    for _ in 0..1000 {
        if ids
            .iter()
            .all(|id| engine.get_progress(*id).unwrap().status.is_terminal())
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("jobs did not finish");
}

// ============================================================================
// Admission Control
// ============================================================================

#[tokio::test]
async fn test_full_queue_rejects_without_creating_record() {
    let (engine, gate, _) = engine(1, 2);

    let running = engine.submit_job(one_step()).unwrap();
    wait_status(&engine, running, JobStatus::Running).await;

    let queued_a = engine.submit_job(one_step()).unwrap();
    let queued_b = engine.submit_job(one_step()).unwrap();

    let err = engine.submit_job(one_step()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ResourceExhausted);
    assert!(err.is_retryable());

    let stats = engine.stats();
    assert_eq!(stats.pool.rejected, 1);
    assert_eq!(stats.pool.submitted, 3);
    assert_eq!(stats.pool.queued, 2);
    assert_eq!(stats.jobs.total, 3);
    assert_eq!(engine.list_jobs(JobFilter::default()).len(), 3);

    // Queued jobs are still pending and start in submission order.
    assert_eq!(engine.get_progress(queued_a).unwrap().status, JobStatus::Pending);
    assert_eq!(engine.get_progress(queued_b).unwrap().status, JobStatus::Pending);

    gate.add_permits(3);
    wait_all_terminal(&engine, &[running, queued_a, queued_b]).await;

    let first = engine.get_progress(queued_a).unwrap();
    let second = engine.get_progress(queued_b).unwrap();
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(second.status, JobStatus::Completed);
    assert!(first.started_at <= second.started_at);
}

#[tokio::test]
async fn test_queue_accepts_again_after_draining() {
    let (engine, gate, _) = engine(1, 1);

    let running = engine.submit_job(one_step()).unwrap();
    wait_status(&engine, running, JobStatus::Running).await;
    let queued = engine.submit_job(one_step()).unwrap();
    assert_eq!(
        engine.submit_job(one_step()).unwrap_err().code(),
        ErrorCode::ResourceExhausted
    );

    gate.add_permits(2);
    wait_all_terminal(&engine, &[running, queued]).await;

    let later = engine.submit_job(one_step()).unwrap();
    gate.add_permits(1);
    wait_all_terminal(&engine, &[later]).await;
    assert_eq!(engine.get_progress(later).unwrap().status, JobStatus::Completed);
}

// ============================================================================
// Concurrency Bound
// ============================================================================

#[tokio::test]
async fn test_running_jobs_never_exceed_limit() {
    let (engine, gate, executor) = engine(2, 16);

    let ids: Vec<JobId> = (0..5).map(|_| engine.submit_job(one_step()).unwrap()).collect();

    wait_status(&engine, ids[0], JobStatus::Running).await;
    wait_status(&engine, ids[1], JobStatus::Running).await;
    // Give the dispatcher a chance to overstep if it were going to.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let counts = engine.stats().jobs;
    assert_eq!(counts.running, 2);
    assert_eq!(counts.pending, 3);

    gate.add_permits(5);
    wait_all_terminal(&engine, &ids).await;

    let stats = engine.stats();
    assert_eq!(stats.pool.peak_running, 2);
    assert_eq!(stats.pool.completed, 5);
    assert_eq!(stats.pool.running, 0);
    assert_eq!(stats.pool.queued, 0);
    assert!(executor.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_cancelled_queued_job_never_starts() {
    let (engine, gate, _) = engine(1, 4);

    let running = engine.submit_job(one_step()).unwrap();
    wait_status(&engine, running, JobStatus::Running).await;
    let queued = engine.submit_job(one_step()).unwrap();

    assert!(engine.cancel_job(queued));
    gate.add_permits(1);
    wait_all_terminal(&engine, &[running, queued]).await;

    let snapshot = engine.get_progress(queued).unwrap();
    assert_eq!(snapshot.status, JobStatus::Cancelled);
    assert_eq!(snapshot.current_step, 0);
    assert!(snapshot.started_at.is_none());
    assert_eq!(engine.stats().pool.cancelled, 1);
}

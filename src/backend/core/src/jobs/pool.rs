//! Job Pool - bounded admission queue plus a concurrency-limited dispatcher.
//!
//! The `JobPool` provides:
//! - A fixed-depth submission queue; a full queue rejects instead of blocking
//! - A tokio `Semaphore` bounding how many runners execute at once
//! - Task tracking for graceful shutdown
//! - Pool statistics and monitoring

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::job::{JobId, JobStatus};
use super::registry::JobRegistry;
use super::runner::JobRunner;
use crate::error::{Result, TrainyardError};

/// Configuration for the job pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of jobs running at once
    pub max_concurrent_jobs: usize,
    /// Maximum number of accepted jobs waiting for a slot
    pub max_queue_depth: usize,
    /// How long `shutdown` waits for runners to finish
    pub shutdown_timeout: Duration,
    /// Name for this pool (for logging)
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 16,
            max_queue_depth: 256,
            shutdown_timeout: Duration::from_secs(30),
            name: "jobs".to_string(),
        }
    }
}

/// Internal counters, shared with every spawned runner.
#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    errors: AtomicU64,
    queued: AtomicUsize,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl PoolCounters {
    fn record_enqueue(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let depth = self.queued.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("trainyard_queue_depth").set(depth as f64);
    }

    fn record_dequeue(&self) {
        let depth = self.queued.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        gauge!("trainyard_queue_depth").set(depth as f64);
    }

    fn record_reject(&self, reason: &'static str) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("trainyard_jobs_rejected_total", "reason" => reason).increment(1);
    }

    fn record_start(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        let current = self.running.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_running.fetch_max(current, Ordering::Relaxed);
    }

    fn record_finish(&self, outcome: &Result<JobStatus>) {
        self.running.fetch_sub(1, Ordering::Relaxed);
        let bucket = match outcome {
            Ok(JobStatus::Completed) => &self.completed,
            Ok(JobStatus::Failed) => &self.failed,
            Ok(JobStatus::Cancelled) => &self.cancelled,
            Ok(_) | Err(_) => &self.errors,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }
}

/// A reserved queue slot. Dropping it without dispatching frees the slot.
pub struct Admission {
    permit: mpsc::OwnedPermit<JobId>,
    counters: Arc<PoolCounters>,
}

impl Admission {
    /// Hand the job to the dispatcher.
    pub fn dispatch(self, id: JobId) {
        self.counters.record_enqueue();
        let _sender = self.permit.send(id);
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission").finish_non_exhaustive()
    }
}

/// Bounded pool that runs queued jobs through a [`JobRunner`].
pub struct JobPool {
    config: PoolConfig,
    sender: Mutex<Option<mpsc::Sender<JobId>>>,
    semaphore: Arc<Semaphore>,
    counters: Arc<PoolCounters>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    created_at: Instant,
}

impl JobPool {
    /// Create the pool and start its dispatcher. Must be called inside a tokio runtime.
    pub fn start(config: PoolConfig, runner: JobRunner, registry: Arc<JobRegistry>) -> Self {
        let (sender, receiver) = mpsc::channel(config.max_queue_depth.max(1));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let counters = Arc::new(PoolCounters::default());
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();

        let dispatcher = Dispatcher {
            receiver,
            semaphore: semaphore.clone(),
            counters: counters.clone(),
            tracker: tracker.clone(),
            shutdown: shutdown.clone(),
            runner,
            registry,
        };
        tracker.spawn(dispatcher.run());

        tracing::info!(
            pool_name = %config.name,
            max_concurrent_jobs = config.max_concurrent_jobs,
            max_queue_depth = config.max_queue_depth,
            "Job pool started"
        );

        Self {
            config,
            sender: Mutex::new(Some(sender)),
            semaphore,
            counters,
            tracker,
            shutdown,
            created_at: Instant::now(),
        }
    }

    /// Reserve a queue slot without waiting.
    ///
    /// Fails with `ResourceExhausted` when the queue is full and with
    /// `ShuttingDown` once `shutdown` has begun.
    pub fn reserve(&self) -> Result<Admission> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(TrainyardError::shutting_down)?;

        match sender.try_reserve_owned() {
            Ok(permit) => Ok(Admission {
                permit,
                counters: self.counters.clone(),
            }),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.record_reject("queue_full");
                tracing::warn!(
                    pool_name = %self.config.name,
                    queue_depth = self.config.max_queue_depth,
                    "Job queue full, rejecting submission"
                );
                Err(TrainyardError::resource_exhausted(self.config.max_queue_depth))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.record_reject("shutting_down");
                Err(TrainyardError::shutting_down())
            }
        }
    }

    /// Refuse further reservations. Already-reserved slots may still dispatch,
    /// and shutdown waits for them.
    pub fn stop_admission(&self) {
        if self.sender.lock().take().is_some() {
            tracing::info!(pool_name = %self.config.name, "Job pool stopped admitting jobs");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Jobs waiting for a concurrency slot.
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::Relaxed)
    }

    /// Jobs currently held by a runner.
    pub fn running(&self) -> usize {
        self.counters.running.load(Ordering::Relaxed)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.counters;
        PoolStats {
            max_concurrent_jobs: self.config.max_concurrent_jobs,
            max_queue_depth: self.config.max_queue_depth,
            queued: c.queued.load(Ordering::Relaxed),
            running: c.running.load(Ordering::Relaxed),
            peak_running: c.peak_running.load(Ordering::Relaxed),
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            started: c.started.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            runner_errors: c.errors.load(Ordering::Relaxed),
            accepting: self.is_accepting(),
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }

    /// Stop admission, drain the queue and wait for runners.
    ///
    /// Jobs still queued are cancelled and driven to `Cancelled`. Running jobs
    /// are left to the caller to cancel; this only waits for them, up to
    /// `shutdown_timeout`. Returns whether every task finished in time.
    pub async fn shutdown(&self) -> bool {
        self.stop_admission();
        self.shutdown.cancel();
        self.tracker.close();

        let drained = tokio::time::timeout(self.config.shutdown_timeout, self.tracker.wait())
            .await
            .is_ok();

        if drained {
            tracing::info!(pool_name = %self.config.name, "Job pool drained");
        } else {
            tracing::warn!(
                pool_name = %self.config.name,
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                running = self.running(),
                "Job pool shutdown timed out"
            );
        }
        drained
    }
}

impl std::fmt::Debug for JobPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPool")
            .field("config", &self.config)
            .field("queued", &self.queued())
            .field("running", &self.running())
            .finish()
    }
}

/// Receives queued ids and spawns runners as permits free up.
struct Dispatcher {
    receiver: mpsc::Receiver<JobId>,
    semaphore: Arc<Semaphore>,
    counters: Arc<PoolCounters>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    runner: JobRunner,
    registry: Arc<JobRegistry>,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            // Take the permit first so an id only leaves the queue once it can run.
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let id = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                id = self.receiver.recv() => match id {
                    Some(id) => id,
                    None => break,
                },
            };

            self.counters.record_dequeue();
            self.spawn_runner(id, permit);
        }

        self.drain().await;
    }

    fn spawn_runner(&self, id: JobId, permit: OwnedSemaphorePermit) {
        let runner = self.runner.clone();
        let counters = self.counters.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            counters.record_start();
            let outcome = runner.run(id).await;
            if let Err(err) = &outcome {
                err.log();
            }
            counters.record_finish(&outcome);
        });
    }

    /// Cancel whatever is still queued and let each runner record the cancellation.
    ///
    /// After `close`, `recv` keeps yielding until every outstanding [`Admission`]
    /// has either dispatched or been dropped, so a job reserved just before
    /// shutdown is still driven to a terminal state.
    async fn drain(&mut self) {
        self.receiver.close();
        let mut drained = 0usize;
        while let Some(id) = self.receiver.recv().await {
            self.counters.record_dequeue();
            self.registry.request_cancel(id);
            self.counters.record_start();
            let outcome = self.runner.run(id).await;
            if let Err(err) = &outcome {
                err.log();
            }
            self.counters.record_finish(&outcome);
            drained += 1;
        }
        if drained > 0 {
            tracing::info!(drained, "Cancelled queued jobs during shutdown");
        }
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub max_concurrent_jobs: usize,
    pub max_queue_depth: usize,
    pub queued: usize,
    pub running: usize,
    pub peak_running: usize,
    /// Jobs accepted into the queue
    pub submitted: u64,
    /// Submissions refused by admission control
    pub rejected: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Runners that returned an error instead of a terminal status
    pub runner_errors: u64,
    pub accepting: bool,
    pub uptime_secs: u64,
}

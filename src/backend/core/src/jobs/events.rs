//! Job lifecycle events.
//!
//! Runners publish onto a broadcast channel. Subscribers that fall behind lose
//! the oldest events; publishing never blocks a runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::job::{JobId, JobKind, MetricSnapshot};

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    /// Accepted into the queue
    Submitted { total_steps: u32 },
    /// Runner moved the job to `Running`
    Started,
    /// One step recorded
    StepCompleted {
        step: u32,
        total_steps: u32,
        metrics: MetricSnapshot,
    },
    Completed { steps_completed: u32 },
    Failed { at_step: u32, error: String },
    /// `at_step` is the number of steps that were committed
    Cancelled { at_step: u32 },
}

impl JobEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub kind: JobKind,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JobEventKind,
}

impl JobEvent {
    pub fn new(job_id: JobId, kind: JobKind, event: JobEventKind) -> Self {
        Self {
            job_id,
            kind,
            timestamp: Utc::now(),
            event,
        }
    }

    /// Name used as the SSE event type.
    pub fn name(&self) -> &'static str {
        match self.event {
            JobEventKind::Submitted { .. } => "submitted",
            JobEventKind::Started => "started",
            JobEventKind::StepCompleted { .. } => "step_completed",
            JobEventKind::Completed { .. } => "completed",
            JobEventKind::Failed { .. } => "failed",
            JobEventKind::Cancelled { .. } => "cancelled",
        }
    }
}

/// Fan-out channel for job events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: JobEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

//! Progress tracking.
//!
//! `record_step` is the only way history grows. `ProgressSnapshot::from_record`
//! is a pure read of a record and performs no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::job::{JobId, JobKind, JobRecord, JobStatus, MetricSnapshot, StepRecord};
use crate::error::{Result, TrainyardError};

/// Append one completed step to the record.
///
/// Advances `current_step`, seeds the baseline from the first step when the
/// executor supplied none, and raises `best_metric` when `primary_metric`
/// improves on it. Ties keep the earlier step.
pub fn record_step(
    record: &mut JobRecord,
    metrics: MetricSnapshot,
    primary_metric: &str,
    now: DateTime<Utc>,
) -> Result<StepRecord> {
    if record.status != JobStatus::Running {
        return Err(TrainyardError::invalid_state_transition(
            record.id,
            record.status,
            JobStatus::Running,
        ));
    }
    if record.current_step >= record.total_steps {
        return Err(TrainyardError::internal(format!(
            "job {} already recorded all {} steps",
            record.id, record.total_steps
        )));
    }

    let step = StepRecord {
        step_index: record.current_step + 1,
        metrics,
        timestamp: now,
    };

    if let Some(value) = step.metrics.get(primary_metric).copied().filter(|v| v.is_finite()) {
        if record.baseline_metric.is_none() {
            record.baseline_metric = Some(value);
        }
        if record.best_metric.map_or(true, |best| value > best) {
            record.best_metric = Some(value);
            record.best_step = Some(step.step_index);
        }
    }

    record.history.push(step.clone());
    record.current_step = step.step_index;
    Ok(step)
}

/// Point-in-time view of a job's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub current_step: u32,
    pub total_steps: u32,
    /// Completed fraction in percent
    pub percent: f64,
    pub latest_metrics: Option<MetricSnapshot>,
    pub best_metric: Option<f64>,
    pub baseline_metric: Option<f64>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ProgressSnapshot {
    pub fn from_record(record: &JobRecord, now: DateTime<Utc>) -> Self {
        let elapsed = match (record.started_at, record.ended_at) {
            (Some(start), Some(end)) => end - start,
            (Some(start), None) => now - start,
            _ => chrono::Duration::zero(),
        };

        Self {
            job_id: record.id,
            kind: record.kind,
            status: record.status,
            current_step: record.current_step,
            total_steps: record.total_steps,
            percent: record.percent(),
            latest_metrics: record.latest_metrics().cloned(),
            best_metric: record.best_metric,
            baseline_metric: record.baseline_metric,
            elapsed: elapsed.to_std().unwrap_or_default(),
            cancel_requested: record.cancel_requested,
            error: record.error.clone(),
            started_at: record.started_at,
            ended_at: record.ended_at,
        }
    }
}

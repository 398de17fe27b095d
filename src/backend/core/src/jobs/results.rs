//! Final results of completed jobs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::executor::PARAMETER_PREFIX;
use super::job::{JobId, JobKind, JobRecord, JobStatus, StepRecord};

/// Final result view of a `Completed` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub kind: JobKind,
    /// Best primary metric reached
    pub final_metric: Option<f64>,
    pub baseline_metric: Option<f64>,
    /// `(best - baseline) / baseline`
    pub improvement: Option<f64>,
    /// `improvement` expressed in percent
    pub improvement_pct: Option<f64>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub steps_completed: u32,
    /// Step that reached `final_metric`
    pub best_step: Option<u32>,
    /// Parameters the best step evaluated, for executors that report them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_parameters: Option<BTreeMap<String, f64>>,
    pub history: Vec<StepRecord>,
}

/// Why a result could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultUnavailable {
    pub status: JobStatus,
}

/// Compute the outcome of a job. Only `Completed` jobs have one.
pub fn aggregate(record: &JobRecord) -> Result<JobOutcome, ResultUnavailable> {
    if record.status != JobStatus::Completed {
        return Err(ResultUnavailable {
            status: record.status,
        });
    }

    let improvement = match (record.best_metric, record.baseline_metric) {
        (Some(best), Some(baseline)) if baseline != 0.0 => Some((best - baseline) / baseline),
        _ => None,
    };

    Ok(JobOutcome {
        job_id: record.id,
        kind: record.kind,
        final_metric: record.best_metric,
        baseline_metric: record.baseline_metric,
        improvement,
        improvement_pct: improvement.map(|i| i * 100.0),
        duration: record
            .duration()
            .and_then(|d| d.to_std().ok())
            .unwrap_or_default(),
        steps_completed: record.current_step,
        best_step: record.best_step,
        best_parameters: best_parameters(record),
        history: record.history.clone(),
    })
}

fn best_parameters(record: &JobRecord) -> Option<BTreeMap<String, f64>> {
    let step = record.best_step?;
    let metrics = &record.history.iter().find(|s| s.step_index == step)?.metrics;
    let params: BTreeMap<String, f64> = metrics
        .iter()
        .filter_map(|(name, value)| {
            name.strip_prefix(PARAMETER_PREFIX)
                .map(|param| (param.to_string(), *value))
        })
        .collect();
    (!params.is_empty()).then_some(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::{JobSpec, MetricSnapshot};
    use crate::jobs::progress::record_step;
    use chrono::Utc;

    fn completed_record(scores: &[f64], baseline: Option<f64>) -> JobRecord {
        let mut record = JobRecord::new(JobId::new(), JobSpec::optimization(), scores.len() as u32, 0);
        let start = Utc::now();
        record.transition(JobStatus::Running, start).unwrap();
        record.baseline_metric = baseline;
        for score in scores {
            let metrics = MetricSnapshot::from([("score".to_string(), *score)]);
            record_step(&mut record, metrics, "score", Utc::now()).unwrap();
        }
        record
            .transition(JobStatus::Completed, start + chrono::Duration::milliseconds(1500))
            .unwrap();
        record
    }

    #[test]
    fn test_aggregate_completed_job() {
        let record = completed_record(&[0.6, 0.75, 0.7], Some(0.5));
        let outcome = aggregate(&record).unwrap();
        assert_eq!(outcome.final_metric, Some(0.75));
        assert_eq!(outcome.baseline_metric, Some(0.5));
        assert!((outcome.improvement.unwrap() - 0.5).abs() < 1e-9);
        assert!((outcome.improvement_pct.unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(outcome.duration, Duration::from_millis(1500));
        assert_eq!(outcome.steps_completed, 3);
        assert_eq!(outcome.best_step, Some(2));
        assert!(outcome.best_parameters.is_none());
        assert_eq!(outcome.history.len(), 3);
    }

    #[test]
    fn test_best_parameters_come_from_best_step() {
        let mut record = JobRecord::new(JobId::new(), JobSpec::tuning(), 3, 0);
        record.transition(JobStatus::Running, Utc::now()).unwrap();
        for (score, lr) in [(0.85, 0.01), (0.92, 0.001), (0.88, 0.0001)] {
            let metrics = MetricSnapshot::from([
                ("score".to_string(), score),
                ("param.learning_rate".to_string(), lr),
            ]);
            record_step(&mut record, metrics, "score", Utc::now()).unwrap();
        }
        record.transition(JobStatus::Completed, Utc::now()).unwrap();

        let outcome = aggregate(&record).unwrap();
        assert_eq!(outcome.final_metric, Some(0.92));
        assert_eq!(outcome.best_step, Some(2));
        assert_eq!(
            outcome.best_parameters,
            Some(BTreeMap::from([("learning_rate".to_string(), 0.001)]))
        );
    }

    #[test]
    fn test_zero_baseline_has_no_improvement() {
        let record = completed_record(&[0.0, 0.4], None);
        let outcome = aggregate(&record).unwrap();
        assert_eq!(outcome.baseline_metric, Some(0.0));
        assert!(outcome.improvement.is_none());
        assert!(outcome.improvement_pct.is_none());
    }

    #[test]
    fn test_non_completed_is_unavailable() {
        let pending = JobRecord::new(JobId::new(), JobSpec::training(), 3, 0);
        assert_eq!(
            aggregate(&pending).unwrap_err(),
            ResultUnavailable { status: JobStatus::Pending }
        );

        let mut failed = pending.clone();
        failed.transition(JobStatus::Running, Utc::now()).unwrap();
        failed.fail("boom", Utc::now()).unwrap();
        assert_eq!(aggregate(&failed).unwrap_err().status, JobStatus::Failed);
    }
}

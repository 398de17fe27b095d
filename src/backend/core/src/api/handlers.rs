//! API request handlers.
//!
//! All handlers return `Result<impl IntoResponse, TrainyardError>` so that
//! errors are converted to the right HTTP status by the `IntoResponse`
//! implementation on `TrainyardError`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::{wrappers::errors::BroadcastStreamRecvError, wrappers::BroadcastStream, StreamExt};
use uuid::Uuid;

use super::{ApiResponse, AppState};
use crate::error::TrainyardError;
use crate::jobs::{
    JobFilter, JobId, JobSpec, JobStatus, JobSubmission, ModelType, OptimizationAlgorithm, OptimizationType,
    ParameterGrid, TuningMethod,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.engine.stats();
    let accepting = state.engine.is_accepting();
    let status = if accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if accepting { "healthy" } else { "draining" },
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "jobs_running": stats.pool.running,
            "jobs_queued": stats.pool.queued,
        })),
    )
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Submission
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

fn accepted(id: JobId) -> impl IntoResponse {
    (
        StatusCode::CREATED,
        Json(ApiResponse::success(SubmitResponse {
            job_id: id,
            status: JobStatus::Pending,
        })),
    )
}

pub async fn submit_job(
    State(state): State<AppState>,
    Json(submission): Json<JobSubmission>,
) -> Result<impl IntoResponse, TrainyardError> {
    let id = state.engine.submit_job(submission)?;
    Ok(accepted(id))
}

/// Body of `POST /api/v1/training`. Omitted fields take the job defaults.
#[derive(Debug, Default, Deserialize)]
pub struct TrainingRequest {
    pub model_type: Option<ModelType>,
    pub epochs: Option<u32>,
    pub batch_size: Option<u32>,
    pub learning_rate: Option<f64>,
    pub optimization_type: Option<OptimizationType>,
}

impl TrainingRequest {
    fn into_submission(self) -> JobSubmission {
        let mut spec = JobSpec::training();
        if let JobSpec::Training {
            model_type,
            epochs,
            batch_size,
            learning_rate,
            optimization_type,
        } = &mut spec
        {
            if let Some(v) = self.model_type {
                *model_type = v;
            }
            if let Some(v) = self.epochs {
                *epochs = v;
            }
            if let Some(v) = self.batch_size {
                *batch_size = v;
            }
            if let Some(v) = self.learning_rate {
                *learning_rate = v;
            }
            if let Some(v) = self.optimization_type {
                *optimization_type = v;
            }
        }
        JobSubmission::new(spec)
    }
}

pub async fn submit_training(
    State(state): State<AppState>,
    Json(req): Json<TrainingRequest>,
) -> Result<impl IntoResponse, TrainyardError> {
    let id = state.engine.submit_job(req.into_submission())?;
    Ok(accepted(id))
}

/// Body of `POST /api/v1/optimization`. Omitted fields take the job defaults.
#[derive(Debug, Default, Deserialize)]
pub struct OptimizationRequest {
    pub target_module: Option<String>,
    pub optimization_algorithm: Option<OptimizationAlgorithm>,
    pub max_iterations: Option<u32>,
    pub evaluation_metric: Option<String>,
}

impl OptimizationRequest {
    fn into_submission(self) -> JobSubmission {
        let mut spec = JobSpec::optimization();
        if let JobSpec::Optimization {
            target_module,
            optimization_algorithm,
            max_iterations,
            evaluation_metric,
        } = &mut spec
        {
            if let Some(v) = self.target_module {
                *target_module = v;
            }
            if let Some(v) = self.optimization_algorithm {
                *optimization_algorithm = v;
            }
            if let Some(v) = self.max_iterations {
                *max_iterations = v;
            }
            if let Some(v) = self.evaluation_metric {
                *evaluation_metric = v;
            }
        }
        JobSubmission::new(spec)
    }
}

pub async fn submit_optimization(
    State(state): State<AppState>,
    Json(req): Json<OptimizationRequest>,
) -> Result<impl IntoResponse, TrainyardError> {
    let id = state.engine.submit_job(req.into_submission())?;
    Ok(accepted(id))
}

/// Body of `POST /api/v1/tuning`. Omitted fields take the job defaults.
#[derive(Debug, Default, Deserialize)]
pub struct TuningRequest {
    pub target_model: Option<String>,
    pub hyperparameters: Option<ParameterGrid>,
    pub tuning_method: Option<TuningMethod>,
    pub cross_validation_folds: Option<u32>,
    pub evaluation_metric: Option<String>,
    pub max_trials: Option<u32>,
}

impl TuningRequest {
    fn into_submission(self) -> JobSubmission {
        let mut spec = JobSpec::tuning();
        if let JobSpec::HyperparameterTuning {
            target_model,
            hyperparameters,
            tuning_method,
            cross_validation_folds,
            evaluation_metric,
            max_trials,
        } = &mut spec
        {
            if let Some(v) = self.target_model {
                *target_model = v;
            }
            if let Some(v) = self.hyperparameters {
                *hyperparameters = v;
            }
            if let Some(v) = self.tuning_method {
                *tuning_method = v;
            }
            if let Some(v) = self.cross_validation_folds {
                *cross_validation_folds = v;
            }
            if let Some(v) = self.evaluation_metric {
                *evaluation_metric = v;
            }
            if let Some(v) = self.max_trials {
                *max_trials = v;
            }
        }
        JobSubmission::new(spec)
    }
}

pub async fn submit_tuning(
    State(state): State<AppState>,
    Json(req): Json<TuningRequest>,
) -> Result<impl IntoResponse, TrainyardError> {
    let id = state.engine.submit_job(req.into_submission())?;
    Ok(accepted(id))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Queries
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(filter): Query<JobFilter>,
) -> Result<impl IntoResponse, TrainyardError> {
    Ok(Json(ApiResponse::success(state.engine.list_jobs(filter))))
}

pub async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, TrainyardError> {
    let snapshot = state.engine.get_progress(JobId::from_uuid(id))?;
    Ok(Json(ApiResponse::success(snapshot)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub cancelled: bool,
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, TrainyardError> {
    let id = JobId::from_uuid(id);
    // Unknown ids are a 404 here rather than a plain `false`.
    state.engine.get_progress(id)?;
    let cancelled = state.engine.cancel_job(id);
    Ok(Json(ApiResponse::success(CancelResponse {
        job_id: id,
        cancelled,
    })))
}

pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, TrainyardError> {
    let outcome = state.engine.get_result(JobId::from_uuid(id))?;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn engine_stats(State(state): State<AppState>) -> Result<impl IntoResponse, TrainyardError> {
    Ok(Json(ApiResponse::success(state.engine.stats())))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Stream
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    /// Only stream events of this job
    pub job_id: Option<Uuid>,
}

pub async fn job_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let only = query.job_id.map(JobId::from_uuid);
    let shutdown = state.engine.shutdown_token();

    let stream = BroadcastStream::new(state.engine.subscribe()).filter_map(move |message| {
        match message {
            Ok(event) if only.map_or(true, |id| id == event.job_id) => Event::default()
                .event(event.name())
                .json_data(&event)
                .ok()
                .map(Ok),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Event subscriber lagged");
                Some(Ok(Event::default().event("lagged").data(missed.to_string())))
            }
        }
    });
    let stream = futures::StreamExt::take_until(stream, async move { shutdown.cancelled().await });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

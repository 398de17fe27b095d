//! V1 API routes.

use axum::{
    routing::{get, post},
    Router,
};

use crate::api::{handlers, AppState};

/// V1 API prefix.
pub const V1_PREFIX: &str = "/api/v1";

/// Build the V1 API router.
///
/// All routes are mounted under `/api/v1/`.
///
/// # Endpoints
///
/// ## Submission
/// - `POST /api/v1/jobs` - Submit a kind-tagged job
/// - `POST /api/v1/training` - Submit a training job
/// - `POST /api/v1/optimization` - Submit an optimization job
/// - `POST /api/v1/tuning` - Submit a hyperparameter tuning job
///
/// ## Jobs
/// - `GET /api/v1/jobs?status=&kind=` - List jobs
/// - `GET /api/v1/jobs/:id` - Progress snapshot
/// - `POST /api/v1/jobs/:id/cancel` - Request cancellation
/// - `GET /api/v1/jobs/:id/result` - Final outcome of a completed job
/// - `GET /api/v1/jobs/events` - Server-Sent Events stream
///
/// ## System
/// - `GET /api/v1/stats` - Engine statistics
pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(handlers::submit_job).get(handlers::list_jobs))
        .route("/training", post(handlers::submit_training))
        .route("/optimization", post(handlers::submit_optimization))
        .route("/tuning", post(handlers::submit_tuning))
        .route("/jobs/events", get(handlers::job_events))
        .route("/jobs/:id", get(handlers::get_progress))
        .route("/jobs/:id/cancel", post(handlers::cancel_job))
        .route("/jobs/:id/result", get(handlers::get_result))
        .route("/stats", get(handlers::engine_stats))
}

/// V1 API route constants for use in clients and documentation.
pub mod paths {
    pub const JOBS: &str = "/api/v1/jobs";
    pub const TRAINING: &str = "/api/v1/training";
    pub const OPTIMIZATION: &str = "/api/v1/optimization";
    pub const TUNING: &str = "/api/v1/tuning";
    pub const JOB: &str = "/api/v1/jobs/:id";
    pub const JOB_CANCEL: &str = "/api/v1/jobs/:id/cancel";
    pub const JOB_RESULT: &str = "/api/v1/jobs/:id/result";
    pub const JOB_EVENTS: &str = "/api/v1/jobs/events";
    pub const STATS: &str = "/api/v1/stats";
}

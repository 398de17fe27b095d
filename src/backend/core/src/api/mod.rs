//! HTTP API for the job engine.
//!
//! - `/health` and `/metrics` are unversioned
//! - job operations live under `/api/v1/`
//! - job events stream as Server-Sent Events from `/api/v1/jobs/events`

mod handlers;
pub mod middleware;
pub mod v1;

use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::jobs::JobEngine;
use crate::telemetry::MetricsRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<JobEngine>,
    pub metrics: MetricsRegistry,
}

impl AppState {
    pub fn new(engine: Arc<JobEngine>, metrics: MetricsRegistry) -> Self {
        Self { engine, metrics }
    }
}

/// Build the API router.
///
/// ```rust,ignore
/// let state = AppState::new(engine, telemetry.metrics);
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .nest("/api/v1", v1::routes::v1_router())
        .layer(axum_middleware::from_fn(middleware::api_version_headers))
        .layer(axum_middleware::from_fn(middleware::content_type_validation))
        .layer(axum_middleware::from_fn(middleware::track_request_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

/// API response wrapper for successful calls. Errors are rendered by
/// [`crate::error::ErrorResponse`].
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert_eq!(response.data, "test data");

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], "test data");
    }
}

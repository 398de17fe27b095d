//! API middleware for content-type enforcement, response headers and request metrics.

use axum::{
    extract::{MatchedPath, Request},
    http::{
        header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING},
        Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::telemetry::RequestDurationHistogram;

fn has_body(req: &Request) -> bool {
    let headers = req.headers();
    let declared_length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    declared_length > 0 || headers.contains_key(TRANSFER_ENCODING)
}

/// Middleware that validates the Content-Type header of mutation requests.
///
/// POST, PUT and PATCH requests that carry a body must be `application/json`.
/// Bodiless POSTs such as `/jobs/:id/cancel` pass through.
pub async fn content_type_validation(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    if matches!(method, Method::POST | Method::PUT | Method::PATCH) && has_body(&req) {
        match req.headers().get(CONTENT_TYPE) {
            Some(content_type) => {
                let ct_str = content_type.to_str().unwrap_or("");
                if !ct_str.contains("application/json") {
                    return (
                        StatusCode::UNSUPPORTED_MEDIA_TYPE,
                        Json(serde_json::json!({
                            "success": false,
                            "error": "Content-Type must be application/json",
                            "error_code": "UNSUPPORTED_MEDIA_TYPE"
                        })),
                    )
                        .into_response();
                }
            }
            None => {
                return (
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    Json(serde_json::json!({
                        "success": false,
                        "error": "Content-Type header is required for this request",
                        "error_code": "MISSING_CONTENT_TYPE"
                    })),
                )
                    .into_response();
            }
        }
    }
    next.run(req).await
}

/// Middleware that adds standard API response headers.
pub async fn api_version_headers(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    let _ = headers.try_insert(
        HeaderName::from_static("x-api-version"),
        HeaderValue::from_static("1.0"),
    );
    if let Ok(val) = HeaderValue::from_str(&request_id) {
        let _ = headers.try_insert(HeaderName::from_static("x-request-id"), val);
    }
    let _ = headers.try_insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    response
}

/// Record duration and count of every request, labelled by route template.
pub async fn track_request_metrics(req: Request, next: Next) -> Response {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let timer = RequestDurationHistogram::start(req.method().as_str(), &path);

    let response = next.run(req).await;
    timer.finish(response.status().as_u16());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::post, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/echo", post(|| async { "ok" }))
            .layer(axum::middleware::from_fn(api_version_headers))
            .layer(axum::middleware::from_fn(content_type_validation))
    }

    #[tokio::test]
    async fn test_body_without_json_content_type_is_rejected() {
        let response = app()
            .oneshot(
                Request::post("/echo")
                    .header(CONTENT_TYPE, "text/plain")
                    .header(CONTENT_LENGTH, "2")
                    .body(Body::from("hi"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_bodiless_post_passes() {
        let response = app()
            .oneshot(Request::post("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-api-version"], "1.0");
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let response = app()
            .oneshot(
                Request::post("/echo")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "req-42");
    }
}

//! Route handlers for the public API.

use crate::db::PoolProvider;
use crate::error::DbError;
use crate::snapshot::latest_snapshot_metadata;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

/// Headers checked, in order, for a caller-supplied trace id.
const TRACE_HEADERS: [&str; 3] = ["x-trace-id", "traceparent", "x-request-id"];

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub provider: PoolProvider,
}

impl AppState {
    pub fn new(provider: PoolProvider) -> Self {
        Self { provider }
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/v1/snapshots/latest", get(latest_snapshot))
        .with_state(state)
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    pub code: String,
    pub message: String,
    pub trace_id: String,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn snapshot_unavailable(trace_id: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "snapshot_unavailable",
            "No snapshot available yet.",
            trace_id,
        )
    }

    /// Map a database failure. Details stay in the log, not the body.
    pub fn from_db_error(err: &DbError, trace_id: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            err.code(),
            "The request could not be completed.",
            trace_id,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Caller-supplied trace id, or a fresh UUID.
pub fn trace_id(headers: &HeaderMap) -> String {
    TRACE_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn latest_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let trace_id = trace_id(&headers);

    match latest_snapshot_metadata(&state.provider).await {
        Ok(Some(metadata)) => {
            info!(
                trace_id = %trace_id,
                snapshot_version = %metadata.snapshot_version,
                "Serving latest snapshot"
            );
            Ok(Json(metadata).into_response())
        }
        Ok(None) => {
            info!(trace_id = %trace_id, "No snapshot published yet");
            Err(ApiError::snapshot_unavailable(trace_id))
        }
        Err(e) => {
            error!(
                trace_id = %trace_id,
                error = %e,
                sql_state = e.sql_state(),
                suggestion = e.suggestion(),
                retryable = e.is_retryable(),
                "Failed to load snapshot metadata"
            );
            Err(ApiError::from_db_error(&e, trace_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_trace_id_prefers_explicit_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("req-2"));
        headers.insert("x-trace-id", HeaderValue::from_static("trace-1"));
        assert_eq!(trace_id(&headers), "trace-1");
    }

    #[test]
    fn test_trace_id_skips_blank_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", HeaderValue::from_static("  "));
        headers.insert("x-request-id", HeaderValue::from_static("req-2"));
        assert_eq!(trace_id(&headers), "req-2");
    }

    #[test]
    fn test_trace_id_generated_when_absent() {
        let id = trace_id(&HeaderMap::new());
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_db_error_status_mapping() {
        let busy = ApiError::from_db_error(&DbError::pool_exhausted("timed out"), "t");
        assert_eq!(busy.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(busy.code, "database_busy");

        let broken = ApiError::from_db_error(&DbError::internal("bad row"), "t");
        assert_eq!(broken.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(broken.code, "internal_error");
    }

    #[test]
    fn test_error_body_shape() {
        let body = serde_json::to_value(ApiError::snapshot_unavailable("abc")).unwrap();
        assert_eq!(
            body,
            json!({
                "code": "snapshot_unavailable",
                "message": "No snapshot available yet.",
                "traceId": "abc"
            })
        );
    }
}

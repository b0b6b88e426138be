//! HTTP route tests driven through `tower::ServiceExt::oneshot`.

mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use bartender_db::config::DatabaseConfig;
use bartender_db::db::{PoolProvider, SharedPool};
use bartender_db::error::DbError;
use bartender_db::http::{AppState, router};
use common::{RecordingPool, row};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

async fn app_with(pool: &RecordingPool) -> axum::Router {
    let provider = PoolProvider::new(DatabaseConfig::default());
    let shared: SharedPool = Arc::new(pool.clone());
    provider.set_override_pool(Some(shared)).await;
    router(AppState::new(provider))
}

async fn get(app: axum::Router, uri: &str, trace_id: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().uri(uri);
    if let Some(trace_id) = trace_id {
        request = request.header("x-trace-id", trace_id);
    }
    let response = app
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let app = router(AppState::new(PoolProvider::new(DatabaseConfig::default())));

    let (status, body) = get(app, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_latest_snapshot_ok() {
    let recording = RecordingPool::new().with_rows(vec![row(json!({
        "schema_version": "1",
        "snapshot_version": "20251010.033005",
        "blob_path": "snapshots/sqlite/1/20251010.033005.db.zst",
        "size_bytes": 1024,
        "sha256": "abc123",
        "counts": {"drinks": 635},
        "created_at": "2025-10-10T03:30:05.000Z"
    }))]);
    let app = app_with(&recording).await;

    let (status, body) = get(app, "/api/v1/snapshots/latest", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schemaVersion"], "1");
    assert_eq!(body["snapshotVersion"], "20251010.033005");
    assert_eq!(body["blobPath"], "snapshots/sqlite/1/20251010.033005.db.zst");
    assert_eq!(body["sizeBytes"], 1024);
    assert_eq!(body["counts"]["drinks"], 635);
    assert_eq!(body["createdAtUtc"], "2025-10-10T03:30:05Z");
}

#[tokio::test]
async fn test_latest_snapshot_unavailable() {
    let recording = RecordingPool::new();
    let app = app_with(&recording).await;

    let (status, body) = get(app, "/api/v1/snapshots/latest", Some("trace-123")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body,
        json!({
            "code": "snapshot_unavailable",
            "message": "No snapshot available yet.",
            "traceId": "trace-123"
        })
    );
}

#[tokio::test]
async fn test_latest_snapshot_database_failure() {
    let recording = RecordingPool::new()
        .failing_on("SELECT", DbError::connection("connection refused", "retry"));
    let app = app_with(&recording).await;

    let (status, body) = get(app, "/api/v1/snapshots/latest", None).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "database_unavailable");
    assert!(!body["message"].as_str().unwrap().contains("refused"));
    assert!(body["traceId"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(recording.release_count(), 1);
}

#[tokio::test]
async fn test_latest_snapshot_without_configuration() {
    let app = router(AppState::new(PoolProvider::new(DatabaseConfig::default())));

    let (status, body) = get(app, "/api/v1/snapshots/latest", None).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "configuration_error");
}

#[tokio::test]
async fn test_unknown_route() {
    let app = router(AppState::new(PoolProvider::new(DatabaseConfig::default())));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

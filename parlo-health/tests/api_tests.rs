//! Router tests for parlo-health

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use parlo_common::config::HealthConfig;
use parlo_common::events::EventBus;
use parlo_health::{build_router, AppState, HealthMonitor, LogAlertSink};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn app(cron_secret: Option<&str>) -> axum::Router {
    let monitor = HealthMonitor::new(
        &HealthConfig::default(),
        Arc::new(LogAlertSink),
        EventBus::new(16),
    )
    .unwrap();
    build_router(AppState::new(
        Arc::new(monitor),
        cron_secret.map(str::to_string),
    ))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn cron_request(auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/api/cron/health-check");
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = app(None)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "parlo-health");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_cron_requires_bearer() {
    let response = app(Some("s3cret")).oneshot(cron_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_cron_rejects_wrong_secret() {
    let response = app(Some("s3cret"))
        .oneshot(cron_request(Some("Bearer guess")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cron_unavailable_without_secret() {
    let response = app(None)
        .oneshot(cron_request(Some("Bearer anything")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_cron_returns_report() {
    let response = app(Some("s3cret"))
        .oneshot(cron_request(Some("Bearer s3cret")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["checked_at"].is_string());
    assert_eq!(json["endpoints"], Value::Array(Vec::new()));
    assert_eq!(json["alerts_sent"], 0);
}

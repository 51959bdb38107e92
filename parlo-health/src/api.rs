//! HTTP surface
//!
//! - `GET /health`: liveness of this service
//! - `GET /api/cron/health-check`: run one sweep; bearer-protected

use crate::error::{ApiError, ApiResult};
use crate::monitor::HealthReport;
use crate::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);

    Json(HealthResponse {
        status: "ok".to_string(),
        service: "parlo-health".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
    })
}

/// GET /api/cron/health-check
pub async fn cron_health_check(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<HealthReport>> {
    authorize_cron(state.cron_secret.as_deref(), &headers)?;
    Ok(Json(state.monitor.check_all().await))
}

fn authorize_cron(secret: Option<&str>, headers: &HeaderMap) -> ApiResult<()> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        warn!("Cron health check called but no cron secret is configured");
        return Err(ApiError::Unavailable("cron secret not configured".to_string()));
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => Ok(()),
        Some(_) => {
            warn!("Cron health check rejected: wrong secret");
            Err(ApiError::Unauthorized("invalid cron secret".to_string()))
        }
        None => Err(ApiError::Unauthorized("missing bearer token".to_string())),
    }
}

/// Byte comparison whose running time does not depend on where the inputs
/// first differ; only the length check short-circuits
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Build the service routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/cron/health-check", get(cron_health_check))
}

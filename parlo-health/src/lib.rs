//! # Parlo Health Monitor (parlo-health)
//!
//! Admin service that sweeps the configured endpoints on demand (typically
//! from an external cron), tracks consecutive failures, and alerts an
//! operator over SMS when an endpoint stays down.

pub mod alert;
pub mod api;
pub mod error;
pub mod monitor;

pub use alert::{Alert, AlertSink, LogAlertSink, SmsAlertSink};
pub use error::{ApiError, ApiResult};
pub use monitor::{AlertPolicy, EndpointReport, EndpointState, HealthMonitor, HealthReport};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<HealthMonitor>,
    /// Bearer secret for the cron endpoint; `None` disables it
    pub cron_secret: Option<String>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(monitor: Arc<HealthMonitor>, cron_secret: Option<String>) -> Self {
        Self {
            monitor,
            cron_secret,
            startup_time: Utc::now(),
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    api::routes().with_state(state)
}

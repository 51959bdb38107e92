//! Operator alert delivery

use async_trait::async_trait;
use parlo_common::config::{HealthConfig, SmsConfig};
use parlo_common::events::AlertKind;
use parlo_common::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One operator notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub endpoint: String,
    pub kind: AlertKind,
    pub message: String,
}

impl Alert {
    pub fn down(endpoint: &str, failures: u32, error: Option<&str>) -> Self {
        let detail = error.map(|e| format!(" ({})", e)).unwrap_or_default();
        Self {
            endpoint: endpoint.to_string(),
            kind: AlertKind::Down,
            message: format!(
                "[Parlo] {} is DOWN: {} consecutive failed checks{}",
                endpoint, failures, detail
            ),
        }
    }

    pub fn recovered(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            kind: AlertKind::Recovered,
            message: format!("[Parlo] {} has recovered", endpoint),
        }
    }
}

/// Where alerts go
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Alerts written to the log only
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        match alert.kind {
            AlertKind::Down => warn!(endpoint = %alert.endpoint, "{}", alert.message),
            AlertKind::Recovered => info!(endpoint = %alert.endpoint, "{}", alert.message),
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SmsRequest<'a> {
    to: &'a str,
    body: &'a str,
}

/// Alerts sent as SMS through an HTTP gateway
pub struct SmsAlertSink {
    client: reqwest::Client,
    config: SmsConfig,
}

impl SmsAlertSink {
    pub fn new(config: SmsConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl AlertSink for SmsAlertSink {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.token)
            .json(&SmsRequest {
                to: &self.config.to,
                body: &alert.message,
            })
            .send()
            .await
            .map_err(|e| Error::Http(format!("SMS gateway request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!(
                "SMS gateway returned HTTP {}",
                status.as_u16()
            )));
        }
        debug!(endpoint = %alert.endpoint, kind = %alert.kind, "SMS alert accepted");
        Ok(())
    }
}

/// SMS when a gateway is configured, log otherwise
pub fn sink_from_config(config: &HealthConfig) -> Result<Arc<dyn AlertSink>> {
    match &config.sms {
        Some(sms) => {
            info!(gateway = %sms.url, "SMS alerting enabled");
            Ok(Arc::new(SmsAlertSink::new(
                sms.clone(),
                Duration::from_secs(config.request_timeout_secs),
            )?))
        }
        None => {
            info!("No SMS gateway configured, alerts go to the log");
            Ok(Arc::new(LogAlertSink))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_down_message_carries_error() {
        let alert = Alert::down("api", 3, Some("HTTP 502"));
        assert_eq!(alert.kind, AlertKind::Down);
        assert_eq!(alert.message, "[Parlo] api is DOWN: 3 consecutive failed checks (HTTP 502)");

        let bare = Alert::down("api", 4, None);
        assert!(bare.message.ends_with("4 consecutive failed checks"));
    }

    #[tokio::test]
    async fn test_log_sink_never_fails() {
        assert!(LogAlertSink.send(&Alert::recovered("api")).await.is_ok());
    }
}

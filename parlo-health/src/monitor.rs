//! Endpoint health sweeps and alert throttling
//!
//! Each sweep probes every configured endpoint concurrently, then folds the
//! results into per-endpoint state:
//! - failure: count it; at `failure_threshold` consecutive failures send a
//!   `Down` alert, at most once per `alert_cooldown`
//! - success: zero the count; if a `Down` alert is outstanding send a
//!   `Recovered` notice (never throttled)

use crate::alert::{Alert, AlertSink};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parlo_common::config::{EndpointConfig, HealthConfig};
use parlo_common::events::{AlertKind, EventBus, ParloEvent};
use parlo_common::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Alerting thresholds
#[derive(Debug, Clone, Copy)]
pub struct AlertPolicy {
    pub failure_threshold: u32,
    pub cooldown: chrono::Duration,
}

impl AlertPolicy {
    pub fn from_config(config: &HealthConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            // chrono durations top out at i64::MAX milliseconds
            cooldown: chrono::Duration::seconds(
                config.alert_cooldown_secs.min(i64::MAX as u64 / 1000) as i64,
            ),
        }
    }
}

/// Tracked state of one endpoint across sweeps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointState {
    pub consecutive_failures: u32,
    /// Last `Down` alert
    pub last_alert_at: Option<DateTime<Utc>>,
    /// Result of the previous probe; `None` before the first sweep
    pub last_status: Option<bool>,
    /// A `Down` alert went out and no recovery has been seen since
    pub alerted: bool,
}

impl EndpointState {
    /// Fold one probe result in; returns the alert to send, if any
    pub fn record(
        &mut self,
        healthy: bool,
        now: DateTime<Utc>,
        policy: &AlertPolicy,
    ) -> Option<AlertKind> {
        self.last_status = Some(healthy);

        if healthy {
            self.consecutive_failures = 0;
            if self.alerted {
                self.alerted = false;
                return Some(AlertKind::Recovered);
            }
            return None;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures < policy.failure_threshold {
            return None;
        }

        let cooled_down = match self.last_alert_at {
            Some(at) => now.signed_duration_since(at) >= policy.cooldown,
            None => true,
        };
        if !cooled_down {
            return None;
        }

        self.last_alert_at = Some(now);
        self.alerted = true;
        Some(AlertKind::Down)
    }
}

/// Result of probing one endpoint
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EndpointReport {
    pub name: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one sweep
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub endpoints: Vec<EndpointReport>,
    /// Alerts the sink accepted during this sweep
    pub alerts_sent: usize,
}

impl HealthReport {
    pub fn healthy_count(&self) -> usize {
        self.endpoints.iter().filter(|e| e.healthy).count()
    }

    pub fn unhealthy_count(&self) -> usize {
        self.endpoints.len() - self.healthy_count()
    }
}

struct ProbeOutcome {
    latency_ms: u64,
    error: Option<String>,
}

/// Health monitor over the configured endpoints
pub struct HealthMonitor {
    client: reqwest::Client,
    endpoints: Vec<EndpointConfig>,
    policy: AlertPolicy,
    states: Mutex<HashMap<String, EndpointState>>,
    sink: Arc<dyn AlertSink>,
    events: EventBus,
    /// Serialises sweeps so overlapping cron calls cannot double-alert
    sweep: tokio::sync::Mutex<()>,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig, sink: Arc<dyn AlertSink>, events: EventBus) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            policy: AlertPolicy::from_config(config),
            states: Mutex::new(HashMap::new()),
            sink,
            events,
            sweep: tokio::sync::Mutex::new(()),
        })
    }

    pub fn endpoints(&self) -> &[EndpointConfig] {
        &self.endpoints
    }

    /// Snapshot of one endpoint's tracked state
    pub fn endpoint_state(&self, name: &str) -> Option<EndpointState> {
        self.lock_states().get(name).cloned()
    }

    /// Probe every endpoint, update state, and send due alerts
    pub async fn check_all(&self) -> HealthReport {
        let _sweep = self.sweep.lock().await;

        let outcomes = join_all(self.endpoints.iter().map(|e| self.probe(e))).await;
        let checked_at = parlo_common::time::now();

        let mut reports = Vec::with_capacity(outcomes.len());
        let mut alerts = Vec::new();
        {
            let mut states = self.lock_states();
            for (endpoint, outcome) in self.endpoints.iter().zip(outcomes) {
                let state = states.entry(endpoint.name.clone()).or_default();
                let healthy = outcome.error.is_none();
                match state.record(healthy, checked_at, &self.policy) {
                    Some(AlertKind::Down) => alerts.push(Alert::down(
                        &endpoint.name,
                        state.consecutive_failures,
                        outcome.error.as_deref(),
                    )),
                    Some(AlertKind::Recovered) => alerts.push(Alert::recovered(&endpoint.name)),
                    None => {}
                }
                reports.push(EndpointReport {
                    name: endpoint.name.clone(),
                    healthy,
                    consecutive_failures: state.consecutive_failures,
                    latency_ms: outcome.latency_ms,
                    error: outcome.error,
                });
            }
        }

        let mut alerts_sent = 0;
        for alert in &alerts {
            let delivered = match self.sink.send(alert).await {
                Ok(()) => {
                    alerts_sent += 1;
                    true
                }
                Err(e) => {
                    warn!(endpoint = %alert.endpoint, kind = %alert.kind, error = %e, "Alert delivery failed");
                    false
                }
            };
            self.events.emit_lossy(ParloEvent::AlertSent {
                endpoint: alert.endpoint.clone(),
                kind: alert.kind,
                delivered,
                timestamp: parlo_common::time::now(),
            });
        }

        let report = HealthReport {
            checked_at,
            endpoints: reports,
            alerts_sent,
        };
        info!(
            healthy = report.healthy_count(),
            unhealthy = report.unhealthy_count(),
            alerts_sent,
            "Health check complete"
        );
        self.events.emit_lossy(ParloEvent::HealthCheckCompleted {
            healthy: report.healthy_count(),
            unhealthy: report.unhealthy_count(),
            timestamp: checked_at,
        });
        report
    }

    async fn probe(&self, endpoint: &EndpointConfig) -> ProbeOutcome {
        let started = Instant::now();
        let result = self.client.get(&endpoint.url).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let error = match result {
            Ok(response) if response.status().is_success() => None,
            Ok(response) => Some(format!("HTTP {}", response.status().as_u16())),
            Err(e) if e.is_timeout() => Some("timed out".to_string()),
            Err(e) => Some(format!("request failed: {}", e)),
        };
        debug!(endpoint = %endpoint.name, latency_ms, error = ?error, "Endpoint probed");
        ProbeOutcome { latency_ms, error }
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, EndpointState>> {
        self.states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(threshold: u32, cooldown_secs: i64) -> AlertPolicy {
        AlertPolicy {
            failure_threshold: threshold,
            cooldown: chrono::Duration::seconds(cooldown_secs),
        }
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    #[test]
    fn test_alert_on_threshold_not_before() {
        let policy = policy(3, 3600);
        let mut state = EndpointState::default();
        assert_eq!(state.record(false, at(0), &policy), None);
        assert_eq!(state.record(false, at(1), &policy), None);
        assert_eq!(state.record(false, at(2), &policy), Some(AlertKind::Down));
        assert_eq!(state.consecutive_failures, 3);
        assert_eq!(state.last_alert_at, Some(at(2)));
    }

    #[test]
    fn test_cooldown_throttles_repeat_alerts() {
        let policy = policy(1, 3600);
        let mut state = EndpointState::default();
        assert_eq!(state.record(false, at(0), &policy), Some(AlertKind::Down));
        assert_eq!(state.record(false, at(30), &policy), None);
        assert_eq!(state.record(false, at(59), &policy), None);
        assert_eq!(state.record(false, at(60), &policy), Some(AlertKind::Down));
    }

    #[test]
    fn test_recovery_only_after_alert() {
        let policy = policy(2, 3600);
        let mut state = EndpointState::default();

        // One failure, below threshold: recovering is silent
        state.record(false, at(0), &policy);
        assert_eq!(state.record(true, at(1), &policy), None);
        assert_eq!(state.consecutive_failures, 0);

        state.record(false, at(2), &policy);
        assert_eq!(state.record(false, at(3), &policy), Some(AlertKind::Down));
        assert_eq!(state.record(true, at(4), &policy), Some(AlertKind::Recovered));
        assert_eq!(state.record(true, at(5), &policy), None);
        assert_eq!(state.last_status, Some(true));
    }

    #[test]
    fn test_cooldown_survives_recovery() {
        let policy = policy(1, 3600);
        let mut state = EndpointState::default();
        assert_eq!(state.record(false, at(0), &policy), Some(AlertKind::Down));
        assert_eq!(state.record(true, at(5), &policy), Some(AlertKind::Recovered));
        // Flapping inside the cooldown stays quiet
        assert_eq!(state.record(false, at(10), &policy), None);
        assert_eq!(state.record(true, at(15), &policy), None);
    }

    #[test]
    fn test_zero_threshold_treated_as_one() {
        let mut config = HealthConfig::default();
        config.failure_threshold = 0;
        assert_eq!(AlertPolicy::from_config(&config).failure_threshold, 1);
    }
}

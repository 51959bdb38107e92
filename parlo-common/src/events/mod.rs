//! Event types for the Parlo event system
//!
//! Provides shared event definitions and the EventBus used by the bootstrap
//! core and the health service.

mod bootstrap_types;
mod health_types;

pub use bootstrap_types::{BootstrapDecision, ConnectivityState};
pub use health_types::AlertKind;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Parlo event types
///
/// Events are broadcast via EventBus and serialize to tagged JSON so they
/// can be logged or forwarded as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ParloEvent {
    /// Passive network path observation changed
    ///
    /// Triggers:
    /// - Coordinator: short-circuit the offline wait on Connected
    /// - UI: show/hide the offline banner
    ConnectivityChanged {
        old_state: ConnectivityState,
        new_state: ConnectivityState,
        timestamp: DateTime<Utc>,
    },

    /// Retry scheduler armed the next wait
    RetryScheduled {
        /// Probe number the wait leads up to (1-based)
        attempt: u32,
        /// Length of the wait in seconds
        interval_secs: f64,
        timestamp: DateTime<Utc>,
    },

    /// Countdown tick while waiting for the next probe
    ///
    /// Emitted once per second; high-frequency, emitted lossy.
    RetryCountdown { seconds_remaining: u64 },

    /// A reachability probe finished
    ProbeCompleted {
        attempt: u32,
        reachable: bool,
        timestamp: DateTime<Utc>,
    },

    /// Retry scheduler saw the backend again and stopped
    ReachabilityRestored {
        /// Probes it took
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// Visible root changed
    BootstrapDecisionChanged {
        old_decision: Option<BootstrapDecision>,
        new_decision: BootstrapDecision,
        timestamp: DateTime<Utc>,
    },

    /// Health sweep over all monitored endpoints finished
    HealthCheckCompleted {
        healthy: usize,
        unhealthy: usize,
        timestamp: DateTime<Utc>,
    },

    /// Operator alert delivered (or attempted)
    AlertSent {
        endpoint: String,
        kind: AlertKind,
        delivered: bool,
        timestamp: DateTime<Utc>,
    },
}

impl ParloEvent {
    /// Get event type as string for filtering and logging
    pub fn event_type(&self) -> &str {
        match self {
            ParloEvent::ConnectivityChanged { .. } => "ConnectivityChanged",
            ParloEvent::RetryScheduled { .. } => "RetryScheduled",
            ParloEvent::RetryCountdown { .. } => "RetryCountdown",
            ParloEvent::ProbeCompleted { .. } => "ProbeCompleted",
            ParloEvent::ReachabilityRestored { .. } => "ReachabilityRestored",
            ParloEvent::BootstrapDecisionChanged { .. } => "BootstrapDecisionChanged",
            ParloEvent::HealthCheckCompleted { .. } => "HealthCheckCompleted",
            ParloEvent::AlertSent { .. } => "AlertSent",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers, each with its own ordered stream
/// - Lagged subscribers skip old events instead of stalling the bus
///
/// Cloning the bus clones the sender; all clones feed the same subscribers.
///
/// # Examples
///
/// ```
/// use parlo_common::events::{ConnectivityState, EventBus, ParloEvent};
///
/// let bus = EventBus::new(64);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(ParloEvent::ConnectivityChanged {
///     old_state: ConnectivityState::Unknown,
///     new_state: ConnectivityState::Connected,
///     timestamp: chrono::Utc::now(),
/// });
///
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.event_type(), "ConnectivityChanged");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ParloEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered per subscriber before the
    /// oldest are dropped for that subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ParloEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ParloEvent,
    ) -> Result<usize, broadcast::error::SendError<ParloEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ParloEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_emit_without_subscribers() {
        let bus = EventBus::new(10);
        let result = bus.emit(ParloEvent::RetryCountdown { seconds_remaining: 3 });
        assert!(result.is_err(), "emit with no subscribers should report failure");

        // Lossy variant must not panic
        bus.emit_lossy(ParloEvent::RetryCountdown { seconds_remaining: 2 });
    }

    #[test]
    fn test_eventbus_multiple_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let clone = bus.clone();
        assert_eq!(bus.subscriber_count(), 2);

        clone
            .emit(ParloEvent::ReachabilityRestored {
                attempts: 4,
                timestamp: Utc::now(),
            })
            .expect("emit should succeed");

        assert_eq!(rx1.try_recv().unwrap().event_type(), "ReachabilityRestored");
        assert_eq!(rx2.try_recv().unwrap().event_type(), "ReachabilityRestored");
    }

    #[test]
    fn test_eventbus_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.emit_lossy(ParloEvent::RetryCountdown { seconds_remaining: i });
        }
        match rx.try_recv() {
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => assert_eq!(skipped, 3),
            other => panic!("expected lag, got {:?}", other),
        }
        // After the lag notice the newest events are still delivered
        match rx.try_recv().unwrap() {
            ParloEvent::RetryCountdown { seconds_remaining } => assert_eq!(seconds_remaining, 3),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ParloEvent::BootstrapDecisionChanged {
            old_decision: Some(BootstrapDecision::Loading),
            new_decision: BootstrapDecision::Offline,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"type\":\"BootstrapDecisionChanged\""));
        assert!(json.contains("\"new_decision\":\"Offline\""));

        let back: ParloEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.event_type(), "BootstrapDecisionChanged");
    }

    #[test]
    fn test_decision_terminality() {
        assert!(!BootstrapDecision::Loading.is_terminal());
        assert!(!BootstrapDecision::Offline.is_terminal());
        assert!(BootstrapDecision::MainApp.is_terminal());
        assert!(BootstrapDecision::Onboarding.is_terminal());
        assert!(BootstrapDecision::Authentication.is_terminal());
    }

    #[test]
    fn test_connectivity_state_default_is_unknown() {
        let state = ConnectivityState::default();
        assert_eq!(state, ConnectivityState::Unknown);
        assert!(!state.is_concrete());
        assert!(ConnectivityState::Disconnected.is_concrete());
    }
}

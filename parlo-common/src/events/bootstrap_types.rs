//! Bootstrap-related types shared by the event system

use serde::{Deserialize, Serialize};

/// Best-effort view of network reachability
///
/// Starts as `Unknown`; once a concrete signal has been observed it only
/// moves between `Connected` and `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectivityState {
    /// No signal observed yet, or passive monitoring unavailable
    #[default]
    Unknown,
    /// Network path is usable
    Connected,
    /// Network path is unusable
    Disconnected,
}

impl ConnectivityState {
    /// Whether this state carries an actual observation
    pub fn is_concrete(&self) -> bool {
        !matches!(self, ConnectivityState::Unknown)
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Unknown => write!(f, "Unknown"),
            ConnectivityState::Connected => write!(f, "Connected"),
            ConnectivityState::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Which root screen the application presents
///
/// Exactly one decision is the visible root at a time. A new decision
/// replaces the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapDecision {
    /// Startup in progress
    Loading,
    /// Backend unreachable or session state indeterminate; retrying
    Offline,
    /// Authenticated user with a complete profile
    MainApp,
    /// Authenticated user whose profile is confirmed incomplete
    Onboarding,
    /// No valid session
    Authentication,
}

impl BootstrapDecision {
    /// Whether the bootstrap sequence ends on this decision
    ///
    /// `Loading` and `Offline` are waypoints; the others hand the app over
    /// to normal use.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BootstrapDecision::MainApp
                | BootstrapDecision::Onboarding
                | BootstrapDecision::Authentication
        )
    }
}

impl std::fmt::Display for BootstrapDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapDecision::Loading => write!(f, "Loading"),
            BootstrapDecision::Offline => write!(f, "Offline"),
            BootstrapDecision::MainApp => write!(f, "MainApp"),
            BootstrapDecision::Onboarding => write!(f, "Onboarding"),
            BootstrapDecision::Authentication => write!(f, "Authentication"),
        }
    }
}

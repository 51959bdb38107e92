//! Health-check types shared by the event system

use serde::{Deserialize, Serialize};

/// Kind of operator alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    /// Endpoint crossed the consecutive-failure threshold
    Down,
    /// Previously alerted endpoint answered again
    Recovered,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Down => write!(f, "Down"),
            AlertKind::Recovered => write!(f, "Recovered"),
        }
    }
}

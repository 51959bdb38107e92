//! # Parlo Bootstrap Core
//!
//! Connectivity-gated application startup:
//! - [`connectivity`]: passive path observation and the backend reachability check
//! - [`retry`]: exponential-backoff probing while offline
//! - [`bootstrap`]: sequences startup into one root decision
//! - [`session`], [`presenter`]: collaborator contracts and their implementations
//!
//! Components are explicitly constructed and injected; there is no global
//! state. [`BootApp`] wires the production implementations from config.

pub mod bootstrap;
pub mod connectivity;
pub mod presenter;
pub mod retry;
pub mod session;

pub use bootstrap::{BootstrapCoordinator, BootstrapOutcome, CoordinatorConfig};
pub use connectivity::{ConnectivityMonitor, Reachability};
pub use retry::{BackoffPolicy, RetryScheduler, RetrySession, SchedulerState};

use connectivity::{HttpBackendProbe, NetworkPathSource, TcpPathSource, UnsupportedPathSource};
use parlo_common::config::TomlConfig;
use parlo_common::events::{BootstrapDecision, EventBus};
use parlo_common::Result;
use presenter::ChannelPresenter;
use session::{HttpProfileSync, HttpSessionService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Fully wired bootstrap stack
pub struct BootApp {
    pub events: EventBus,
    pub monitor: Arc<ConnectivityMonitor>,
    pub coordinator: Arc<BootstrapCoordinator>,
}

impl BootApp {
    /// Build the production stack from configuration
    ///
    /// Also returns the receiving end of the presenter, for the task that
    /// owns the UI.
    pub fn from_config(
        config: &TomlConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<BootstrapDecision>)> {
        let events = EventBus::new(256);

        let probe = Arc::new(HttpBackendProbe::new(&config.backend)?);
        let path_source = path_source_for(config);
        let monitor = Arc::new(ConnectivityMonitor::new(
            path_source,
            probe,
            config.backend.probe_timeout(),
            events.clone(),
        ));

        let session = Arc::new(HttpSessionService::new(&config.backend, &config.session)?);
        let profile_sync = Arc::new(HttpProfileSync::new(&config.backend, &config.session)?);
        let (presenter, decisions) = ChannelPresenter::new();

        let coordinator = Arc::new(BootstrapCoordinator::new(
            Arc::clone(&monitor) as Arc<dyn Reachability>,
            session,
            profile_sync,
            Arc::new(presenter),
            events.clone(),
            CoordinatorConfig::from_config(config),
        ));

        let app = Self {
            events,
            monitor,
            coordinator,
        };
        Ok((app, decisions))
    }

    /// Stop the coordinator first, then the monitor
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
        self.monitor.shutdown();
    }
}

fn path_source_for(config: &TomlConfig) -> Arc<dyn NetworkPathSource> {
    let connectivity = &config.connectivity;
    let addr = match &connectivity.path_probe_addr {
        Some(addr) => Ok(addr.clone()),
        None => TcpPathSource::addr_from_url(&config.backend.base_url),
    };

    match addr {
        Ok(addr) => Arc::new(TcpPathSource::new(
            addr,
            Duration::from_secs(connectivity.path_poll_interval_secs),
            Duration::from_secs(connectivity.path_connect_timeout_secs),
        )),
        Err(e) => {
            warn!(error = %e, "No usable path probe address, passive monitoring disabled");
            Arc::new(UnsupportedPathSource)
        }
    }
}

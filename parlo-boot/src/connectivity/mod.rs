//! Connectivity monitoring
//!
//! Two distinct signals:
//! - **Passive path observation**: is there a usable network path at all?
//!   Fed by a [`NetworkPathSource`], published as [`ConnectivityState`]
//!   transitions on the event bus.
//! - **Backend reachability**: can we complete an application-level round
//!   trip to the backend right now? A device can have Wi-Fi while the
//!   backend is down, so this is checked on demand via [`BackendProbe`].

mod path;
mod probe;

pub use path::{ChannelPathSource, NetworkPathSource, PathStatus, TcpPathSource, UnsupportedPathSource};
pub use probe::HttpBackendProbe;
pub(crate) use probe::join_url;

pub use parlo_common::events::ConnectivityState;

use async_trait::async_trait;
use parlo_common::events::{EventBus, ParloEvent};
use parlo_common::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Application-level reachability check
///
/// Implementations resolve to a plain boolean; transport failures are a
/// `false`, never an error.
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn check_backend_reachable(&self) -> bool;
}

/// One lightweight request against the backend
///
/// `Ok(())` only for a successful application-level response.
#[async_trait]
pub trait BackendProbe: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

/// State shared between the monitor and its observation task
struct MonitorShared {
    state_tx: watch::Sender<ConnectivityState>,
    events: EventBus,
}

impl MonitorShared {
    /// Last-write-wins update; events fire only on actual transitions
    fn record(&self, status: PathStatus) {
        let new_state = status.into();
        let old_state = self.state_tx.send_replace(new_state);
        if old_state == new_state {
            debug!(state = %new_state, "Path status unchanged");
            return;
        }

        info!(old = %old_state, new = %new_state, "Connectivity changed");
        self.events.emit_lossy(ParloEvent::ConnectivityChanged {
            old_state,
            new_state,
            timestamp: parlo_common::time::now(),
        });
    }
}

/// Network reachability monitor
///
/// Constructed once and shared by reference (`Arc`) with every component
/// that needs connectivity information. Call [`shutdown`](Self::shutdown)
/// to stop passive observation.
pub struct ConnectivityMonitor {
    shared: Arc<MonitorShared>,
    path_source: Arc<dyn NetworkPathSource>,
    probe: Arc<dyn BackendProbe>,
    probe_timeout: Duration,
    started: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(
        path_source: Arc<dyn NetworkPathSource>,
        probe: Arc<dyn BackendProbe>,
        probe_timeout: Duration,
        events: EventBus,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::Unknown);
        Self {
            shared: Arc::new(MonitorShared { state_tx, events }),
            path_source,
            probe,
            probe_timeout,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Begin passive path observation
    ///
    /// Idempotent: only the first call starts anything. If the path source
    /// is unavailable the state stays `Unknown` and the process carries on.
    /// Must be called from within a tokio runtime.
    pub fn start_monitoring(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Connectivity monitoring already started");
            return;
        }

        let updates = match self.path_source.observe() {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "Passive path observation unavailable, state stays Unknown");
                return;
            }
        };

        info!("Connectivity monitoring started");
        let handle = tokio::spawn(observe_loop(
            Arc::clone(&self.shared),
            updates,
            self.cancel.clone(),
        ));
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(handle);
        }
    }

    /// Push a path observation from an external platform facility
    pub fn report_path_status(&self, status: PathStatus) {
        self.shared.record(status);
    }

    /// Current best-effort connectivity state
    pub fn state(&self) -> ConnectivityState {
        *self.shared.state_tx.borrow()
    }

    /// Watch the connectivity state (latest value only)
    pub fn watch_state(&self) -> watch::Receiver<ConnectivityState> {
        self.shared.state_tx.subscribe()
    }

    /// Event bus carrying `ConnectivityChanged` events
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Stop passive observation
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Ok(mut slot) = self.task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
                debug!("Connectivity observation task stopped");
            }
        }
    }
}

#[async_trait]
impl Reachability for ConnectivityMonitor {
    /// Bounded deep check against the backend
    async fn check_backend_reachable(&self) -> bool {
        match tokio::time::timeout(self.probe_timeout, self.probe.probe()).await {
            Ok(Ok(())) => {
                debug!("Backend reachable");
                true
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Backend unreachable");
                false
            }
            Err(_) => {
                debug!(
                    timeout_ms = self.probe_timeout.as_millis() as u64,
                    "Backend probe timed out"
                );
                false
            }
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn observe_loop(
    shared: Arc<MonitorShared>,
    mut updates: mpsc::Receiver<PathStatus>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            update = updates.recv() => match update {
                Some(status) => shared.record(status),
                None => {
                    // Keep the last concrete state; never regress to Unknown
                    warn!("Path observation ended");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlo_common::Error;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedProbe {
        outcome: fn() -> Result<()>,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BackendProbe for ScriptedProbe {
        async fn probe(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            (self.outcome)()
        }
    }

    fn monitor_with(probe: ScriptedProbe) -> ConnectivityMonitor {
        ConnectivityMonitor::new(
            Arc::new(UnsupportedPathSource),
            Arc::new(probe),
            Duration::from_secs(8),
            EventBus::new(16),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachable_on_success() {
        let monitor = monitor_with(ScriptedProbe {
            outcome: || Ok(()),
            delay: Duration::from_millis(50),
            calls: AtomicUsize::new(0),
        });
        assert!(monitor.check_backend_reachable().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_false_not_error() {
        let monitor = monitor_with(ScriptedProbe {
            outcome: || Err(Error::Http("dns failure".into())),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        assert!(!monitor.check_backend_reachable().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_false() {
        let monitor = monitor_with(ScriptedProbe {
            outcome: || Ok(()),
            delay: Duration::from_secs(60),
            calls: AtomicUsize::new(0),
        });
        let started = tokio::time::Instant::now();
        assert!(!monitor.check_backend_reachable().await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(8) && elapsed < Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_unsupported_path_source_stays_unknown() {
        let monitor = monitor_with(ScriptedProbe {
            outcome: || Ok(()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        monitor.start_monitoring();
        monitor.start_monitoring();
        assert_eq!(monitor.state(), ConnectivityState::Unknown);
        monitor.shutdown();
        monitor.shutdown();
    }

    #[test]
    fn test_report_emits_only_on_transition() {
        let monitor = monitor_with(ScriptedProbe {
            outcome: || Ok(()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let mut rx = monitor.events().subscribe();

        monitor.report_path_status(PathStatus::Satisfied);
        monitor.report_path_status(PathStatus::Satisfied);
        monitor.report_path_status(PathStatus::Unsatisfied);

        let first = rx.try_recv().expect("first transition");
        match first {
            ParloEvent::ConnectivityChanged { old_state, new_state, .. } => {
                assert_eq!(old_state, ConnectivityState::Unknown);
                assert_eq!(new_state, ConnectivityState::Connected);
            }
            other => panic!("unexpected event {:?}", other),
        }
        let second = rx.try_recv().expect("second transition");
        match second {
            ParloEvent::ConnectivityChanged { new_state, .. } => {
                assert_eq!(new_state, ConnectivityState::Disconnected);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err(), "duplicate status must not emit");
        assert_eq!(monitor.state(), ConnectivityState::Disconnected);
    }

    #[tokio::test]
    async fn test_state_follows_last_update_even_when_feed_closes_early() {
        const LEN: usize = 5;
        for bits in 0u32..(1 << LEN) {
            let sequence: Vec<PathStatus> = (0..LEN)
                .map(|i| {
                    if bits & (1 << i) != 0 {
                        PathStatus::Satisfied
                    } else {
                        PathStatus::Unsatisfied
                    }
                })
                .collect();

            for delivered in 1..=LEN {
                let (source, tx) = ChannelPathSource::new(LEN);
                let monitor = ConnectivityMonitor::new(
                    Arc::new(source),
                    Arc::new(ScriptedProbe {
                        outcome: || Ok(()),
                        delay: Duration::ZERO,
                        calls: AtomicUsize::new(0),
                    }),
                    Duration::from_secs(8),
                    EventBus::new(64),
                );
                let mut rx = monitor.events().subscribe();
                monitor.start_monitoring();

                for status in &sequence[..delivered] {
                    tx.send(*status).await.unwrap();
                }
                // Feed ends before the rest of the sequence arrives
                drop(tx);
                let handle = monitor.task.lock().unwrap().take().unwrap();
                handle.await.unwrap();

                let fed = &sequence[..delivered];
                let expected: ConnectivityState = fed[delivered - 1].into();
                assert_eq!(monitor.state(), expected, "fed {:?}", fed);

                let mut previous = ConnectivityState::Unknown;
                let mut transitions = 0;
                while let Ok(event) = rx.try_recv() {
                    if let ParloEvent::ConnectivityChanged { old_state, new_state, .. } = event {
                        assert_eq!(old_state, previous, "fed {:?}", fed);
                        assert_ne!(new_state, old_state, "fed {:?}", fed);
                        assert_ne!(new_state, ConnectivityState::Unknown, "fed {:?}", fed);
                        previous = new_state;
                        transitions += 1;
                    }
                }
                let expected_transitions = 1 + fed.windows(2).filter(|w| w[0] != w[1]).count();
                assert_eq!(transitions, expected_transitions, "fed {:?}", fed);
                assert_eq!(previous, expected);
            }
        }
    }
}

//! Bootstrap coordinator
//!
//! **Algorithm:**
//! 1. Show `Loading`
//! 2. Check backend reachability
//! 3. Unreachable: show `Offline`, start the retry scheduler, and on
//!    restoration (or a passive `Connected` signal, or manual retry) go
//!    back to step 2. Within one run the backoff picks up where the
//!    previous offline period left it; a manual retry starts it over
//! 4. Reachable: resolve the session
//!    - unauthenticated → `Authentication`
//!    - complete profile → sync it locally (best effort) → `MainApp`
//!    - confirmed incomplete profile → `Onboarding`
//!    - lookup failed → `Offline`, continue as in step 3
//!
//! Every collaborator failure lands on `Offline`; nothing escapes `run()`.

use crate::connectivity::Reachability;
use crate::presenter::RootPresenter;
use crate::retry::{BackoffPolicy, RetryScheduler};
use crate::session::{resolve_session_status, ProfileCompletion, ProfileSync, SessionService, SessionStatus};
use parlo_common::config::TomlConfig;
use parlo_common::events::{BootstrapDecision, ConnectivityState, EventBus, ParloEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Coordinator tuning
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub backoff: BackoffPolicy,
    /// Budget for the profile lookup and for the profile sync
    pub session_timeout: Duration,
}

impl CoordinatorConfig {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            backoff: BackoffPolicy::from_config(&config.retry),
            session_timeout: config.backend.request_timeout(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            session_timeout: Duration::from_secs(10),
        }
    }
}

/// How a call to [`BootstrapCoordinator::run`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Sequence reached a terminal decision
    Decided(BootstrapDecision),
    /// Another sequence was already running
    Rejected,
    /// Coordinator shut down mid-sequence
    Cancelled,
}

enum WaitOutcome {
    Recheck,
    Cancelled,
}

/// Sequences startup into exactly one terminal decision
pub struct BootstrapCoordinator {
    reachability: Arc<dyn Reachability>,
    session: Arc<dyn SessionService>,
    profile_sync: Arc<dyn ProfileSync>,
    presenter: Arc<dyn RootPresenter>,
    scheduler: RetryScheduler,
    events: EventBus,
    config: CoordinatorConfig,
    running: AtomicBool,
    /// Manual retry since the scheduler last started
    manual_retry: AtomicBool,
    current: Mutex<Option<BootstrapDecision>>,
    cancel: CancellationToken,
}

/// Clears the running flag however the sequence ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl BootstrapCoordinator {
    pub fn new(
        reachability: Arc<dyn Reachability>,
        session: Arc<dyn SessionService>,
        profile_sync: Arc<dyn ProfileSync>,
        presenter: Arc<dyn RootPresenter>,
        events: EventBus,
        config: CoordinatorConfig,
    ) -> Self {
        let scheduler = RetryScheduler::new(Arc::clone(&reachability), events.clone());
        Self {
            reachability,
            session,
            profile_sync,
            presenter,
            scheduler,
            events,
            config,
            running: AtomicBool::new(false),
            manual_retry: AtomicBool::new(false),
            current: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Run the bootstrap sequence on a new task
    pub fn start(self: &Arc<Self>) -> JoinHandle<BootstrapOutcome> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.run().await })
    }

    /// Run the bootstrap sequence to a terminal decision
    ///
    /// A second call while one is in flight is rejected, not interleaved.
    pub async fn run(&self) -> BootstrapOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Bootstrap already in progress, start rejected");
            return BootstrapOutcome::Rejected;
        }
        let _guard = RunningGuard(&self.running);

        let run_id = Uuid::new_v4();
        self.sequence()
            .instrument(tracing::info_span!("bootstrap", %run_id))
            .await
    }

    async fn sequence(&self) -> BootstrapOutcome {
        // Subscribe before the first check so no restoration signal is missed
        let mut bus_rx = self.events.subscribe();
        self.show(BootstrapDecision::Loading);
        // Last wait of this sequence; the next offline period backs off from it
        let mut carried: Option<f64> = None;

        loop {
            let decision = tokio::select! {
                _ = self.cancel.cancelled() => return BootstrapOutcome::Cancelled,
                decision = self.decide() => decision,
            };

            if decision.is_terminal() {
                self.show(decision);
                info!(decision = %decision, "Bootstrap complete");
                return BootstrapOutcome::Decided(decision);
            }

            self.show(BootstrapDecision::Offline);
            match self.wait_for_restore(&mut bus_rx, &mut carried).await {
                WaitOutcome::Recheck => debug!("Rechecking backend"),
                WaitOutcome::Cancelled => return BootstrapOutcome::Cancelled,
            }
        }
    }

    /// One pass of steps 2 and 4; `Offline` means "try again later"
    async fn decide(&self) -> BootstrapDecision {
        if !self.reachability.check_backend_reachable().await {
            info!("Backend unreachable");
            return BootstrapDecision::Offline;
        }

        match resolve_session_status(self.session.as_ref(), self.config.session_timeout).await {
            SessionStatus::Unauthenticated => BootstrapDecision::Authentication,
            SessionStatus::Authenticated(ProfileCompletion::Complete) => {
                self.sync_profile().await;
                BootstrapDecision::MainApp
            }
            SessionStatus::Authenticated(ProfileCompletion::Incomplete) => {
                BootstrapDecision::Onboarding
            }
            SessionStatus::Authenticated(ProfileCompletion::Indeterminate) => {
                // Valid session but the server could not confirm the profile
                info!("Session valid but profile state unknown, staying offline");
                BootstrapDecision::Offline
            }
        }
    }

    async fn sync_profile(&self) {
        match tokio::time::timeout(
            self.config.session_timeout,
            self.profile_sync.sync_profile_locally(),
        )
        .await
        {
            Ok(Ok(())) => debug!("Profile sync finished"),
            Ok(Err(e)) => warn!(error = %e, "Profile sync failed, continuing"),
            Err(_) => warn!("Profile sync timed out, continuing"),
        }
    }

    /// Wait in `Offline` until something says the backend may be back
    ///
    /// `carried` holds the last wait of this sequence. The first offline
    /// period starts at the initial interval, later ones continue the
    /// backoff so a backend that answers probes but fails lookups is not
    /// hit at the initial rate forever.
    async fn wait_for_restore(
        &self,
        bus_rx: &mut broadcast::Receiver<ParloEvent>,
        carried: &mut Option<f64>,
    ) -> WaitOutcome {
        // Anything else queued is already reflected in the check that just
        // failed, but a path that came up mid-check may not be
        let mut path_restored = false;
        loop {
            match bus_rx.try_recv() {
                Ok(ParloEvent::ConnectivityChanged {
                    new_state: ConnectivityState::Connected,
                    ..
                }) => path_restored = true,
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        if path_restored {
            info!("Network path came up during the check, rechecking immediately");
            return WaitOutcome::Recheck;
        }

        let backoff = self.config.backoff;
        let interval_secs = match *carried {
            Some(last) => backoff.next_interval(last),
            None => backoff.initial_interval_secs,
        };

        self.scheduler.stop();
        self.manual_retry.store(false, Ordering::SeqCst);
        let mut restored = match self.scheduler.start_at(backoff, interval_secs) {
            Ok(restored) => restored,
            Err(e) => {
                warn!(error = %e, interval_secs, "Could not start retry scheduler, rechecking after one interval");
                *carried = Some(interval_secs);
                let wait = parlo_common::time::secs_to_duration(interval_secs);
                return tokio::select! {
                    _ = self.cancel.cancelled() => WaitOutcome::Cancelled,
                    _ = tokio::time::sleep(wait) => WaitOutcome::Recheck,
                };
            }
        };

        let mut bus_open = true;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.scheduler.stop();
                    return WaitOutcome::Cancelled;
                }
                result = &mut restored => {
                    match result {
                        Ok(session) => {
                            info!(
                                attempts = session.attempt_count,
                                interval_secs = session.current_interval_secs,
                                "Retry scheduler reports backend reachable"
                            );
                            *carried = if self.manual_retry.swap(false, Ordering::SeqCst) {
                                None
                            } else {
                                Some(session.current_interval_secs)
                            };
                        }
                        Err(_) => debug!("Retry scheduler stopped without restoration"),
                    }
                    return WaitOutcome::Recheck;
                }
                event = bus_rx.recv(), if bus_open => match event {
                    Ok(ParloEvent::ConnectivityChanged { new_state: ConnectivityState::Connected, .. }) => {
                        info!("Network path restored, rechecking immediately");
                        if let Some(session) = self.scheduler.session() {
                            *carried = Some(session.current_interval_secs);
                        }
                        self.scheduler.stop();
                        return WaitOutcome::Recheck;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Coordinator lagged behind event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => bus_open = false,
                },
            }
        }
    }

    /// Replace the visible root
    fn show(&self, decision: BootstrapDecision) {
        let old_decision = {
            let mut current = match self.current.lock() {
                Ok(current) => current,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *current == Some(decision) {
                return;
            }
            current.replace(decision)
        };

        info!(decision = %decision, "Presenting root");
        self.presenter.present(decision);
        self.events.emit_lossy(ParloEvent::BootstrapDecisionChanged {
            old_decision,
            new_decision: decision,
            timestamp: parlo_common::time::now(),
        });
    }

    /// User pressed "retry" on the offline screen
    ///
    /// The scheduler drops back to the initial interval, and a later
    /// offline period in the same sequence starts from it again.
    pub fn retry_now(&self) -> bool {
        // Flag first so a fast probe cannot report before it is set
        self.manual_retry.store(true, Ordering::SeqCst);
        let accepted = self.scheduler.retry_now();
        if !accepted {
            self.manual_retry.store(false, Ordering::SeqCst);
        }
        accepted
    }

    /// Decision currently on screen
    pub fn current_decision(&self) -> Option<BootstrapDecision> {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Retry scheduler, for countdown display
    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    /// Cancel any running sequence and stop the retry timer
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.scheduler.stop();
    }
}

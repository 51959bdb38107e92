//! Offline retry scheduling with exponential backoff
//!
//! **State machine:**
//! ```text
//! Idle ──start──▶ Scheduled ──countdown hits 0 / retry_now──▶ Probing
//!   ▲                 ▲                                         │
//!   │                 └────────────── probe failed ─────────────┤
//!   └──────────────── probe succeeded (restored) ───────────────┘
//! ```
//! `stop()` returns to Idle from any state.
//!
//! The wait is driven by absolute deadlines (`sleep_until`), so countdown
//! ticks and probe times do not drift across cycles: probe *n* fires at
//! the sum of the first *n* backoff intervals after `start` (plus the time
//! spent inside earlier probes).

use crate::connectivity::Reachability;
use chrono::{DateTime, Utc};
use parlo_common::config::RetryConfig;
use parlo_common::events::{EventBus, ParloEvent};
use parlo_common::time::{ceil_secs, secs_to_duration};
use parlo_common::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Geometric backoff clamped to a ceiling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_interval_secs: f64,
    pub max_interval_secs: f64,
    pub multiplier: f64,
}

impl BackoffPolicy {
    pub const DEFAULT_MULTIPLIER: f64 = 1.5;

    pub fn new(initial_interval_secs: f64, max_interval_secs: f64) -> Self {
        Self {
            initial_interval_secs,
            max_interval_secs,
            multiplier: Self::DEFAULT_MULTIPLIER,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.initial_interval_secs, config.max_interval_secs)
            .with_multiplier(config.multiplier)
    }

    /// Interval that follows `current` after a failed probe
    pub fn next_interval(&self, current: f64) -> f64 {
        (current * self.multiplier).min(self.max_interval_secs)
    }

    /// Successive wait intervals, starting with the initial one
    pub fn intervals(&self) -> impl Iterator<Item = f64> {
        let policy = *self;
        std::iter::successors(Some(policy.initial_interval_secs), move |current| {
            Some(policy.next_interval(*current))
        })
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3.0, 30.0)
    }
}

/// Retry bookkeeping for one offline period
///
/// Exists only while the scheduler is running.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySession {
    pub attempt_count: u32,
    pub current_interval_secs: f64,
    pub initial_interval_secs: f64,
    pub max_interval_secs: f64,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl RetrySession {
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            attempt_count: 0,
            current_interval_secs: policy.initial_interval_secs,
            initial_interval_secs: policy.initial_interval_secs,
            max_interval_secs: policy.max_interval_secs,
            last_attempt_at: None,
        }
    }

    /// Count a probe; a failure grows the interval, a success leaves it
    pub fn record_probe(&mut self, reachable: bool, at: DateTime<Utc>, policy: &BackoffPolicy) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_at = Some(at);
        if !reachable {
            self.current_interval_secs = policy.next_interval(self.current_interval_secs);
        }
    }

    /// Session whose first wait is `interval_secs` instead of the initial
    /// interval; `reset` still returns to the policy's initial interval
    pub fn starting_at(policy: &BackoffPolicy, interval_secs: f64) -> Self {
        Self {
            current_interval_secs: interval_secs.clamp(
                policy.initial_interval_secs,
                policy.max_interval_secs.max(policy.initial_interval_secs),
            ),
            ..Self::new(policy)
        }
    }

    /// Back to the initial interval with no attempts counted
    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.current_interval_secs = self.initial_interval_secs;
    }
}

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Probing,
}

/// Receives the final session once reachability is restored
///
/// `current_interval_secs` is the wait that preceded the successful probe.
/// Resolves to `Err` if the scheduler is stopped first.
pub type RestoredSignal = oneshot::Receiver<RetrySession>;

struct ActiveRun {
    cancel: CancellationToken,
    manual_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    state: SchedulerState,
    session: Option<RetrySession>,
    run: Option<ActiveRun>,
    countdown_tx: watch::Sender<Option<u64>>,
}

/// Drives reachability probes while offline
///
/// At most one probe is ever in flight. The timer task is owned by the
/// scheduler and never outlives `stop()`.
pub struct RetryScheduler {
    reachability: Arc<dyn Reachability>,
    events: EventBus,
    inner: Arc<Mutex<Inner>>,
}

impl RetryScheduler {
    pub fn new(reachability: Arc<dyn Reachability>, events: EventBus) -> Self {
        let (countdown_tx, _) = watch::channel(None);
        Self {
            reachability,
            events,
            inner: Arc::new(Mutex::new(Inner {
                state: SchedulerState::Idle,
                session: None,
                run: None,
                countdown_tx,
            })),
        }
    }

    /// Begin the schedule; the first probe fires after the initial interval
    ///
    /// Rejected with `Error::AlreadyRunning` if a schedule is active.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, policy: BackoffPolicy) -> Result<RestoredSignal> {
        self.start_session(policy, RetrySession::new(&policy))
    }

    /// Like [`start`](Self::start), but the first wait is `interval_secs`
    ///
    /// Continues a backoff across several offline periods.
    pub fn start_at(&self, policy: BackoffPolicy, interval_secs: f64) -> Result<RestoredSignal> {
        self.start_session(policy, RetrySession::starting_at(&policy, interval_secs))
    }

    fn start_session(&self, policy: BackoffPolicy, session: RetrySession) -> Result<RestoredSignal> {
        let mut inner = lock(&self.inner);
        if inner.state != SchedulerState::Idle {
            warn!(state = ?inner.state, "Retry scheduler already running, start ignored");
            return Err(Error::AlreadyRunning("retry scheduler".to_string()));
        }

        let (manual_tx, manual_rx) = mpsc::channel(1);
        let (restored_tx, restored_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        inner.state = SchedulerState::Scheduled;
        let first_interval_secs = session.current_interval_secs;
        inner.session = Some(session);

        let task = ScheduleTask {
            inner: Arc::clone(&self.inner),
            reachability: Arc::clone(&self.reachability),
            events: self.events.clone(),
            policy,
            cancel: cancel.clone(),
            manual_rx,
            restored_tx: Some(restored_tx),
        };
        let handle = tokio::spawn(task.run());

        inner.run = Some(ActiveRun {
            cancel,
            manual_tx,
            handle: Some(handle),
        });

        info!(
            first_interval_secs,
            max_interval_secs = policy.max_interval_secs,
            "Retry scheduler started"
        );
        Ok(restored_rx)
    }

    /// Skip the remaining wait and probe now
    ///
    /// Resets the backoff first. Ignored (returns false) while a probe is
    /// in flight or when the scheduler is idle.
    pub fn retry_now(&self) -> bool {
        let mut inner = lock(&self.inner);
        match inner.state {
            SchedulerState::Scheduled => {
                if let Some(session) = inner.session.as_mut() {
                    session.reset();
                }
                if let Some(run) = inner.run.as_ref() {
                    // Full channel means a manual probe is already pending
                    let _ = run.manual_tx.try_send(());
                }
                info!("Manual retry requested");
                true
            }
            SchedulerState::Probing => {
                debug!("Probe already in flight, manual retry ignored");
                false
            }
            SchedulerState::Idle => {
                debug!("Retry scheduler idle, manual retry ignored");
                false
            }
        }
    }

    /// Restore the initial interval and zero the attempt count
    ///
    /// Takes effect from the next armed wait.
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        if let Some(session) = inner.session.as_mut() {
            session.reset();
            debug!("Retry backoff reset");
        }
    }

    /// Cancel the schedule and any in-flight wait or probe
    ///
    /// No-op when idle. Nothing the timer task does is observable after
    /// this returns.
    pub fn stop(&self) {
        let mut inner = lock(&self.inner);
        let run = inner.run.take();
        if let Some(run) = run.as_ref() {
            // Under the lock: the task re-checks this before every mutation
            run.cancel.cancel();
        }
        let was_running = inner.state != SchedulerState::Idle;
        inner.state = SchedulerState::Idle;
        inner.session = None;
        inner.countdown_tx.send_replace(None);
        drop(inner);

        if let Some(handle) = run.and_then(|mut run| run.handle.take()) {
            handle.abort();
        }
        if was_running {
            info!("Retry scheduler stopped");
        } else {
            debug!("Retry scheduler already idle, stop ignored");
        }
    }

    pub fn state(&self) -> SchedulerState {
        lock(&self.inner).state
    }

    pub fn is_running(&self) -> bool {
        self.state() != SchedulerState::Idle
    }

    /// Snapshot of the current retry session, if any
    pub fn session(&self) -> Option<RetrySession> {
        lock(&self.inner).session.clone()
    }

    /// Seconds until the next probe; `None` while idle or probing
    pub fn watch_countdown(&self) -> watch::Receiver<Option<u64>> {
        lock(&self.inner).countdown_tx.subscribe()
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Absolute deadline `wait` from now, saturating instead of overflowing
fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .unwrap_or_else(|| now + Duration::from_secs(MAX_WAIT_SECS))
}

/// Ceiling for a single wait when the configured one does not fit
const MAX_WAIT_SECS: u64 = 365 * 24 * 60 * 60;

/// Lock the scheduler state, recovering from poisoning
///
/// Nothing holding this lock can leave the state half-updated, so the
/// data behind a poisoned lock is still consistent.
fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum WaitOutcome {
    Elapsed,
    Manual,
    Cancelled,
}

/// The timer task behind one `start()`
struct ScheduleTask {
    inner: Arc<Mutex<Inner>>,
    reachability: Arc<dyn Reachability>,
    events: EventBus,
    policy: BackoffPolicy,
    cancel: CancellationToken,
    manual_rx: mpsc::Receiver<()>,
    restored_tx: Option<oneshot::Sender<RetrySession>>,
}

impl ScheduleTask {
    async fn run(mut self) {
        loop {
            // Arm the next wait
            let (interval_secs, attempt) = {
                let inner = lock(&self.inner);
                if self.cancel.is_cancelled() {
                    return;
                }
                match inner.session.as_ref() {
                    Some(session) => (
                        session.current_interval_secs,
                        session.attempt_count.saturating_add(1),
                    ),
                    None => return,
                }
            };

            debug!(attempt, interval_secs, "Next reachability probe scheduled");
            self.events.emit_lossy(ParloEvent::RetryScheduled {
                attempt,
                interval_secs,
                timestamp: parlo_common::time::now(),
            });

            let deadline = deadline_after(secs_to_duration(interval_secs));
            match self.countdown(deadline).await {
                WaitOutcome::Cancelled => return,
                WaitOutcome::Manual => debug!("Wait bypassed by manual retry"),
                WaitOutcome::Elapsed => {}
            }

            {
                let mut inner = lock(&self.inner);
                if self.cancel.is_cancelled() {
                    return;
                }
                inner.state = SchedulerState::Probing;
                inner.countdown_tx.send_replace(None);
                // Requests that raced the transition fold into this probe
                while self.manual_rx.try_recv().is_ok() {}
            }

            let reachable = tokio::select! {
                _ = self.cancel.cancelled() => return,
                reachable = self.reachability.check_backend_reachable() => reachable,
            };

            if !self.record_probe(reachable) {
                return;
            }
        }
    }

    /// Apply a probe result; false when the task should end
    fn record_probe(&mut self, reachable: bool) -> bool {
        let mut inner = lock(&self.inner);
        if self.cancel.is_cancelled() {
            return false;
        }
        let Some(session) = inner.session.as_mut() else {
            return false;
        };
        session.record_probe(reachable, parlo_common::time::now(), &self.policy);
        let attempts = session.attempt_count;
        let next_interval = session.current_interval_secs;

        self.events.emit_lossy(ParloEvent::ProbeCompleted {
            attempt: attempts,
            reachable,
            timestamp: parlo_common::time::now(),
        });

        if reachable {
            inner.state = SchedulerState::Idle;
            let finished = inner.session.take();
            inner.run = None;
            info!(attempts, "Backend reachable again, retry scheduler stopping");
            self.events.emit_lossy(ParloEvent::ReachabilityRestored {
                attempts,
                timestamp: parlo_common::time::now(),
            });
            if let (Some(tx), Some(finished)) = (self.restored_tx.take(), finished) {
                let _ = tx.send(finished);
            }
            return false;
        }

        inner.state = SchedulerState::Scheduled;
        info!(
            attempt = attempts,
            next_interval_secs = next_interval,
            "Backend still unreachable"
        );
        true
    }

    /// Tick once per second down to the deadline
    ///
    /// Each tick is aligned to the deadline rather than to the previous
    /// tick, so the final tick lands exactly on it.
    async fn countdown(&mut self, deadline: Instant) -> WaitOutcome {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let seconds_remaining = ceil_secs(remaining);

            {
                let inner = lock(&self.inner);
                if self.cancel.is_cancelled() {
                    return WaitOutcome::Cancelled;
                }
                inner.countdown_tx.send_replace(Some(seconds_remaining));
            }
            self.events
                .emit_lossy(ParloEvent::RetryCountdown { seconds_remaining });

            if seconds_remaining == 0 {
                return WaitOutcome::Elapsed;
            }

            let next_tick = deadline - Duration::from_secs(seconds_remaining - 1);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return WaitOutcome::Cancelled,
                request = self.manual_rx.recv() => match request {
                    Some(()) => return WaitOutcome::Manual,
                    None => return WaitOutcome::Cancelled,
                },
                _ = tokio::time::sleep_until(next_tick) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence_matches_documented_values() {
        let policy = BackoffPolicy::new(3.0, 30.0);
        let intervals: Vec<f64> = policy.intervals().take(9).collect();
        let expected = [3.0, 4.5, 6.75, 10.125, 15.1875, 22.78125, 30.0, 30.0, 30.0];
        for (got, want) in intervals.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-9, "got {}, want {}", got, want);
        }
    }

    #[test]
    fn test_backoff_idempotent_at_cap() {
        let policy = BackoffPolicy::new(3.0, 30.0);
        assert_eq!(policy.next_interval(30.0), 30.0);
        assert_eq!(policy.next_interval(29.0), 30.0);
    }

    #[test]
    fn test_backoff_from_config() {
        let policy = BackoffPolicy::from_config(&RetryConfig {
            initial_interval_secs: 2.0,
            max_interval_secs: 10.0,
            multiplier: 2.0,
        });
        let intervals: Vec<f64> = policy.intervals().take(5).collect();
        assert_eq!(intervals, vec![2.0, 4.0, 8.0, 10.0, 10.0]);
    }

    #[test]
    fn test_session_failure_grows_interval() {
        let policy = BackoffPolicy::new(3.0, 30.0);
        let mut session = RetrySession::new(&policy);
        session.record_probe(false, Utc::now(), &policy);
        session.record_probe(false, Utc::now(), &policy);
        assert_eq!(session.attempt_count, 2);
        assert_eq!(session.current_interval_secs, 6.75);
        assert!(session.last_attempt_at.is_some());
    }

    #[test]
    fn test_session_success_keeps_interval() {
        let policy = BackoffPolicy::new(3.0, 30.0);
        let mut session = RetrySession::new(&policy);
        session.record_probe(true, Utc::now(), &policy);
        assert_eq!(session.attempt_count, 1);
        assert_eq!(session.current_interval_secs, 3.0);
    }

    #[test]
    fn test_session_starting_at_keeps_initial_for_reset() {
        let policy = BackoffPolicy::new(3.0, 30.0);
        let mut session = RetrySession::starting_at(&policy, 10.125);
        assert_eq!(session.current_interval_secs, 10.125);
        assert_eq!(session.initial_interval_secs, 3.0);

        session.reset();
        assert_eq!(session.current_interval_secs, 3.0);

        assert_eq!(RetrySession::starting_at(&policy, 500.0).current_interval_secs, 30.0);
        assert_eq!(RetrySession::starting_at(&policy, 0.5).current_interval_secs, 3.0);
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert!(deadline_after(Duration::MAX) > now);
        assert!(deadline_after(Duration::from_secs(3)) >= now + Duration::from_secs(3));
    }

    #[test]
    fn test_session_reset_after_many_failures() {
        let policy = BackoffPolicy::new(3.0, 30.0);
        let mut session = RetrySession::new(&policy);
        for _ in 0..12 {
            session.record_probe(false, Utc::now(), &policy);
        }
        assert_eq!(session.current_interval_secs, 30.0);

        session.reset();
        assert_eq!(session.attempt_count, 0);
        assert_eq!(session.current_interval_secs, 3.0);
        assert_eq!(session.max_interval_secs, 30.0);
    }
}

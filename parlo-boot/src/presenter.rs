//! Root view presentation
//!
//! Decisions are produced on whatever task finished the bootstrap step, but
//! the visible root must only ever be swapped by the task that owns the UI.
//! [`ChannelPresenter`] is the hand-off between the two.

use parlo_common::events::BootstrapDecision;
use tokio::sync::mpsc;
use tracing::debug;

/// Swaps the visible root for a decision
pub trait RootPresenter: Send + Sync {
    fn present(&self, decision: BootstrapDecision);
}

/// Forwards decisions to the UI-owning task
pub struct ChannelPresenter {
    tx: mpsc::UnboundedSender<BootstrapDecision>,
}

impl ChannelPresenter {
    /// The receiver belongs to the UI task
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BootstrapDecision>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RootPresenter for ChannelPresenter {
    fn present(&self, decision: BootstrapDecision) {
        if self.tx.send(decision).is_err() {
            // UI torn down; nothing left to update
            debug!(decision = %decision, "UI gone, decision dropped");
        }
    }
}

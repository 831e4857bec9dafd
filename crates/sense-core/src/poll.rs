//! Cancellable poll task handle.
//!
//! Wraps a stop signal and the task's join handle so a disable or
//! suspend transition can cancel the next tick and wait for any
//! in-flight tick to finish before returning.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle to one capability's running poll task.
pub struct PollHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Create the stop channel a poll task should select on.
    pub fn stop_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    /// Bind a spawned task to its stop sender.
    pub fn new(stop: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { stop, task }
    }

    /// Request the task to stop without waiting for it. Used as a
    /// teardown backstop where joining is not possible.
    pub fn signal(&self) {
        let _ = self.stop.send(true);
    }

    /// Cancel the scheduled next tick and wait for any in-flight tick
    /// to complete. The wait is bounded because ticks themselves are
    /// bounded by the bus retry budget.
    pub async fn cancel_and_join(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            if err.is_panic() {
                warn!(error = %err, "poll task panicked during join");
            }
        }
    }
}

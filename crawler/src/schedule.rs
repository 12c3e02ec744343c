//! Shutdown signalling and pacing shared by the crawler loops.

use tokio::sync::watch;
use tokio::time::Instant;

/// Create a linked shutdown trigger and listener.
pub(crate) fn shutdown_channel() -> (watch::Sender<bool>, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (tx, Shutdown { rx })
}

/// Listening half of the crawler's shutdown signal.
///
/// Dropping the sending half counts as a shutdown request.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until `deadline` unless shutdown is requested first.
    ///
    /// # Returns
    ///
    /// `true` if the loop should continue, `false` if it should stop.
    pub async fn pause_until(&mut self, deadline: Instant) -> bool {
        let elapsed = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => true,
            _ = Self::requested(&mut self.rx) => false,
        };
        elapsed && !self.is_requested()
    }

    async fn requested(rx: &mut watch::Receiver<bool>) {
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                // Sender dropped.
                return;
            }
        }
    }
}

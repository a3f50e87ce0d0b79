//! Resettable "sharer created" gate
//!
//! Creating a sharer is asynchronous with respect to signalling: a
//! candidate can arrive while an old sharer is being torn down and the new
//! one does not exist yet. The gate is reset before the old sharer is
//! discarded and fulfilled once the new one is assigned. Waiters always
//! subscribe to the gate installed at the moment they look, and move to the
//! replacement if the gate they hold is reset under them.

use parking_lot::Mutex;
use tokio::sync::watch;

/// Replaceable single-use readiness token
#[derive(Debug)]
pub struct ReadyGate {
    current: Mutex<watch::Sender<bool>>,
}

impl ReadyGate {
    /// Create an unfulfilled gate
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            current: Mutex::new(tx),
        }
    }

    /// Install a fresh unfulfilled token, abandoning the old one
    pub fn reset(&self) {
        let (tx, _rx) = watch::channel(false);
        *self.current.lock() = tx;
    }

    /// Fulfill the current token
    pub fn fulfill(&self) {
        self.current.lock().send_replace(true);
    }

    /// Whether the current token is fulfilled
    pub fn is_fulfilled(&self) -> bool {
        *self.current.lock().borrow()
    }

    /// Wait until the current token is fulfilled
    ///
    /// If the token is replaced while waiting, waits on the replacement.
    pub async fn wait(&self) {
        loop {
            let mut rx = self.current.lock().subscribe();
            if rx.wait_for(|fulfilled| *fulfilled).await.is_ok() {
                return;
            }
            // Sender dropped by reset(); pick up the new token
        }
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

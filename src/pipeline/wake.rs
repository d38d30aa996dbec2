//! Producer to consumer notification.
//!
//! A ring buffer holds only weak references to its readers' wake hooks, so a
//! reader that has been dropped is skipped rather than kept alive.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::time::Duration;

/// Wake hook called by a ring buffer after each write batch.
///
/// Called on the writer's thread; implementations must not block.
pub trait Wake: Send + Sync {
    fn wake(&self);
}

/// Coalescing wake signal backed by a capacity-1 channel.
///
/// Any number of `wake()` calls between two `wait()`s collapse into one
/// pending notification. A consumer that drains everything after `wait()`
/// returns observes all data written before the last `wake()`.
#[derive(Clone)]
pub struct Notifier {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Raise the dirty flag. Returns `false` if it was already raised.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => false,
            // Unreachable while `self` holds the receiver.
            Err(TrySendError::Disconnected(())) => false,
        }
    }

    /// Block until notified or until `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    /// Consume a pending notification without blocking.
    pub fn take(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Wake for Notifier {
    fn wake(&self) {
        self.notify();
    }
}

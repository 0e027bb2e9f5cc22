//! Cancellation token shared by every long-running loop
//!
//! Cancelling drops the only sender of an internal channel, so the
//! receiver disconnects and any `select!` waiting on it wakes at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                sender: Mutex::new(Some(tx)),
                receiver: rx,
            }),
        }
    }

    /// Cancel the token. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.sender.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Channel that becomes disconnected on cancellation, for use in `select!`
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.receiver
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `false` if the sleep was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        select! {
            recv(self.inner.receiver) -> _ => false,
            default(duration) => !self.is_cancelled(),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

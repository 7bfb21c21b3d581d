// Stop signal
//
// A closeable broadcast: firing drops the only sender, which wakes every
// receiver selecting on it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

/// One-shot broadcast signal used for cooperative cancellation.
///
/// Firing drops the only sender of an internal channel, so every receiver
/// blocked in a `select!` on [`StopSignal::receiver`] wakes up at once.
/// Firing is idempotent and never blocks, whether or not anybody is still
/// listening.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

struct Inner {
    fired: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (sender, receiver) = channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// Fire the signal. Returns true only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.sender.lock().take();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Receiver that becomes ready (disconnected) once the signal fires.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.receiver
    }

    /// Whether two handles refer to the same signal.
    pub fn same_as(&self, other: &StopSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("fired", &self.is_fired())
            .finish()
    }
}

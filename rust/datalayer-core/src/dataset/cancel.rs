// rust/datalayer-core/src/dataset/cancel.rs

//! Level-triggered cancellation shared by a pipeline's blocking points.
//!
//! Cancelling sets a persistent flag, disconnects a signal channel that
//! channel-based waits can `select!` on, and notifies registered listeners
//! that guard their own condition variables. A wait that starts after
//! cancellation observes it immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

/// Something blocked on its own condition that must wake on cancellation.
pub trait CancelListener: Send + Sync {
    fn on_cancel(&self);
}

struct Inner {
    cancelled: AtomicBool,
    signal_tx: Mutex<Option<Sender<()>>>,
    signal_rx: Receiver<()>,
    listeners: Mutex<Vec<Weak<dyn CancelListener>>>,
}

/// A cloneable cancellation token.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (signal_tx, signal_rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                signal_tx: Mutex::new(Some(signal_tx)),
                signal_rx,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Sets the token. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping the only sender makes every receive on the signal return.
        self.inner.signal_tx.lock().take();

        let listeners = std::mem::take(&mut *self.inner.listeners.lock());
        for listener in listeners.iter().filter_map(Weak::upgrade) {
            listener.on_cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// A receiver that becomes ready (disconnected) once the token is set.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal_rx
    }

    /// Registers a listener. If the token is already set the listener is
    /// notified before this returns.
    pub fn register(&self, listener: &Arc<dyn CancelListener>) {
        let mut listeners = self.inner.listeners.lock();
        if self.is_cancelled() {
            drop(listeners);
            listener.on_cancel();
            return;
        }
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(Arc::downgrade(listener));
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    struct Counter(AtomicUsize);

    impl CancelListener for Counter {
        fn on_cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_is_level_triggered() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());

        // Late receivers still observe the signal.
        assert!(token.signal().recv().is_err());
        assert!(token.clone().signal().recv().is_err());
    }

    #[test]
    fn test_signal_wakes_blocked_receiver() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            thread::spawn(move || token.signal().recv().is_err())
        };

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_listeners_notified_once() {
        let token = CancelToken::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let listener: Arc<dyn CancelListener> = counter.clone();

        token.register(&listener);
        token.cancel();
        token.cancel();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        // Registering after the fact notifies immediately.
        token.register(&listener);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropped_listener_is_skipped() {
        let token = CancelToken::new();
        {
            let listener: Arc<dyn CancelListener> = Arc::new(Counter(AtomicUsize::new(0)));
            token.register(&listener);
        }
        token.cancel();
        assert!(token.is_cancelled());
    }
}

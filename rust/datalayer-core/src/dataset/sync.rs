// rust/datalayer-core/src/dataset/sync.rs

//! Label handshake between a primary and a secondary pipeline.
//!
//! The primary publishes the realized labels of each batch it completes. The
//! secondary consumes one published sequence per batch and loads records with
//! exactly those labels, then marks the sequence done. The primary cannot
//! publish again until the previous sequence is done, so batch `i` of the
//! secondary always mirrors batch `i` of the primary.

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::cancel::CancelListener;
use super::prefetch::BatchObserver;

/// Where the handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing published; the primary may publish.
    Empty,
    /// A sequence is waiting for the secondary.
    Ready,
    /// The secondary is loading the published sequence.
    Consuming,
}

#[derive(Debug)]
struct Slot {
    state: HandshakeState,
    labels: Vec<i32>,
    cancelled: bool,
}

#[derive(Debug)]
pub struct LabelSync {
    slot: Mutex<Slot>,
    ready: Condvar,
    done: Condvar,
}

impl Default for LabelSync {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelSync {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: HandshakeState::Empty,
                labels: Vec::new(),
                cancelled: false,
            }),
            ready: Condvar::new(),
            done: Condvar::new(),
        }
    }

    /// Publishes a label sequence, waiting for the previous one to be done.
    ///
    /// Returns `false` if the handshake was cancelled.
    pub fn publish(&self, labels: &[i32]) -> bool {
        let mut slot = self.slot.lock();
        while slot.state != HandshakeState::Empty && !slot.cancelled {
            self.done.wait(&mut slot);
        }
        if slot.cancelled {
            return false;
        }

        slot.labels.clear();
        slot.labels.extend_from_slice(labels);
        slot.state = HandshakeState::Ready;
        self.ready.notify_all();
        true
    }

    /// Takes the published sequence, waiting until one is ready.
    ///
    /// Returns `None` if the handshake was cancelled.
    pub fn consume(&self) -> Option<Vec<i32>> {
        let mut slot = self.slot.lock();
        while slot.state != HandshakeState::Ready && !slot.cancelled {
            self.ready.wait(&mut slot);
        }
        if slot.cancelled {
            return None;
        }

        slot.state = HandshakeState::Consuming;
        Some(std::mem::take(&mut slot.labels))
    }

    /// Marks the consumed sequence done, letting the primary publish again.
    pub fn complete(&self) {
        let mut slot = self.slot.lock();
        if slot.state == HandshakeState::Consuming {
            slot.state = HandshakeState::Empty;
            self.done.notify_all();
        }
    }

    /// Halts the handshake and wakes both sides. Permanent.
    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        if !slot.cancelled {
            debug!(state = ?slot.state, "label handshake cancelled");
        }
        slot.cancelled = true;
        self.ready.notify_all();
        self.done.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot.lock().cancelled
    }

    pub fn state(&self) -> HandshakeState {
        self.slot.lock().state
    }
}

impl CancelListener for LabelSync {
    fn on_cancel(&self) {
        self.cancel();
    }
}

impl BatchObserver for LabelSync {
    fn on_batch_loaded(&self, pipeline: &str, labels: &[i32]) {
        if !self.publish(labels) {
            debug!(pipeline, "dropping labels published after cancellation");
        }
    }
}

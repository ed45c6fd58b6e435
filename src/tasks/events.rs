//! Per-task event channels
//!
//! Each task owns a broadcast channel of stream events. Once a
//! `final: true` status has been published the channel is sealed and
//! every later event is discarded.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::warn;

use crate::types::rpc::StreamEvent;

/// Capacity of one task's event channel
const TASK_CHANNEL_CAPACITY: usize = 64;

/// Broadcast channel for one task's lifecycle events
#[derive(Debug)]
pub struct TaskChannel {
    sender: broadcast::Sender<StreamEvent>,
    sealed: AtomicBool,
}

impl TaskChannel {
    /// An open channel with no subscribers yet
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(TASK_CHANNEL_CAPACITY);
        Self {
            sender,
            sealed: AtomicBool::new(false),
        }
    }

    /// Publishes an event unless the stream is already sealed
    ///
    /// Returns whether the event was accepted. A `final: true` status
    /// seals the channel after delivery.
    pub fn publish(&self, event: StreamEvent) -> bool {
        if self.sealed.load(Ordering::SeqCst) {
            warn!("event discarded after final status");
            return false;
        }
        let is_final = event.is_final();
        let _ = self.sender.send(event);
        if is_final {
            self.sealed.store(true, Ordering::SeqCst);
        }
        true
    }

    /// Whether a final status has been published
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Seals the channel without publishing a status
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Opens a subscription positioned at the current tail
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }
}

impl Default for TaskChannel {
    fn default() -> Self {
        Self::new()
    }
}

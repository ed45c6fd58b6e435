//! Bounded priority queues
//!
//! Four FIFO queues keyed by priority. A single consumer drains them
//! strictly priority-first: a lower priority is never served while a
//! higher-priority queue is non-empty.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::types::message::MessagePriority;

/// Queue depths by priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSizes {
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueSizes {
    /// Total queued entries across all priorities
    #[must_use]
    pub fn total(&self) -> usize {
        self.urgent + self.high + self.normal + self.low
    }
}

/// Four bounded FIFO queues, one per priority
#[derive(Debug)]
pub struct PriorityQueues<T> {
    queues: Mutex<[VecDeque<T>; 4]>,
    /// Bound applied to each individual queue
    capacity: usize,
}

impl<T> PriorityQueues<T> {
    /// Queues bounded at `capacity` entries each
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new([
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ]),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, [VecDeque<T>; 4]> {
        self.queues.lock().expect("queue lock poisoned")
    }

    /// Appends to the tail of the priority's queue
    ///
    /// Returns the entry back when the queue is at capacity.
    pub fn push(&self, priority: MessagePriority, entry: T) -> Result<(), T> {
        let mut queues = self.lock();
        let queue = &mut queues[priority.index()];
        if queue.len() >= self.capacity {
            return Err(entry);
        }
        queue.push_back(entry);
        Ok(())
    }

    /// Removes the head of the highest-priority non-empty queue
    pub fn pop_highest(&self) -> Option<(MessagePriority, T)> {
        let mut queues = self.lock();
        for priority in MessagePriority::ALL {
            if let Some(entry) = queues[priority.index()].pop_front() {
                return Some((priority, entry));
            }
        }
        None
    }

    /// Current depths per priority
    #[must_use]
    pub fn sizes(&self) -> QueueSizes {
        let queues = self.lock();
        QueueSizes {
            urgent: queues[0].len(),
            high: queues[1].len(),
            normal: queues[2].len(),
            low: queues[3].len(),
        }
    }

    /// Whether every queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().iter().all(VecDeque::is_empty)
    }

    /// Empties all queues, returning the drained entries in priority order
    pub fn drain(&self) -> Vec<T> {
        let mut queues = self.lock();
        let mut drained = Vec::new();
        for queue in queues.iter_mut() {
            drained.extend(queue.drain(..));
        }
        drained
    }
}

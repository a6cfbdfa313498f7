//! Pending queue
//!
//! FIFO holding area for requests that arrived while no worker was free.
//! Like the registry, it is only ever touched under the dispatcher lock.

use chrono::{Duration, Utc};
use std::collections::VecDeque;

use crate::models::Request;

/// Ordered queue of requests waiting for a worker
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: VecDeque<Request>,

    /// Maximum queued requests (`None` = unbounded)
    capacity: Option<usize>,
}

impl PendingQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append a new arrival, returning its 1-based position
    pub fn enqueue(&mut self, request: Request) -> Result<usize, QueueError> {
        if let Some(capacity) = self.capacity {
            if self.entries.len() >= capacity {
                return Err(QueueError::Full { capacity });
            }
        }

        self.entries.push_back(request);
        Ok(self.entries.len())
    }

    /// Put a retried request back at the head
    ///
    /// Ignores the capacity: an accepted request is never dropped.
    pub fn requeue_front(&mut self, request: Request) {
        self.entries.push_front(request);
    }

    /// Remove and return the oldest entry
    pub fn dequeue_if_any(&mut self) -> Option<Request> {
        self.entries.pop_front()
    }

    pub fn front(&self) -> Option<&Request> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// How long the head of the queue has been waiting
    pub fn oldest_wait(&self) -> Option<Duration> {
        self.entries.front().map(|r| Utc::now() - r.arrived_at)
    }
}

/// Queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    Full { capacity: usize },
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full { capacity } => write!(f, "Pending queue full ({capacity} requests)"),
        }
    }
}

impl std::error::Error for QueueError {}

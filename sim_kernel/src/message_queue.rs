//! Bounded message queue for kernel ports.
//!
//! Provides deterministic FIFO ordering with explicit capacity limits.

use std::collections::VecDeque;

/// Queue error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    Full,
}

/// Bounded FIFO queue.
#[derive(Debug, Clone)]
pub struct MessageQueue<T> {
    capacity: usize,
    messages: VecDeque<T>,
}

impl<T> MessageQueue<T> {
    /// Creates a queue with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            messages: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns whether a push would be rejected.
    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    /// Pushes a message onto the queue, handing it back when full.
    pub fn push(&mut self, message: T) -> Result<(), (QueueError, T)> {
        if self.is_full() {
            return Err((QueueError::Full, message));
        }
        self.messages.push_back(message);
        Ok(())
    }

    /// Pops the next message.
    pub fn pop(&mut self) -> Option<T> {
        self.messages.pop_front()
    }

    /// Removes every queued message, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.messages.drain(..)
    }
}

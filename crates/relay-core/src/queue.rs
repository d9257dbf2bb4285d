//! Pending queue with amortized drop-oldest overflow.

use crate::Message;
use std::collections::VecDeque;

/// FIFO of messages waiting for a usable connection.
///
/// The bound is not enforced on every push. Once the queue is over
/// `max_len`, only every `check_interval`-th push trims it, so the queue can
/// overshoot the bound between two checks.
#[derive(Debug)]
pub struct PendingQueue {
    items: VecDeque<Message>,
    max_len: usize,
    check_interval: u32,
    evals: u32,
}

impl PendingQueue {
    /// Create an empty queue.
    pub fn new(max_len: usize, check_interval: u32) -> Self {
        Self {
            items: VecDeque::new(),
            max_len,
            check_interval,
            evals: 0,
        }
    }

    /// Append a message, trimming the oldest entries first when an overflow
    /// check is due. Returns the number of messages dropped.
    pub fn push(&mut self, message: Message) -> usize {
        let mut dropped = 0;
        if self.items.len() > self.max_len {
            let due = self.evals >= self.check_interval;
            self.evals += 1;
            if due {
                dropped = self.trim();
            }
        }
        self.items.push_back(message);
        dropped
    }

    /// Append a message without overflow accounting.
    ///
    /// Used for messages that already left the queue once (failed sends).
    pub fn requeue(&mut self, message: Message) {
        self.items.push_back(message);
    }

    /// Drop messages from the front until exactly `max_len` remain.
    /// Returns the number of messages dropped.
    pub fn trim(&mut self) -> usize {
        self.evals = 0;
        let excess = self.items.len().saturating_sub(self.max_len);
        self.items.drain(..excess);
        excess
    }

    pub fn front(&self) -> Option<&Message> {
        self.items.front()
    }

    pub fn pop_front(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Queued messages, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.items.iter()
    }
}

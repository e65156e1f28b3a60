use std::collections::VecDeque;

use crate::common::ChatMessage;

/// Bounded archive of accepted messages; oldest evicted first.
#[derive(Debug)]
pub struct HistoryBuffer {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        self.trim();
    }

    /// Shrinking evicts immediately.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.trim();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The last `count` messages, oldest first. `0` or anything at least as
    /// large as the buffer returns everything.
    pub fn recent(&self, count: usize) -> Vec<ChatMessage> {
        let len = self.messages.len();
        let skip = if count == 0 || count >= len {
            0
        } else {
            len - count
        };
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.recent(0)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn trim(&mut self) {
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }
}

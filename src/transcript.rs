//! Bounded transcript window.

use std::collections::VecDeque;
use std::time::SystemTime;

/// Number of entries kept; older ones are evicted first.
pub const TRANSCRIPT_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub text: String,
    pub sender: Sender,
    pub timestamp: SystemTime,
}

/// Sliding window over the most recent transcript entries.
#[derive(Debug, Clone)]
pub struct TranscriptWindow {
    entries: VecDeque<TranscriptEntry>,
    capacity: usize,
}

impl Default for TranscriptWindow {
    fn default() -> Self {
        Self::with_capacity(TRANSCRIPT_CAPACITY)
    }
}

impl TranscriptWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, sender: Sender, text: impl Into<String>) {
        self.entries.push_back(TranscriptEntry {
            text: text.into(),
            sender,
            timestamp: SystemTime::now(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.iter().cloned().collect()
    }
}

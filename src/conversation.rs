// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Bounded conversation history used to build chat prompts

use std::collections::VecDeque;

/// Default number of utterances kept
pub const DEFAULT_CAPACITY: usize = 10;

/// Last N utterances of a chat, oldest first
///
/// Appending is the only mutation. Clearing a chat means starting a new log.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    entries: VecDeque<String>,
    capacity: usize,
    terminator: String,
}

impl ConversationLog {
    /// A log keeping at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize, terminator: impl Into<String>) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            terminator: terminator.into(),
        }
    }

    /// Add an utterance, evicting the oldest ones past capacity
    pub fn append(&mut self, utterance: impl Into<String>) {
        self.entries.push_back(utterance.into());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Retained entries joined by a single space, followed by the terminator
    pub fn build_prompt(&self) -> String {
        let mut prompt = self.entries.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
        prompt.push_str(&self.terminator);
        prompt
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, "\n")
    }
}

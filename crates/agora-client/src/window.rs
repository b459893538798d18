//! Bounded, ordered, deduplicated chat transcript.
//!
//! Entries are kept sorted by `(created_at, id)`. Late arrivals are inserted
//! at their sorted position, duplicates are ignored, and when the window is
//! over capacity the oldest entries by position are evicted.

use std::collections::{HashSet, VecDeque};

use tracing::trace;

use agora_shared::{ChatMessage, MessageId};

/// Result of [`MessageWindow::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Stored; `evicted` older entries were dropped to make room.
    Inserted { evicted: usize },
    /// A message with the same id is already present.
    Duplicate,
    /// The window is full and the message is older than everything in it.
    Stale,
}

#[derive(Debug, Clone)]
pub struct MessageWindow {
    entries: VecDeque<ChatMessage>,
    ids: HashSet<MessageId>,
    capacity: usize,
}

impl MessageWindow {
    /// Capacity is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&mut self, message: ChatMessage) -> InsertOutcome {
        if self.ids.contains(&message.id) {
            return InsertOutcome::Duplicate;
        }

        let key = message.sort_key();
        let position = match self.entries.binary_search_by(|m| m.sort_key().cmp(&key)) {
            Ok(pos) | Err(pos) => pos,
        };

        if position == 0 && self.entries.len() >= self.capacity {
            trace!(id = %message.id, "Message older than full window, not retained");
            return InsertOutcome::Stale;
        }

        self.ids.insert(message.id);
        self.entries.insert(position, message);
        let evicted = self.trim();
        InsertOutcome::Inserted { evicted }
    }

    /// Change the capacity, evicting the oldest entries right away if needed.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        self.capacity = capacity.max(1);
        self.trim()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    pub fn latest(&self) -> Option<&ChatMessage> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }

    /// Ordered copy of the retained messages.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    fn trim(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            if let Some(old) = self.entries.pop_front() {
                self.ids.remove(&old.id);
                evicted += 1;
            }
        }
        evicted
    }
}

impl Default for MessageWindow {
    fn default() -> Self {
        Self::new(agora_shared::constants::DEFAULT_MESSAGE_LIMIT)
    }
}

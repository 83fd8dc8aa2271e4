//! Bounded round history.
//!
//! Newest record first. Appending past capacity evicts the oldest record.

use std::collections::VecDeque;

use crate::types::{PlayMode, RoundRecord, DEFAULT_HISTORY_CAPACITY};

/// Effective capacity for a configured one; a history always keeps at
/// least the newest record.
pub fn bounded_capacity(capacity: usize) -> usize {
    capacity.max(1)
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    records: VecDeque<RoundRecord>,
    capacity: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = bounded_capacity(capacity);
        Self {
            records: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Build from a newest-first list, keeping at most `capacity` of the
    /// newest entries.
    pub fn from_records(records: Vec<RoundRecord>, capacity: usize) -> Self {
        let mut store = Self::new(capacity);
        store.records.extend(records.into_iter().take(store.capacity));
        store
    }

    /// Insert at the head; drop the tail when over capacity.
    pub fn append(&mut self, record: RoundRecord) {
        self.records.push_front(record);
        if self.records.len() > self.capacity {
            self.records.pop_back();
        }
    }

    /// Newest-first view, optionally restricted to one mode. Each call
    /// starts a fresh iteration.
    pub fn query(&self, mode: Option<PlayMode>) -> impl Iterator<Item = &RoundRecord> + '_ {
        self.records
            .iter()
            .filter(move |r| mode.map_or(true, |m| r.mode() == m))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Newest-first copy, as persisted.
    pub fn to_vec(&self) -> Vec<RoundRecord> {
        self.records.iter().cloned().collect()
    }
}

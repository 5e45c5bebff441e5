//! Event ingestion core — dedup, pause buffering, and the bounded live log
//!
//! The live log and the pending buffer are both kept newest-first. Eviction
//! always drops from the tail, i.e. by insertion order; neither `timestamp`
//! nor `pinned` affects what is evicted.

use crate::config::AuditConfig;
use crate::types::{now_millis, BusMessage, EventEntry, Settings, SnapshotRecord};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// What `EventLog::ingest` did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Added to the live log
    Appended,
    /// Held in the pending buffer while paused
    Buffered,
    /// Id already seen; first writer wins
    Duplicate,
    /// Malformed (no type)
    Dropped,
}

/// The ingestion core: live log, pending buffer, and seen-set
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<EventEntry>,
    pending: VecDeque<EventEntry>,
    seen: HashSet<String>,
    settings: Settings,
    pending_capacity: usize,
    min_capacity: usize,
}

impl EventLog {
    /// Create an empty log with the default capacities
    pub fn new(settings: Settings) -> Self {
        Self::with_config(settings, &AuditConfig::default())
    }

    /// Create an empty log with capacities taken from `config`
    pub fn with_config(settings: Settings, config: &AuditConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            pending: VecDeque::new(),
            seen: HashSet::new(),
            settings,
            pending_capacity: config.pending_capacity,
            min_capacity: config.min_log_capacity,
        }
    }

    /// Normalize and ingest a raw bus message
    pub fn ingest(&mut self, message: BusMessage) -> IngestOutcome {
        match EventEntry::from_message(message) {
            Some(entry) => self.insert(entry),
            None => {
                tracing::debug!("Dropping message without type");
                IngestOutcome::Dropped
            }
        }
    }

    /// Ingest an already-normalized entry
    pub fn insert(&mut self, entry: EventEntry) -> IngestOutcome {
        if !self.seen.insert(entry.id.clone()) {
            tracing::debug!(id = %entry.id, "Duplicate event dropped");
            return IngestOutcome::Duplicate;
        }

        if self.settings.paused {
            self.pending.push_front(entry);
            self.pending.truncate(self.pending_capacity);
            IngestOutcome::Buffered
        } else {
            self.entries.push_front(entry);
            self.entries.truncate(self.capacity());
            IngestOutcome::Appended
        }
    }

    /// Pause or resume ingestion
    ///
    /// Resuming moves the pending buffer, newest first, ahead of the live
    /// log and re-applies the capacity.
    pub fn set_paused(&mut self, paused: bool) {
        self.settings.paused = paused;
        if paused || self.pending.is_empty() {
            return;
        }

        let flushed = self.pending.len();
        while let Some(entry) = self.pending.pop_back() {
            self.entries.push_front(entry);
        }
        self.entries.truncate(self.capacity());
        tracing::debug!(flushed, len = self.entries.len(), "Pending buffer flushed");
    }

    /// Change the configured limit and evict down to the new capacity
    pub fn set_limit(&mut self, limit: usize) {
        self.settings.limit = limit;
        self.entries.truncate(self.capacity());
    }

    /// Seed the log from the startup users snapshot
    ///
    /// Records keep their order at the head of the log; their ids enter the
    /// seen-set so the same data arriving later over the bus is ignored.
    /// Returns the number of entries added.
    pub fn load_snapshot(&mut self, records: &[SnapshotRecord]) -> usize {
        let timestamp = now_millis();
        let fresh: Vec<EventEntry> = records
            .iter()
            .map(|record| record.to_entry(timestamp))
            .filter(|entry| self.seen.insert(entry.id.clone()))
            .collect();

        let added = fresh.len();
        for entry in fresh.into_iter().rev() {
            self.entries.push_front(entry);
        }
        self.entries.truncate(self.capacity());

        tracing::debug!(added, "Users snapshot loaded");
        added
    }

    /// Empty the live log, pending buffer, and seen-set; settings are kept
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
        self.seen.clear();
    }

    /// Flip `pinned` on a live entry; `false` if the id is not in the log
    pub fn toggle_pin(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.pinned = !entry.pinned;
                true
            }
            None => false,
        }
    }

    /// Delete live entries by id, returning how many were removed
    ///
    /// Removed ids stay in the seen-set.
    pub fn remove(&mut self, ids: &HashSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !ids.contains(&e.id));
        before - self.entries.len()
    }

    /// Live entries, newest first
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &EventEntry> + '_ {
        self.entries.iter()
    }

    /// Pending entries, newest first
    pub fn pending(&self) -> impl ExactSizeIterator<Item = &EventEntry> + '_ {
        self.pending.iter()
    }

    pub fn get(&self, id: &str) -> Option<&EventEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn is_paused(&self) -> bool {
        self.settings.paused
    }

    pub fn limit(&self) -> usize {
        self.settings.limit
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// Effective live log capacity: `max(min_capacity, limit)`
    pub fn capacity(&self) -> usize {
        self.settings.limit.max(self.min_capacity)
    }

    /// Live entry count per type, ordered by type
    pub fn type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.kind.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

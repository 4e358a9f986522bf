//! Bounded flow table with idle-timeout eviction.
//!
//! A plain single-threaded map; the tracker provides the locking. Keys are
//! stored in first-packet orientation, so a lookup probes the exact tuple
//! first and the reversed tuple second. When the table is full, insertion
//! fails instead of evicting; the only removal paths are `cleanup_expired`
//! and `clear`.

use ahash::AHashMap;
use std::fmt;

use super::{FlowEntry, FlowKey};
use crate::config::TrackerConfig;

/// Insertion failed because the table is at `max_flows`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull;

impl fmt::Display for TableFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow table full")
    }
}

impl std::error::Error for TableFull {}

/// Bounded mapping from `FlowKey` to `FlowEntry`.
#[derive(Debug)]
pub struct FlowTable {
    flows: AHashMap<FlowKey, FlowEntry>,
    max_flows: usize,
    payload_capture: bool,
    payload_max_size: usize,
    total_lookups: u64,
    total_insertions: u64,
}

impl FlowTable {
    pub fn new(config: &TrackerConfig) -> Self {
        FlowTable {
            flows: AHashMap::with_capacity(config.table_size.min(config.max_flows)),
            max_flows: config.max_flows,
            payload_capture: config.payload_capture,
            payload_max_size: config.payload_max_size,
            total_lookups: 0,
            total_insertions: 0,
        }
    }

    /// The stored orientation of `key`, if the conversation is tracked.
    fn resolve(&self, key: &FlowKey) -> Option<FlowKey> {
        if self.flows.contains_key(key) {
            return Some(*key);
        }
        let reversed = key.reversed();
        if self.flows.contains_key(&reversed) {
            return Some(reversed);
        }
        None
    }

    /// Find the flow for `key` or create it with `first_seen = last_seen =
    /// timestamp_us`. The bool is true when a new entry was inserted.
    pub fn lookup_or_create(
        &mut self,
        key: FlowKey,
        timestamp_us: u64,
    ) -> Result<(&mut FlowEntry, bool), TableFull> {
        self.total_lookups += 1;

        let (canonical, created) = match self.resolve(&key) {
            Some(stored) => (stored, false),
            None => {
                if self.flows.len() >= self.max_flows {
                    return Err(TableFull);
                }
                self.total_insertions += 1;
                (key, true)
            }
        };

        let payload_capture = self.payload_capture;
        let payload_max_size = self.payload_max_size;
        let entry = self
            .flows
            .entry(canonical)
            .or_insert_with(|| FlowEntry::new(canonical, timestamp_us, payload_capture, payload_max_size));
        Ok((entry, created))
    }

    /// Read-only lookup (counts toward `total_lookups`).
    pub fn lookup(&mut self, key: &FlowKey) -> Option<&FlowEntry> {
        self.total_lookups += 1;
        let stored = self.resolve(key)?;
        self.flows.get(&stored)
    }

    /// Remove every flow idle for longer than `timeout_us`. Entries whose
    /// `last_seen_us` lies in the future (clock regression at the caller)
    /// are retained.
    pub fn cleanup_expired(&mut self, now_us: u64, timeout_us: u64) -> usize {
        let before = self.flows.len();
        self.flows.retain(|_, entry| {
            now_us < entry.stats.last_seen_us || now_us - entry.stats.last_seen_us <= timeout_us
        });
        before - self.flows.len()
    }

    /// Drop all flows. Cumulative lookup/insertion counters survive.
    pub fn clear(&mut self) {
        self.flows.clear();
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn max_flows(&self) -> usize {
        self.max_flows
    }

    pub fn total_lookups(&self) -> u64 {
        self.total_lookups
    }

    pub fn total_insertions(&self) -> u64 {
        self.total_insertions
    }

    /// Iterate the live entries (table lock held by the caller).
    pub fn entries(&self) -> impl Iterator<Item = &FlowEntry> {
        self.flows.values()
    }

    /// Deep copy of all entries, decoupling readers from ongoing mutation.
    pub fn snapshot(&self) -> Vec<FlowEntry> {
        self.flows.values().cloned().collect()
    }
}

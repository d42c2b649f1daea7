//! Cache Store Module
//!
//! Key-value storage where every entry carries an expiry timestamp. Expired
//! entries are evicted lazily, the next time that exact key is read.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::cache::stats::ReadOutcome;
use crate::cache::{CacheEntry, CacheStats};
use crate::clock::SharedClock;

// == Cache Store ==
/// TTL cache storage with lazy eviction.
#[derive(Debug)]
pub struct CacheStore<V> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<V>>,
    /// Performance statistics
    stats: CacheStats,
    /// Time source for expiry math
    clock: SharedClock,
}

impl<V: Clone> CacheStore<V> {
    // == Constructor ==
    /// Creates an empty CacheStore driven by `clock`.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::default(),
            clock,
        }
    }

    // == Set ==
    /// Stores `value` under `key`, expiring `ttl` from now.
    ///
    /// Any existing entry for `key` is overwritten unconditionally.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = self.clock.now_ms();
        self.entries.insert(key.into(), CacheEntry::new(value, ttl, now));
    }

    // == Get ==
    /// Returns the value for `key` if present and not expired.
    ///
    /// An expired entry is removed as a side effect. Reads never extend TTL.
    pub fn get(&mut self, key: &str) -> Option<V> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Like [`get`](Self::get), but returns the whole entry with its
    /// creation and expiry times.
    pub fn get_entry(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let now = self.clock.now_ms();
        let expired = self.entries.get(key).map(|entry| entry.is_expired(now));
        match expired {
            Some(true) => {
                self.entries.remove(key);
                self.stats.record(ReadOutcome::Expired);
                debug!(key, "cache entry expired on read");
                None
            }
            Some(false) => {
                self.stats.record(ReadOutcome::Hit);
                self.entries.get(key).cloned()
            }
            None => {
                self.stats.record(ReadOutcome::Miss);
                None
            }
        }
    }

    // == Has ==
    /// Returns true if a fresh value exists. Triggers lazy eviction like `get`.
    pub fn has(&mut self, key: &str) -> bool {
        self.get_entry(key).is_some()
    }

    // == Delete ==
    /// Removes an entry by key. Returns true if an entry was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    // == Delete Prefix ==
    /// Removes every entry whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    pub fn delete_prefix(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }

    // == Clear ==
    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_entries: self.entries.len(),
            ..self.stats.clone()
        }
    }

    // == Length ==
    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

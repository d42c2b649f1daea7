//! Read accounting for the TTL store.

/// Outcome of a single `get`, recorded by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    Hit,
    Miss,
    /// Entry was found past its expiry and evicted
    Expired,
}

/// Point-in-time view of cache activity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    /// Reads that returned nothing, expired reads included
    pub misses: u64,
    /// Entries dropped by lazy eviction
    pub expirations: u64,
    pub total_entries: usize,
}

impl CacheStats {
    pub(crate) fn record(&mut self, outcome: ReadOutcome) {
        match outcome {
            ReadOutcome::Hit => self.hits += 1,
            ReadOutcome::Miss => self.misses += 1,
            ReadOutcome::Expired => {
                self.expirations += 1;
                self.misses += 1;
            }
        }
    }

    pub fn reads(&self) -> u64 {
        self.hits + self.misses
    }

    /// Share of reads served from the cache, 0.0 before the first read.
    pub fn hit_rate(&self) -> f64 {
        match self.reads() {
            0 => 0.0,
            reads => self.hits as f64 / reads as f64,
        }
    }
}

//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use crate::clock::duration_ms;

// == Cache Entry ==
/// Represents a single cache entry with value and expiry metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry that expires `ttl` after `now_ms`.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `ttl` - Freshness budget of the entry
    /// * `now_ms` - Current Unix time in milliseconds
    pub fn new(value: V, ttl: Duration, now_ms: u64) -> Self {
        Self {
            value,
            created_at: now_ms,
            expires_at: now_ms.saturating_add(duration_ms(ttl)),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now_ms`.
    ///
    /// An entry is expired only once the current time passes the expiration
    /// time; a read at exactly `expires_at` still sees the value.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at.saturating_sub(now_ms)
    }

    /// Age of the entry in milliseconds.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation_with_ttl() {
        let entry = CacheEntry::new("test_value".to_string(), Duration::from_secs(60), 1_000);

        assert_eq!(entry.value, "test_value");
        assert_eq!(entry.created_at, 1_000);
        assert_eq!(entry.expires_at, 61_000);
        assert!(!entry.is_expired(1_000));
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new(7u32, Duration::from_secs(1), 0);

        assert!(!entry.is_expired(999));
        assert!(entry.is_expired(1_001));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = CacheEntry::new("test", Duration::from_millis(500), 100);

        assert!(!entry.is_expired(600), "Entry should still be fresh at its expiry time");
        assert!(entry.is_expired(601));
    }

    #[test]
    fn test_zero_ttl_readable_within_same_millisecond() {
        let entry = CacheEntry::new("test", Duration::ZERO, 42);
        assert!(!entry.is_expired(42));
        assert!(entry.is_expired(43));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let entry = CacheEntry::new("test", Duration::from_secs(u64::MAX), 1_000);
        assert_eq!(entry.expires_at, u64::MAX);
        assert!(!entry.is_expired(u64::MAX - 1));
    }

    #[test]
    fn test_ttl_remaining_and_age() {
        let entry = CacheEntry::new("test", Duration::from_secs(10), 0);

        assert_eq!(entry.ttl_remaining_ms(4_000), 6_000);
        assert_eq!(entry.ttl_remaining_ms(20_000), 0);
        assert_eq!(entry.age_ms(4_000), 4_000);
    }
}

//! Cache Module
//!
//! Provides in-memory caching with per-entry TTL and lazy expiration.

mod entry;
mod shared;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use shared::SharedCache;
pub use stats::CacheStats;
pub use store::CacheStore;

//! Shared Cache Handle
//!
//! Cloneable async handle over a single [`CacheStore`], created once at
//! startup and injected into every component that needs it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, CacheStore};
use crate::clock::SharedClock;

/// Thread-safe handle to a shared [`CacheStore`].
///
/// Reads take the write lock because an expired read evicts the entry.
#[derive(Debug)]
pub struct SharedCache<V> {
    inner: Arc<RwLock<CacheStore<V>>>,
}

impl<V> Clone for SharedCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone> SharedCache<V> {
    pub fn new(clock: SharedClock) -> Self {
        Self::from_store(CacheStore::new(clock))
    }

    pub fn from_store(store: CacheStore<V>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.inner.write().await.set(key, value, ttl);
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.write().await.get(key)
    }

    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.inner.write().await.get_entry(key)
    }

    pub async fn has(&self, key: &str) -> bool {
        self.inner.write().await.has(key)
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.inner.write().await.delete(key)
    }

    pub async fn delete_prefix(&self, prefix: &str) -> usize {
        self.inner.write().await.delete_prefix(prefix)
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.read().await.stats()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    // == Get Or Fetch ==
    /// Returns the cached value for `key`, or awaits `fetch_fn`, stores its
    /// result for `ttl` and returns it.
    ///
    /// Errors from `fetch_fn` are returned unchanged and nothing is stored.
    /// The lock is released while `fetch_fn` runs.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch_fn: F, ttl: Duration) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        debug!(key, "cache miss, fetching");
        let value = fetch_fn().await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }
}

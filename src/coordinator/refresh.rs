//! Refresh Coordinator
//!
//! Decides when a domain needs a network fetch and makes sure concurrent
//! consumers of the same data share a single fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, SharedCache};
use crate::clock::{duration_ms, SharedClock};
use crate::coordinator::{DomainKey, DomainSnapshot, Params};
use crate::error::{Result, SyncError};
use crate::transport::DomainFetcher;

type InFlight = Shared<BoxFuture<'static, Result<Value>>>;

fn utc_from_ms(ms: u64) -> Option<DateTime<Utc>> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

// == Refresh Policy ==
/// Freshness rules of one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// How long a fetched payload stays fresh in the cache
    pub ttl: Duration,
    /// Floor between two fetches of the same key, even when forced by staleness
    pub min_interval: Duration,
}

struct Inner {
    domain: DomainKey,
    policy: RefreshPolicy,
    clock: SharedClock,
    cache: SharedCache<Value>,
    fetcher: Arc<dyn DomainFetcher>,
    /// Last successful fetch per cache key (Unix ms)
    last_fetch: Mutex<HashMap<String, u64>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    state: watch::Sender<DomainSnapshot>,
}

// == Refresh Coordinator ==
/// Load/invalidate entry point for one domain. Cheap to clone.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        domain: DomainKey,
        policy: RefreshPolicy,
        cache: SharedCache<Value>,
        fetcher: Arc<dyn DomainFetcher>,
        clock: SharedClock,
    ) -> Self {
        let (state, _) = watch::channel(DomainSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                domain,
                policy,
                clock,
                cache,
                fetcher,
                last_fetch: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                state,
            }),
        }
    }

    pub fn domain(&self) -> DomainKey {
        self.inner.domain
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.inner.policy
    }

    /// Current consumer-facing state.
    pub fn snapshot(&self) -> DomainSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<DomainSnapshot> {
        self.inner.state.subscribe()
    }

    /// Most recent successful fetch of any key in the domain.
    pub async fn last_fetched(&self) -> Option<DateTime<Utc>> {
        let last_fetch = self.inner.last_fetch.lock().await;
        last_fetch
            .values()
            .max()
            .and_then(|ms| utc_from_ms(*ms))
    }

    // == Should Refresh ==
    /// Whether a non-forced `load(params)` would go to the network.
    pub async fn should_refresh(&self, params: &Params) -> bool {
        let params = self.inner.domain.scope(params.clone());
        let key = self.inner.domain.cache_key(&params);
        self.should_refresh_key(&key).await
    }

    async fn should_refresh_key(&self, key: &str) -> bool {
        if self.within_min_interval(key).await {
            return false;
        }
        !self.inner.cache.has(key).await
    }

    async fn within_min_interval(&self, key: &str) -> bool {
        let last = self.inner.last_fetch.lock().await.get(key).copied();
        match last {
            Some(last) => {
                let elapsed = self.inner.clock.now_ms().saturating_sub(last);
                elapsed < duration_ms(self.inner.policy.min_interval)
            }
            None => false,
        }
    }

    // == Load ==
    /// Returns the domain payload for `params`, fetching only when needed.
    ///
    /// Without `force`, a payload fetched less than the minimum interval ago
    /// or still inside its TTL is served without a network call. Concurrent
    /// loads of the same key share a single fetch. A failed fetch returns the
    /// error and leaves previously loaded data in place.
    pub async fn load(&self, params: Params, force: bool) -> Result<Value> {
        let domain = self.inner.domain;
        let params = domain.scope(params);
        let key = domain.cache_key(&params);

        if !force && !self.should_refresh_key(&key).await {
            if let Some(entry) = self.inner.cache.get_entry(&key).await {
                debug!(%domain, key, "serving from cache");
                self.publish_served(&params, &entry);
                return Ok(entry.value);
            }
            if let Some(value) = self.last_known(&params) {
                debug!(%domain, key, "inside minimum interval, serving last-known data");
                return Ok(value);
            }
        }

        self.join_or_start(key, params).await
    }

    /// Forced load, bypassing TTL and the minimum interval.
    pub async fn reload(&self, params: Params) -> Result<Value> {
        self.load(params, true).await
    }

    // == Invalidate ==
    /// Drops every cached payload of the domain and resets its staleness
    /// clocks so the next `load` fetches immediately.
    ///
    /// Displayed data is kept. A fetch already in flight still writes its
    /// result when it completes.
    pub async fn invalidate(&self) {
        let removed = self
            .inner
            .cache
            .delete_prefix(&self.inner.domain.key_prefix())
            .await;
        self.inner.last_fetch.lock().await.clear();
        info!(domain = %self.inner.domain, removed, "domain cache invalidated");
    }

    fn last_known(&self, params: &Params) -> Option<Value> {
        let state = self.inner.state.borrow();
        if &state.params == params {
            state.data.clone()
        } else {
            None
        }
    }

    /// Shows a cached payload. Switching to other params drops the error of
    /// the previous request; `last_updated` is the time the entry was fetched.
    fn publish_served(&self, params: &Params, entry: &CacheEntry<Value>) {
        let fetched = utc_from_ms(entry.created_at);
        self.inner.state.send_if_modified(|s| {
            if s.params == *params && s.data.as_ref() == Some(&entry.value) {
                return false;
            }
            if s.params != *params {
                s.error = None;
            }
            s.params = params.clone();
            s.data = Some(entry.value.clone());
            s.last_updated = fetched;
            true
        });
    }

    async fn join_or_start(&self, key: String, params: Params) -> Result<Value> {
        let fetch = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!(domain = %self.inner.domain, key, "joining in-flight fetch");
                    existing.clone()
                }
                None => {
                    let this = self.clone();
                    let task_key = key.clone();
                    let handle = tokio::spawn(async move { this.run_fetch(task_key, params).await });
                    let shared = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(SyncError::Internal(format!("fetch task failed: {}", e))))
                    }
                    .boxed()
                    .shared();

                    in_flight.insert(key, shared.clone());
                    self.inner.state.send_modify(|s| s.loading = true);
                    shared
                }
            }
        };

        fetch.await
    }

    /// Body of one fetch. Runs as its own task so it always completes and
    /// always clears its in-flight entry.
    async fn run_fetch(&self, key: String, params: Params) -> Result<Value> {
        let domain = self.inner.domain;
        debug!(%domain, key, "fetching");

        let result = self.inner.fetcher.fetch(&params).await;

        match &result {
            Ok(value) => {
                self.inner
                    .cache
                    .set(key.clone(), value.clone(), self.inner.policy.ttl)
                    .await;
                let now = self.inner.clock.now_ms();
                self.inner.last_fetch.lock().await.insert(key.clone(), now);

                let updated = utc_from_ms(now);
                self.inner.state.send_modify(|s| {
                    s.data = Some(value.clone());
                    s.params = params.clone();
                    s.error = None;
                    s.last_updated = updated;
                });
                info!(%domain, key, "fetch succeeded");
            }
            Err(err) => {
                warn!(%domain, key, error = %err, "fetch failed, keeping last-known data");
                self.inner.state.send_modify(|s| s.error = Some(err.clone()));
            }
        }

        let mut in_flight = self.inner.in_flight.lock().await;
        in_flight.remove(&key);
        let loading = !in_flight.is_empty();
        self.inner.state.send_modify(|s| s.loading = loading);

        result
    }
}

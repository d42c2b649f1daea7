//! Domain Registry
//!
//! Holds one coordinator per domain and implements the cross-domain
//! operations: invalidate-all, active tab tracking and refresh on visibility.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::cache::SharedCache;
use crate::clock::SharedClock;
use crate::config::Config;
use crate::coordinator::{DomainKey, Params, RefreshCoordinator, RefreshPolicy};
use crate::error::{Result, SyncError};
use crate::transport::{CombinedFetcher, DomainFetcher, HttpFetcher, TokenSource};

/// Host page visibility signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// REST path of each single-endpoint domain; `None` for analytics, which is
/// assembled from [`ANALYTICS_PARTS`].
pub fn domain_path(domain: DomainKey) -> Option<&'static str> {
    match domain {
        DomainKey::Overview => Some("/admin/overview"),
        DomainKey::Analytics => None,
        DomainKey::Users => Some("/admin/users"),
        DomainKey::Support => Some("/admin/support/tickets"),
        DomainKey::Logs => Some("/admin/logs"),
        DomainKey::Notifications => Some("/admin/notifications"),
    }
}

/// Field name and REST path of each part of the analytics payload.
pub const ANALYTICS_PARTS: [(&str, &str); 3] = [
    ("overview", "/admin/overview"),
    ("users", "/admin/analytics/users"),
    ("usage", "/admin/analytics/usage"),
];

// == Domain Registry ==
pub struct DomainRegistry {
    coordinators: BTreeMap<DomainKey, RefreshCoordinator>,
    active_tab: RwLock<DomainKey>,
}

impl DomainRegistry {
    pub fn new(active_tab: DomainKey) -> Self {
        Self {
            coordinators: BTreeMap::new(),
            active_tab: RwLock::new(active_tab),
        }
    }

    /// Builds a registry with HTTP fetchers for every domain.
    ///
    /// The analytics domain combines the overview, user analytics and usage
    /// analytics endpoints into one payload.
    pub fn with_http(
        config: &Config,
        client: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
        cache: SharedCache<Value>,
        clock: SharedClock,
    ) -> Self {
        let http = |path: &str| -> Arc<dyn DomainFetcher> {
            Arc::new(HttpFetcher::new(
                client.clone(),
                &config.api_base_url,
                path,
                Arc::clone(&tokens),
            ))
        };

        let mut registry = Self::new(config.active_tab);
        for domain in DomainKey::ALL {
            let fetcher: Arc<dyn DomainFetcher> = match domain_path(domain) {
                Some(path) => http(path),
                None => Arc::new(
                    ANALYTICS_PARTS
                        .iter()
                        .fold(CombinedFetcher::new(), |combined, (name, path)| {
                            combined.part(*name, http(path))
                        }),
                ),
            };
            let policy = RefreshPolicy {
                ttl: config.ttl_for(domain),
                min_interval: config.min_refresh_interval,
            };
            registry.register(RefreshCoordinator::new(
                domain,
                policy,
                cache.clone(),
                fetcher,
                clock.clone(),
            ));
        }
        registry
    }

    /// Adds or replaces the coordinator for its domain.
    pub fn register(&mut self, coordinator: RefreshCoordinator) {
        self.coordinators.insert(coordinator.domain(), coordinator);
    }

    pub fn coordinator(&self, domain: DomainKey) -> Result<&RefreshCoordinator> {
        self.coordinators
            .get(&domain)
            .ok_or_else(|| SyncError::UnknownDomain(domain.to_string()))
    }

    pub fn domains(&self) -> impl Iterator<Item = DomainKey> + '_ {
        self.coordinators.keys().copied()
    }

    pub async fn load(&self, domain: DomainKey, params: Params, force: bool) -> Result<Value> {
        self.coordinator(domain)?.load(params, force).await
    }

    // == Invalidate ==
    /// Invalidates one domain, or every registered domain when `None`.
    pub async fn invalidate(&self, domain: Option<DomainKey>) -> Result<()> {
        match domain {
            Some(domain) => self.coordinator(domain)?.invalidate().await,
            None => {
                for coordinator in self.coordinators.values() {
                    coordinator.invalidate().await;
                }
            }
        }
        Ok(())
    }

    // == Active Tab ==
    pub async fn active_tab(&self) -> DomainKey {
        *self.active_tab.read().await
    }

    pub async fn set_active_tab(&self, domain: DomainKey) {
        *self.active_tab.write().await = domain;
    }

    /// Sets the active tab from the host's tab identifier.
    pub async fn set_active_tab_id(&self, tab: &str) -> Result<()> {
        let domain: DomainKey = tab.parse()?;
        self.set_active_tab(domain).await;
        Ok(())
    }

    // == Refresh Current Tab ==
    /// Force-reloads the active tab's domain with the params it last used.
    pub async fn refresh_current_tab(&self) -> Result<Value> {
        let domain = self.active_tab().await;
        let coordinator = self.coordinator(domain)?;
        let params = coordinator.snapshot().params;
        info!(%domain, "refreshing current tab");
        coordinator.reload(params).await
    }

    /// Reacts to the host's visibility signal; becoming visible refreshes the
    /// current tab. Returns the refreshed payload, if any.
    pub async fn on_visibility_change(&self, visibility: Visibility) -> Result<Option<Value>> {
        match visibility {
            Visibility::Visible => self.refresh_current_tab().await.map(Some),
            Visibility::Hidden => {
                debug!("host hidden, no refresh");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::MockFetcher;
    use std::time::Duration;

    struct Harness {
        registry: DomainRegistry,
        fetchers: BTreeMap<DomainKey, Arc<MockFetcher>>,
        cache: SharedCache<Value>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = SharedCache::new(clock.clone());
        let mut registry = DomainRegistry::new(DomainKey::Overview);
        let mut fetchers = BTreeMap::new();

        for domain in [DomainKey::Overview, DomainKey::Users] {
            let fetcher = MockFetcher::new();
            registry.register(RefreshCoordinator::new(
                domain,
                RefreshPolicy {
                    ttl: Duration::from_secs(300),
                    min_interval: Duration::from_secs(30),
                },
                cache.clone(),
                fetcher.clone(),
                clock.clone(),
            ));
            fetchers.insert(domain, fetcher);
        }

        Harness {
            registry,
            fetchers,
            cache,
        }
    }

    #[tokio::test]
    async fn test_unknown_domain_is_an_error() {
        let h = harness();
        let result = h.registry.load(DomainKey::Logs, Params::new(), false).await;
        assert_eq!(result, Err(SyncError::UnknownDomain("logs".to_string())));
    }

    #[tokio::test]
    async fn test_invalidate_all_domains() {
        let h = harness();
        h.registry.load(DomainKey::Overview, Params::new(), false).await.unwrap();
        h.registry
            .load(DomainKey::Users, Params::new().with("page", 1), false)
            .await
            .unwrap();
        assert_eq!(h.cache.len().await, 2);

        h.registry.invalidate(None).await.unwrap();
        assert!(h.cache.is_empty().await);

        h.registry.load(DomainKey::Overview, Params::new(), false).await.unwrap();
        assert_eq!(h.fetchers[&DomainKey::Overview].calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_single_domain_leaves_others() {
        let h = harness();
        h.registry.load(DomainKey::Overview, Params::new(), false).await.unwrap();
        h.registry.load(DomainKey::Users, Params::new(), false).await.unwrap();

        h.registry.invalidate(Some(DomainKey::Users)).await.unwrap();

        assert!(h.cache.has("overview:{}").await);
        assert!(!h.cache.has("users:{}").await);
    }

    #[tokio::test]
    async fn test_visible_refreshes_active_tab_with_last_params() {
        let h = harness();
        let page = Params::new().with("page", 3);
        h.registry.set_active_tab_id("users").await.unwrap();
        h.registry.load(DomainKey::Users, page.clone(), false).await.unwrap();

        let refreshed = h
            .registry
            .on_visibility_change(Visibility::Visible)
            .await
            .unwrap()
            .unwrap();

        let users = &h.fetchers[&DomainKey::Users];
        assert_eq!(users.calls(), 2);
        assert_eq!(refreshed["params"], serde_json::json!({"page": "3"}));
        assert_eq!(h.fetchers[&DomainKey::Overview].calls(), 0);
    }

    #[tokio::test]
    async fn test_hidden_does_nothing() {
        let h = harness();
        let result = h.registry.on_visibility_change(Visibility::Hidden).await.unwrap();
        assert!(result.is_none());
        assert_eq!(h.fetchers[&DomainKey::Overview].calls(), 0);
    }

    #[test]
    fn test_only_analytics_lacks_a_single_path() {
        for domain in DomainKey::ALL {
            assert_eq!(domain_path(domain).is_none(), domain == DomainKey::Analytics);
        }
        assert!(ANALYTICS_PARTS
            .iter()
            .all(|(_, path)| path.starts_with("/admin/")));
    }

    #[tokio::test]
    async fn test_unknown_tab_id_rejected() {
        let h = harness();
        assert!(h.registry.set_active_tab_id("billing").await.is_err());
        assert_eq!(h.registry.active_tab().await, DomainKey::Overview);
    }
}

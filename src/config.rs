//! Configuration Module
//!
//! Handles loading and managing synchronization settings from environment variables.

use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::DomainKey;

/// Synchronization layer configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote API
    pub api_base_url: String,
    /// Bearer credential for fetches and the live stream
    pub auth_token: Option<String>,
    /// Global floor between two fetches of the same key
    pub min_refresh_interval: Duration,
    /// Freshness budget per domain
    pub domain_ttls: BTreeMap<DomainKey, Duration>,
    /// Tab refreshed when the host becomes visible again
    pub active_tab: DomainKey,
    /// Live update client settings
    pub live: LiveConfig,
}

/// Live update client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    /// Consecutive stream failures tolerated before degrading to polling
    pub max_reconnect_attempts: u32,
    /// Fixed delay before each reconnect attempt
    pub reconnect_delay: Duration,
    /// Upper bound of random jitter added to the reconnect delay (0 = none)
    pub reconnect_jitter: Duration,
    /// Interval of the fallback poll
    pub poll_interval: Duration,
    /// TTL of the cached last-known metrics
    pub cache_ttl: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(3_000),
            reconnect_jitter: Duration::ZERO,
            poll_interval: Duration::from_millis(30_000),
            cache_ttl: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SYNC_API_BASE_URL` - Remote API base URL (default: http://localhost:8080)
    /// - `SYNC_AUTH_TOKEN` - Bearer credential (default: none)
    /// - `SYNC_MIN_REFRESH_INTERVAL_MS` - Minimum refresh interval (default: 30000)
    /// - `SYNC_TTL_<DOMAIN>_SECS` - Per-domain TTL, e.g. `SYNC_TTL_USERS_SECS`
    /// - `SYNC_ACTIVE_TAB` - Initially active tab (default: overview)
    /// - `LIVE_MAX_RECONNECT_ATTEMPTS` - Stream attempts before polling (default: 5)
    /// - `LIVE_RECONNECT_DELAY_MS` - Delay between attempts (default: 3000)
    /// - `LIVE_RECONNECT_JITTER_MS` - Max jitter added to the delay (default: 0)
    /// - `LIVE_POLL_INTERVAL_MS` - Fallback poll interval (default: 30000)
    /// - `LIVE_CACHE_TTL_SECS` - TTL of cached live metrics (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let live_defaults = defaults.live.clone();

        let domain_ttls = DomainKey::ALL
            .iter()
            .map(|domain| {
                let var = format!("SYNC_TTL_{}_SECS", domain.as_str().to_uppercase());
                let fallback = defaults.ttl_for(*domain);
                let ttl = env_parse::<u64>(&var)
                    .map(Duration::from_secs)
                    .unwrap_or(fallback);
                (*domain, ttl)
            })
            .collect();

        Self {
            api_base_url: env::var("SYNC_API_BASE_URL").unwrap_or(defaults.api_base_url),
            auth_token: env::var("SYNC_AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
            min_refresh_interval: env_parse::<u64>("SYNC_MIN_REFRESH_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_refresh_interval),
            domain_ttls,
            active_tab: env_parse::<DomainKey>("SYNC_ACTIVE_TAB").unwrap_or(defaults.active_tab),
            live: LiveConfig {
                max_reconnect_attempts: env_parse("LIVE_MAX_RECONNECT_ATTEMPTS")
                    .unwrap_or(live_defaults.max_reconnect_attempts),
                reconnect_delay: env_parse::<u64>("LIVE_RECONNECT_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(live_defaults.reconnect_delay),
                reconnect_jitter: env_parse::<u64>("LIVE_RECONNECT_JITTER_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(live_defaults.reconnect_jitter),
                poll_interval: env_parse::<u64>("LIVE_POLL_INTERVAL_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(live_defaults.poll_interval),
                cache_ttl: env_parse::<u64>("LIVE_CACHE_TTL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(live_defaults.cache_ttl),
            },
        }
    }

    /// TTL configured for `domain`.
    pub fn ttl_for(&self, domain: DomainKey) -> Duration {
        self.domain_ttls
            .get(&domain)
            .copied()
            .unwrap_or_else(|| domain.default_ttl())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            auth_token: None,
            min_refresh_interval: Duration::from_millis(30_000),
            domain_ttls: DomainKey::ALL
                .iter()
                .map(|domain| (*domain, domain.default_ttl()))
                .collect(),
            active_tab: DomainKey::Overview,
            live: LiveConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

//! Data domains and their cache keys.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

// == Domain Key ==
/// A named category of fetched data with its own TTL and staleness clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainKey {
    Overview,
    Analytics,
    Users,
    Support,
    Logs,
    Notifications,
}

impl DomainKey {
    pub const ALL: [DomainKey; 6] = [
        DomainKey::Overview,
        DomainKey::Analytics,
        DomainKey::Users,
        DomainKey::Support,
        DomainKey::Logs,
        DomainKey::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainKey::Overview => "overview",
            DomainKey::Analytics => "analytics",
            DomainKey::Users => "users",
            DomainKey::Support => "support",
            DomainKey::Logs => "logs",
            DomainKey::Notifications => "notifications",
        }
    }

    /// Whether entries are cached separately per query-parameter combination.
    pub fn is_params_scoped(&self) -> bool {
        matches!(
            self,
            DomainKey::Users | DomainKey::Support | DomainKey::Logs | DomainKey::Notifications
        )
    }

    pub fn default_ttl(&self) -> Duration {
        let secs = match self {
            DomainKey::Overview => 120,
            DomainKey::Analytics => 300,
            DomainKey::Users => 180,
            DomainKey::Support => 120,
            DomainKey::Logs => 60,
            DomainKey::Notifications => 60,
        };
        Duration::from_secs(secs)
    }

    /// Prefix shared by every cache key of this domain.
    pub fn key_prefix(&self) -> String {
        format!("{}:", self.as_str())
    }

    /// Params actually used for this domain; unscoped domains ignore them.
    pub fn scope(&self, params: Params) -> Params {
        if self.is_params_scoped() {
            params
        } else {
            Params::new()
        }
    }

    /// Cache key for `params` under this domain.
    pub fn cache_key(&self, params: &Params) -> String {
        if self.is_params_scoped() {
            format!("{}{}", self.key_prefix(), params.fingerprint())
        } else {
            format!("{}{{}}", self.key_prefix())
        }
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainKey {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainKey::ALL
            .iter()
            .copied()
            .find(|domain| domain.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SyncError::UnknownDomain(s.to_string()))
    }
}

// == Params ==
/// Query parameters of a fetch, kept sorted so equal sets serialize equally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Pairs suitable for an HTTP query string.
    pub fn to_query(&self) -> Vec<(String, String)> {
        self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Deterministic serialization used inside cache keys.
    pub fn fingerprint(&self) -> String {
        // A string-to-string map always serializes
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        )
    }
}

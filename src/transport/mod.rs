//! Transport Module
//!
//! Contracts between the synchronization core and its network collaborators.
//! The core only ever talks to the remote API through these traits.

mod http;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::future::try_join_all;
use futures_util::stream::BoxStream;
use serde_json::{Map, Value};

use crate::coordinator::Params;
use crate::error::Result;

pub use http::{ndjson_lines, HttpFetcher, HttpStreamConnector, MAX_LINE_BYTES};

// == Fetch Contract ==
/// One-shot pull of a domain payload.
///
/// Implementations fail on any non-success outcome and never retry.
#[async_trait]
pub trait DomainFetcher: Send + Sync {
    async fn fetch(&self, params: &Params) -> Result<Value>;
}

// == Stream Contract ==
/// Lines of an open server-push stream, one JSON frame per item.
pub type FrameStream = BoxStream<'static, Result<String>>;

/// Opens the live server-push stream.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Opens the stream with the bearer credential `token`.
    async fn open(&self, token: &str) -> Result<FrameStream>;
}

// == Credentials ==
/// Supplies the current bearer credential, if any.
///
/// Read on every request and every stream open, so a rotated credential is
/// picked up without rebuilding the fetchers.
pub trait TokenSource: Send + Sync + fmt::Debug {
    fn token(&self) -> Option<String>;
}

/// Credential fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()))
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Credential the host can replace or revoke at runtime.
#[derive(Debug, Default)]
pub struct SharedToken(RwLock<Option<String>>);

impl SharedToken {
    pub fn new(token: Option<String>) -> Self {
        Self(RwLock::new(token.filter(|t| !t.is_empty())))
    }

    pub fn set(&self, token: Option<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = token.filter(|t| !t.is_empty());
    }
}

impl TokenSource for SharedToken {
    fn token(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

// == Combined Fetcher ==
/// Runs several fetches in parallel and returns `{ name: payload, .. }`.
///
/// Fails as soon as any part fails.
pub struct CombinedFetcher {
    parts: Vec<(String, Arc<dyn DomainFetcher>)>,
}

impl CombinedFetcher {
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    pub fn part(mut self, name: impl Into<String>, fetcher: Arc<dyn DomainFetcher>) -> Self {
        self.parts.push((name.into(), fetcher));
        self
    }
}

impl Default for CombinedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DomainFetcher for CombinedFetcher {
    async fn fetch(&self, params: &Params) -> Result<Value> {
        let values = try_join_all(self.parts.iter().map(|(_, f)| f.fetch(params))).await?;

        let combined: Map<String, Value> = self
            .parts
            .iter()
            .map(|(name, _)| name.clone())
            .zip(values)
            .collect();
        Ok(Value::Object(combined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use serde_json::json;

    struct Fixed(Result<Value>);

    #[async_trait]
    impl DomainFetcher for Fixed {
        async fn fetch(&self, _params: &Params) -> Result<Value> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_combined_fetcher_merges_parts() {
        let fetcher = CombinedFetcher::new()
            .part("overview", Arc::new(Fixed(Ok(json!({"users": 10})))))
            .part("usage", Arc::new(Fixed(Ok(json!([1, 2, 3])))));

        let value = fetcher.fetch(&Params::new()).await.unwrap();
        assert_eq!(value, json!({"overview": {"users": 10}, "usage": [1, 2, 3]}));
    }

    #[tokio::test]
    async fn test_combined_fetcher_fails_if_any_part_fails() {
        let fetcher = CombinedFetcher::new()
            .part("overview", Arc::new(Fixed(Ok(json!({})))))
            .part("usage", Arc::new(Fixed(Err(SyncError::Network("down".into())))));

        let err = fetcher.fetch(&Params::new()).await.unwrap_err();
        assert_eq!(err, SyncError::Network("down".into()));
    }

    #[test]
    fn test_static_token_treats_empty_as_missing() {
        assert!(StaticToken::new(Some(String::new())).token().is_none());
        assert_eq!(StaticToken::new(Some("abc".into())).token().as_deref(), Some("abc"));
    }

    #[test]
    fn test_shared_token_rotation() {
        let tokens = SharedToken::new(Some("old".into()));
        assert_eq!(tokens.token().as_deref(), Some("old"));

        tokens.set(Some("new".into()));
        assert_eq!(tokens.token().as_deref(), Some("new"));

        tokens.set(Some(String::new()));
        assert!(tokens.token().is_none());
    }
}

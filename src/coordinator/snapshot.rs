//! Consumer-facing state of one domain.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::coordinator::Params;
use crate::error::SyncError;

/// What a consumer should render for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainView {
    /// Nothing requested yet
    Idle,
    /// First load in progress, no data to show
    LoadingEmpty,
    /// Reload in progress, last-known data shown
    Refreshing,
    /// Data shown, last fetch succeeded
    Ready,
    /// Last fetch failed, last-known data shown (stale)
    ErrorWithData,
    /// Fetch failed and no data was ever loaded
    ErrorEmpty,
}

/// Observable state of one domain.
#[derive(Debug, Clone, Default)]
pub struct DomainSnapshot {
    /// Last successfully loaded payload
    pub data: Option<Value>,
    /// Params `data` was loaded with
    pub params: Params,
    /// True while at least one fetch for the domain is in flight
    pub loading: bool,
    /// Error of the most recent failed fetch, cleared by the next success
    pub error: Option<SyncError>,
    /// When `data` was last fetched from the network
    pub last_updated: Option<DateTime<Utc>>,
}

impl DomainSnapshot {
    pub fn view(&self) -> DomainView {
        match (self.loading, self.data.is_some(), self.error.is_some()) {
            (true, false, _) => DomainView::LoadingEmpty,
            (true, true, _) => DomainView::Refreshing,
            (false, true, true) => DomainView::ErrorWithData,
            (false, false, true) => DomainView::ErrorEmpty,
            (false, true, false) => DomainView::Ready,
            (false, false, false) => DomainView::Idle,
        }
    }

    /// True when shown data may be outdated because a refresh failed.
    pub fn is_stale(&self) -> bool {
        self.view() == DomainView::ErrorWithData
    }
}

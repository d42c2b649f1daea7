//! Live Module
//!
//! Push-based metric feed with bounded reconnects and a polling fallback.

mod client;
mod frame;
mod machine;

use chrono::{DateTime, Utc};

use crate::error::SyncError;

pub use client::{LiveClient, LIVE_CACHE_KEY};
pub use frame::{apply_delta, metrics_from_value, parse_frame, LiveFrame, Metrics, STATS_UPDATE};
pub use machine::{ConnectionState, FailureOutcome, ReconnectPolicy, StreamMachine};

/// Observable state of the live feed.
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    /// Latest-known metrics
    pub stats: Option<Metrics>,
    pub state: ConnectionState,
    /// Last error; cleared once fresh data arrives or the stream opens
    pub error: Option<SyncError>,
    /// Stream abandoned, data kept fresh by polling only
    pub degraded: bool,
    /// True while the poll timer is the active transport
    pub polling: bool,
    pub reconnect_attempts: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

impl LiveSnapshot {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

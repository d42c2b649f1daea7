//! Stream connection state machine.
//!
//! Pure transition logic with no I/O or timers; the live client task drives it
//! and performs the side effects each transition asks for.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::debug;

use crate::clock::duration_ms;
use crate::config::LiveConfig;
use crate::error::{Result, SyncError};

// == Connection State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Polling,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Polling => "polling",
        };
        f.write_str(name)
    }
}

// == Reconnect Policy ==
/// Bounded fixed-delay reconnect with optional jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive stream failures after which the client degrades to polling
    pub max_attempts: u32,
    pub delay: Duration,
    pub jitter: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &LiveConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            delay: config.reconnect_delay,
            jitter: config.reconnect_jitter,
        }
    }

    /// Delay before the next attempt: the fixed delay plus up to `jitter`.
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = duration_ms(self.jitter);
        if jitter_ms == 0 {
            return self.delay;
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_nanos(0))
            .subsec_nanos() as u64;
        self.delay.saturating_add(Duration::from_millis(nanos % jitter_ms))
    }
}

/// What the driver must do after a stream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Wait `delay`, then open the stream again
    Retry { attempt: u32, delay: Duration },
    /// Give up on the stream and start polling
    Degrade,
}

// == Stream Machine ==
#[derive(Debug, Clone)]
pub struct StreamMachine {
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl StreamMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Disconnected → Connecting. Without a credential the machine stays
    /// Disconnected and reports `NotAuthorized`.
    ///
    /// Returns `Ok(false)` when a transport is already active.
    pub fn connect(&mut self, has_credential: bool) -> Result<bool> {
        if self.state != ConnectionState::Disconnected {
            return Ok(false);
        }
        if !has_credential {
            return Err(SyncError::NotAuthorized);
        }
        self.transition(ConnectionState::Connecting);
        Ok(true)
    }

    /// Connecting → Connected; the attempt budget is restored.
    pub fn opened(&mut self) {
        self.attempts = 0;
        self.transition(ConnectionState::Connected);
    }

    /// Connecting/Connected → Reconnecting, or → Polling once the attempt
    /// budget is spent. Returns `None` when no stream was active.
    pub fn stream_failed(&mut self) -> Option<FailureOutcome> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return None;
        }

        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            self.transition(ConnectionState::Polling);
            Some(FailureOutcome::Degrade)
        } else {
            self.transition(ConnectionState::Reconnecting);
            Some(FailureOutcome::Retry {
                attempt: self.attempts,
                delay: self.policy.next_delay(),
            })
        }
    }

    /// Reconnecting → Connecting when the retry delay elapses.
    pub fn retry_due(&mut self) -> bool {
        if self.state != ConnectionState::Reconnecting {
            return false;
        }
        self.transition(ConnectionState::Connecting);
        true
    }

    /// Explicit reconnect from any state: the attempt budget is reset and the
    /// stream is opened from scratch.
    pub fn reconnect(&mut self, has_credential: bool) -> Result<()> {
        self.attempts = 0;
        if !has_credential {
            self.transition(ConnectionState::Disconnected);
            return Err(SyncError::NotAuthorized);
        }
        self.transition(ConnectionState::Connecting);
        Ok(())
    }

    /// Any state → Disconnected. Idempotent.
    pub fn disconnect(&mut self) {
        self.attempts = 0;
        self.transition(ConnectionState::Disconnected);
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, attempts = self.attempts, "live state transition");
        }
        self.state = next;
    }
}

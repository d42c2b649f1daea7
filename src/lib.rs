//! Livesync - client-side realtime data synchronization
//!
//! A TTL cache shared by per-domain refresh coordinators, plus a live update
//! client that keeps a push stream open and falls back to polling.

pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod live;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::SharedCache;
pub use config::{Config, LiveConfig};
pub use coordinator::{DomainKey, DomainRegistry, Params, RefreshCoordinator};
pub use error::{Result, SyncError};
pub use live::{LiveClient, LiveSnapshot};

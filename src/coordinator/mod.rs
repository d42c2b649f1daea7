//! Coordinator Module
//!
//! Pull-based refresh coordination: one [`RefreshCoordinator`] per data
//! domain, grouped in a [`DomainRegistry`].

mod domain;
mod refresh;
mod registry;
mod snapshot;

pub use domain::{DomainKey, Params};
pub use refresh::{RefreshCoordinator, RefreshPolicy};
pub use registry::{domain_path, DomainRegistry, Visibility, ANALYTICS_PARTS};
pub use snapshot::{DomainSnapshot, DomainView};

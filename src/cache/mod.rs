//! Bundle and asset caches
//!
//! Both caches keep one record per key, moving it through
//! `Unloaded -> Loading -> Loaded`. Unloaded is the absence of a record, so a
//! key can never have two physical loads in flight. Neither cache owns its
//! collaborators: every operation receives a [`LoadContext`] borrowing the
//! storage backend, catalog and metrics from the owning loader.

pub mod asset;
pub mod bundle;
pub mod metrics;

pub use asset::{AssetCache, AssetCallback};
pub use bundle::{BundleCache, BundleCallback, BundleNotice, BundleWaiter};
pub use metrics::{LoaderMetrics, LoaderMetricsHandle};

use crate::catalog::Catalog;
use crate::storage::BundleStorage;

/// Observable state of a bundle or asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStatus {
    /// No record: never requested, failed, or released
    Unloaded,
    /// A physical request is in flight
    Loading,
    /// Handle or payload available
    Loaded,
}

/// Collaborators borrowed for the duration of one cache operation
pub struct LoadContext<'a, S: BundleStorage> {
    pub storage: &'a S,
    pub catalog: &'a Catalog,
    pub metrics: &'a LoaderMetrics,
}

impl<S: BundleStorage> Clone for LoadContext<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: BundleStorage> Copy for LoadContext<'_, S> {}

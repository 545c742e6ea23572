//! Error types for bundle_loader

use thiserror::Error;

use crate::catalog::BundleName;
use crate::storage::StorageError;

/// Main error type for load operations
///
/// Cloned once per waiting callback when a single load fails for several
/// requesters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Asset not found in catalog: {0}")]
    AssetNotFound(String),

    #[error("Bundle not found in manifest: {0}")]
    BundleNotFound(BundleName),

    #[error("Storage error while loading {target}: {source}")]
    Storage {
        target: String,
        #[source]
        source: StorageError,
    },

    #[error("Cyclic bundle dependency: {}", format_chain(.chain))]
    CyclicDependency { chain: Vec<BundleName> },

    #[error("Bundle {bundle} failed because dependency {dependency} is not loaded")]
    DependencyFailed {
        bundle: BundleName,
        dependency: BundleName,
    },

    #[error("Load of {0} was cancelled by an unload")]
    Released(String),
}

impl LoadError {
    /// True for the lookup failures callers are expected to handle
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AssetNotFound(_) | Self::BundleNotFound(_))
    }

    pub(crate) fn storage(target: impl std::fmt::Display, source: StorageError) -> Self {
        Self::Storage {
            target: target.to_string(),
            source,
        }
    }
}

fn format_chain(chain: &[BundleName]) -> String {
    chain
        .iter()
        .map(BundleName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Error type for reading a manifest file
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type alias for load operations
pub type Result<T> = std::result::Result<T, LoadError>;

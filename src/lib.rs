//! bundle_loader - Content bundle loading with dependency resolution
//!
//! # Features
//! - Dependency-first bundle loading from a build manifest
//! - One physical load per bundle or asset, however many requesters
//! - Synchronous and asynchronous loads over the same cache, with promotion
//! - Reference-counted release of assets and the bundles they live in
//! - Storage abstraction (in-memory mock, directory on disk, custom)
//! - Async runtime abstraction (Tokio, inline mock, custom)
//!
//! # Quick Start
//!
//! ```ignore
//! use bundle_loader::{Loader, LoaderConfig, DirectoryStorage};
//!
//! let config = LoaderConfig::new().with_root("AssetBundles");
//! let storage = DirectoryStorage::new(config.root());
//! let mut loader = Loader::from_config(config, storage)?;
//!
//! let panel = loader.load("ui/main/panel.prefab")?;
//! loader.load_async("ui/main/icon.png", |icon| println!("{icon:?}"));
//! loader.advance();
//! loader.release(&panel);
//! ```
//!
//! # Feature Flags
//!
//! - `runtime-tokio`: Enable the Tokio spawner for directory storage

// Core modules
pub mod cache;
pub mod catalog;
pub mod loader;
pub mod manifest;

// Collaborators
pub mod runtime;
pub mod storage;

// Error types
mod error;
pub use error::{LoadError, ManifestError, Result};

// Re-export main types
pub use cache::{LoadStatus, LoaderMetrics, LoaderMetricsHandle};
pub use catalog::{BundleName, Catalog, DEFAULT_VARIANT};
pub use loader::{LoadProgress, Loader, LoaderConfig};
pub use manifest::{AssetEntry, DependencyEntry, DependencyGraph, Manifest};

// Re-export storage types
pub use storage::fs::AssetBytes;
pub use storage::{
    BundleStorage, DirectoryStorage, LoadRequest, MemoryBundle, MockStorage, StorageError,
    StorageResult,
};

// Re-export runtime types
pub use runtime::mock::{MockSpawnBehavior, MockSpawner};
#[cfg(feature = "runtime-tokio")]
pub use runtime::tokio_impl::TokioSpawner;
pub use runtime::AsyncSpawner;

// Version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

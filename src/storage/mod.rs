//! Storage abstraction for backend-agnostic bundle reading
//!
//! This module provides the traits the caches use to turn a bundle name into
//! a native bundle handle and to pull individual assets out of a loaded
//! bundle, allowing the loader to work with any backing store (files, packed
//! archives, network, mock, etc.).

pub mod fs;
pub mod mock;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

use crate::catalog::BundleName;

/// Error type for storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Bundle not present in storage: {0}")]
    MissingBundle(String),

    #[error("Asset {asset} not present in bundle {bundle}")]
    MissingAsset { bundle: String, asset: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Request abandoned before completion")]
    Abandoned,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// An in-flight physical read
///
/// Requests are polled from the loader's completion sweep and can be forced
/// to finish when a synchronous caller needs the result right away.
pub trait LoadRequest {
    /// Value produced on success
    type Output;

    /// Non-blocking completion check
    fn is_done(&mut self) -> bool;

    /// Take the result, blocking until the request completes if needed
    fn wait(self) -> StorageResult<Self::Output>;
}

/// Core storage trait for backend-agnostic bundle reads
///
/// # Associated Types
/// - `Bundle`: native handle of a loaded bundle, owned by the bundle cache
/// - `Asset`: payload of one asset, shared with callers through `Arc`
/// - `BundleRequest` / `AssetRequest`: pollable asynchronous reads
///
/// # Example
/// ```ignore
/// let storage = MockStorage::new();
/// storage.add_bundle("ui.ab", &["ui/panel.prefab"]);
/// let bundle = storage.read_bundle(&BundleName::from_normalized("ui.ab"))?;
/// let panel = storage.read_asset(&bundle, "ui/panel.prefab")?;
/// ```
pub trait BundleStorage: Debug {
    /// Native bundle handle
    type Bundle: Debug;

    /// Asset payload
    type Asset: Debug + 'static;

    /// Asynchronous bundle read
    type BundleRequest: LoadRequest<Output = Self::Bundle>;

    /// Asynchronous asset read
    type AssetRequest: LoadRequest<Output = Self::Asset>;

    /// Read a bundle synchronously
    ///
    /// # Arguments
    /// * `name` - Normalized bundle name
    fn read_bundle(&self, name: &BundleName) -> StorageResult<Self::Bundle>;

    /// Start reading a bundle without blocking
    fn read_bundle_async(&self, name: &BundleName) -> Self::BundleRequest;

    /// Read one asset out of a loaded bundle
    ///
    /// # Arguments
    /// * `bundle` - Handle returned by a bundle read
    /// * `asset_path` - Normalized asset path
    fn read_asset(&self, bundle: &Self::Bundle, asset_path: &str) -> StorageResult<Self::Asset>;

    /// Start reading one asset without blocking
    fn read_asset_async(&self, bundle: &Self::Bundle, asset_path: &str) -> Self::AssetRequest;

    /// Release a bundle handle
    ///
    /// Most backends free through Drop; this hook allows explicit cleanup.
    fn release_bundle(&self, _bundle: Self::Bundle) {
        // Default: let Drop handle it
    }

    /// Get the name of this storage backend (for debugging)
    fn backend_name(&self) -> &'static str;
}

/// A bundle held fully in memory: asset path -> bytes
#[derive(Debug, Clone, Default)]
pub struct MemoryBundle {
    pub name: String,
    entries: HashMap<String, Arc<[u8]>>,
}

impl MemoryBundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: HashMap::new(),
        }
    }

    /// Add an entry, replacing any previous data under the same path
    pub fn insert(&mut self, asset_path: impl Into<String>, data: impl Into<Arc<[u8]>>) {
        self.entries.insert(asset_path.into(), data.into());
    }

    pub fn get(&self, asset_path: &str) -> Option<Arc<[u8]>> {
        self.entries.get(asset_path).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total payload size in bytes
    pub fn byte_size(&self) -> usize {
        self.entries.values().map(|data| data.len()).sum()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }
}

/// A request that completed at creation time
#[derive(Debug)]
pub struct ReadyRequest<T>(StorageResult<T>);

impl<T> ReadyRequest<T> {
    pub fn new(result: StorageResult<T>) -> Self {
        Self(result)
    }
}

impl<T> LoadRequest for ReadyRequest<T> {
    type Output = T;

    fn is_done(&mut self) -> bool {
        true
    }

    fn wait(self) -> StorageResult<T> {
        self.0
    }
}

// Re-export implementations
pub use fs::DirectoryStorage;
pub use mock::{MockAsset, MockBundle, MockStorage};

//! Mock storage implementation for testing
//!
//! Keeps bundle contents in memory and lets a test decide exactly when each
//! asynchronous request completes, so tick-by-tick loader behaviour can be
//! asserted without real IO.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{BundleStorage, LoadRequest, StorageError, StorageResult};
use crate::catalog::{normalize_path, BundleName};

/// Handle produced by [`MockStorage`] for a loaded bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockBundle {
    /// Unique per physical read
    pub id: u64,
    pub name: String,
    pub assets: Vec<String>,
}

/// Payload produced by [`MockStorage`] for an asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockAsset {
    pub bundle: String,
    pub path: String,
}

#[derive(Debug, Default)]
struct MockState {
    bundles: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    /// Targets whose pending async requests report completion
    completed: HashSet<String>,
    auto_complete: bool,
    bundle_reads: HashMap<String, usize>,
    asset_reads: HashMap<String, usize>,
    forced_waits: usize,
    live_bundles: usize,
    released: Vec<String>,
    next_id: u64,
}

impl MockState {
    fn open_bundle(&mut self, name: &str) -> StorageResult<MockBundle> {
        *self.bundle_reads.entry(name.to_string()).or_insert(0) += 1;
        if self.failing.contains(name) {
            return Err(StorageError::Io(format!("injected failure for {name}")));
        }
        let assets = self
            .bundles
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::MissingBundle(name.to_string()))?;

        self.next_id += 1;
        self.live_bundles += 1;
        Ok(MockBundle {
            id: self.next_id,
            name: name.to_string(),
            assets,
        })
    }

    fn open_asset(&mut self, bundle: &str, path: &str) -> StorageResult<MockAsset> {
        *self.asset_reads.entry(path.to_string()).or_insert(0) += 1;
        if self.failing.contains(path) {
            return Err(StorageError::Io(format!("injected failure for {path}")));
        }
        let owned = self
            .bundles
            .get(bundle)
            .is_some_and(|assets| assets.iter().any(|asset| asset == path));
        if !owned {
            return Err(StorageError::MissingAsset {
                bundle: bundle.to_string(),
                asset: path.to_string(),
            });
        }
        Ok(MockAsset {
            bundle: bundle.to_string(),
            path: path.to_string(),
        })
    }
}

/// Mock storage device for testing
///
/// Cloning shares the underlying state, so a test keeps one clone for
/// scripting while the loader owns another.
#[derive(Clone, Debug, Default)]
pub struct MockStorage {
    state: Arc<Mutex<MockState>>,
}

impl MockStorage {
    /// Create a mock whose async requests wait for [`MockStorage::complete`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose async requests are done as soon as they start
    pub fn auto_complete() -> Self {
        let storage = Self::new();
        storage.state.lock().auto_complete = true;
        storage
    }

    /// Register a bundle and the asset paths it contains
    pub fn add_bundle(&self, name: &str, assets: &[&str]) {
        let assets = assets.iter().map(|path| normalize_path(path)).collect();
        self.state.lock().bundles.insert(normalize_path(name), assets);
    }

    /// Make reads of a bundle or asset fail until [`MockStorage::heal`]
    pub fn fail(&self, target: &str) {
        self.state.lock().failing.insert(normalize_path(target));
    }

    pub fn heal(&self, target: &str) {
        self.state.lock().failing.remove(&normalize_path(target));
    }

    /// Let pending requests for a bundle name or asset path report done
    pub fn complete(&self, target: &str) {
        self.state.lock().completed.insert(normalize_path(target));
    }

    /// Physical reads issued for a bundle (sync and async)
    pub fn bundle_reads(&self, name: &str) -> usize {
        self.state
            .lock()
            .bundle_reads
            .get(&normalize_path(name))
            .copied()
            .unwrap_or(0)
    }

    /// Physical reads issued for an asset (sync and async)
    pub fn asset_reads(&self, path: &str) -> usize {
        self.state
            .lock()
            .asset_reads
            .get(&normalize_path(path))
            .copied()
            .unwrap_or(0)
    }

    /// Requests that were waited on before they reported done
    pub fn forced_waits(&self) -> usize {
        self.state.lock().forced_waits
    }

    /// Bundle handles handed out and not yet released
    pub fn live_bundles(&self) -> usize {
        self.state.lock().live_bundles
    }

    /// Names of released bundles, in release order
    pub fn released(&self) -> Vec<String> {
        self.state.lock().released.clone()
    }

    fn request<T>(&self, target: String, kind: MockRequestKind) -> MockRequest<T> {
        // A fresh request must not inherit an earlier completion.
        self.state.lock().completed.remove(&target);
        MockRequest {
            state: Arc::clone(&self.state),
            target,
            kind,
            _output: std::marker::PhantomData,
        }
    }
}

#[derive(Debug, Clone)]
enum MockRequestKind {
    Bundle,
    Asset { bundle: String },
}

/// Pending request issued by [`MockStorage`]
#[derive(Debug)]
pub struct MockRequest<T> {
    state: Arc<Mutex<MockState>>,
    target: String,
    kind: MockRequestKind,
    _output: std::marker::PhantomData<fn() -> T>,
}

impl<T> MockRequest<T> {
    fn ready(&self, state: &MockState) -> bool {
        state.auto_complete || state.completed.contains(&self.target)
    }
}

impl LoadRequest for MockRequest<MockBundle> {
    type Output = MockBundle;

    fn is_done(&mut self) -> bool {
        self.ready(&self.state.lock())
    }

    fn wait(self) -> StorageResult<MockBundle> {
        let mut state = self.state.lock();
        if !self.ready(&state) {
            state.forced_waits += 1;
        }
        state.completed.remove(&self.target);
        state.open_bundle(&self.target)
    }
}

impl LoadRequest for MockRequest<MockAsset> {
    type Output = MockAsset;

    fn is_done(&mut self) -> bool {
        self.ready(&self.state.lock())
    }

    fn wait(self) -> StorageResult<MockAsset> {
        let mut state = self.state.lock();
        if !self.ready(&state) {
            state.forced_waits += 1;
        }
        state.completed.remove(&self.target);
        let MockRequestKind::Asset { bundle } = &self.kind else {
            unreachable!("asset request built without a bundle")
        };
        state.open_asset(bundle, &self.target)
    }
}

impl BundleStorage for MockStorage {
    type Bundle = MockBundle;
    type Asset = MockAsset;
    type BundleRequest = MockRequest<MockBundle>;
    type AssetRequest = MockRequest<MockAsset>;

    fn read_bundle(&self, name: &BundleName) -> StorageResult<MockBundle> {
        self.state.lock().open_bundle(name.as_str())
    }

    fn read_bundle_async(&self, name: &BundleName) -> MockRequest<MockBundle> {
        self.request(name.as_str().to_string(), MockRequestKind::Bundle)
    }

    fn read_asset(&self, bundle: &MockBundle, asset_path: &str) -> StorageResult<MockAsset> {
        self.state.lock().open_asset(&bundle.name, asset_path)
    }

    fn read_asset_async(&self, bundle: &MockBundle, asset_path: &str) -> MockRequest<MockAsset> {
        self.request(
            asset_path.to_string(),
            MockRequestKind::Asset {
                bundle: bundle.name.clone(),
            },
        )
    }

    fn release_bundle(&self, bundle: MockBundle) {
        let mut state = self.state.lock();
        state.live_bundles = state.live_bundles.saturating_sub(1);
        state.released.push(bundle.name);
    }

    fn backend_name(&self) -> &'static str {
        "Mock"
    }
}

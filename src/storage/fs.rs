//! Directory-backed bundle storage
//!
//! Each bundle is a directory under the storage root named after the
//! normalized bundle name (`<root>/ui/main.ab/`). Reading the bundle reads
//! every file beneath it into a [`MemoryBundle`]; assets are then served from
//! memory. Asynchronous reads run as tasks on an [`AsyncSpawner`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::channel::oneshot;
use walkdir::WalkDir;

use super::{BundleStorage, LoadRequest, MemoryBundle, ReadyRequest, StorageError, StorageResult};
use crate::catalog::{normalize_path, BundleName};
use crate::runtime::{AsyncSpawner, MockSpawner};

/// Bytes of one asset read from a directory bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetBytes {
    pub path: String,
    pub data: Arc<[u8]>,
}

impl AssetBytes {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Storage that reads bundles from directories on disk
#[derive(Debug, Clone)]
pub struct DirectoryStorage<R: AsyncSpawner = MockSpawner> {
    root: PathBuf,
    spawner: R,
}

impl DirectoryStorage<MockSpawner> {
    /// Storage whose async reads run inline when spawned
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_spawner(root, MockSpawner::blocking())
    }
}

impl<R: AsyncSpawner> DirectoryStorage<R> {
    /// Storage whose async reads run on `spawner`
    pub fn with_spawner(root: impl Into<PathBuf>, spawner: R) -> Self {
        Self {
            root: root.into(),
            spawner,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn spawner(&self) -> &R {
        &self.spawner
    }

    fn bundle_dir(&self, name: &BundleName) -> PathBuf {
        self.root.join(name.as_str())
    }
}

/// Read every file under `dir` into memory, keyed by normalized relative path
fn read_bundle_dir(name: &str, dir: &Path) -> StorageResult<MemoryBundle> {
    if !dir.is_dir() {
        return Err(StorageError::MissingBundle(name.to_string()));
    }

    let mut bundle = MemoryBundle::new(name);
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|err| StorageError::Io(err.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|err| StorageError::Io(err.to_string()))?;
        let data = std::fs::read(entry.path())?;
        bundle.insert(normalize_path(&relative.to_string_lossy()), data);
    }

    log::debug!(
        "Read bundle {name} from {}: {} entries, {} bytes",
        dir.display(),
        bundle.len(),
        bundle.byte_size()
    );
    Ok(bundle)
}

/// Bundle name without its variant suffix (`ui/main.ab` -> `ui/main`)
fn bundle_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, suffix)) if !suffix.contains('/') => stem,
        _ => name,
    }
}

/// Look an asset up by full path, then relative to the bundle, then by its
/// file name
fn find_asset(bundle: &MemoryBundle, asset_path: &str) -> StorageResult<AssetBytes> {
    let relative = asset_path
        .strip_prefix(bundle_stem(&bundle.name))
        .and_then(|rest| rest.strip_prefix('/'));
    let file_name = asset_path.rsplit('/').next().unwrap_or(asset_path);
    bundle
        .get(asset_path)
        .or_else(|| relative.and_then(|relative| bundle.get(relative)))
        .or_else(|| bundle.get(file_name))
        .map(|data| AssetBytes {
            path: asset_path.to_string(),
            data,
        })
        .ok_or_else(|| StorageError::MissingAsset {
            bundle: bundle.name.clone(),
            asset: asset_path.to_string(),
        })
}

/// Request fed by a task running on an [`AsyncSpawner`]
///
/// Blocking waits go through the spawner's own `block_on` when it has one.
pub struct SpawnedRequest<T, R: AsyncSpawner> {
    receiver: oneshot::Receiver<StorageResult<T>>,
    result: Option<StorageResult<T>>,
    spawner: R,
}

impl<T, R: AsyncSpawner> SpawnedRequest<T, R> {
    fn new(receiver: oneshot::Receiver<StorageResult<T>>, spawner: R) -> Self {
        Self {
            receiver,
            result: None,
            spawner,
        }
    }
}

impl<T, R: AsyncSpawner> LoadRequest for SpawnedRequest<T, R> {
    type Output = T;

    fn is_done(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        match self.receiver.try_recv() {
            Ok(Some(result)) => {
                self.result = Some(result);
                true
            }
            Ok(None) => false,
            // The task was dropped without reporting back
            Err(oneshot::Canceled) => {
                self.result = Some(Err(StorageError::Abandoned));
                true
            }
        }
    }

    fn wait(mut self) -> StorageResult<T> {
        if let Some(result) = self.result {
            return result;
        }
        let received = match self.spawner.block_on(&mut self.receiver) {
            Some(received) => received,
            None => futures::executor::block_on(&mut self.receiver),
        };
        received.unwrap_or(Err(StorageError::Abandoned))
    }
}

impl<R: AsyncSpawner> BundleStorage for DirectoryStorage<R> {
    type Bundle = Arc<MemoryBundle>;
    type Asset = AssetBytes;
    type BundleRequest = SpawnedRequest<Arc<MemoryBundle>, R>;
    type AssetRequest = ReadyRequest<AssetBytes>;

    fn read_bundle(&self, name: &BundleName) -> StorageResult<Arc<MemoryBundle>> {
        read_bundle_dir(name.as_str(), &self.bundle_dir(name)).map(Arc::new)
    }

    fn read_bundle_async(&self, name: &BundleName) -> SpawnedRequest<Arc<MemoryBundle>, R> {
        let (tx, rx) = oneshot::channel();
        let dir = self.bundle_dir(name);
        let name = name.as_str().to_string();

        self.spawner.spawn(async move {
            let _ = tx.send(read_bundle_dir(&name, &dir).map(Arc::new));
        });

        SpawnedRequest::new(rx, self.spawner.clone())
    }

    fn read_asset(&self, bundle: &Arc<MemoryBundle>, asset_path: &str) -> StorageResult<AssetBytes> {
        find_asset(bundle, asset_path)
    }

    fn read_asset_async(&self, bundle: &Arc<MemoryBundle>, asset_path: &str) -> ReadyRequest<AssetBytes> {
        // Bundle contents are already in memory
        ReadyRequest::new(find_asset(bundle, asset_path))
    }

    fn backend_name(&self) -> &'static str {
        "Directory"
    }
}

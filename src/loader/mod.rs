//! Loader facade
//!
//! Composes the catalog, the bundle cache and the asset cache behind one
//! owned value. Every mutating call takes `&mut self`; async completions are
//! only observed from [`Loader::advance`], which the host calls once per tick.

pub mod config;
pub mod progress;

pub use config::LoaderConfig;
pub use progress::LoadProgress;

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use crate::cache::{
    AssetCache, BundleCache, BundleWaiter, LoadContext, LoadStatus, LoaderMetricsHandle,
};
use crate::catalog::{BundleName, Catalog};
use crate::error::{LoadError, ManifestError, Result};
use crate::manifest::Manifest;
use crate::storage::BundleStorage;

/// Callback receiving every asset of a bundle
pub type BatchCallback<A> = Box<dyn FnOnce(Result<Vec<Arc<A>>>)>;

type Orphans<A> = Rc<RefCell<Vec<Arc<A>>>>;

/// Bundle and asset loader over a storage backend
pub struct Loader<S: BundleStorage> {
    config: LoaderConfig,
    catalog: Catalog,
    storage: S,
    bundles: BundleCache<S>,
    assets: AssetCache<S>,
    metrics: LoaderMetricsHandle,
    /// Payloads delivered to a failed batch, released on the next advance
    orphans: Orphans<S::Asset>,
}

impl<S: BundleStorage> Loader<S> {
    /// Create a loader over an already built catalog
    pub fn new(catalog: Catalog, storage: S) -> Self {
        let config = LoaderConfig::default().with_variant(catalog.variant());
        Self::with_parts(config, catalog, storage)
    }

    /// Create a loader from a parsed manifest with the default variant
    pub fn from_manifest(manifest: &Manifest, storage: S) -> Self {
        let config = LoaderConfig::default();
        let catalog = Catalog::from_manifest(manifest, config.variant.clone());
        Self::with_parts(config, catalog, storage)
    }

    /// Create a loader reading `config.root/config.manifest_file`
    ///
    /// A missing manifest yields an empty catalog; a malformed one is an error.
    pub fn from_config(config: LoaderConfig, storage: S) -> std::result::Result<Self, ManifestError> {
        let manifest = Manifest::load_or_default(config.manifest_path())?;
        let catalog = Catalog::from_manifest(&manifest, config.variant.clone());
        Ok(Self::with_parts(config, catalog, storage))
    }

    fn with_parts(config: LoaderConfig, catalog: Catalog, storage: S) -> Self {
        log::info!(
            "Loader ready: {} assets, {} bundles with dependencies, {} storage",
            catalog.asset_count(),
            catalog.graph().len(),
            storage.backend_name()
        );
        Self {
            config,
            catalog,
            storage,
            bundles: BundleCache::new(),
            assets: AssetCache::new(),
            metrics: LoaderMetricsHandle::new(),
            orphans: Rc::default(),
        }
    }

    fn parts(&mut self) -> (LoadContext<'_, S>, &mut BundleCache<S>, &mut AssetCache<S>) {
        let Self {
            catalog,
            storage,
            bundles,
            assets,
            metrics,
            ..
        } = self;
        let ctx = LoadContext {
            storage: &*storage,
            catalog: &*catalog,
            metrics: metrics.inner(),
        };
        (ctx, bundles, assets)
    }

    /// Load an asset synchronously
    ///
    /// Promotes any in-flight async load of the asset or its bundles instead
    /// of starting a second physical read. Each success holds one reference
    /// until passed to [`Loader::release`].
    pub fn load(&mut self, asset_path: &str) -> Result<Arc<S::Asset>> {
        let (ctx, bundles, assets) = self.parts();
        let result = assets.load(ctx, bundles, asset_path);
        assets.apply_notices(ctx, bundles);
        result
    }

    /// Load an asset without blocking
    ///
    /// `callback` runs immediately for unknown or cached assets, otherwise
    /// from a later [`Loader::advance`].
    pub fn load_async<F>(&mut self, asset_path: &str, callback: F)
    where
        F: FnOnce(Result<Arc<S::Asset>>) + 'static,
    {
        let (ctx, bundles, assets) = self.parts();
        assets.load_async(ctx, bundles, asset_path, Box::new(callback));
        assets.apply_notices(ctx, bundles);
    }

    /// Settle completed requests; call once per tick
    ///
    /// Returns the number of bundles and assets that settled.
    pub fn advance(&mut self) -> usize {
        let orphans = std::mem::take(&mut *self.orphans.borrow_mut());
        let (ctx, bundles, assets) = self.parts();
        for payload in &orphans {
            assets.release(ctx, bundles, payload);
        }

        let mut settled = bundles.advance(ctx);
        assets.apply_notices(ctx, bundles);
        settled += assets.advance(ctx, bundles);
        settled
    }

    /// Drop one reference on a payload returned by this loader
    ///
    /// Returns false if the payload is not (or no longer) cached here.
    pub fn release(&mut self, payload: &Arc<S::Asset>) -> bool {
        let (ctx, bundles, assets) = self.parts();
        assets.release(ctx, bundles, payload)
    }

    /// Unload every asset and bundle
    ///
    /// In-flight loads are completed and released; their callbacks receive
    /// [`LoadError::Released`]. Calling it again is a no-op.
    pub fn release_all(&mut self) {
        self.orphans.borrow_mut().clear();
        let (ctx, bundles, assets) = self.parts();
        let asset_count = assets.release_all();
        let bundle_count = bundles.release_all(ctx);
        if asset_count + bundle_count > 0 {
            log::info!("Released {asset_count} assets and {bundle_count} bundles");
        }
    }

    pub fn is_asset_known(&self, asset_path: &str) -> bool {
        self.catalog.bundle_for(asset_path).is_some()
    }

    /// Bundles a batch load covers
    ///
    /// With `recursive`, every bundle nested under the path is included and
    /// the path itself need not name a bundle.
    fn batch_bundles(&self, bundle: &str, recursive: bool) -> Result<Vec<BundleName>> {
        let name = self.catalog.bundle_name(bundle);
        let bundles = if recursive {
            self.catalog.bundles_under(bundle)
        } else if self.catalog.bundle_exists(name.as_str()) {
            vec![name.clone()]
        } else {
            Vec::new()
        };
        if bundles.is_empty() {
            return Err(LoadError::BundleNotFound(name));
        }
        Ok(bundles)
    }

    /// Assets of a batch load: bundles in name order, paths in order within
    fn batch_paths(&self, bundle: &str, recursive: bool) -> Result<Vec<String>> {
        let bundles = self.batch_bundles(bundle, recursive)?;
        Ok(bundles
            .iter()
            .flat_map(|name| self.catalog.assets_in(name.as_str()))
            .collect())
    }

    /// Load every asset a bundle owns, in path order
    ///
    /// With `recursive`, the bundles nested under the path (`ui/main`,
    /// `ui/hud` for `ui`) are loaded too, bundle by bundle in name order.
    /// On failure the assets already loaded by this call are released again.
    pub fn load_all(&mut self, bundle: &str, recursive: bool) -> Result<Vec<Arc<S::Asset>>> {
        let paths = self.batch_paths(bundle, recursive)?;
        let mut loaded = Vec::with_capacity(paths.len());
        for path in &paths {
            match self.load(path) {
                Ok(payload) => loaded.push(payload),
                Err(err) => {
                    for payload in &loaded {
                        self.release(payload);
                    }
                    return Err(err);
                }
            }
        }
        Ok(loaded)
    }

    /// Asynchronous [`Loader::load_all`]
    ///
    /// `callback` runs once every asset has settled. If any failed it receives
    /// the first error, and the payloads that did load are released on the
    /// next [`Loader::advance`].
    pub fn load_all_async<F>(&mut self, bundle: &str, recursive: bool, callback: F)
    where
        F: FnOnce(Result<Vec<Arc<S::Asset>>>) + 'static,
    {
        let paths = match self.batch_paths(bundle, recursive) {
            Ok(paths) => paths,
            Err(err) => {
                callback(Err(err));
                return;
            }
        };
        if paths.is_empty() {
            callback(Ok(Vec::new()));
            return;
        }

        let batch = Rc::new(RefCell::new(Batch {
            slots: (0..paths.len()).map(|_| None).collect(),
            remaining: paths.len(),
            error: None,
            callback: Some(Box::new(callback) as BatchCallback<S::Asset>),
        }));
        for (index, path) in paths.iter().enumerate() {
            let batch = Rc::clone(&batch);
            let orphans = Rc::clone(&self.orphans);
            self.load_async(path, move |result| {
                Batch::complete(&batch, &orphans, index, result);
            });
        }
    }

    /// Load a bundle (and its dependencies) and pin it
    ///
    /// The pin is dropped with [`Loader::release_bundle`].
    pub fn load_bundle(&mut self, bundle: &str) -> Result<()> {
        let name = self.catalog.bundle_name(bundle);
        let (ctx, bundles, assets) = self.parts();
        let result = bundles.acquire(ctx, &name);
        if result.is_ok() {
            bundles.pin(&name);
        }
        assets.apply_notices(ctx, bundles);
        result
    }

    /// Asynchronous [`Loader::load_bundle`]; a success pins the bundle
    pub fn load_bundle_async<F>(&mut self, bundle: &str, callback: F)
    where
        F: FnOnce(Result<()>) + 'static,
    {
        let name = self.catalog.bundle_name(bundle);
        let (ctx, bundles, assets) = self.parts();
        bundles.acquire_async(ctx, &name, BundleWaiter::Callback(Box::new(callback)));
        assets.apply_notices(ctx, bundles);
    }

    /// Drop a pin taken by [`Loader::load_bundle`] or
    /// [`Loader::load_bundle_async`]
    ///
    /// Returns false if the bundle holds no pin; references held by loaded
    /// assets and dependents are left alone.
    pub fn release_bundle(&mut self, bundle: &str) -> bool {
        let name = self.catalog.bundle_name(bundle);
        let (ctx, bundles, _) = self.parts();
        bundles.unpin(ctx, &name)
    }

    /// Unload a bundle regardless of pending work
    ///
    /// Without `force`, a bundle that assets, dependents or pins still
    /// reference is kept and `false` returned. With `force` its cached assets
    /// are dropped as well; payloads already handed out stay valid.
    pub fn unload_bundle(&mut self, bundle: &str, force: bool) -> bool {
        let name = self.catalog.bundle_name(bundle);
        let (ctx, bundles, assets) = self.parts();
        let refs = bundles.refs(&name);
        if !force && refs > 0 {
            log::warn!("Bundle {name} is referenced {refs} times, not unloading");
            return false;
        }

        let evicted = assets.evict_bundle(&name);
        if evicted > 0 {
            log::debug!("Dropped {evicted} cached assets of {name}");
        }
        let released = bundles.release(ctx, &name, true);
        assets.apply_notices(ctx, bundles);
        released
    }

    /// Progress of loading one asset
    ///
    /// Counts the owning bundle, its transitive dependencies and the asset
    /// read. Returns None for an asset the catalog does not know.
    pub fn progress(&self, asset_path: &str) -> Option<LoadProgress> {
        let bundle = self.catalog.bundle_for(asset_path)?;
        let mut requests = self.catalog.graph().all_dependencies(bundle.as_str());
        requests.push(bundle);

        let loaded_bundles = requests
            .iter()
            .filter(|name| self.bundles.status(name) == LoadStatus::Loaded)
            .count();
        let asset_loaded = self.assets.status(asset_path) == LoadStatus::Loaded;
        Some(LoadProgress::new(
            loaded_bundles + usize::from(asset_loaded),
            requests.len() + 1,
        ))
    }

    /// Progress of a [`Loader::load_all`] or [`Loader::load_all_async`] call
    ///
    /// Each bundle in the batch's dependency closure counts once.
    pub fn progress_all(&self, bundle: &str, recursive: bool) -> Result<LoadProgress> {
        let bundles = self.batch_bundles(bundle, recursive)?;
        let mut closure: HashSet<BundleName> = HashSet::new();
        for name in &bundles {
            closure.extend(self.catalog.graph().all_dependencies(name.as_str()));
            closure.insert(name.clone());
        }
        let loaded_bundles = closure
            .iter()
            .filter(|name| self.bundles.status(name) == LoadStatus::Loaded)
            .count();

        let paths = self.batch_paths(bundle, recursive)?;
        let loaded_assets = paths
            .iter()
            .filter(|path| self.assets.status(path) == LoadStatus::Loaded)
            .count();

        let bundles = LoadProgress::new(loaded_bundles, closure.len());
        Ok(bundles.combine(LoadProgress::new(loaded_assets, paths.len())))
    }

    pub fn bundle_status(&self, bundle: &str) -> LoadStatus {
        self.bundles.status(&self.catalog.bundle_name(bundle))
    }

    pub fn asset_status(&self, asset_path: &str) -> LoadStatus {
        self.assets.status(asset_path)
    }

    /// References held on a bundle by assets, dependents and pins
    pub fn bundle_refs(&self, bundle: &str) -> usize {
        self.bundles.refs(&self.catalog.bundle_name(bundle))
    }

    /// User pins on a bundle
    pub fn bundle_pins(&self, bundle: &str) -> usize {
        self.bundles.pins(&self.catalog.bundle_name(bundle))
    }

    /// Outstanding references on a cached asset
    pub fn asset_refs(&self, asset_path: &str) -> usize {
        self.assets.refs(asset_path)
    }

    /// Bundles and assets still in flight
    pub fn pending(&self) -> usize {
        self.bundles.loading_count() + self.assets.loading_count()
    }

    pub fn metrics(&self) -> &LoaderMetricsHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

impl<S: BundleStorage> Drop for Loader<S> {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Shared progress of one `load_all_async` call
struct Batch<A> {
    slots: Vec<Option<Arc<A>>>,
    remaining: usize,
    error: Option<LoadError>,
    callback: Option<BatchCallback<A>>,
}

impl<A> Batch<A> {
    fn complete(
        batch: &RefCell<Self>,
        orphans: &RefCell<Vec<Arc<A>>>,
        index: usize,
        result: Result<Arc<A>>,
    ) {
        let mut state = batch.borrow_mut();
        match result {
            Ok(payload) => state.slots[index] = Some(payload),
            Err(err) => {
                state.error.get_or_insert(err);
            }
        }
        state.remaining -= 1;
        if state.remaining > 0 {
            return;
        }

        let Some(callback) = state.callback.take() else {
            return;
        };
        let loaded: Vec<Arc<A>> = state.slots.drain(..).flatten().collect();
        let error = state.error.take();
        drop(state);

        match error {
            None => callback(Ok(loaded)),
            Some(err) => {
                orphans.borrow_mut().extend(loaded);
                callback(Err(err));
            }
        }
    }
}

//! Asset cache
//!
//! Every asset goes through its owning bundle first. An async asset load waits
//! on the bundle through a [`BundleWaiter::Asset`] and only starts its own read
//! once the bundle cache reports the bundle Loaded.

use std::collections::HashMap;
use std::sync::Arc;

use super::{BundleCache, BundleWaiter, LoadContext, LoadStatus};
use crate::catalog::{normalize_path, BundleName};
use crate::error::{LoadError, Result};
use crate::storage::{BundleStorage, LoadRequest, StorageResult};

/// Callback for asset-level async loads
pub type AssetCallback<A> = Box<dyn FnOnce(Result<Arc<A>>)>;

enum AssetState<S: BundleStorage> {
    AwaitingBundle {
        waiters: Vec<AssetCallback<S::Asset>>,
    },
    Reading {
        request: S::AssetRequest,
        waiters: Vec<AssetCallback<S::Asset>>,
    },
    Loaded {
        payload: Arc<S::Asset>,
    },
}

struct AssetRecord<S: BundleStorage> {
    bundle: BundleName,
    state: AssetState<S>,
    /// Successful deliveries not yet released
    refs: usize,
}

/// Per-asset state table
pub struct AssetCache<S: BundleStorage> {
    records: HashMap<String, AssetRecord<S>>,
}

impl<S: BundleStorage> Default for AssetCache<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BundleStorage> AssetCache<S> {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    pub fn status(&self, asset_path: &str) -> LoadStatus {
        match self.records.get(&normalize_path(asset_path)).map(|r| &r.state) {
            None => LoadStatus::Unloaded,
            Some(AssetState::Loaded { .. }) => LoadStatus::Loaded,
            Some(_) => LoadStatus::Loading,
        }
    }

    pub fn refs(&self, asset_path: &str) -> usize {
        self.records
            .get(&normalize_path(asset_path))
            .map_or(0, |record| record.refs)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn loading_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| !matches!(record.state, AssetState::Loaded { .. }))
            .count()
    }

    /// Load an asset, blocking until it and its bundle are available
    ///
    /// The caller receives one reference on success.
    pub fn load(
        &mut self,
        ctx: LoadContext<'_, S>,
        bundles: &mut BundleCache<S>,
        asset_path: &str,
    ) -> Result<Arc<S::Asset>> {
        let key = normalize_path(asset_path);
        let Some(bundle) = ctx.catalog.bundle_for(&key) else {
            return Err(LoadError::AssetNotFound(key));
        };

        if let Some(AssetRecord {
            state: AssetState::Loaded { payload },
            refs,
            ..
        }) = self.records.get_mut(&key)
        {
            ctx.metrics.record_cache_hit();
            *refs += 1;
            return Ok(Arc::clone(payload));
        }

        bundles.acquire(ctx, &bundle)?;

        let (result, waiters) = match self.records.remove(&key) {
            None => {
                ctx.metrics.record_cache_miss();
                (read_now(ctx, bundles, &bundle, &key), Vec::new())
            }
            Some(AssetRecord { state, .. }) => {
                log::debug!("Promoting in-flight load of asset {key} to synchronous");
                ctx.metrics.record_promotion();
                match state {
                    AssetState::AwaitingBundle { waiters } => {
                        (read_now(ctx, bundles, &bundle, &key), waiters)
                    }
                    AssetState::Reading { request, waiters } => (request.wait(), waiters),
                    AssetState::Loaded { .. } => unreachable!("loaded assets return above"),
                }
            }
        };

        self.finish(ctx, bundles, key, bundle, result, waiters, true)
    }

    /// Start loading an asset without blocking
    ///
    /// Lookup failures and cache hits invoke `callback` before returning.
    pub fn load_async(
        &mut self,
        ctx: LoadContext<'_, S>,
        bundles: &mut BundleCache<S>,
        asset_path: &str,
        callback: AssetCallback<S::Asset>,
    ) {
        let key = normalize_path(asset_path);
        let Some(bundle) = ctx.catalog.bundle_for(&key) else {
            callback(Err(LoadError::AssetNotFound(key)));
            return;
        };

        match self.records.get_mut(&key) {
            Some(AssetRecord {
                state: AssetState::Loaded { payload },
                refs,
                ..
            }) => {
                ctx.metrics.record_cache_hit();
                *refs += 1;
                let payload = Arc::clone(payload);
                callback(Ok(payload));
            }
            Some(AssetRecord {
                state: AssetState::AwaitingBundle { waiters } | AssetState::Reading { waiters, .. },
                ..
            }) => waiters.push(callback),
            None => {
                ctx.metrics.record_cache_miss();
                self.records.insert(
                    key.clone(),
                    AssetRecord {
                        bundle: bundle.clone(),
                        state: AssetState::AwaitingBundle {
                            waiters: vec![callback],
                        },
                        refs: 0,
                    },
                );
                bundles.acquire_async(ctx, &bundle, BundleWaiter::Asset(key));
            }
        }
    }

    /// Start the reads of assets whose bundle has settled
    ///
    /// The bundle reference a successful notice carries moves to the read, or
    /// is dropped again when the asset no longer waits for it. Returns the
    /// number of bundle notices consumed.
    pub fn apply_notices(&mut self, ctx: LoadContext<'_, S>, bundles: &mut BundleCache<S>) -> usize {
        let notices = bundles.take_notices();
        let count = notices.len();

        for notice in notices {
            let awaiting = matches!(
                self.records.get(&notice.asset),
                Some(AssetRecord {
                    state: AssetState::AwaitingBundle { .. },
                    ..
                })
            );
            if !awaiting {
                if notice.result.is_ok() {
                    bundles.release_ref(ctx, &notice.bundle);
                }
                continue;
            }
            let Some(AssetRecord {
                bundle,
                state: AssetState::AwaitingBundle { waiters },
                ..
            }) = self.records.remove(&notice.asset)
            else {
                continue;
            };

            let handle = match notice.result {
                Ok(()) => bundles
                    .handle(&bundle)
                    .ok_or_else(|| LoadError::Released(bundle.to_string())),
                Err(err) => Err(err),
            };
            match handle {
                Ok(handle) => {
                    ctx.metrics.record_asset_load();
                    log::debug!("Reading asset {} from {bundle}", notice.asset);
                    let request = ctx.storage.read_asset_async(handle, &notice.asset);
                    self.records.insert(
                        notice.asset,
                        AssetRecord {
                            bundle,
                            state: AssetState::Reading { request, waiters },
                            refs: 0,
                        },
                    );
                }
                Err(err) => {
                    ctx.metrics.record_failure();
                    log::error!("Failed to load asset {}: {err}", notice.asset);
                    for waiter in waiters {
                        waiter(Err(err.clone()));
                    }
                }
            }
        }
        count
    }

    /// Completion sweep over in-flight asset reads
    ///
    /// Returns the number of assets settled.
    pub fn advance(&mut self, ctx: LoadContext<'_, S>, bundles: &mut BundleCache<S>) -> usize {
        let mut done: Vec<String> = self
            .records
            .iter_mut()
            .filter_map(|(key, record)| match &mut record.state {
                AssetState::Reading { request, .. } => request.is_done().then(|| key.clone()),
                _ => None,
            })
            .collect();
        done.sort();

        let settled = done.len();
        for key in done {
            let Some(AssetRecord {
                bundle,
                state: AssetState::Reading { request, waiters },
                ..
            }) = self.records.remove(&key)
            else {
                continue;
            };
            let result = request.wait();
            let _ = self.finish(ctx, bundles, key, bundle, result, waiters, false);
        }
        settled
    }

    /// Store a read result and resolve everyone waiting on it
    ///
    /// The read holds one reference on `bundle`; it stays with a loaded asset
    /// and is dropped on failure. `caller` counts one extra asset reference
    /// for a synchronous requester.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &mut self,
        ctx: LoadContext<'_, S>,
        bundles: &mut BundleCache<S>,
        key: String,
        bundle: BundleName,
        result: StorageResult<S::Asset>,
        waiters: Vec<AssetCallback<S::Asset>>,
        caller: bool,
    ) -> Result<Arc<S::Asset>> {
        let outcome = match result {
            Ok(asset) => {
                let payload = Arc::new(asset);
                if self.records.contains_key(&key) {
                    panic!("asset {key} registered twice");
                }
                self.records.insert(
                    key.clone(),
                    AssetRecord {
                        bundle,
                        state: AssetState::Loaded {
                            payload: Arc::clone(&payload),
                        },
                        refs: waiters.len() + usize::from(caller),
                    },
                );
                log::debug!("Asset {key} loaded");
                Ok(payload)
            }
            Err(source) => {
                ctx.metrics.record_failure();
                log::error!("Failed to read asset {key}: {source}");
                bundles.release_ref(ctx, &bundle);
                Err(LoadError::storage(&key, source))
            }
        };

        for waiter in waiters {
            waiter(outcome.clone());
        }
        outcome
    }

    /// Drop one reference on a delivered payload
    ///
    /// At zero the asset is forgotten and its bundle reference released.
    /// Returns false if the payload is not owned by this cache.
    pub fn release(
        &mut self,
        ctx: LoadContext<'_, S>,
        bundles: &mut BundleCache<S>,
        payload: &Arc<S::Asset>,
    ) -> bool {
        let found = self.records.iter_mut().find(|(_, record)| {
            matches!(&record.state, AssetState::Loaded { payload: owned } if Arc::ptr_eq(owned, payload))
        });
        let Some((key, record)) = found else {
            return false;
        };
        let key = key.clone();

        record.refs = record.refs.saturating_sub(1);
        if record.refs > 0 {
            return true;
        }

        if let Some(record) = self.records.remove(&key) {
            log::debug!("Asset {key} released");
            bundles.release_ref(ctx, &record.bundle);
        }
        true
    }

    /// Forget every asset of a bundle that is being torn down
    ///
    /// Pending waiters receive [`LoadError::Released`]. No bundle references
    /// are released; the bundle is going away regardless.
    pub fn evict_bundle(&mut self, bundle: &BundleName) -> usize {
        let keys: Vec<String> = self
            .records
            .iter()
            .filter(|(_, record)| record.bundle == *bundle)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            if let Some(record) = self.records.remove(key) {
                fail_waiters(record.state, key);
            }
        }
        keys.len()
    }

    /// Forget every asset
    pub fn release_all(&mut self) -> usize {
        let records = std::mem::take(&mut self.records);
        let count = records.len();
        for (key, record) in records {
            fail_waiters(record.state, &key);
        }
        count
    }
}

fn fail_waiters<S: BundleStorage>(state: AssetState<S>, key: &str) {
    match state {
        AssetState::AwaitingBundle { waiters } | AssetState::Reading { waiters, .. } => {
            for waiter in waiters {
                waiter(Err(LoadError::Released(key.to_string())));
            }
        }
        AssetState::Loaded { .. } => {}
    }
}

/// Read an asset out of its Loaded bundle, taking a reference for the read
fn read_now<S: BundleStorage>(
    ctx: LoadContext<'_, S>,
    bundles: &mut BundleCache<S>,
    bundle: &BundleName,
    key: &str,
) -> StorageResult<S::Asset> {
    bundles.add_ref(bundle);
    let Some(handle) = bundles.handle(bundle) else {
        panic!("bundle {bundle} acquired but has no handle");
    };
    ctx.metrics.record_asset_load();
    ctx.storage.read_asset(handle, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LoaderMetrics;
    use crate::catalog::Catalog;
    use crate::manifest::{AssetEntry, DependencyEntry};
    use crate::storage::{MockAsset, MockStorage};
    use std::cell::RefCell;
    use std::rc::Rc;

    type Delivered = Rc<RefCell<Vec<Result<Arc<MockAsset>>>>>;

    struct Fixture {
        storage: MockStorage,
        catalog: Catalog,
        metrics: LoaderMetrics,
        bundles: BundleCache<MockStorage>,
        assets: AssetCache<MockStorage>,
    }

    impl Fixture {
        fn new() -> Self {
            let storage = MockStorage::new();
            storage.add_bundle("ui.ab", &["ui/panel.prefab", "ui/icon.png"]);
            storage.add_bundle("fonts.ab", &[]);

            let mut catalog = Catalog::new("ab");
            catalog.ingest(
                &[
                    AssetEntry {
                        asset_path: "UI/Panel.prefab".into(),
                        bundle_name: "ui".into(),
                    },
                    AssetEntry {
                        asset_path: "ui/icon.png".into(),
                        bundle_name: "ui".into(),
                    },
                ],
                &[DependencyEntry {
                    name: "ui".into(),
                    dependencies: vec!["fonts".into()],
                }],
            );
            Self {
                storage,
                catalog,
                metrics: LoaderMetrics::new(),
                bundles: BundleCache::new(),
                assets: AssetCache::new(),
            }
        }

        fn load(&mut self, path: &str) -> Result<Arc<MockAsset>> {
            let ctx = LoadContext {
                storage: &self.storage,
                catalog: &self.catalog,
                metrics: &self.metrics,
            };
            self.assets.load(ctx, &mut self.bundles, path)
        }

        fn load_async(&mut self, path: &str, delivered: &Delivered) {
            let ctx = LoadContext {
                storage: &self.storage,
                catalog: &self.catalog,
                metrics: &self.metrics,
            };
            let delivered = Rc::clone(delivered);
            self.assets.load_async(
                ctx,
                &mut self.bundles,
                path,
                Box::new(move |result| delivered.borrow_mut().push(result)),
            );
            self.assets.apply_notices(ctx, &mut self.bundles);
        }

        fn tick(&mut self) {
            let ctx = LoadContext {
                storage: &self.storage,
                catalog: &self.catalog,
                metrics: &self.metrics,
            };
            self.bundles.advance(ctx);
            self.assets.apply_notices(ctx, &mut self.bundles);
            self.assets.advance(ctx, &mut self.bundles);
        }

        fn release(&mut self, payload: &Arc<MockAsset>) -> bool {
            let ctx = LoadContext {
                storage: &self.storage,
                catalog: &self.catalog,
                metrics: &self.metrics,
            };
            self.assets.release(ctx, &mut self.bundles, payload)
        }
    }

    #[test]
    fn test_sync_load_and_refcounted_release() {
        let mut fx = Fixture::new();
        let first = fx.load("ui/panel.prefab").unwrap();
        let second = fx.load("UI\\Panel.prefab").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fx.assets.refs("ui/panel.prefab"), 2);
        assert_eq!(fx.storage.asset_reads("ui/panel.prefab"), 1);
        assert_eq!(fx.storage.live_bundles(), 2);

        assert!(fx.release(&first));
        assert_eq!(fx.assets.status("ui/panel.prefab"), LoadStatus::Loaded);
        assert!(fx.release(&second));
        assert_eq!(fx.assets.status("ui/panel.prefab"), LoadStatus::Unloaded);

        // The bundle and its dependency went with the last reference
        assert_eq!(fx.storage.live_bundles(), 0);
        assert!(!fx.release(&first));
    }

    #[test]
    fn test_bundle_kept_while_sibling_asset_loaded() {
        let mut fx = Fixture::new();
        let panel = fx.load("ui/panel.prefab").unwrap();
        let _icon = fx.load("ui/icon.png").unwrap();

        fx.release(&panel);
        assert_eq!(fx.bundles.status(&fx.catalog.bundle_name("ui")), LoadStatus::Loaded);
        assert_eq!(fx.storage.live_bundles(), 2);
    }

    #[test]
    fn test_unknown_asset() {
        let mut fx = Fixture::new();
        assert_eq!(
            fx.load("nope.png").unwrap_err(),
            LoadError::AssetNotFound("nope.png".to_string())
        );

        let delivered: Delivered = Rc::default();
        fx.load_async("nope.png", &delivered);
        assert!(delivered.borrow()[0].as_ref().unwrap_err().is_not_found());
        assert!(fx.assets.is_empty());
    }

    #[test]
    fn test_async_fan_out_single_read() {
        let mut fx = Fixture::new();
        let delivered: Delivered = Rc::default();
        fx.load_async("ui/panel.prefab", &delivered);
        fx.load_async("ui/panel.prefab", &delivered);
        assert_eq!(fx.assets.status("ui/panel.prefab"), LoadStatus::Loading);

        fx.storage.complete("ui.ab");
        fx.storage.complete("fonts.ab");
        fx.tick();
        assert!(delivered.borrow().is_empty());

        fx.storage.complete("ui/panel.prefab");
        fx.tick();

        let delivered = delivered.borrow();
        assert_eq!(delivered.len(), 2);
        let a = delivered[0].as_ref().unwrap();
        let b = delivered[1].as_ref().unwrap();
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(fx.storage.asset_reads("ui/panel.prefab"), 1);
        assert_eq!(fx.assets.refs("ui/panel.prefab"), 2);
    }

    #[test]
    fn test_sync_load_promotes_waiting_asset() {
        let mut fx = Fixture::new();
        let delivered: Delivered = Rc::default();
        fx.load_async("ui/panel.prefab", &delivered);

        let payload = fx.load("ui/panel.prefab").unwrap();
        assert_eq!(fx.storage.bundle_reads("ui.ab"), 1);
        assert_eq!(fx.storage.asset_reads("ui/panel.prefab"), 1);
        assert!(Arc::ptr_eq(&payload, delivered.borrow()[0].as_ref().unwrap()));
        assert_eq!(fx.assets.refs("ui/panel.prefab"), 2);

        // The stale bundle notice is ignored
        fx.tick();
        assert_eq!(fx.assets.status("ui/panel.prefab"), LoadStatus::Loaded);
    }

    #[test]
    fn test_failed_read_is_retryable() {
        let mut fx = Fixture::new();
        fx.storage.fail("ui/panel.prefab");
        assert!(matches!(
            fx.load("ui/panel.prefab"),
            Err(LoadError::Storage { .. })
        ));
        assert_eq!(fx.assets.status("ui/panel.prefab"), LoadStatus::Unloaded);
        // Nothing else holds the bundle or its dependency
        assert_eq!(fx.bundles.status(&fx.catalog.bundle_name("ui")), LoadStatus::Unloaded);
        assert_eq!(fx.storage.live_bundles(), 0);

        fx.storage.heal("ui/panel.prefab");
        assert!(fx.load("ui/panel.prefab").is_ok());
        assert_eq!(fx.storage.asset_reads("ui/panel.prefab"), 2);
    }

    #[test]
    fn test_failed_async_read_releases_bundle() {
        let mut fx = Fixture::new();
        fx.storage.fail("ui/panel.prefab");
        let delivered: Delivered = Rc::default();
        fx.load_async("ui/panel.prefab", &delivered);

        fx.storage.complete("ui.ab");
        fx.storage.complete("fonts.ab");
        fx.tick();
        // The in-flight read holds the bundle
        assert_eq!(fx.bundles.refs(&fx.catalog.bundle_name("ui")), 1);

        fx.storage.complete("ui/panel.prefab");
        fx.tick();
        assert!(matches!(
            delivered.borrow()[0],
            Err(LoadError::Storage { .. })
        ));
        assert!(fx.bundles.is_empty());
        assert_eq!(fx.storage.live_bundles(), 0);
    }

    #[test]
    fn test_failed_read_keeps_bundle_with_loaded_sibling() {
        let mut fx = Fixture::new();
        let icon = fx.load("ui/icon.png").unwrap();
        fx.storage.fail("ui/panel.prefab");
        assert!(fx.load("ui/panel.prefab").is_err());

        assert_eq!(fx.bundles.refs(&fx.catalog.bundle_name("ui")), 1);
        assert!(fx.release(&icon));
        assert_eq!(fx.storage.live_bundles(), 0);
    }

    #[test]
    fn test_bundle_failure_reaches_asset_waiters() {
        let mut fx = Fixture::new();
        fx.storage.fail("ui.ab");
        let delivered: Delivered = Rc::default();
        fx.load_async("ui/icon.png", &delivered);

        fx.storage.complete("ui.ab");
        fx.storage.complete("fonts.ab");
        fx.tick();

        assert!(matches!(
            delivered.borrow()[0],
            Err(LoadError::Storage { .. })
        ));
        assert!(fx.assets.is_empty());
    }

    #[test]
    fn test_evict_bundle_cancels_waiters() {
        let mut fx = Fixture::new();
        let delivered: Delivered = Rc::default();
        fx.load_async("ui/icon.png", &delivered);

        let evicted = fx.assets.evict_bundle(&fx.catalog.bundle_name("ui"));
        assert_eq!(evicted, 1);
        assert!(matches!(delivered.borrow()[0], Err(LoadError::Released(_))));
    }
}

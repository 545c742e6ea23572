//! Bundle cache: dependency-first loading and the bundle state machine
//!
//! Synchronous acquires load every direct dependency before the bundle
//! itself. Asynchronous acquires start dependency loads in the background and
//! are promoted to Loaded by [`BundleCache::advance`] only once their own
//! request is done *and* every direct dependency is Loaded.

use std::collections::HashMap;
use std::time::Instant;

use super::{LoadContext, LoadStatus};
use crate::catalog::BundleName;
use crate::error::{LoadError, Result};
use crate::storage::{BundleStorage, LoadRequest};

/// Callback for bundle-level async loads
pub type BundleCallback = Box<dyn FnOnce(Result<()>)>;

/// Someone waiting for a bundle to settle
pub enum BundleWaiter {
    /// User callback; on success the bundle gains one pin
    Callback(BundleCallback),
    /// An asset waiting to start its own read; reported through notices.
    /// A successful notice carries one bundle reference for the read.
    Asset(String),
    /// Background dependency load nobody waits on
    Detached,
}

impl std::fmt::Debug for BundleWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback"),
            Self::Asset(path) => f.debug_tuple("Asset").field(path).finish(),
            Self::Detached => f.write_str("Detached"),
        }
    }
}

/// Outcome of a bundle load delivered to a waiting asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleNotice {
    pub asset: String,
    pub bundle: BundleName,
    pub result: Result<()>,
}

enum BundleState<S: BundleStorage> {
    Loading {
        request: S::BundleRequest,
        waiters: Vec<BundleWaiter>,
    },
    Loaded {
        handle: S::Bundle,
    },
}

struct BundleRecord<S: BundleStorage> {
    state: BundleState<S>,
    /// Loaded or reading assets plus loaded dependents plus user pins
    refs: usize,
    /// User pins, a subset of `refs`
    pins: usize,
    started: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    /// Completion sweep: only settle if done and dependencies are ready
    Poll,
    /// Promotion: wait for the request, dependencies already acquired
    Block,
}

enum Settled {
    Pending,
    Done(Result<()>),
}

/// Per-bundle state table
pub struct BundleCache<S: BundleStorage> {
    records: HashMap<BundleName, BundleRecord<S>>,
    notices: Vec<BundleNotice>,
}

impl<S: BundleStorage> Default for BundleCache<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BundleStorage> BundleCache<S> {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            notices: Vec::new(),
        }
    }

    pub fn status(&self, name: &BundleName) -> LoadStatus {
        match self.records.get(name).map(|record| &record.state) {
            None => LoadStatus::Unloaded,
            Some(BundleState::Loading { .. }) => LoadStatus::Loading,
            Some(BundleState::Loaded { .. }) => LoadStatus::Loaded,
        }
    }

    /// Native handle of a Loaded bundle
    pub fn handle(&self, name: &BundleName) -> Option<&S::Bundle> {
        match self.records.get(name).map(|record| &record.state) {
            Some(BundleState::Loaded { handle }) => Some(handle),
            _ => None,
        }
    }

    pub fn refs(&self, name: &BundleName) -> usize {
        self.records.get(name).map_or(0, |record| record.refs)
    }

    pub fn pins(&self, name: &BundleName) -> usize {
        self.records.get(name).map_or(0, |record| record.pins)
    }

    /// Number of records (Loading or Loaded)
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn loading_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| matches!(record.state, BundleState::Loading { .. }))
            .count()
    }

    /// Drain the bundle outcomes queued for waiting assets
    pub fn take_notices(&mut self) -> Vec<BundleNotice> {
        std::mem::take(&mut self.notices)
    }

    /// Load a bundle and its dependencies, blocking until done
    ///
    /// An in-flight async load of the same bundle is promoted instead of
    /// being duplicated.
    pub fn acquire(&mut self, ctx: LoadContext<'_, S>, name: &BundleName) -> Result<()> {
        if !ctx.catalog.bundle_exists(name.as_str()) {
            log::warn!("Bundle {name} is not in the manifest");
            return Err(LoadError::BundleNotFound(name.clone()));
        }

        match self.status(name) {
            LoadStatus::Loaded => {
                ctx.metrics.record_cache_hit();
                Ok(())
            }
            LoadStatus::Loading => {
                self.acquire_dependencies(ctx, name)?;
                log::debug!("Promoting in-flight load of {name} to synchronous");
                ctx.metrics.record_promotion();
                match self.settle(ctx, name, Settle::Block) {
                    Settled::Done(result) => result,
                    Settled::Pending => unreachable!("blocking settle always completes"),
                }
            }
            LoadStatus::Unloaded => {
                ctx.metrics.record_cache_miss();
                if let Some(chain) = ctx.catalog.graph().find_cycle(name.as_str()) {
                    return Err(LoadError::CyclicDependency { chain });
                }
                self.acquire_dependencies(ctx, name)?;

                let started = Instant::now();
                ctx.metrics.record_bundle_load();
                log::info!("Loading bundle {name} ({})", ctx.storage.backend_name());
                match ctx.storage.read_bundle(name) {
                    Ok(handle) => {
                        self.insert_loaded(ctx, name, handle, started);
                        Ok(())
                    }
                    Err(source) => {
                        ctx.metrics.record_failure();
                        log::error!("Failed to load bundle {name}: {source}");
                        self.release_unreferenced_dependencies(ctx, name);
                        Err(LoadError::storage(name, source))
                    }
                }
            }
        }
    }

    /// Synchronously acquire every direct dependency of `name`
    ///
    /// If one fails, dependencies this left loaded without references are
    /// unloaded again.
    fn acquire_dependencies(&mut self, ctx: LoadContext<'_, S>, name: &BundleName) -> Result<()> {
        for dep in ctx.catalog.graph().direct_dependencies(name.as_str()) {
            if let Err(err) = self.acquire(ctx, dep) {
                self.release_unreferenced_dependencies(ctx, name);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Start loading a bundle without blocking
    ///
    /// `waiter` is resolved immediately when the outcome is already known,
    /// otherwise when [`BundleCache::advance`] settles the bundle.
    pub fn acquire_async(&mut self, ctx: LoadContext<'_, S>, name: &BundleName, waiter: BundleWaiter) {
        if !ctx.catalog.bundle_exists(name.as_str()) {
            log::warn!("Bundle {name} is not in the manifest");
            self.resolve(name, waiter, Err(LoadError::BundleNotFound(name.clone())));
            return;
        }

        match self.status(name) {
            LoadStatus::Loaded => {
                ctx.metrics.record_cache_hit();
                self.resolve(name, waiter, Ok(()));
            }
            LoadStatus::Loading => {
                if let Some(BundleRecord {
                    state: BundleState::Loading { waiters, .. },
                    ..
                }) = self.records.get_mut(name)
                {
                    waiters.push(waiter);
                }
            }
            LoadStatus::Unloaded => {
                ctx.metrics.record_cache_miss();
                if let Some(chain) = ctx.catalog.graph().find_cycle(name.as_str()) {
                    self.resolve(name, waiter, Err(LoadError::CyclicDependency { chain }));
                    return;
                }
                // Dependencies are not awaited here; the sweep checks them.
                for dep in ctx.catalog.graph().direct_dependencies(name.as_str()) {
                    self.acquire_async(ctx, dep, BundleWaiter::Detached);
                }

                ctx.metrics.record_bundle_load();
                log::info!("Loading bundle {name} asynchronously ({})", ctx.storage.backend_name());
                let request = ctx.storage.read_bundle_async(name);
                self.records.insert(
                    name.clone(),
                    BundleRecord {
                        state: BundleState::Loading {
                            request,
                            waiters: vec![waiter],
                        },
                        refs: 0,
                        pins: 0,
                        started: Instant::now(),
                    },
                );
            }
        }
    }

    /// Completion sweep, called once per tick
    ///
    /// Repeats passes until one settles nothing, so a fully completed chain
    /// resolves dependency-first within a single call. Returns the number of
    /// bundles settled (loaded or failed).
    pub fn advance(&mut self, ctx: LoadContext<'_, S>) -> usize {
        let mut settled = 0;
        loop {
            let mut loading: Vec<BundleName> = self
                .records
                .iter()
                .filter(|(_, record)| matches!(record.state, BundleState::Loading { .. }))
                .map(|(name, _)| name.clone())
                .collect();
            loading.sort();

            let mut progressed = false;
            for name in loading {
                if let Settled::Done(_) = self.settle(ctx, &name, Settle::Poll) {
                    progressed = true;
                    settled += 1;
                }
            }
            if !progressed {
                break;
            }
        }
        settled
    }

    /// The single Loading -> Loaded/Unloaded transition
    ///
    /// In `Poll` mode the bundle only settles once its request is done and
    /// every direct dependency is Loaded; a dependency without any record
    /// fails it. In `Block` mode the request is waited on directly.
    fn settle(&mut self, ctx: LoadContext<'_, S>, name: &BundleName, mode: Settle) -> Settled {
        let done = match self.records.get_mut(name).map(|record| &mut record.state) {
            Some(BundleState::Loading { request, .. }) => mode == Settle::Block || request.is_done(),
            Some(BundleState::Loaded { .. }) => panic!("bundle {name} settled while already loaded"),
            None => panic!("bundle {name} settled without an in-flight record"),
        };
        if !done {
            return Settled::Pending;
        }

        let mut failed_dependency = None;
        if mode == Settle::Poll {
            for dep in ctx.catalog.graph().direct_dependencies(name.as_str()) {
                match self.status(dep) {
                    LoadStatus::Loaded => {}
                    LoadStatus::Loading => return Settled::Pending,
                    LoadStatus::Unloaded => {
                        failed_dependency = Some(dep.clone());
                        break;
                    }
                }
            }
        }

        let Some(BundleRecord {
            state: BundleState::Loading { request, waiters },
            started,
            ..
        }) = self.records.remove(name)
        else {
            unreachable!("record state checked above");
        };

        let outcome = match (request.wait(), failed_dependency) {
            (Ok(handle), None) => {
                self.insert_loaded(ctx, name, handle, started);
                Ok(())
            }
            (Ok(handle), Some(dependency)) => {
                ctx.storage.release_bundle(handle);
                Err(LoadError::DependencyFailed {
                    bundle: name.clone(),
                    dependency,
                })
            }
            (Err(source), _) => Err(LoadError::storage(name, source)),
        };

        for waiter in waiters {
            self.resolve(name, waiter, outcome.clone());
        }
        match &outcome {
            Err(err) => {
                ctx.metrics.record_failure();
                log::error!("Failed to load bundle {name}: {err}");
                self.release_unreferenced_dependencies(ctx, name);
            }
            // A blocking caller takes its own reference after returning
            Ok(()) if mode == Settle::Poll => self.release_unreferenced(ctx, name),
            Ok(()) => {}
        }
        Settled::Done(outcome)
    }

    fn insert_loaded(
        &mut self,
        ctx: LoadContext<'_, S>,
        name: &BundleName,
        handle: S::Bundle,
        started: Instant,
    ) {
        if self.records.contains_key(name) {
            panic!("bundle {name} registered twice");
        }
        for dep in ctx.catalog.graph().direct_dependencies(name.as_str()) {
            self.add_ref(dep);
        }
        self.records.insert(
            name.clone(),
            BundleRecord {
                state: BundleState::Loaded { handle },
                refs: 0,
                pins: 0,
                started,
            },
        );

        let elapsed = started.elapsed();
        ctx.metrics.record_load_time(name.to_string(), elapsed);
        log::debug!("Bundle {name} loaded in {elapsed:?}");
    }

    fn resolve(&mut self, name: &BundleName, waiter: BundleWaiter, result: Result<()>) {
        match waiter {
            BundleWaiter::Callback(callback) => {
                if result.is_ok() {
                    self.pin(name);
                }
                callback(result);
            }
            BundleWaiter::Asset(asset) => {
                if result.is_ok() {
                    self.add_ref(name);
                }
                self.notices.push(BundleNotice {
                    asset,
                    bundle: name.clone(),
                    result,
                });
            }
            BundleWaiter::Detached => {
                if let Err(err) = result {
                    log::warn!("Background load of {name} failed: {err}");
                }
            }
        }
    }

    /// Take one reference on a Loaded bundle
    pub fn add_ref(&mut self, name: &BundleName) {
        if let Some(record) = self.records.get_mut(name) {
            record.refs += 1;
        }
    }

    /// Drop one reference; the bundle is unloaded when none remain
    pub fn release_ref(&mut self, ctx: LoadContext<'_, S>, name: &BundleName) {
        let Some(record) = self.records.get_mut(name) else {
            return;
        };
        if record.refs == 0 {
            log::warn!("Reference released on unreferenced bundle {name}");
            return;
        }
        record.refs -= 1;
        if record.refs == 0 {
            self.release_unreferenced(ctx, name);
        }
    }

    /// Take a user pin on a Loaded bundle
    pub fn pin(&mut self, name: &BundleName) {
        if let Some(record) = self.records.get_mut(name) {
            record.refs += 1;
            record.pins += 1;
        }
    }

    /// Drop a user pin; returns false if the bundle holds none
    ///
    /// References held by assets and dependents are never touched.
    pub fn unpin(&mut self, ctx: LoadContext<'_, S>, name: &BundleName) -> bool {
        let Some(record) = self.records.get_mut(name) else {
            return false;
        };
        if record.pins == 0 {
            log::warn!("Bundle {name} is not pinned");
            return false;
        }
        record.pins -= 1;
        self.release_ref(ctx, name);
        true
    }

    /// Unload a Loaded bundle nothing refers to
    ///
    /// A bundle that an in-flight load still lists as a direct dependency is
    /// kept; that load either references or releases it when it settles.
    fn release_unreferenced(&mut self, ctx: LoadContext<'_, S>, name: &BundleName) {
        let unreferenced = matches!(
            self.records.get(name),
            Some(BundleRecord {
                state: BundleState::Loaded { .. },
                refs: 0,
                ..
            })
        );
        if unreferenced && !self.awaited_by_loading(ctx, name) {
            self.release(ctx, name, false);
        }
    }

    fn release_unreferenced_dependencies(&mut self, ctx: LoadContext<'_, S>, name: &BundleName) {
        for dep in ctx.catalog.graph().direct_dependencies(name.as_str()) {
            self.release_unreferenced(ctx, dep);
        }
    }

    fn awaited_by_loading(&self, ctx: LoadContext<'_, S>, name: &BundleName) -> bool {
        self.records.iter().any(|(dependent, record)| {
            matches!(record.state, BundleState::Loading { .. })
                && ctx
                    .catalog
                    .graph()
                    .direct_dependencies(dependent.as_str())
                    .contains(name)
        })
    }

    /// Unload one bundle
    ///
    /// Without `force` a referenced bundle is kept and `false` returned. An
    /// in-flight load is waited on so its handle can be released; its waiters
    /// receive [`LoadError::Released`].
    pub fn release(&mut self, ctx: LoadContext<'_, S>, name: &BundleName, force: bool) -> bool {
        let Some(record) = self.records.get(name) else {
            return false;
        };
        if !force && record.refs > 0 {
            log::warn!("Bundle {name} still has {} references, not unloading", record.refs);
            return false;
        }
        let Some(record) = self.records.remove(name) else {
            return false;
        };

        match record.state {
            BundleState::Loaded { handle } => {
                ctx.storage.release_bundle(handle);
                for dep in ctx.catalog.graph().direct_dependencies(name.as_str()) {
                    self.release_ref(ctx, dep);
                }
            }
            BundleState::Loading { request, waiters } => {
                if let Ok(handle) = request.wait() {
                    ctx.storage.release_bundle(handle);
                }
                for waiter in waiters {
                    self.resolve(name, waiter, Err(LoadError::Released(name.to_string())));
                }
            }
        }
        log::info!("Unloaded bundle {name}");
        true
    }

    /// Unload everything, completing in-flight loads first
    ///
    /// Returns the number of records released; a second call returns 0.
    pub fn release_all(&mut self, ctx: LoadContext<'_, S>) -> usize {
        let records = std::mem::take(&mut self.records);
        let count = records.len();

        for (name, record) in records {
            match record.state {
                BundleState::Loaded { handle } => ctx.storage.release_bundle(handle),
                BundleState::Loading { request, waiters } => {
                    if let Ok(handle) = request.wait() {
                        ctx.storage.release_bundle(handle);
                    }
                    for waiter in waiters {
                        self.resolve(&name, waiter, Err(LoadError::Released(name.to_string())));
                    }
                }
            }
        }
        self.notices.clear();
        count
    }
}

//! Integration tests for the asynchronous loading pipeline

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use bundle_loader::storage::MockAsset;
use bundle_loader::{
    AssetEntry, DependencyEntry, LoadError, LoadStatus, Loader, Manifest, MockStorage, Result,
};

type Delivered = Rc<RefCell<Vec<Result<Arc<MockAsset>>>>>;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `a -> b -> c`, one asset per bundle
fn chain_loader() -> (MockStorage, Loader<MockStorage>) {
    init_logger();
    let storage = MockStorage::new();
    storage.add_bundle("a.ab", &["a/root.prefab"]);
    storage.add_bundle("b.ab", &["b/mid.prefab"]);
    storage.add_bundle("c.ab", &["c/leaf.prefab"]);

    let manifest = Manifest {
        dependencies: vec![
            DependencyEntry {
                name: "a".into(),
                dependencies: vec!["b".into()],
            },
            DependencyEntry {
                name: "b".into(),
                dependencies: vec!["c".into()],
            },
        ],
        asset_to_bundle: vec![
            AssetEntry {
                asset_path: "a/root.prefab".into(),
                bundle_name: "a".into(),
            },
            AssetEntry {
                asset_path: "b/mid.prefab".into(),
                bundle_name: "b".into(),
            },
            AssetEntry {
                asset_path: "c/leaf.prefab".into(),
                bundle_name: "c".into(),
            },
        ],
    };
    let loader = Loader::from_manifest(&manifest, storage.clone());
    (storage, loader)
}

fn request(loader: &mut Loader<MockStorage>, path: &str, delivered: &Delivered) {
    let delivered = Rc::clone(delivered);
    loader.load_async(path, move |result| delivered.borrow_mut().push(result));
}

#[test]
fn test_at_most_one_load_in_flight() {
    let (storage, mut loader) = chain_loader();
    let delivered: Delivered = Rc::default();
    request(&mut loader, "c/leaf.prefab", &delivered);
    request(&mut loader, "c/leaf.prefab", &delivered);
    assert_eq!(loader.pending(), 2);

    storage.complete("c.ab");
    loader.advance();
    storage.complete("c/leaf.prefab");
    loader.advance();

    assert_eq!(storage.bundle_reads("c.ab"), 1);
    assert_eq!(storage.asset_reads("c/leaf.prefab"), 1);

    let delivered = delivered.borrow();
    assert_eq!(delivered.len(), 2);
    let first = delivered[0].as_ref().unwrap();
    let second = delivered[1].as_ref().unwrap();
    assert!(Arc::ptr_eq(first, second));
    assert_eq!(loader.pending(), 0);
}

#[test]
fn test_dependency_gated_readiness() {
    let (storage, mut loader) = chain_loader();
    let delivered: Delivered = Rc::default();
    request(&mut loader, "a/root.prefab", &delivered);
    assert_eq!(loader.bundle_status("c"), LoadStatus::Loading);

    let settled = Rc::new(RefCell::new(Vec::new()));
    for bundle in ["a", "b", "c"] {
        let settled = Rc::clone(&settled);
        loader.load_bundle_async(bundle, move |_| settled.borrow_mut().push(bundle));
    }

    // b finishes before c: nothing may become Loaded yet
    storage.complete("a.ab");
    storage.complete("b.ab");
    loader.advance();
    assert_eq!(loader.bundle_status("a"), LoadStatus::Loading);
    assert_eq!(loader.bundle_status("b"), LoadStatus::Loading);
    assert!(settled.borrow().is_empty());

    storage.complete("c.ab");
    loader.advance();
    assert_eq!(loader.bundle_status("c"), LoadStatus::Loaded);
    assert_eq!(loader.bundle_status("b"), LoadStatus::Loaded);
    assert_eq!(loader.bundle_status("a"), LoadStatus::Loaded);
    assert_eq!(*settled.borrow(), vec!["c", "b", "a"]);

    assert!(delivered.borrow().is_empty());
    storage.complete("a/root.prefab");
    loader.advance();
    assert!(delivered.borrow()[0].is_ok());
}

#[test]
fn test_sync_load_promotes_async_load() {
    let (storage, mut loader) = chain_loader();
    let delivered: Delivered = Rc::default();
    request(&mut loader, "a/root.prefab", &delivered);

    let payload = loader.load("a/root.prefab").unwrap();
    for bundle in ["a.ab", "b.ab", "c.ab"] {
        assert_eq!(storage.bundle_reads(bundle), 1, "{bundle} read twice");
    }
    assert_eq!(storage.asset_reads("a/root.prefab"), 1);
    assert!(loader.metrics().promotions() >= 3);

    // The pending callback saw the same payload
    assert!(Arc::ptr_eq(&payload, delivered.borrow()[0].as_ref().unwrap()));

    // Later ticks find nothing left to do
    assert_eq!(loader.advance(), 0);
    assert_eq!(loader.pending(), 0);
}

#[test]
fn test_callbacks_resolve_in_request_order() {
    let (storage, mut loader) = chain_loader();
    let order = Rc::new(RefCell::new(Vec::new()));
    for id in 0..4 {
        let order = Rc::clone(&order);
        loader.load_async("b/mid.prefab", move |_| order.borrow_mut().push(id));
    }

    storage.complete("b.ab");
    storage.complete("c.ab");
    loader.advance();
    storage.complete("b/mid.prefab");
    loader.advance();

    assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
}

#[test]
fn test_cached_asset_resolves_immediately() {
    let (_storage, mut loader) = chain_loader();
    let payload = loader.load("c/leaf.prefab").unwrap();

    let delivered: Delivered = Rc::default();
    request(&mut loader, "c/leaf.prefab", &delivered);
    assert!(Arc::ptr_eq(&payload, delivered.borrow()[0].as_ref().unwrap()));
    assert_eq!(loader.asset_refs("c/leaf.prefab"), 2);
    assert_eq!(loader.metrics().cache_hits(), 1);
}

#[test]
fn test_unknown_asset_fails_immediately() {
    let (_storage, mut loader) = chain_loader();
    let delivered: Delivered = Rc::default();
    request(&mut loader, "missing/thing.prefab", &delivered);
    assert!(matches!(
        delivered.borrow()[0],
        Err(LoadError::AssetNotFound(_))
    ));
    assert_eq!(loader.pending(), 0);
}

#[test]
fn test_physical_failure_then_retry() {
    let (storage, mut loader) = chain_loader();
    storage.fail("c.ab");

    let delivered: Delivered = Rc::default();
    request(&mut loader, "b/mid.prefab", &delivered);
    storage.complete("b.ab");
    storage.complete("c.ab");
    loader.advance();

    // c failed, so b failed behind it
    assert!(matches!(
        delivered.borrow()[0],
        Err(LoadError::DependencyFailed { .. })
    ));
    assert_eq!(loader.bundle_status("b"), LoadStatus::Unloaded);
    assert_eq!(loader.bundle_status("c"), LoadStatus::Unloaded);
    assert_eq!(storage.live_bundles(), 0);

    storage.heal("c.ab");
    assert!(loader.load("b/mid.prefab").is_ok());
    assert_eq!(storage.bundle_reads("c.ab"), 2);
}

#[test]
fn test_cycle_rejected() {
    init_logger();
    let storage = MockStorage::auto_complete();
    storage.add_bundle("x.ab", &["x/item"]);
    storage.add_bundle("y.ab", &[]);
    let manifest = Manifest::from_json_str(
        r#"{
            "dependencies": [
                { "name": "x", "dependencies": ["y"] },
                { "name": "y", "dependencies": ["x"] }
            ],
            "asset_to_bundle": [ { "asset_path": "x/item", "bundle_name": "x" } ]
        }"#,
    )
    .unwrap();
    let mut loader = Loader::from_manifest(&manifest, storage.clone());

    assert!(matches!(
        loader.load("x/item"),
        Err(LoadError::CyclicDependency { .. })
    ));

    let delivered: Delivered = Rc::default();
    request(&mut loader, "x/item", &delivered);
    loader.advance();
    assert!(matches!(
        delivered.borrow()[0],
        Err(LoadError::CyclicDependency { .. })
    ));
    assert_eq!(storage.bundle_reads("x.ab"), 0);
}

#[test]
fn test_bundle_level_async_load() {
    let (storage, mut loader) = chain_loader();
    let outcome = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&outcome);
    loader.load_bundle_async("b", move |result| *sink.borrow_mut() = Some(result));

    storage.complete("b.ab");
    storage.complete("c.ab");
    loader.advance();

    assert_eq!(*outcome.borrow(), Some(Ok(())));
    // One pin from the callback
    assert_eq!(loader.bundle_refs("b"), 1);
    assert!(loader.release_bundle("b"));
    assert_eq!(storage.live_bundles(), 0);
}

#[test]
fn test_load_all_async() {
    let (storage, mut loader) = chain_loader();
    let outcome = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&outcome);
    loader.load_all_async("c", false, move |result| {
        *sink.borrow_mut() = Some(result.map(|assets| assets.len()));
    });

    storage.complete("c.ab");
    loader.advance();
    storage.complete("c/leaf.prefab");
    loader.advance();

    assert_eq!(*outcome.borrow(), Some(Ok(1)));
    assert!(loader.progress_all("c", false).unwrap().is_done());
}

#[test]
fn test_progress_follows_async_load() {
    let (storage, mut loader) = chain_loader();
    let delivered: Delivered = Rc::default();
    request(&mut loader, "a/root.prefab", &delivered);

    // a, b, c and the asset read
    let progress = loader.progress("a/root.prefab").unwrap();
    assert_eq!((progress.settled, progress.total), (0, 4));

    storage.complete("c.ab");
    loader.advance();
    assert_eq!(loader.progress("a/root.prefab").unwrap().settled, 1);

    storage.complete("a.ab");
    storage.complete("b.ab");
    loader.advance();
    let progress = loader.progress("a/root.prefab").unwrap();
    assert_eq!(progress.settled, 3);
    assert!((progress.fraction() - 0.75).abs() < f32::EPSILON);

    storage.complete("a/root.prefab");
    loader.advance();
    assert!(loader.progress("a/root.prefab").unwrap().is_done());
    assert!(delivered.borrow()[0].is_ok());
}

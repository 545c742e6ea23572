//! Tick-driven asynchronous loading example for bundle_loader

use std::cell::RefCell;
use std::rc::Rc;

use bundle_loader::{AssetEntry, DependencyEntry, Loader, Manifest, MockStorage};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("bundle_loader Async Loading Demo");
    println!("================================\n");

    let storage = MockStorage::new();
    storage.add_bundle("level.ab", &["level/terrain.mesh", "level/props.mesh"]);
    storage.add_bundle("shared.ab", &[]);

    let manifest = Manifest {
        dependencies: vec![DependencyEntry {
            name: "level".into(),
            dependencies: vec!["shared".into()],
        }],
        asset_to_bundle: vec![
            AssetEntry {
                asset_path: "level/terrain.mesh".into(),
                bundle_name: "level".into(),
            },
            AssetEntry {
                asset_path: "level/props.mesh".into(),
                bundle_name: "level".into(),
            },
        ],
    };
    let mut loader = Loader::from_manifest(&manifest, storage.clone());

    let done = Rc::new(RefCell::new(Vec::new()));
    for path in ["level/terrain.mesh", "level/props.mesh"] {
        let done = Rc::clone(&done);
        loader.load_async(path, move |result| match result {
            Ok(asset) => done.borrow_mut().push(asset),
            Err(err) => eprintln!("{path} failed: {err}"),
        });
    }

    // The mock finishes one request per tick, dependency last
    let schedule = ["level.ab", "shared.ab", "level/terrain.mesh", "level/props.mesh"];
    for (tick, target) in schedule.iter().enumerate() {
        storage.complete(target);
        let settled = loader.advance();
        let progress = loader.progress_all("level", false)?;
        println!(
            "tick {tick}: completed {target}, settled {settled}, pending {}, progress {:.0}%",
            loader.pending(),
            progress.fraction() * 100.0
        );
    }

    let done = done.borrow();
    println!("\nLoaded {} assets with {} physical bundle reads", done.len(), loader.metrics().bundle_loads());
    for asset in done.iter() {
        loader.release(asset);
    }
    anyhow::ensure!(storage.live_bundles() == 0, "bundles leaked");

    println!("Async loading example complete!");
    Ok(())
}

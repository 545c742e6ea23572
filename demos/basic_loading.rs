//! Basic loading example for bundle_loader
//!
//! Writes a tiny bundle tree to a temporary directory and loads from it.

use std::fs;
use std::path::Path;

use bundle_loader::{DirectoryStorage, Loader, LoaderConfig};

const MANIFEST: &str = r#"{
    "dependencies": [ { "name": "ui/main", "dependencies": ["shared/fonts"] } ],
    "asset_to_bundle": [
        { "asset_path": "ui/main/panel.txt", "bundle_name": "ui/main" },
        { "asset_path": "shared/fonts/body.txt", "bundle_name": "shared/fonts" }
    ]
}"#;

fn write(root: &Path, relative: &str, contents: &str) -> anyhow::Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let dir = tempfile::tempdir()?;
    write(dir.path(), "dependencies.json", MANIFEST)?;
    write(dir.path(), "ui/main.ab/panel.txt", "Hello from the panel")?;
    write(dir.path(), "shared/fonts.ab/body.txt", "glyphs")?;

    let config = LoaderConfig::new().with_root(dir.path());
    let storage = DirectoryStorage::new(config.root());
    let mut loader = Loader::from_config(config, storage)?;

    println!("bundle_loader v{}", bundle_loader::VERSION);

    let panel = loader.load("ui/main/panel.txt")?;
    println!(
        "Loaded {} ({} bytes): {}",
        panel.path,
        panel.len(),
        String::from_utf8_lossy(&panel.data)
    );
    println!("shared/fonts is {:?}", loader.bundle_status("shared/fonts"));

    loader.release(&panel);
    println!("After release, ui/main is {:?}", loader.bundle_status("ui/main"));

    let metrics = loader.metrics();
    println!(
        "Bundle loads: {}, asset loads: {}, hit rate: {:.1}%",
        metrics.bundle_loads(),
        metrics.asset_loads(),
        metrics.cache_hit_rate()
    );

    println!("Basic loading example complete!");
    Ok(())
}

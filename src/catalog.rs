//! Asset-to-bundle catalog and bundle name normalization
//!
//! The catalog is built once from the manifest when the loader starts and is
//! read-only afterwards. Every lookup goes through the same normalization so
//! `UI\Main`, `ui/main` and `ui/main.ab` all address one bundle.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::manifest::{AssetEntry, DependencyEntry, DependencyGraph, Manifest};

/// Default bundle variant suffix (without the leading dot)
pub const DEFAULT_VARIANT: &str = "ab";

/// A normalized bundle name: lowercase, forward slashes, variant suffix
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleName(String);

impl BundleName {
    /// Normalize a raw name with the given variant (`"ab"` or `".ab"`)
    pub fn normalize(raw: &str, variant: &str) -> Self {
        let mut name = normalize_path(raw);
        let suffix = variant_suffix(variant);
        if !suffix.is_empty() && !name.ends_with(&suffix) {
            name.push_str(&suffix);
        }
        Self(name)
    }

    /// Wrap a name that is already normalized
    pub fn from_normalized(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for BundleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BundleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercase and convert backslashes to forward slashes
pub fn normalize_path(raw: &str) -> String {
    raw.trim().to_lowercase().replace('\\', "/")
}

fn variant_suffix(variant: &str) -> String {
    let variant = variant.trim().to_lowercase();
    if variant.is_empty() || variant.starts_with('.') {
        variant
    } else {
        format!(".{variant}")
    }
}

/// Immutable lookup tables built from a manifest
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    variant: String,
    asset_to_bundle: HashMap<String, BundleName>,
    graph: DependencyGraph,
    known_bundles: HashSet<BundleName>,
}

impl Catalog {
    /// Create an empty catalog using `variant` as the bundle suffix
    pub fn new(variant: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            ..Default::default()
        }
    }

    /// Build a catalog from a parsed manifest
    pub fn from_manifest(manifest: &Manifest, variant: impl Into<String>) -> Self {
        let mut catalog = Self::new(variant);
        catalog.ingest(&manifest.asset_to_bundle, &manifest.dependencies);
        catalog
    }

    /// Populate the asset and dependency tables
    ///
    /// Duplicate asset paths and duplicate dependency entries keep the first
    /// mapping and log a warning.
    pub fn ingest(&mut self, assets: &[AssetEntry], dependencies: &[DependencyEntry]) {
        for entry in assets {
            let path = normalize_path(&entry.asset_path);
            let bundle = self.bundle_name(&entry.bundle_name);
            if let Some(existing) = self.asset_to_bundle.get(&path) {
                log::warn!(
                    "Duplicate asset registration {path}: keeping {existing}, ignoring {bundle}"
                );
                continue;
            }
            self.known_bundles.insert(bundle.clone());
            self.asset_to_bundle.insert(path, bundle);
        }

        for entry in dependencies {
            let name = self.bundle_name(&entry.name);
            let deps: Vec<BundleName> = entry
                .dependencies
                .iter()
                .map(|dep| self.bundle_name(dep))
                .collect();
            if self.graph.contains(name.as_str()) {
                log::warn!("Duplicate dependency entry for {name}, keeping the first");
                continue;
            }
            self.known_bundles.insert(name.clone());
            self.known_bundles.extend(deps.iter().cloned());
            self.graph.insert(name, deps);
        }

        log::debug!(
            "Catalog ingested {} assets across {} bundles",
            self.asset_to_bundle.len(),
            self.known_bundles.len()
        );
    }

    /// Normalize a raw bundle name with this catalog's variant
    pub fn bundle_name(&self, raw: &str) -> BundleName {
        BundleName::normalize(raw, &self.variant)
    }

    /// Bundle that owns `asset_path`, if the catalog knows it
    pub fn bundle_for(&self, asset_path: &str) -> Option<BundleName> {
        self.asset_to_bundle.get(&normalize_path(asset_path)).cloned()
    }

    /// True if the manifest mentions the bundle anywhere
    pub fn bundle_exists(&self, name: &str) -> bool {
        self.known_bundles.contains(self.bundle_name(name).as_str())
    }

    /// Sorted asset paths owned by `bundle`
    pub fn assets_in(&self, bundle: &str) -> Vec<String> {
        let bundle = self.bundle_name(bundle);
        let mut assets: Vec<String> = self
            .asset_to_bundle
            .iter()
            .filter(|(_, owner)| **owner == bundle)
            .map(|(path, _)| path.clone())
            .collect();
        assets.sort();
        assets
    }

    /// Dependency graph ingested with the assets
    /// The bundle at `path` plus every bundle nested below it, sorted
    ///
    /// `ui` covers `ui.ab`, `ui/main.ab` and `ui/hud/icons.ab`, but not
    /// `uikit.ab`. Only bundles the manifest knows are returned.
    pub fn bundles_under(&self, path: &str) -> Vec<BundleName> {
        let top = self.bundle_name(path.trim_end_matches(['/', '\\']));
        let suffix = variant_suffix(&self.variant);
        let stem = top.as_str().strip_suffix(suffix.as_str()).unwrap_or(top.as_str());
        let prefix = format!("{stem}/");

        let mut bundles: Vec<BundleName> = self
            .known_bundles
            .iter()
            .filter(|name| **name == top || name.as_str().starts_with(&prefix))
            .cloned()
            .collect();
        bundles.sort();
        bundles
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Variant suffix as configured
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Number of known asset paths
    pub fn asset_count(&self) -> usize {
        self.asset_to_bundle.len()
    }
}

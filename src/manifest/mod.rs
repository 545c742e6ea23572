//! Build manifest: dependency edges and asset ownership
//!
//! The manifest is produced by the content build and read once when the
//! loader starts. A missing file is tolerated (empty tables, warning); a file
//! that exists but does not parse is an error.

pub mod dependency;

pub use dependency::DependencyGraph;

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// Direct dependencies of one bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Ownership of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub asset_path: String,
    pub bundle_name: String,
}

/// Parsed manifest file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,
    #[serde(default)]
    pub asset_to_bundle: Vec<AssetEntry>,
}

impl Manifest {
    /// Parse a manifest from JSON text
    pub fn from_json_str(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a manifest from disk, falling back to an empty one if absent
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!(
                "No manifest at {}, starting with empty dependency tables",
                path.display()
            );
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(path)?;
        let manifest = Self::from_json_str(&json)?;
        log::info!(
            "Loaded manifest {}: {} dependency entries, {} assets",
            path.display(),
            manifest.dependencies.len(),
            manifest.asset_to_bundle.len()
        );
        Ok(manifest)
    }

    /// Serialize back to pretty JSON
    pub fn to_json_string(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Layer several manifests; later manifests win per bundle / asset
    ///
    /// Matches [`DependencyGraph::merge`]: the base build comes first, patch
    /// builds follow.
    pub fn merge(manifests: &[Manifest]) -> Manifest {
        let mut merged = Manifest::default();
        let mut seen_bundles = HashSet::new();
        let mut seen_assets = HashSet::new();

        for manifest in manifests.iter().rev() {
            for entry in &manifest.dependencies {
                if seen_bundles.insert(entry.name.clone()) {
                    merged.dependencies.push(entry.clone());
                }
            }
            for entry in &manifest.asset_to_bundle {
                if seen_assets.insert(entry.asset_path.clone()) {
                    merged.asset_to_bundle.push(entry.clone());
                }
            }
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_defaults() {
        let manifest = Manifest::from_json_str(r#"{ "dependencies": [ { "name": "a" } ] }"#)
            .expect("valid manifest");
        assert_eq!(manifest.dependencies.len(), 1);
        assert!(manifest.dependencies[0].dependencies.is_empty());
        assert!(manifest.asset_to_bundle.is_empty());
    }

    #[test]
    fn test_malformed_manifest_is_error() {
        assert!(matches!(
            Manifest::from_json_str("{ not json"),
            Err(ManifestError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_manifest_falls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = Manifest::load_or_default(dir.path().join("missing.json"))
            .expect("missing file is not an error");
        assert_eq!(manifest, Manifest::default());
    }

    #[test]
    fn test_merge_later_wins() {
        let base = Manifest {
            dependencies: vec![DependencyEntry {
                name: "a".into(),
                dependencies: vec!["b".into()],
            }],
            asset_to_bundle: vec![AssetEntry {
                asset_path: "x.png".into(),
                bundle_name: "a".into(),
            }],
        };
        let patch = Manifest {
            dependencies: vec![DependencyEntry {
                name: "a".into(),
                dependencies: vec!["c".into()],
            }],
            asset_to_bundle: vec![],
        };

        let merged = Manifest::merge(&[base, patch]);
        assert_eq!(merged.dependencies.len(), 1);
        assert_eq!(merged.dependencies[0].dependencies, vec!["c".to_string()]);
        assert_eq!(merged.asset_to_bundle.len(), 1);
    }
}

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::catalog::DEFAULT_VARIANT;

/// Where the loader finds its bundles and manifest
///
/// Deserializable so hosts can embed it in their own configuration files;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Directory holding the bundles and the manifest
    pub root: PathBuf,
    /// Suffix appended to bundle names, without the dot
    pub variant: String,
    /// Manifest file name, relative to `root`
    pub manifest_file: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("AssetBundles"),
            variant: DEFAULT_VARIANT.to_string(),
            manifest_file: "dependencies.json".to_string(),
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = variant.into();
        self
    }

    pub fn with_manifest_file(mut self, manifest_file: impl Into<String>) -> Self {
        self.manifest_file = manifest_file.into();
        self
    }

    /// Full path of the manifest file
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.manifest_file)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.variant, "ab");
        assert_eq!(
            config.manifest_path(),
            PathBuf::from("AssetBundles").join("dependencies.json")
        );
    }

    #[test]
    fn test_partial_deserialize() {
        let config: LoaderConfig =
            serde_json::from_str(r#"{ "root": "content", "variant": "bundle" }"#).unwrap();
        assert_eq!(config.root(), Path::new("content"));
        assert_eq!(config.variant, "bundle");
        assert_eq!(config.manifest_file, "dependencies.json");
    }

    #[test]
    fn test_builder() {
        let config = LoaderConfig::new()
            .with_root("/data")
            .with_manifest_file("deps.json")
            .with_variant("pak");
        assert_eq!(config.manifest_path(), PathBuf::from("/data/deps.json"));
        assert_eq!(config.variant, "pak");
    }
}

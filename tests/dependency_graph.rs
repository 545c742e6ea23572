//! Integration tests for dependency resolution and manifest layering

use bundle_loader::{BundleName, Catalog, DependencyEntry, DependencyGraph, Manifest};

fn name(s: &str) -> BundleName {
    BundleName::from_normalized(s)
}

fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
    edges
        .iter()
        .map(|(n, deps)| (name(n), deps.iter().map(|d| name(d)).collect()))
        .collect()
}

#[test]
fn test_closure_deduplicates_shared_dependency() {
    let forward = graph(&[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"])]);
    let reversed = graph(&[("c", &["d"]), ("b", &["d"]), ("a", &["b", "c"])]);

    for g in [forward, reversed] {
        let closure = g.all_dependencies("a");
        assert_eq!(closure, vec![name("b"), name("c"), name("d")]);
    }
}

#[test]
fn test_closure_of_leaf_is_empty() {
    let g = graph(&[("a", &["b"])]);
    assert!(g.all_dependencies("b").is_empty());
    assert!(g.all_dependencies("unknown").is_empty());
}

#[test]
fn test_merge_later_table_wins() {
    let base = graph(&[("a", &["b"])]);
    let patch = graph(&[("a", &["c"])]);
    assert_eq!(
        DependencyGraph::merge(&[base.clone(), patch.clone()]),
        graph(&[("a", &["c"])])
    );
    assert_eq!(DependencyGraph::merge(&[base.clone()]), base);
}

#[test]
fn test_merge_keeps_disjoint_entries() {
    let base = graph(&[("a", &["b"]), ("x", &[])]);
    let patch = graph(&[("a", &["c"])]);
    let merged = DependencyGraph::merge(&[base, patch]);
    assert_eq!(merged.len(), 2);
    assert_eq!(merged.direct_dependencies("x"), &[] as &[BundleName]);
    assert_eq!(merged.direct_dependencies("a"), &[name("c")]);
}

#[test]
fn test_catalog_normalizes_manifest_names() {
    let manifest = Manifest::from_json_str(
        r#"{
            "dependencies": [ { "name": "UI\\Main", "dependencies": ["shared/Fonts.ab"] } ],
            "asset_to_bundle": [ { "asset_path": "UI/Main/Panel.prefab", "bundle_name": "ui/main.ab" } ]
        }"#,
    )
    .unwrap();
    let catalog = Catalog::from_manifest(&manifest, "ab");

    assert_eq!(
        catalog.graph().direct_dependencies("ui/main.ab"),
        &[name("shared/fonts.ab")]
    );
    assert_eq!(catalog.bundle_for("ui\\main\\panel.prefab"), Some(name("ui/main.ab")));
    assert!(catalog.bundle_exists("shared/fonts"));
    assert!(!catalog.bundle_exists("shared/icons"));
}

#[test]
fn test_manifest_merge_then_catalog() {
    let base = Manifest {
        dependencies: vec![DependencyEntry {
            name: "a".into(),
            dependencies: vec!["b".into()],
        }],
        asset_to_bundle: Vec::new(),
    };
    let patch = Manifest {
        dependencies: vec![DependencyEntry {
            name: "a".into(),
            dependencies: vec!["c".into()],
        }],
        asset_to_bundle: Vec::new(),
    };

    let catalog = Catalog::from_manifest(&Manifest::merge(&[base, patch]), "ab");
    assert_eq!(catalog.graph().direct_dependencies("a.ab"), &[name("c.ab")]);
}

//! Bundle dependency graph
//!
//! A plain lookup table from bundle name to its declared direct
//! dependencies. Declaration order is preserved because it decides the order
//! in which dependencies are discovered and loaded.

use std::collections::{HashMap, HashSet};

use crate::catalog::BundleName;

/// Bundle name -> ordered direct dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    mapping: HashMap<BundleName, Vec<BundleName>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the direct dependencies of `name`
    pub fn insert(&mut self, name: BundleName, dependencies: Vec<BundleName>) {
        self.mapping.insert(name, dependencies);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mapping.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Every bundle that has an entry
    pub fn bundles(&self) -> impl Iterator<Item = &BundleName> + '_ {
        self.mapping.keys()
    }

    /// Declared dependencies of `name`, empty if it has no entry
    pub fn direct_dependencies(&self, name: &str) -> &[BundleName] {
        self.mapping.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Transitive dependencies in breadth-first discovery order
    ///
    /// Each round appends the names of the current frontier that are not yet
    /// known, then expands the frontier to the concatenated direct
    /// dependencies of its members. Expansion ends once a round adds nothing,
    /// which also bounds the walk on cyclic input.
    pub fn all_dependencies(&self, name: &str) -> Vec<BundleName> {
        let mut result: Vec<BundleName> = Vec::new();
        let mut seen: HashSet<&BundleName> = HashSet::new();
        let mut frontier: Vec<&BundleName> = self.direct_dependencies(name).iter().collect();

        while !frontier.is_empty() {
            let mut added = false;
            for dep in &frontier {
                if seen.insert(*dep) {
                    result.push((*dep).clone());
                    added = true;
                }
            }
            if !added {
                break;
            }

            frontier = frontier
                .iter()
                .flat_map(|dep| self.direct_dependencies(dep.as_str()))
                .collect();
        }

        result
    }

    /// Find a dependency cycle reachable from `name`
    ///
    /// Returns the chain that closes the loop, e.g. `a -> b -> a`.
    pub fn find_cycle(&self, name: &str) -> Option<Vec<BundleName>> {
        let root = self.mapping.get_key_value(name).map(|(key, _)| key.clone())?;
        let mut path: Vec<BundleName> = Vec::new();
        let mut finished: HashSet<BundleName> = HashSet::new();
        self.visit(root, &mut path, &mut finished)
    }

    fn visit(
        &self,
        node: BundleName,
        path: &mut Vec<BundleName>,
        finished: &mut HashSet<BundleName>,
    ) -> Option<Vec<BundleName>> {
        if let Some(start) = path.iter().position(|entry| *entry == node) {
            let mut chain = path[start..].to_vec();
            chain.push(node);
            return Some(chain);
        }
        if finished.contains(&node) {
            return None;
        }

        path.push(node.clone());
        for dep in self.direct_dependencies(node.as_str()) {
            if let Some(chain) = self.visit(dep.clone(), path, finished) {
                return Some(chain);
            }
        }
        path.pop();
        finished.insert(node);
        None
    }

    /// Merge several tables; tables later in the slice take priority
    ///
    /// Used to layer patch build dependency data over the base build.
    pub fn merge(tables: &[DependencyGraph]) -> DependencyGraph {
        let mut merged = DependencyGraph::new();
        for table in tables.iter().rev() {
            for (name, deps) in &table.mapping {
                if !merged.mapping.contains_key(name) {
                    merged.mapping.insert(name.clone(), deps.clone());
                }
            }
        }
        merged
    }
}

impl FromIterator<(BundleName, Vec<BundleName>)> for DependencyGraph {
    fn from_iter<I: IntoIterator<Item = (BundleName, Vec<BundleName>)>>(iter: I) -> Self {
        Self {
            mapping: iter.into_iter().collect(),
        }
    }
}

//! WorkspaceGraph: immutable snapshot of one cargo workspace.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::entity::{Dependency, Package, PackageId, Target};
use crate::error::GraphError;

/// Packages, targets and dependency edges of one workspace.
///
/// A graph is never mutated after construction. A refresh builds a new one
/// and the old snapshot stays valid for whoever still holds it.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceGraph {
    root: PathBuf,
    packages: Vec<Package>,
    index: HashMap<PackageId, usize>,
    dependencies: HashMap<PackageId, Vec<Dependency>>,
}

impl WorkspaceGraph {
    /// Build a graph from already validated packages and edges.
    ///
    /// Later packages with an id that was already seen are ignored, as are
    /// repeated edges between the same pair of packages.
    pub fn new(
        root: PathBuf,
        packages: Vec<Package>,
        dependencies: HashMap<PackageId, Vec<Dependency>>,
    ) -> Self {
        let mut unique = Vec::with_capacity(packages.len());
        let mut index = HashMap::with_capacity(packages.len());
        for package in packages {
            if index.contains_key(&package.id) {
                continue;
            }
            index.insert(package.id.clone(), unique.len());
            unique.push(package);
        }

        let dependencies = dependencies
            .into_iter()
            .filter(|(id, _)| index.contains_key(id))
            .map(|(id, deps)| {
                let mut seen = HashSet::with_capacity(deps.len());
                let deps: Vec<Dependency> = deps
                    .into_iter()
                    .filter(|d| index.contains_key(&d.package) && seen.insert(d.package.clone()))
                    .collect();
                (id, deps)
            })
            .collect();

        Self {
            root,
            packages: unique,
            index,
            dependencies,
        }
    }

    /// The workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn workspace_packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter().filter(|p| p.is_workspace_member())
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.index.contains_key(id)
    }

    pub fn package(&self, id: &PackageId) -> Result<&Package, GraphError> {
        self.index
            .get(id)
            .map(|&i| &self.packages[i])
            .ok_or_else(|| GraphError::NotFound(id.to_string()))
    }

    pub fn package_by_name(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn targets_of(&self, id: &PackageId) -> Result<&[Target], GraphError> {
        self.package(id).map(|p| p.targets.as_slice())
    }

    /// Direct dependency edges of a package.
    pub fn dependencies_of(&self, id: &PackageId) -> Result<&[Dependency], GraphError> {
        self.package(id)?;
        Ok(self
            .dependencies
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    /// Every package reachable from `id` through dependency edges, `id` excluded.
    ///
    /// Cargo never produces cycles, but a malformed document can, so
    /// traversal tracks visited packages.
    pub fn transitive_dependencies(&self, id: &PackageId) -> Result<Vec<&Package>, GraphError> {
        let start = &self.package(id)?.id;
        Ok(self.closure(start, |current| {
            self.dependencies
                .get(current)
                .into_iter()
                .flatten()
                .map(|d| &d.package)
                .collect()
        }))
    }

    /// Every package that reaches `id` through dependency edges, `id` excluded.
    pub fn transitive_dependents(&self, id: &PackageId) -> Result<Vec<&Package>, GraphError> {
        let start = &self.package(id)?.id;
        let mut reverse: HashMap<&PackageId, Vec<&PackageId>> = HashMap::new();
        for (from, deps) in &self.dependencies {
            for dep in deps {
                reverse.entry(&dep.package).or_default().push(from);
            }
        }
        Ok(self.closure(start, |current| {
            reverse.get(current).cloned().unwrap_or_default()
        }))
    }

    fn closure<'a, F>(&'a self, start: &'a PackageId, next: F) -> Vec<&'a Package>
    where
        F: Fn(&'a PackageId) -> Vec<&'a PackageId>,
    {
        let mut visited: HashSet<&PackageId> = HashSet::from([start]);
        let mut stack = vec![start];
        let mut result = Vec::new();
        while let Some(current) = stack.pop() {
            for dep in next(current) {
                if !visited.insert(dep) {
                    continue;
                }
                if let Ok(package) = self.package(dep) {
                    result.push(package);
                }
                stack.push(dep);
            }
        }
        result
    }

    /// The package whose root directory most closely contains `file`.
    pub fn find_package_for_file(&self, file: &Path) -> Option<&Package> {
        self.packages
            .iter()
            .filter(|p| file.starts_with(&p.root))
            .max_by_key(|p| p.root.components().count())
    }

    /// The target whose crate root directory most closely contains `file`.
    ///
    /// A target whose crate root is exactly `file` always wins.
    pub fn find_target_for_file(&self, file: &Path) -> Option<(&Package, &Target)> {
        let candidates = self
            .packages
            .iter()
            .flat_map(|p| p.targets.iter().map(move |t| (p, t)));

        let mut best: Option<((&Package, &Target), usize)> = None;
        for (package, target) in candidates {
            if target.crate_root == file {
                return Some((package, target));
            }
            let Some(dir) = target.root_dir() else {
                continue;
            };
            if !file.starts_with(dir) {
                continue;
            }
            let depth = dir.components().count();
            if best.map_or(true, |(_, d)| depth > d) {
                best = Some(((package, target), depth));
            }
        }
        best.map(|(found, _)| found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Edition, PackageOrigin, SourceKind, TargetKind};

    fn package(name: &str, root: &str, targets: Vec<Target>) -> Package {
        Package {
            id: PackageId::new(format!("{name} 0.1.0")),
            name: name.to_string(),
            version: "0.1.0".to_string(),
            root: PathBuf::from(root),
            origin: PackageOrigin::Workspace,
            edition: Edition::Edition2021,
            source: SourceKind::Path,
            targets,
        }
    }

    fn target(name: &str, kind: TargetKind, crate_root: &str) -> Target {
        Target {
            name: name.to_string(),
            kind,
            crate_root: PathBuf::from(crate_root),
            edition: Edition::Edition2021,
            doctest: true,
        }
    }

    fn dep(name: &str) -> Dependency {
        Dependency {
            package: PackageId::new(format!("{name} 0.1.0")),
            rename: None,
        }
    }

    fn id(name: &str) -> PackageId {
        PackageId::new(format!("{name} 0.1.0"))
    }

    fn chain() -> WorkspaceGraph {
        let packages = vec![
            package("a", "/ws/a", vec![]),
            package("b", "/ws/b", vec![]),
            package("c", "/ws/c", vec![]),
            package("d", "/ws/d", vec![]),
        ];
        let deps = HashMap::from([
            (id("a"), vec![dep("b"), dep("c")]),
            (id("b"), vec![dep("c")]),
            (id("c"), vec![dep("d")]),
        ]);
        WorkspaceGraph::new(PathBuf::from("/ws"), packages, deps)
    }

    fn names(packages: Vec<&Package>) -> Vec<&str> {
        let mut names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_package_lookup() {
        let graph = chain();
        assert_eq!(graph.package(&id("b")).unwrap().name, "b");
        assert_eq!(
            graph.package(&PackageId::new("missing")),
            Err(GraphError::NotFound("missing".to_string()))
        );
        assert!(graph.targets_of(&id("a")).unwrap().is_empty());
    }

    #[test]
    fn test_transitive_closure() {
        let graph = chain();
        let deps = graph.transitive_dependencies(&id("a")).unwrap();
        assert_eq!(names(deps), vec!["b", "c", "d"]);

        let dependents = graph.transitive_dependents(&id("d")).unwrap();
        assert_eq!(names(dependents), vec!["a", "b", "c"]);

        assert!(graph.transitive_dependencies(&id("d")).unwrap().is_empty());
    }

    #[test]
    fn test_closure_survives_cycles() {
        let packages = vec![package("a", "/ws/a", vec![]), package("b", "/ws/b", vec![])];
        let deps = HashMap::from([(id("a"), vec![dep("b")]), (id("b"), vec![dep("a")])]);
        let graph = WorkspaceGraph::new(PathBuf::from("/ws"), packages, deps);

        assert_eq!(names(graph.transitive_dependencies(&id("a")).unwrap()), vec!["b"]);
        assert_eq!(names(graph.transitive_dependents(&id("a")).unwrap()), vec!["b"]);
    }

    #[test]
    fn test_duplicate_edges_and_packages_collapse() {
        let packages = vec![
            package("a", "/ws/a", vec![]),
            package("b", "/ws/b", vec![]),
            package("b", "/elsewhere/b", vec![]),
        ];
        let deps = HashMap::from([(id("a"), vec![dep("b"), dep("b"), dep("ghost")])]);
        let graph = WorkspaceGraph::new(PathBuf::from("/ws"), packages, deps);

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.package(&id("b")).unwrap().root, PathBuf::from("/ws/b"));
        assert_eq!(graph.dependencies_of(&id("a")).unwrap(), &[dep("b")]);
    }

    #[test]
    fn test_find_for_file_prefers_longest_prefix() {
        let packages = vec![
            package(
                "outer",
                "/ws",
                vec![
                    target("outer", TargetKind::Bin, "/ws/src/main.rs"),
                    target("it", TargetKind::Test, "/ws/tests/it.rs"),
                ],
            ),
            package(
                "inner",
                "/ws/crates/inner",
                vec![target("inner", TargetKind::Lib(Default::default()), "/ws/crates/inner/src/lib.rs")],
            ),
        ];
        let graph = WorkspaceGraph::new(PathBuf::from("/ws"), packages, HashMap::new());

        let file = Path::new("/ws/crates/inner/src/parser/mod.rs");
        assert_eq!(graph.find_package_for_file(file).unwrap().name, "inner");
        let (package, target) = graph.find_target_for_file(file).unwrap();
        assert_eq!((package.name.as_str(), target.name.as_str()), ("inner", "inner"));

        let (_, target) = graph.find_target_for_file(Path::new("/ws/tests/it.rs")).unwrap();
        assert_eq!(target.name, "it");

        assert!(graph.find_package_for_file(Path::new("/other/file.rs")).is_none());
    }
}

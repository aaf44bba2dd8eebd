//! MetadataNormalizer: turn a raw `cargo metadata` document into a [`WorkspaceGraph`].

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, trace};

use crate::entity::{
    Dependency, DropReason, Dropped, Edition, Package, PackageId, PackageOrigin, SourceKind, Target,
    TargetKind,
};
use crate::error::MetadataError;
use crate::graph::WorkspaceGraph;
use crate::raw::{RawMetadata, RawNode, RawPackage, RawTarget};

/// The only `cargo metadata --format-version` we understand.
pub const SUPPORTED_FORMAT_VERSION: u64 = 1;

/// Result of a successful normalization.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub graph: WorkspaceGraph,
    /// Items left out of the graph because they could not be resolved
    pub dropped: Vec<Dropped>,
}

/// Deserialize the JSON text printed by `cargo metadata`.
pub fn parse_metadata(json: &str) -> Result<RawMetadata, MetadataError> {
    Ok(serde_json::from_str(json)?)
}

/// Normalize a raw metadata document.
///
/// Only a wrong format version or a missing member list fail the whole
/// document. Packages whose directory is gone, targets whose crate root is
/// gone and edges to unknown packages are dropped and reported in
/// [`Normalized::dropped`].
///
/// `fallback_root` is used as the workspace root when cargo doesn't report one.
pub fn normalize(raw: RawMetadata, fallback_root: &Path) -> Result<Normalized, MetadataError> {
    if raw.version != Some(SUPPORTED_FORMAT_VERSION) {
        return Err(MetadataError::UnsupportedFormat {
            found: raw.version,
            expected: SUPPORTED_FORMAT_VERSION,
        });
    }
    let members: HashSet<PackageId> = raw
        .workspace_members
        .ok_or(MetadataError::MissingWorkspaceMembers)?
        .into_iter()
        .map(PackageId::new)
        .collect();

    let root = match raw.workspace_root.as_deref() {
        Some(root) => dunce::canonicalize(root).unwrap_or_else(|_| PathBuf::from(root)),
        None => fallback_root.to_path_buf(),
    };

    let mut dropped = Vec::new();
    let mut packages: Vec<Package> = Vec::with_capacity(raw.packages.len());
    let mut seen: HashSet<PackageId> = HashSet::with_capacity(raw.packages.len());

    for raw_package in raw.packages {
        let id = PackageId::new(raw_package.id.as_str());
        if !seen.insert(id.clone()) {
            dropped.push(Dropped::Package {
                id,
                reason: DropReason::DuplicateId,
            });
            continue;
        }
        let origin = if members.contains(&id) {
            PackageOrigin::Workspace
        } else {
            PackageOrigin::TransitiveDependency
        };
        match normalize_package(raw_package, origin, &mut dropped) {
            Ok(package) => packages.push(package),
            Err(reason) => dropped.push(Dropped::Package { id, reason }),
        }
    }

    let nodes = raw.resolve.map(|r| r.nodes).unwrap_or_default();
    let dependencies = resolve_dependencies(&packages, nodes, &mut dropped);

    for item in &dropped {
        debug!("{}", item);
    }
    trace!(
        "normalized {} packages with {} dependency sources",
        packages.len(),
        dependencies.len()
    );

    Ok(Normalized {
        graph: WorkspaceGraph::new(root, packages, dependencies),
        dropped,
    })
}

fn normalize_package(
    raw: RawPackage,
    origin: PackageOrigin,
    dropped: &mut Vec<Dropped>,
) -> Result<Package, DropReason> {
    let root = package_root(&raw.manifest_path)?;
    let id = PackageId::new(raw.id);
    let edition = Edition::parse_or_default(raw.edition.as_deref());

    let mut targets = Vec::with_capacity(raw.targets.len());
    for raw_target in raw.targets {
        match normalize_target(&root, raw_target, edition) {
            Ok(target) => targets.push(target),
            Err((name, reason)) => dropped.push(Dropped::Target {
                package: id.clone(),
                name,
                reason,
            }),
        }
    }

    Ok(Package {
        id,
        name: raw.name,
        version: raw.version,
        root,
        origin,
        edition,
        source: SourceKind::parse(raw.source.as_deref()),
        targets,
    })
}

fn package_root(manifest_path: &str) -> Result<PathBuf, DropReason> {
    let parent = Path::new(manifest_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| DropReason::InvalidManifestPath(manifest_path.to_string()))?;
    match dunce::canonicalize(parent) {
        Ok(root) if root.is_dir() => Ok(root),
        Ok(root) => Err(DropReason::PackageRootNotFound {
            path: root,
            message: "not a directory".to_string(),
        }),
        Err(e) => Err(DropReason::PackageRootNotFound {
            path: parent.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

fn normalize_target(
    package_root: &Path,
    raw: RawTarget,
    package_edition: Edition,
) -> Result<Target, (String, DropReason)> {
    let Some(crate_root) = resolve_crate_root(package_root, &raw.src_path) else {
        return Err((raw.name, DropReason::CrateRootNotFound(raw.src_path)));
    };
    let edition = match raw.edition.as_deref() {
        Some(edition) => Edition::parse_or_default(Some(edition)),
        None => package_edition,
    };
    Ok(Target {
        kind: TargetKind::classify(&raw.kind, &raw.crate_types),
        name: raw.name,
        crate_root,
        edition,
        doctest: raw.doctest.unwrap_or(true),
    })
}

/// Resolve a target source path that may be absolute, relative to the package
/// root, or absolute-looking but actually relative (`/src/lib.rs`).
fn resolve_crate_root(package_root: &Path, src_path: &str) -> Option<PathBuf> {
    if src_path.is_empty() {
        return None;
    }
    let path = Path::new(src_path);
    let mut candidates = Vec::with_capacity(2);
    if path.is_absolute() {
        candidates.push(path.to_path_buf());
        let relative: PathBuf = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_) | Component::ParentDir))
            .collect();
        candidates.push(package_root.join(relative));
    } else {
        candidates.push(package_root.join(path));
    }
    candidates
        .into_iter()
        .filter_map(|c| dunce::canonicalize(c).ok())
        .find(|c| c.is_file())
}

fn resolve_dependencies(
    packages: &[Package],
    nodes: Vec<RawNode>,
    dropped: &mut Vec<Dropped>,
) -> HashMap<PackageId, Vec<Dependency>> {
    let lib_names: HashMap<&PackageId, String> = packages
        .iter()
        .map(|p| (&p.id, p.lib_crate_name()))
        .collect();

    let mut dependencies = HashMap::with_capacity(nodes.len());
    for node in nodes {
        let from = PackageId::new(node.id);
        if !lib_names.contains_key(&from) {
            // the package itself was dropped and already reported
            continue;
        }

        // (target, explicit name as written in code)
        let edges: Vec<(PackageId, Option<String>)> = match node.deps {
            Some(deps) => deps
                .into_iter()
                .map(|d| (PackageId::new(d.pkg), Some(d.name)))
                .collect(),
            None => node
                .dependencies
                .into_iter()
                .map(|id| (PackageId::new(id), None))
                .collect(),
        };

        let mut seen = HashSet::with_capacity(edges.len());
        let mut resolved = Vec::with_capacity(edges.len());
        for (to, name) in edges {
            let Some(lib_name) = lib_names.get(&to) else {
                dropped.push(Dropped::Dependency {
                    from: from.clone(),
                    to,
                    reason: DropReason::UnknownPackage,
                });
                continue;
            };
            if !seen.insert(to.clone()) {
                continue;
            }
            let rename = name.filter(|n| n != lib_name);
            resolved.push(Dependency { package: to, rename });
        }
        dependencies.insert(from, resolved);
    }
    dependencies
}

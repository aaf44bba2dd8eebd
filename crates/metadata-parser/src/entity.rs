//! Normalized entity types for a cargo workspace.
//!
//! These are owned, cheap-to-clone values. A [`crate::WorkspaceGraph`] holds
//! them for the lifetime of one refresh.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque package identifier as printed by cargo (`name version (source)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Whether a package is a first-party workspace member or pulled in as a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageOrigin {
    Workspace,
    TransitiveDependency,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Edition {
    #[default]
    #[serde(rename = "2015")]
    Edition2015,
    #[serde(rename = "2018")]
    Edition2018,
    #[serde(rename = "2021")]
    Edition2021,
    #[serde(rename = "2024")]
    Edition2024,
}

impl Edition {
    /// Parse an edition string, falling back to the oldest edition.
    ///
    /// Old cargo versions don't report editions at all, so this never fails.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw {
            Some("2018") => Edition::Edition2018,
            Some("2021") => Edition::Edition2021,
            Some("2024") => Edition::Edition2024,
            _ => Edition::Edition2015,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Edition::Edition2015 => "2015",
            Edition::Edition2018 => "2018",
            Edition::Edition2021 => "2021",
            Edition::Edition2024 => "2024",
        }
    }
}

/// Source kind for a package.
///
/// Indicates where a package comes from (registry, git, local path, etc.)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// From crates.io
    CratesIo,
    /// From an alternative registry
    Registry { url: String },
    /// From a git repository
    Git {
        url: String,
        /// Git reference (`branch=…`, `tag=…` or `rev=…`)
        reference: Option<String>,
        /// Full commit hash
        full_commit: Option<String>,
    },
    /// A local path package, cargo reports no source for these
    Path,
    /// Anything cargo might print that we don't classify
    Other(String),
}

const CRATES_IO_INDEX: &str = "https://github.com/rust-lang/crates.io-index";
const CRATES_IO_SPARSE: &str = "https://index.crates.io/";

impl SourceKind {
    pub fn parse(source: Option<&str>) -> Self {
        let Some(source) = source else {
            return SourceKind::Path;
        };
        let Some((scheme, rest)) = source.split_once('+') else {
            return SourceKind::Other(source.to_string());
        };
        match scheme {
            "registry" if rest == CRATES_IO_INDEX => SourceKind::CratesIo,
            "sparse" if rest == CRATES_IO_SPARSE => SourceKind::CratesIo,
            "registry" | "sparse" => SourceKind::Registry {
                url: rest.to_string(),
            },
            "git" => {
                let (rest, full_commit) = match rest.split_once('#') {
                    Some((rest, commit)) => (rest, Some(commit.to_string())),
                    None => (rest, None),
                };
                let (url, reference) = match rest.split_once('?') {
                    Some((url, query)) => (url, Some(query.to_string())),
                    None => (rest, None),
                };
                SourceKind::Git {
                    url: url.to_string(),
                    reference,
                    full_commit,
                }
            }
            "path" => SourceKind::Path,
            _ => SourceKind::Other(source.to_string()),
        }
    }

    /// Returns true if this is a git source.
    pub fn is_git(&self) -> bool {
        matches!(self, SourceKind::Git { .. })
    }

    /// Returns true if this is a path source.
    pub fn is_path(&self) -> bool {
        matches!(self, SourceKind::Path)
    }

    /// Returns the short commit hash (7 chars) if this is a git source.
    pub fn short_commit(&self) -> Option<&str> {
        match self {
            SourceKind::Git {
                full_commit: Some(commit),
                ..
            } => Some(commit.get(..7).unwrap_or(commit.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LibKind {
    Lib,
    Rlib,
    Dylib,
    Cdylib,
    Staticlib,
    ProcMacro,
    Unknown,
}

impl LibKind {
    fn from_kind(kind: &str) -> Option<Self> {
        let lib = match kind {
            "lib" => LibKind::Lib,
            "rlib" => LibKind::Rlib,
            "dylib" => LibKind::Dylib,
            "cdylib" => LibKind::Cdylib,
            "staticlib" => LibKind::Staticlib,
            "proc-macro" => LibKind::ProcMacro,
            other if other.ends_with("lib") => LibKind::Unknown,
            _ => return None,
        };
        Some(lib)
    }

    /// Collect the library flavours named by a `kind` or `crate_types` list.
    pub fn collect<'a>(kinds: impl IntoIterator<Item = &'a String>) -> BTreeSet<LibKind> {
        kinds
            .into_iter()
            .filter_map(|k| LibKind::from_kind(k))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Lib(BTreeSet<LibKind>),
    Bin,
    Test,
    ExampleBin,
    ExampleLib(BTreeSet<LibKind>),
    Bench,
    Unknown,
}

impl TargetKind {
    /// Classify a target from its cargo `kind` and `crate_types` lists.
    ///
    /// A single well-known kind is matched literally. Otherwise any kind that
    /// names a library flavour (`*lib` or `proc-macro`) makes it a library.
    pub fn classify(kinds: &[String], crate_types: &[String]) -> Self {
        if let [kind] = kinds {
            match kind.as_str() {
                "bin" => return TargetKind::Bin,
                "test" => return TargetKind::Test,
                "bench" => return TargetKind::Bench,
                "example" => {
                    if crate_types.iter().any(|t| t == "bin") {
                        return TargetKind::ExampleBin;
                    }
                    return TargetKind::ExampleLib(LibKind::collect(crate_types));
                }
                _ => {}
            }
        }
        let libs = LibKind::collect(kinds);
        if libs.is_empty() {
            TargetKind::Unknown
        } else {
            TargetKind::Lib(libs)
        }
    }

    pub fn is_lib(&self) -> bool {
        matches!(self, TargetKind::Lib(_))
    }

    pub fn is_proc_macro(&self) -> bool {
        matches!(self, TargetKind::Lib(kinds) if kinds.contains(&LibKind::ProcMacro))
    }

    pub fn is_bin(&self) -> bool {
        matches!(self, TargetKind::Bin)
    }

    pub fn is_test(&self) -> bool {
        matches!(self, TargetKind::Test)
    }

    pub fn is_example(&self) -> bool {
        matches!(self, TargetKind::ExampleBin | TargetKind::ExampleLib(_))
    }

    pub fn is_bench(&self) -> bool {
        matches!(self, TargetKind::Bench)
    }

    /// Whether cargo can produce an executable for this target.
    pub fn is_executable(&self) -> bool {
        match self {
            TargetKind::Bin | TargetKind::Test | TargetKind::ExampleBin | TargetKind::Bench => {
                true
            }
            TargetKind::Lib(_) | TargetKind::ExampleLib(_) | TargetKind::Unknown => false,
        }
    }
}

/// A single compilable artifact rooted at one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub kind: TargetKind,
    /// Canonical path of the crate root file (`src/lib.rs`, `src/main.rs`, …)
    pub crate_root: PathBuf,
    pub edition: Edition,
    pub doctest: bool,
}

impl Target {
    /// Directory containing the crate root file.
    pub fn root_dir(&self) -> Option<&Path> {
        self.crate_root.parent()
    }

    /// Name used for `extern crate`, cargo replaces dashes in target names.
    pub fn normalized_name(&self) -> String {
        self.name.replace('-', "_")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub name: String,
    pub version: String,
    /// Canonical directory containing the package's Cargo.toml
    pub root: PathBuf,
    pub origin: PackageOrigin,
    pub edition: Edition,
    pub source: SourceKind,
    pub targets: Vec<Target>,
}

impl Package {
    /// Parse the version string into a semver::Version.
    pub fn semver_version(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.version).ok()
    }

    pub fn lib_target(&self) -> Option<&Target> {
        self.targets.iter().find(|t| t.kind.is_lib())
    }

    /// Name other crates use to refer to this package's library.
    pub fn lib_crate_name(&self) -> String {
        match self.lib_target() {
            Some(lib) => lib.normalized_name(),
            None => self.name.replace('-', "_"),
        }
    }

    pub fn is_workspace_member(&self) -> bool {
        self.origin == PackageOrigin::Workspace
    }
}

/// Directed dependency edge to another package in the same graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub package: PackageId,
    /// Explicit in-code name when it differs from the library's own name
    pub rename: Option<String>,
}

/// Why the normalizer left an item out of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum DropReason {
    #[error("duplicate package id")]
    DuplicateId,
    #[error("invalid manifest path `{0}`")]
    InvalidManifestPath(String),
    #[error("package root `{}` not found: {message}", .path.display())]
    PackageRootNotFound { path: PathBuf, message: String },
    #[error("crate root `{0}` not found")]
    CrateRootNotFound(String),
    #[error("dependency package is not part of the graph")]
    UnknownPackage,
}

/// An item the normalizer had to leave out of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dropped {
    Package {
        id: PackageId,
        reason: DropReason,
    },
    Target {
        package: PackageId,
        name: String,
        reason: DropReason,
    },
    Dependency {
        from: PackageId,
        to: PackageId,
        reason: DropReason,
    },
}

impl Dropped {
    pub fn reason(&self) -> &DropReason {
        match self {
            Dropped::Package { reason, .. }
            | Dropped::Target { reason, .. }
            | Dropped::Dependency { reason, .. } => reason,
        }
    }
}

impl fmt::Display for Dropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dropped::Package { id, reason } => write!(f, "package `{id}` dropped: {reason}"),
            Dropped::Target {
                package,
                name,
                reason,
            } => write!(f, "target `{name}` of `{package}` dropped: {reason}"),
            Dropped::Dependency { from, to, reason } => {
                write!(f, "dependency `{from}` -> `{to}` dropped: {reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_single_kinds() {
        assert_eq!(TargetKind::classify(&strings(&["bin"]), &[]), TargetKind::Bin);
        assert_eq!(TargetKind::classify(&strings(&["test"]), &[]), TargetKind::Test);
        assert_eq!(TargetKind::classify(&strings(&["bench"]), &[]), TargetKind::Bench);
        assert_eq!(
            TargetKind::classify(&strings(&["custom-build"]), &[]),
            TargetKind::Unknown
        );
    }

    #[test]
    fn test_classify_libraries() {
        let kind = TargetKind::classify(&strings(&["proc-macro"]), &strings(&["proc-macro"]));
        assert!(kind.is_proc_macro());

        let kind = TargetKind::classify(&strings(&["cdylib", "rlib"]), &[]);
        assert_eq!(
            kind,
            TargetKind::Lib(BTreeSet::from([LibKind::Rlib, LibKind::Cdylib]))
        );

        let kind = TargetKind::classify(&strings(&["fancylib"]), &[]);
        assert_eq!(kind, TargetKind::Lib(BTreeSet::from([LibKind::Unknown])));
    }

    #[test]
    fn test_classify_examples() {
        assert_eq!(
            TargetKind::classify(&strings(&["example"]), &strings(&["bin"])),
            TargetKind::ExampleBin
        );
        assert_eq!(
            TargetKind::classify(&strings(&["example"]), &strings(&["lib"])),
            TargetKind::ExampleLib(BTreeSet::from([LibKind::Lib]))
        );
    }

    #[test]
    fn test_edition_defaults_to_2015() {
        assert_eq!(Edition::parse_or_default(None), Edition::Edition2015);
        assert_eq!(Edition::parse_or_default(Some("3000")), Edition::Edition2015);
        assert_eq!(Edition::parse_or_default(Some("2018")), Edition::Edition2018);
    }

    #[test]
    fn test_source_kind() {
        assert_eq!(SourceKind::parse(None), SourceKind::Path);
        assert_eq!(
            SourceKind::parse(Some(
                "registry+https://github.com/rust-lang/crates.io-index"
            )),
            SourceKind::CratesIo
        );
        assert_eq!(
            SourceKind::parse(Some("sparse+https://index.crates.io/")),
            SourceKind::CratesIo
        );
        let git = SourceKind::parse(Some(
            "git+https://github.com/rust-lang/cargo?tag=0.92.0#0123456789abcdef",
        ));
        assert!(git.is_git());
        assert_eq!(git.short_commit(), Some("0123456"));
        assert_eq!(
            SourceKind::parse(Some("registry")),
            SourceKind::Other("registry".to_string())
        );
    }
}

//! Loosely typed mirror of the `cargo metadata --format-version 1` document.
//!
//! Every field is optional or defaulted: different cargo versions omit
//! different fields and the normalizer decides what is fatal.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMetadata {
    pub version: Option<u64>,
    #[serde(default)]
    pub packages: Vec<RawPackage>,
    pub workspace_members: Option<Vec<String>>,
    pub resolve: Option<RawResolve>,
    pub workspace_root: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPackage {
    pub name: String,
    pub version: String,
    pub id: String,
    pub source: Option<String>,
    #[serde(default)]
    pub manifest_path: String,
    #[serde(default)]
    pub targets: Vec<RawTarget>,
    pub edition: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTarget {
    #[serde(default)]
    pub kind: Vec<String>,
    pub name: String,
    #[serde(default)]
    pub src_path: String,
    #[serde(default)]
    pub crate_types: Vec<String>,
    pub edition: Option<String>,
    pub doctest: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawResolve {
    #[serde(default)]
    pub nodes: Vec<RawNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNode {
    pub id: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Richer per-edge descriptors, only emitted by newer cargo versions.
    pub deps: Option<Vec<RawNodeDep>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNodeDep {
    pub name: String,
    pub pkg: String,
}

//! # metadata-parser
//!
//! Normalize `cargo metadata` output into an immutable workspace graph.
//!
//! ## Overview
//!
//! `cargo metadata --format-version 1` prints a loosely typed document whose
//! shape varies between cargo versions. This crate validates it and builds
//! a [`WorkspaceGraph`]: packages, their targets, and dependency edges.
//!
//! - [`parse_metadata`] deserializes the raw JSON text
//! - [`normalize`] resolves paths on disk, classifies targets and origins,
//!   and reports everything it had to drop
//!
//! ## Example
//!
//! ```ignore
//! use metadata_parser::{normalize, parse_metadata};
//! use std::path::Path;
//!
//! let raw = parse_metadata(&stdout)?;
//! let normalized = normalize(raw, Path::new("/path/to/workspace"))?;
//!
//! for package in normalized.graph.workspace_packages() {
//!     println!("{} {}", package.name, package.version);
//! }
//! for item in &normalized.dropped {
//!     eprintln!("{item}");
//! }
//! ```
//!
//! ## Complexity
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | `normalize()` | O(n) + filesystem I/O |
//! | `package(id)` | O(1) |
//! | `transitive_dependencies(id)` | O(V + E) |
//! | `find_package_for_file(path)` | O(n) |

mod entity;
mod error;
mod graph;
mod normalize;
mod raw;

pub use entity::{
    Dependency, DropReason, Dropped, Edition, LibKind, Package, PackageId, PackageOrigin,
    SourceKind, Target, TargetKind,
};
pub use error::{GraphError, MetadataError};
pub use graph::WorkspaceGraph;
pub use normalize::{normalize, parse_metadata, Normalized, SUPPORTED_FORMAT_VERSION};
pub use raw::{RawMetadata, RawNode, RawNodeDep, RawPackage, RawResolve, RawTarget};

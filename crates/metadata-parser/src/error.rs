//! Error types for metadata-parser.

use thiserror::Error;

/// Errors that abort the normalization of a whole metadata document.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The document is not valid JSON or does not have the expected shape
    #[error("failed to parse cargo metadata: {0}")]
    Malformed(#[from] serde_json::Error),

    /// `version` is missing or differs from the supported format version
    #[error("unsupported cargo metadata format version {found:?}, expected {expected}")]
    UnsupportedFormat { found: Option<u64>, expected: u64 },

    /// `workspace_members` is absent, which only happens with cargo versions we don't support
    #[error("cargo metadata has no `workspace_members`, this cargo version is not supported")]
    MissingWorkspaceMembers,
}

/// Errors returned by graph queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("package `{0}` not found in workspace")]
    NotFound(String),
}

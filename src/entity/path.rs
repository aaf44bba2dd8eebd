use std::{
    fmt,
    ops::Deref,
    path::{Path, PathBuf},
};

use serde::Serialize;

pub const MANIFEST_FILE: &str = "Cargo.toml";

/// An absolute path with symlinks resolved, used as a stable key.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CanonicalPath(PathBuf);

impl CanonicalPath {
    pub fn try_from_path<T: AsRef<Path>>(path: T) -> Result<Self, std::io::Error> {
        dunce::canonicalize(path).map(CanonicalPath)
    }

    /// Canonicalize when the path exists, otherwise keep it as given.
    ///
    /// File lookups must work for files that were just deleted.
    pub fn lossy<T: AsRef<Path>>(path: T) -> Self {
        let path = path.as_ref();
        Self::try_from_path(path).unwrap_or_else(|_| CanonicalPath(path.to_path_buf()))
    }

    /// Normalize a user supplied project location to its manifest path.
    pub fn manifest(path: &Path) -> Result<Self, std::io::Error> {
        if path.is_dir() {
            Self::try_from_path(path.join(MANIFEST_FILE))
        } else {
            Self::try_from_path(path)
        }
    }

    /// Directory containing this path, the path itself for a root.
    pub fn dir(&self) -> &Path {
        self.0.parent().unwrap_or(&self.0)
    }

    pub fn ensure_lock(&self) -> PathBuf {
        if self.0.extension().is_some_and(|ext| ext == "toml") {
            return self.0.with_extension("lock");
        }
        self.0.clone()
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl Deref for CanonicalPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for CanonicalPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "").unwrap();

        let from_dir = CanonicalPath::manifest(dir.path()).unwrap();
        let from_file = CanonicalPath::manifest(&dir.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(from_dir, from_file);
        assert!(from_dir.ends_with(MANIFEST_FILE));
        assert_eq!(from_dir.ensure_lock().file_name().unwrap(), "Cargo.lock");
        assert!(CanonicalPath::manifest(&dir.path().join("missing")).is_err());
    }
}

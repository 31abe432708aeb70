//! Paths that are either absolute or relative to an instance's working directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A path as written by the external process: `{"relative": bool, "path": str}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelativePathRef {
    /// When true, `path` is resolved against the working directory.
    pub relative: bool,
    /// Raw path string.
    pub path: String,
}

impl RelativePathRef {
    /// Resolves this reference against `working_dir`.
    ///
    /// Returns `None` for a relative reference when no working directory is
    /// known.
    #[must_use]
    pub fn resolve(&self, working_dir: Option<&Path>) -> Option<PathBuf> {
        if self.relative {
            working_dir.map(|dir| dir.join(&self.path))
        } else {
            Some(PathBuf::from(&self.path))
        }
    }
}

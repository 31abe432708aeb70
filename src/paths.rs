//! Platform base directory for the descriptor root.

use std::path::PathBuf;

/// Name of the directory the external processes write under.
pub const ROOT_DIR_NAME: &str = "MCSRHermes";

/// Resolves the platform default root directory.
///
/// - Windows: local application data
/// - macOS: `~/Library/Application Support`
/// - Linux and other Unix: `$XDG_RUNTIME_DIR`, falling back to `~/.local/share`
///
/// Returns `None` when no candidate base directory can be determined.
#[must_use]
pub fn default_root_dir() -> Option<PathBuf> {
    base_dir().map(|base| base.join(ROOT_DIR_NAME))
}

#[cfg(windows)]
fn base_dir() -> Option<PathBuf> {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(dirs::home_dir)
}

#[cfg(target_os = "macos")]
fn base_dir() -> Option<PathBuf> {
    dirs::data_dir().or_else(dirs::home_dir)
}

#[cfg(all(unix, not(target_os = "macos")))]
fn base_dir() -> Option<PathBuf> {
    dirs::runtime_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
}

#[cfg(not(any(unix, windows)))]
fn base_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_ends_with_dir_name() {
        if let Some(root) = default_root_dir() {
            assert!(root.ends_with(ROOT_DIR_NAME));
        }
    }
}

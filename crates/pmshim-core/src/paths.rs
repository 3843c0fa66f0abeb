use crate::version::STORE_LAYOUT_VERSION;
use std::path::{Path, PathBuf};

/// Name of the override file kept at the root of the install cache.
pub const LAST_KNOWN_GOOD_FILE: &str = "lastKnownGood.json";

/// Get the default install cache root for pmshim.
///
/// Uses platform-appropriate locations with versioning:
/// - Linux: `$XDG_CACHE_HOME/pmshim/v{N}` or `~/.cache/pmshim/v{N}`
/// - macOS: `~/Library/Caches/pmshim/v{N}`
/// - Windows: `%LOCALAPPDATA%\pmshim\v{N}`
#[must_use]
pub fn default_install_root() -> PathBuf {
    let base = dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".pmshim-cache"),
                |p| p.join(".cache").join("pmshim"),
            )
        },
        |p| p.join("pmshim"),
    );

    base.join(format!("v{STORE_LAYOUT_VERSION}"))
}

/// Path of the last-known-good override file under an install root.
#[must_use]
pub fn last_known_good_path(install_root: &Path) -> PathBuf {
    install_root.join(LAST_KNOWN_GOOD_FILE)
}

/// Directory holding the running pmshim executable.
///
/// Exported to child processes so nested invocations can find their way back.
#[must_use]
pub fn self_root() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe = dunce::canonicalize(&exe).unwrap_or(exe);
    exe.parent().map(Path::to_path_buf)
}

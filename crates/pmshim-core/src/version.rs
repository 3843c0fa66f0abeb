//! Version of pmshim and of the install store layout it reads and writes.

use serde::Serialize;
use std::fmt;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Layout of the install store. Releases live under `v<N>/`, so a change
/// that older binaries would misread gets a fresh directory.
pub const STORE_LAYOUT_VERSION: u32 = 1;

/// What `pmshim version` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub store_layout: u32,
}

impl VersionInfo {
    pub const CURRENT: Self = Self {
        version: VERSION,
        store_layout: STORE_LAYOUT_VERSION,
    };
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pmshim {} (store layout v{})",
            self.version, self.store_layout
        )
    }
}

/// `User-Agent` sent to registries and release hosts.
#[must_use]
pub fn user_agent() -> String {
    format!("pmshim/{VERSION}")
}

//! Package manager shim.
//!
//! Provides utilities for:
//! - Loading package manager definitions (built-in or from a file)
//! - Parsing descriptors (`name@range`) and project pins
//! - Matching npm-style version ranges, strictly or ignoring prereleases
//! - Fetching release listings from registries
//! - Installing releases into the cache exactly once
//! - Resolving descriptors to concrete releases
//! - Running an installed binary with stdio and signal forwarding

pub mod archive;
pub mod definition;
pub mod descriptor;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod last_known_good;
pub mod project;
pub mod registry;
pub mod semver;
pub mod store;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use archive::extract_tgz_reader;
pub use definition::{
    BinSpec, Definition, Definitions, RangeEntry, RegistryFields, RegistrySpec, ReleaseSpec,
    Transparent,
};
pub use descriptor::{Descriptor, Locator};
pub use dispatch::{resolve_bin, run, Input, IoContext, Output};
pub use engine::{Engine, ResolveOptions};
pub use error::{codes, ErrorKind, PmError};
pub use project::{find_package_manager_field, parse_pin};
pub use registry::{RegistryClient, ReleaseSource};
pub use self::semver::{is_tag, max_satisfying, satisfies, satisfies_relaxed, Range};
pub use store::{InstallStore, InstalledRelease, KeyedGuard, KeyedLocks, Payload, MAX_DOWNLOAD_SIZE};
pub use supervisor::{ChildGuard, ProcessSupervisor};

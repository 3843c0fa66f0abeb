use crate::paths::default_install_root;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Overrides the install cache root.
pub const HOME_ENV: &str = "PMSHIM_HOME";

/// Set to `0` to forbid any network access.
pub const ENABLE_NETWORK_ENV: &str = "PMSHIM_ENABLE_NETWORK";

/// Overrides the npm registry base URL.
pub const REGISTRY_ENV: &str = "PMSHIM_NPM_REGISTRY";

/// Points at an alternate definitions file.
pub const DEFINITIONS_ENV: &str = "PMSHIM_DEFINITIONS";

/// Overrides the Node interpreter used for JavaScript entry points.
pub const NODE_ENV: &str = "PMSHIM_NODE";

/// Exported to every spawned package manager.
pub const ROOT_ENV: &str = "PMSHIM_ROOT";

/// Log filter directives; take precedence over `-v`.
pub const LOG_ENV: &str = "PMSHIM_LOG";

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Runtime configuration for pmshim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = warnings only, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Root of the install cache.
    pub install_root: PathBuf,

    /// Whether registry and download requests may hit the network.
    pub network_enabled: bool,

    /// npm registry base URL.
    pub registry_url: String,

    /// Alternate definitions file, if any.
    pub definitions_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            install_root: default_install_root(),
            network_enabled: true,
            registry_url: DEFAULT_REGISTRY.to_string(),
            definitions_path: None,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Create a config for `cwd`, applying the `PMSHIM_*` environment overrides.
    #[must_use]
    pub fn from_env(cwd: PathBuf) -> Self {
        let mut config = Self::new(cwd);

        if let Some(home) = non_empty_var(HOME_ENV) {
            config.install_root = PathBuf::from(home);
        }
        if let Some(flag) = non_empty_var(ENABLE_NETWORK_ENV) {
            config.network_enabled = flag != "0";
        }
        if let Some(url) = non_empty_var(REGISTRY_ENV) {
            config.registry_url = url;
        }
        config.definitions_path = non_empty_var(DEFINITIONS_ENV).map(PathBuf::from);

        config
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set the install cache root.
    #[must_use]
    pub fn with_install_root(mut self, root: PathBuf) -> Self {
        self.install_root = root;
        self
    }

    /// Allow or forbid network access.
    #[must_use]
    pub fn with_network(mut self, enabled: bool) -> Self {
        self.network_enabled = enabled;
        self
    }

    /// Set the npm registry base URL.
    #[must_use]
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [HOME_ENV, ENABLE_NETWORK_ENV, REGISTRY_ENV, DEFINITIONS_ENV] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = Config::from_env(PathBuf::from("/work"));
        assert_eq!(config.cwd, PathBuf::from("/work"));
        assert!(config.network_enabled);
        assert_eq!(config.registry_url, DEFAULT_REGISTRY);
        assert_eq!(config.install_root, default_install_root());
        assert!(config.definitions_path.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var(HOME_ENV, "/tmp/pmshim-home");
        std::env::set_var(ENABLE_NETWORK_ENV, "0");
        std::env::set_var(REGISTRY_ENV, "https://mirror.example/");
        std::env::set_var(DEFINITIONS_ENV, "/tmp/defs.json");

        let config = Config::from_env(PathBuf::from("."));
        assert_eq!(config.install_root, PathBuf::from("/tmp/pmshim-home"));
        assert!(!config.network_enabled);
        assert_eq!(config.registry_url, "https://mirror.example/");
        assert_eq!(config.definitions_path, Some(PathBuf::from("/tmp/defs.json")));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_network_flag_other_values_enable() {
        clear_env();
        std::env::set_var(ENABLE_NETWORK_ENV, "1");
        assert!(Config::from_env(PathBuf::from(".")).network_enabled);
        clear_env();
    }

    #[test]
    fn test_builders() {
        let config = Config::new(PathBuf::from("."))
            .with_verbosity(2)
            .with_json_logs(true)
            .with_network(false)
            .with_install_root(PathBuf::from("/cache"))
            .with_registry_url("http://127.0.0.1:1/");
        assert_eq!(config.verbosity, 2);
        assert!(config.json_logs);
        assert!(!config.network_enabled);
        assert_eq!(config.install_root, PathBuf::from("/cache"));
        assert_eq!(config.registry_url, "http://127.0.0.1:1/");
    }
}

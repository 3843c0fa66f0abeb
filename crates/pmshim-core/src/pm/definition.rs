//! Package manager definitions.
//!
//! A definition tells pmshim, for one tool name, which version to use by
//! default, where each historical range of releases is published, and which
//! commands may run without the project pinning that tool.

use super::semver::Range;
use crate::config::Config;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Definitions compiled into the binary.
const BUILTIN_DEFINITIONS: &str = include_str!("../../definitions.json");

/// Where to list the releases of one range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistrySpec {
    /// An npm-style package index (`{registry}/{package}`).
    Npm { package: String },
    /// Any JSON document exposing tags and versions under configurable fields.
    Url { url: String, fields: RegistryFields },
}

/// Field names inside a [`RegistrySpec::Url`] document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFields {
    pub tags: String,
    pub versions: String,
}

/// How logical binary names map onto files inside an installed release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinSpec {
    /// Names served by the release's single entry file.
    List(Vec<String>),
    /// Name to path relative to the release root.
    Map(BTreeMap<String, String>),
}

impl BinSpec {
    /// Every binary name declared.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::List(names) => names.iter().map(String::as_str).collect(),
            Self::Map(map) => map.keys().map(String::as_str).collect(),
        }
    }

    #[must_use]
    pub fn declares(&self, bin: &str) -> bool {
        self.names().contains(&bin)
    }
}

/// How to list, download and run the releases of one version range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    /// Download URL template; `{}` is replaced by the version.
    pub url: String,
    pub bin: BinSpec,
    pub registry: RegistrySpec,
}

impl ReleaseSpec {
    /// Download URL for `version`.
    #[must_use]
    pub fn download_url(&self, version: &str) -> String {
        self.url.replace("{}", version)
    }
}

/// One `range → release spec` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEntry {
    pub range: String,
    #[serde(flatten)]
    pub spec: ReleaseSpec,
}

/// Commands allowed to run without a matching project pin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transparent {
    /// Version to use for those commands instead of the tool default.
    #[serde(default)]
    pub default: Option<String>,
    /// Command prefixes, binary name first (`["yarn", "init"]`).
    #[serde(default)]
    pub commands: Vec<Vec<String>>,
}

/// Static description of one package manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub default: String,
    #[serde(default)]
    pub transparent: Transparent,
    /// Range entries in declaration order; later entries are newer.
    pub ranges: Vec<RangeEntry>,
}

impl Definition {
    /// The newest range entry; tags are resolved through its registry.
    #[must_use]
    pub fn latest_entry(&self) -> Option<&RangeEntry> {
        self.ranges.last()
    }

    /// Whether `bin args…` starts with one of the transparent command prefixes.
    #[must_use]
    pub fn is_transparent_command(&self, bin: &str, args: &[String]) -> bool {
        let invocation: Vec<&str> = std::iter::once(bin)
            .chain(args.iter().map(String::as_str))
            .collect();

        self.transparent.commands.iter().any(|prefix| {
            prefix.len() <= invocation.len()
                && prefix.iter().zip(&invocation).all(|(a, b)| a == b)
        })
    }

    /// Every binary name declared by any range, deduplicated and sorted.
    #[must_use]
    pub fn bin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ranges
            .iter()
            .flat_map(|entry| entry.spec.bin.names())
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// The full set of supported package managers, keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definitions {
    definitions: BTreeMap<String, Definition>,
}

impl Definitions {
    /// Definitions compiled into the binary.
    ///
    /// # Errors
    /// Returns an error if the embedded document is invalid.
    pub fn builtin() -> Result<Self, Error> {
        let defs: Self = serde_json::from_str(BUILTIN_DEFINITIONS).map_err(|e| {
            Error::InvalidDefinitions(format!("embedded definitions do not parse: {e}"))
        })?;
        defs.validate()?;
        Ok(defs)
    }

    /// Load definitions from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let defs: Self = serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        defs.validate()?;
        Ok(defs)
    }

    /// The file named by the config, or the built-in set.
    ///
    /// # Errors
    /// Returns an error if the selected definitions are invalid.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        match &config.definitions_path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    /// Build a set directly, validating it.
    ///
    /// # Errors
    /// Returns an error if a definition has no ranges or an unparseable range.
    pub fn from_map(definitions: BTreeMap<String, Definition>) -> Result<Self, Error> {
        let defs = Self { definitions };
        defs.validate()?;
        Ok(defs)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    /// Supported tool names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// The tool providing binary `bin` (`npx` → `npm`).
    #[must_use]
    pub fn tool_for_bin(&self, bin: &str) -> Option<&str> {
        if let Some((name, _)) = self.definitions.get_key_value(bin) {
            return Some(name.as_str());
        }
        self.definitions
            .iter()
            .find(|(_, def)| def.ranges.iter().any(|e| e.spec.bin.declares(bin)))
            .map(|(name, _)| name.as_str())
    }

    fn validate(&self) -> Result<(), Error> {
        for (name, def) in &self.definitions {
            if def.ranges.is_empty() {
                return Err(Error::InvalidDefinitions(format!(
                    "'{name}' declares no ranges"
                )));
            }
            for entry in &def.ranges {
                Range::parse(&entry.range).map_err(|e| {
                    Error::InvalidDefinitions(format!("'{name}': {}", e.message()))
                })?;
            }
        }
        Ok(())
    }
}

//! Resolution engine.
//!
//! Turns `{name, range}` descriptors into concrete locators using the
//! install store, release listings and the last-known-good override, and
//! materializes locators on disk.

use super::definition::{Definition, Definitions};
use super::descriptor::{Descriptor, Locator};
use super::error::PmError;
use super::last_known_good;
use super::project::{find_package_manager_field, parse_pin};
use super::registry::{RegistryClient, ReleaseSource};
use super::semver::{is_tag, max_satisfying, satisfies_relaxed, Range};
use super::store::{InstallStore, InstalledRelease};
use crate::config::Config;
use crate::paths::last_known_good_path;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Options for [`Engine::resolve_descriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Accept tag names (`latest`, `stable`) in place of a range.
    pub allow_tags: bool,
    /// Answer from installed releases before touching the network.
    pub use_cache: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            allow_tags: false,
            use_cache: true,
        }
    }
}

/// The resolution engine.
#[derive(Debug)]
pub struct Engine<R: ReleaseSource> {
    definitions: Definitions,
    source: R,
    store: InstallStore,
    last_known_good: PathBuf,
}

impl Engine<RegistryClient> {
    /// Engine fetching listings from the registry configured in `config`.
    ///
    /// # Errors
    /// Returns an error if the registry client cannot be created.
    pub fn from_config(config: &Config, definitions: Definitions) -> Result<Self, PmError> {
        let client = RegistryClient::from_config(config)?;
        let store = InstallStore::new(config.install_root.clone(), client.clone());
        Ok(Self::new(definitions, client, store))
    }
}

impl<R: ReleaseSource> Engine<R> {
    /// Create an engine; the last-known-good file lives at the store root.
    #[must_use]
    pub fn new(definitions: Definitions, source: R, store: InstallStore) -> Self {
        let last_known_good = last_known_good_path(store.root());
        Self {
            definitions,
            source,
            store,
            last_known_good,
        }
    }

    #[must_use]
    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    #[must_use]
    pub fn store(&self) -> &InstallStore {
        &self.store
    }

    #[must_use]
    pub fn source(&self) -> &R {
        &self.source
    }

    #[must_use]
    pub fn last_known_good_path(&self) -> &Path {
        &self.last_known_good
    }

    /// Supported tool names, sorted.
    #[must_use]
    pub fn supported_tools(&self) -> Vec<&str> {
        self.definitions.names().collect()
    }

    /// The definition for `name`.
    ///
    /// # Errors
    /// Returns `PM_UNSUPPORTED_TOOL` if `name` is unknown.
    pub fn definition(&self, name: &str) -> Result<&Definition, PmError> {
        self.definitions
            .get(name)
            .ok_or_else(|| PmError::unsupported_tool(name))
    }

    /// The version to use for `name` when nothing more specific is asked for:
    /// the last activated one, else the definition default.
    ///
    /// # Errors
    /// Returns `PM_UNSUPPORTED_TOOL` if `name` is unknown.
    pub fn get_default_version(&self, name: &str) -> Result<String, PmError> {
        let definition = self.definition(name)?;

        if let Some(reference) = last_known_good::lookup(&self.last_known_good, name) {
            debug!(name, reference = %reference, "Using last known good version");
            return Ok(reference);
        }

        Ok(definition.default.clone())
    }

    /// Resolve a descriptor to a concrete release.
    ///
    /// Returns `Ok(None)` when no published version satisfies the range.
    ///
    /// # Errors
    /// Returns an error if the tool is unknown, a tag is used where tags are
    /// not allowed or does not exist, the range is invalid, or a listing
    /// cannot be fetched.
    pub async fn resolve_descriptor(
        &self,
        descriptor: &Descriptor,
        options: ResolveOptions,
    ) -> Result<Option<Locator>, PmError> {
        let definition = self.definition(&descriptor.name)?;
        let name = descriptor.name.as_str();

        let range = if is_tag(&descriptor.range) {
            if !options.allow_tags {
                return Err(PmError::tag_not_allowed(name, &descriptor.range));
            }
            self.resolve_tag(definition, name, &descriptor.range).await?
        } else {
            descriptor.range.clone()
        };

        if options.use_cache {
            if let Some(reference) = self.store.find_installed(name, &range) {
                debug!(name, range = %range, reference = %reference, "Resolved from install store");
                return Ok(Some(Locator::new(name, reference)));
            }
        }

        let requested = Range::parse(&range)?;

        let mut candidates = Vec::new();
        for entry in &definition.ranges {
            let key = Range::parse(&entry.range)?;
            if key.intersects(&requested) {
                candidates.push(entry);
            }
        }

        debug!(
            name,
            range = %range,
            entries = candidates.len(),
            "Fetching release listings"
        );

        let listings = try_join_all(
            candidates
                .iter()
                .map(|entry| self.source.fetch_versions(&entry.spec.registry)),
        )
        .await?;

        // Later range entries win for versions listed by several registries
        let mut merged: BTreeMap<String, &str> = BTreeMap::new();
        for (entry, versions) in candidates.iter().zip(listings) {
            for version in versions {
                merged.insert(version, entry.range.as_str());
            }
        }

        let Some(best) = max_satisfying(merged.keys().map(String::as_str), &requested, true)
        else {
            debug!(name, range = %range, "No listed version satisfies the range");
            return Ok(None);
        };

        let reference = best.to_string();
        debug!(
            name,
            range = %range,
            reference = %reference,
            range_key = merged.get(&reference).copied().unwrap_or_default(),
            "Resolved from listings"
        );

        Ok(Some(Locator::new(name, reference)))
    }

    async fn resolve_tag(
        &self,
        definition: &Definition,
        name: &str,
        tag: &str,
    ) -> Result<String, PmError> {
        let entry = definition
            .latest_entry()
            .ok_or_else(|| PmError::range_key_missing(name, tag))?;

        let tags = self.source.fetch_tags(&entry.spec.registry).await?;
        let version = tags
            .get(tag)
            .cloned()
            .ok_or_else(|| PmError::tag_not_found(name, tag))?;

        debug!(name, tag, version = %version, "Resolved tag");
        Ok(version)
    }

    /// Make sure the release named by `locator` is installed.
    ///
    /// The release spec comes from the newest range entry that contains the
    /// reference.
    ///
    /// # Errors
    /// Returns `PM_RANGE_KEY_MISSING` if no range entry contains the reference,
    /// or the install store's error.
    pub async fn ensure_package_manager(
        &self,
        locator: &Locator,
    ) -> Result<InstalledRelease, PmError> {
        let definition = self.definition(&locator.name)?;

        let entry = definition
            .ranges
            .iter()
            .rev()
            .find(|entry| satisfies_relaxed(&locator.reference, &entry.range))
            .ok_or_else(|| PmError::range_key_missing(&locator.name, &locator.reference))?;

        let location = self.store.ensure_installed(locator, &entry.spec).await?;

        Ok(InstalledRelease {
            location,
            spec: entry.spec.clone(),
        })
    }

    /// Record `locator` as the version to use by default from now on.
    ///
    /// # Errors
    /// Returns an error if the last-known-good file cannot be written.
    pub fn activate_package_manager(&self, locator: &Locator) -> Result<(), PmError> {
        last_known_good::record(&self.last_known_good, &locator.name, &locator.reference)?;
        info!(locator = %locator, "Activated package manager");
        Ok(())
    }

    /// The descriptor a command for tool `name` run in `cwd` should use.
    ///
    /// Without a project pin this is the fallback version: the transparent
    /// default when `transparent` and one is defined, else the default
    /// version. A pin for another tool is an error unless `transparent`.
    ///
    /// # Errors
    /// Returns an error if the tool is unknown, the pin is invalid, or the
    /// project is configured for a different tool.
    pub fn find_project_spec(
        &self,
        cwd: &Path,
        name: &str,
        transparent: bool,
    ) -> Result<Descriptor, PmError> {
        let definition = self.definition(name)?;

        let fallback = || -> Result<Descriptor, PmError> {
            let reference = match (&definition.transparent.default, transparent) {
                (Some(default), true) => default.clone(),
                _ => self.get_default_version(name)?,
            };
            Ok(Descriptor::new(name, reference))
        };

        let Some((manifest, raw)) = find_package_manager_field(cwd)? else {
            return fallback();
        };

        let pinned = parse_pin(&raw)?;
        if pinned.name == name {
            debug!(manifest = %manifest.display(), pin = %pinned, "Using project pin");
            return Ok(pinned);
        }

        if transparent {
            debug!(pin = %pinned, name, "Project pins another tool; transparent command falls back");
            return fallback();
        }

        Err(PmError::project_mismatch(format!(
            "This project is configured to use {} because {} has a \"packageManager\" field",
            pinned.name,
            manifest.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm::definition::BinSpec;
    use crate::pm::error::{codes, ErrorKind};
    use crate::pm::semver::satisfies;
    use crate::pm::testing::{
        build_tgz, npm_registry, serve, two_range_definitions, url_registry, PanicSource,
        StaticSource,
    };
    use axum::routing::get;
    use axum::Router;
    use std::fs;
    use tempfile::tempdir;

    const OFFLINE: &str = "http://127.0.0.1:9/";
    const MODERN_LISTING: &str = "https://listing.test/tags";

    fn engine<R: ReleaseSource>(root: &Path, source: R, base: &str) -> Engine<R> {
        let store = InstallStore::new(
            root.to_path_buf(),
            RegistryClient::new(base, true).unwrap(),
        );
        Engine::new(two_range_definitions(base), source, store)
    }

    fn allow_tags() -> ResolveOptions {
        ResolveOptions {
            allow_tags: true,
            ..ResolveOptions::default()
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tool").join("1.2.0")).unwrap();
        fs::create_dir_all(dir.path().join("tool").join("1.4.1")).unwrap();
        let engine = engine(dir.path(), PanicSource, OFFLINE);

        let locator = engine
            .resolve_descriptor(&Descriptor::new("tool", "^1.0.0"), ResolveOptions::default())
            .await
            .unwrap();

        assert_eq!(locator, Some(Locator::new("tool", "1.4.1")));
    }

    #[tokio::test]
    async fn test_use_cache_false_fetches() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tool").join("1.2.0")).unwrap();
        let source = StaticSource::new().with_versions(&npm_registry("tool"), &["1.2.0", "1.3.0"]);
        let engine = engine(dir.path(), source, OFFLINE);

        let options = ResolveOptions {
            use_cache: false,
            ..ResolveOptions::default()
        };
        let locator = engine
            .resolve_descriptor(&Descriptor::new("tool", "^1.0.0"), options)
            .await
            .unwrap();

        assert_eq!(locator, Some(Locator::new("tool", "1.3.0")));
        assert_eq!(engine.source().calls(), 1);
    }

    #[tokio::test]
    async fn test_exact_version_must_be_listed() {
        let dir = tempdir().unwrap();
        let source =
            StaticSource::new().with_versions(&url_registry(MODERN_LISTING), &["2.0.0", "2.1.0"]);
        let engine = engine(dir.path(), source, OFFLINE);

        let missing = engine
            .resolve_descriptor(&Descriptor::new("tool", "2.9.9"), ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(missing, None);
        assert_eq!(engine.source().calls(), 1);

        let listed = engine
            .resolve_descriptor(&Descriptor::new("tool", "2.1.0"), ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(listed, Some(Locator::new("tool", "2.1.0")));
        assert_eq!(
            engine.source().fetched(),
            vec![MODERN_LISTING.to_string(), MODERN_LISTING.to_string()]
        );
    }

    #[tokio::test]
    async fn test_unsupported_tool() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), PanicSource, OFFLINE);

        let err = engine
            .resolve_descriptor(&Descriptor::new("bun", "1.0.0"), ResolveOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::PM_UNSUPPORTED_TOOL);
        assert_eq!(err.kind(), ErrorKind::Usage);

        assert_eq!(
            engine.get_default_version("bun").unwrap_err().code(),
            codes::PM_UNSUPPORTED_TOOL
        );
    }

    #[tokio::test]
    async fn test_tags_require_permission() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), PanicSource, OFFLINE);

        let err = engine
            .resolve_descriptor(&Descriptor::new("tool", "latest"), ResolveOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.code(), codes::PM_TAG_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_tags_resolve_through_last_entry() {
        let dir = tempdir().unwrap();
        let source = StaticSource::new()
            .with_tag(&npm_registry("tool"), "stable", "1.9.9")
            .with_tag(&url_registry(MODERN_LISTING), "stable", "2.1.0");
        let engine = engine(dir.path(), source, OFFLINE);

        let locator = engine
            .resolve_descriptor(&Descriptor::new("tool", "stable"), allow_tags())
            .await
            .unwrap();
        assert_eq!(locator, Some(Locator::new("tool", "2.1.0")));

        let err = engine
            .resolve_descriptor(&Descriptor::new("tool", "canary"), allow_tags())
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::PM_TAG_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tag_result_checks_cache() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tool").join("2.1.0")).unwrap();
        let source = StaticSource::new().with_tag(&url_registry(MODERN_LISTING), "stable", "2.1.0");
        let engine = engine(dir.path(), source, OFFLINE);

        let locator = engine
            .resolve_descriptor(&Descriptor::new("tool", "stable"), allow_tags())
            .await
            .unwrap();

        assert_eq!(locator, Some(Locator::new("tool", "2.1.0")));
        assert!(engine.source().fetched().is_empty());
    }

    #[tokio::test]
    async fn test_only_intersecting_entries_are_fetched() {
        let dir = tempdir().unwrap();
        let source = StaticSource::new()
            .with_versions(&npm_registry("tool"), &["1.0.0", "1.5.0"])
            .with_versions(&url_registry(MODERN_LISTING), &["2.0.0", "2.3.0"]);
        let engine = engine(dir.path(), source, OFFLINE);

        let classic = engine
            .resolve_descriptor(&Descriptor::new("tool", "^1.0.0"), ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(classic, Some(Locator::new("tool", "1.5.0")));
        assert_eq!(engine.source().fetched(), vec!["tool".to_string()]);

        let any = engine
            .resolve_descriptor(&Descriptor::new("tool", "*"), ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(any, Some(Locator::new("tool", "2.3.0")));
        assert_eq!(engine.source().fetched().len(), 3);
    }

    #[tokio::test]
    async fn test_prerelease_maximum_both_ways() {
        let with_rc = StaticSource::new()
            .with_versions(&url_registry(MODERN_LISTING), &["2.0.0", "2.1.0", "2.2.0-rc.1"]);
        let without_rc = StaticSource::new()
            .with_versions(&url_registry(MODERN_LISTING), &["2.0.0", "2.1.0"]);

        // The relaxed filter admits the prerelease and true ordering then
        // ranks it above every stable release.
        for (source, expected) in [(with_rc, "2.2.0-rc.1"), (without_rc, "2.1.0")] {
            let dir = tempdir().unwrap();
            let engine = engine(dir.path(), source, OFFLINE);

            let locator = engine
                .resolve_descriptor(&Descriptor::new("tool", "^2.0.0"), ResolveOptions::default())
                .await
                .unwrap();

            assert_eq!(locator, Some(Locator::new("tool", expected)));
        }

        assert!(satisfies_relaxed("2.2.0-rc.1", "^2.0.0"));
        assert!(!satisfies("2.2.0-rc.1", "^2.0.0"));
    }

    #[tokio::test]
    async fn test_no_satisfying_version() {
        let dir = tempdir().unwrap();
        let source = StaticSource::new().with_versions(&url_registry(MODERN_LISTING), &["2.0.0"]);
        let engine = engine(dir.path(), source, OFFLINE);

        let locator = engine
            .resolve_descriptor(&Descriptor::new("tool", "^3.0.0"), ResolveOptions::default())
            .await
            .unwrap();

        assert_eq!(locator, None);
    }

    #[tokio::test]
    async fn test_listing_failure_propagates() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), StaticSource::new(), OFFLINE);

        let err = engine
            .resolve_descriptor(&Descriptor::new("tool", "^2.0.0"), ResolveOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.code(), codes::PM_REGISTRY_ERROR);
    }

    #[test]
    fn test_activate_then_default() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), PanicSource, OFFLINE);

        assert_eq!(engine.get_default_version("tool").unwrap(), "1.0.0");

        engine
            .activate_package_manager(&Locator::new("tool", "3.2.0"))
            .unwrap();

        assert_eq!(engine.get_default_version("tool").unwrap(), "3.2.0");
        assert!(dir.path().join("lastKnownGood.json").is_file());
    }

    #[tokio::test]
    async fn test_ensure_package_manager_picks_newest_entry() {
        let tgz = build_tgz(&[("package/bin/tool.js", b"console.log(1)", 0o755)]);
        let app = Router::new()
            .route(
                "/tool/-/:file",
                get(move || {
                    let tgz = tgz.clone();
                    async move { tgz }
                }),
            )
            .route("/modern/:version/tool.js", get(|| async { "console.log(2)" }));
        let base = serve(app).await;
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), PanicSource, &base);

        let classic = engine
            .ensure_package_manager(&Locator::new("tool", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(classic.location, dir.path().join("tool").join("1.0.0"));
        assert!(matches!(classic.spec.bin, BinSpec::Map(_)));
        assert!(classic.location.join("bin").join("tool.js").is_file());

        // The relaxed comparator places the prerelease in the modern range
        let modern = engine
            .ensure_package_manager(&Locator::new("tool", "2.0.0-rc.1"))
            .await
            .unwrap();
        assert!(matches!(modern.spec.bin, BinSpec::List(_)));
        assert!(modern.location.join("tool.js").is_file());
    }

    #[tokio::test]
    async fn test_ensure_package_manager_range_key_missing() {
        let dir = tempdir().unwrap();
        let mut definitions = BTreeMap::new();
        let mut tool = two_range_definitions(OFFLINE).get("tool").unwrap().clone();
        tool.ranges.truncate(1);
        definitions.insert("tool".to_string(), tool);
        let store = InstallStore::new(
            dir.path().to_path_buf(),
            RegistryClient::new(OFFLINE, false).unwrap(),
        );
        let engine = Engine::new(
            Definitions::from_map(definitions).unwrap(),
            PanicSource,
            store,
        );

        let err = engine
            .ensure_package_manager(&Locator::new("tool", "3.0.0"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), codes::PM_RANGE_KEY_MISSING);
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_find_project_spec() {
        let dir = tempdir().unwrap();
        let project = tempdir().unwrap();
        let engine = engine(dir.path(), PanicSource, OFFLINE);
        let manifest = project.path().join("package.json");

        // Manifest without a pin: default, or the transparent default
        fs::write(&manifest, r#"{"name": "app"}"#).unwrap();
        assert_eq!(
            engine.find_project_spec(project.path(), "tool", false).unwrap(),
            Descriptor::new("tool", "1.0.0")
        );
        assert_eq!(
            engine.find_project_spec(project.path(), "tool", true).unwrap(),
            Descriptor::new("tool", "2.1.0")
        );

        // Matching pin
        fs::write(&manifest, r#"{"packageManager": "tool@1.4.0+sha1.abc"}"#).unwrap();
        assert_eq!(
            engine.find_project_spec(project.path(), "tool", false).unwrap(),
            Descriptor::new("tool", "1.4.0")
        );

        // Another tool's pin
        fs::write(&manifest, r#"{"packageManager": "other@1.0.0"}"#).unwrap();
        let err = engine
            .find_project_spec(project.path(), "tool", false)
            .unwrap_err();
        assert_eq!(err.code(), codes::PM_PROJECT_MISMATCH);
        assert!(err.message().contains("other"));
        assert_eq!(
            engine.find_project_spec(project.path(), "tool", true).unwrap(),
            Descriptor::new("tool", "2.1.0")
        );
    }
}

//! Project pin lookup.
//!
//! A project pins its package manager through the `packageManager` field of
//! its `package.json`, e.g. `"yarn@3.2.0+sha224.953c8233f7a92884eee2de69a1b92d1f2ec1655e66d08071ba9a02fa"`.

use super::descriptor::Descriptor;
use super::error::PmError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Manifest file looked up while walking towards the filesystem root.
pub const MANIFEST_FILE: &str = "package.json";

/// Find the nearest `package.json` at or above `cwd` and read its
/// `packageManager` field.
///
/// The nearest manifest is the project: if it has no field the walk stops
/// and `None` is returned.
///
/// # Errors
/// Returns an error if the manifest is not a JSON object or the field is not
/// a string.
pub fn find_package_manager_field(cwd: &Path) -> Result<Option<(PathBuf, String)>, PmError> {
    for dir in cwd.ancestors() {
        let manifest = dir.join(MANIFEST_FILE);
        let Ok(content) = pmshim_util::fs::read_to_string_lossy(&manifest) else {
            continue;
        };

        let doc: Value = serde_json::from_str(&content).map_err(|e| {
            PmError::pin_invalid(format!("Invalid {}: {e}", manifest.display()))
        })?;
        let Value::Object(doc) = doc else {
            return Err(PmError::pin_invalid(format!(
                "Invalid {}: expected a JSON object",
                manifest.display()
            )));
        };

        debug!(manifest = %manifest.display(), "Found project manifest");

        return match doc.get("packageManager") {
            None => Ok(None),
            Some(Value::String(raw)) => Ok(Some((manifest, raw.clone()))),
            Some(_) => Err(PmError::pin_invalid(format!(
                "Invalid packageManager field in {}: expected a string",
                manifest.display()
            ))),
        };
    }

    Ok(None)
}

/// Parse a `packageManager` value into a descriptor with an exact version.
///
/// A trailing `+<hash>` is accepted and discarded.
///
/// # Errors
/// Returns an error unless the value is `name@<exact semver version>`.
pub fn parse_pin(raw: &str) -> Result<Descriptor, PmError> {
    let without_hash = raw.split_once('+').map_or(raw, |(head, _)| head);

    let invalid = || {
        PmError::pin_invalid(format!(
            "Invalid package manager specification in package.json ({raw}); expected a semver version"
        ))
    };

    let (name, range) = Descriptor::parse(without_hash).map_err(|_| invalid())?;
    let range = range.ok_or_else(invalid)?;
    semver::Version::parse(&range).map_err(|_| invalid())?;

    Ok(Descriptor::new(name, range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm::error::codes;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_pin() {
        assert_eq!(
            parse_pin("yarn@3.2.0").unwrap(),
            Descriptor::new("yarn", "3.2.0")
        );
        assert_eq!(
            parse_pin("pnpm@8.15.0+sha512.abcdef").unwrap(),
            Descriptor::new("pnpm", "8.15.0")
        );
        assert_eq!(
            parse_pin("yarn@4.0.0-rc.42").unwrap(),
            Descriptor::new("yarn", "4.0.0-rc.42")
        );
    }

    #[test]
    fn test_parse_pin_rejects_ranges() {
        for raw in ["yarn", "yarn@^3.0.0", "yarn@latest", "yarn@3", "@3.2.0", ""] {
            let err = parse_pin(raw).unwrap_err();
            assert_eq!(err.code(), codes::PM_PIN_INVALID, "raw: {raw:?}");
        }
    }

    #[test]
    fn test_find_field_walks_up() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"name": "root", "packageManager": "yarn@3.2.0"}"#,
        )
        .unwrap();
        let nested = dir.path().join("packages").join("app").join("src");
        fs::create_dir_all(&nested).unwrap();

        let (manifest, raw) = find_package_manager_field(&nested).unwrap().unwrap();
        assert_eq!(manifest, dir.path().join(MANIFEST_FILE));
        assert_eq!(raw, "yarn@3.2.0");
    }

    #[test]
    fn test_nearest_manifest_wins() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"packageManager": "yarn@3.2.0"}"#,
        )
        .unwrap();
        let child = dir.path().join("child");
        fs::create_dir_all(&child).unwrap();
        fs::write(child.join(MANIFEST_FILE), r#"{"name": "child"}"#).unwrap();

        assert_eq!(find_package_manager_field(&child).unwrap(), None);
    }

    #[test]
    fn test_invalid_manifests() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "[]").unwrap();
        assert_eq!(
            find_package_manager_field(dir.path()).unwrap_err().code(),
            codes::PM_PIN_INVALID
        );

        fs::write(dir.path().join(MANIFEST_FILE), r#"{"packageManager": 3}"#).unwrap();
        assert_eq!(
            find_package_manager_field(dir.path()).unwrap_err().code(),
            codes::PM_PIN_INVALID
        );
    }
}

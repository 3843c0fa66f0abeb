//! Gzipped tarball extraction.

use super::error::PmError;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;

/// Extract a gzipped tarball read from `reader` into `dest`, dropping the
/// first path segment of every entry (`package/bin/npm-cli.js` lands at
/// `dest/bin/npm-cli.js`).
///
/// Entries that consist only of the top-level segment are skipped. Symlinks
/// and other special entries are not extracted.
///
/// # Errors
/// Returns an error if the archive is corrupt, or an entry is absolute or
/// escapes `dest`.
pub fn extract_tgz_reader<R: Read>(reader: R, dest: &Path) -> Result<(), PmError> {
    fs::create_dir_all(dest)?;

    let gz = GzDecoder::new(reader);
    let mut archive = Archive::new(gz);

    let entries = archive
        .entries()
        .map_err(|e| PmError::extract_failed(format!("Failed to read tarball entries: {e}")))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| PmError::extract_failed(format!("Failed to read tarball entry: {e}")))?;

        let path = entry
            .path()
            .map_err(|e| PmError::extract_failed(format!("Failed to read entry path: {e}")))?
            .into_owned();

        let Some(relative) = strip_first_segment(&path)? else {
            continue;
        };

        let dest_path = dest.join(&relative);
        if !dest_path.starts_with(dest) {
            return Err(PmError::extract_failed(format!(
                "Tarball entry escapes destination: {}",
                path.display()
            )));
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if entry_type.is_file() {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = File::create(&dest_path)?;
            io::copy(&mut entry, &mut file)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    let _ = fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode));
                }
            }
        }
    }

    Ok(())
}

/// Sanitize an entry path and drop its first normal component.
///
/// Returns `None` when nothing remains.
fn strip_first_segment(path: &Path) -> Result<Option<PathBuf>, PmError> {
    let display = path.display();
    let mut stripped = PathBuf::new();
    let mut seen_first = false;

    for component in path.components() {
        match component {
            Component::Normal(part) => {
                if seen_first {
                    stripped.push(part);
                } else {
                    seen_first = true;
                }
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(PmError::extract_failed(format!(
                    "Tarball contains path traversal: {display}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PmError::extract_failed(format!(
                    "Tarball contains absolute path: {display}"
                )));
            }
        }
    }

    Ok((!stripped.as_os_str().is_empty()).then_some(stripped))
}

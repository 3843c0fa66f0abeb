//! `pmshim enable` / `pmshim disable` command implementations.
//!
//! Enabling a tool links each of its binaries to the running pmshim
//! executable, so that invoking e.g. `yarn` enters argv0 mode.

use super::{fail, load_engine, print_json};
use miette::{IntoDiagnostic, Result};
use pmshim_core::paths::self_root;
use pmshim_core::pm::{Engine, PmError, RegistryClient};
use pmshim_core::Config;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub fn enable(
    config: &Config,
    install_directory: Option<PathBuf>,
    names: &[String],
    json: bool,
) -> Result<()> {
    let engine = load_engine(config)?;
    let (dir, bins) = match plan(&engine, install_directory, names) {
        Ok(plan) => plan,
        Err(e) => fail(&e, json),
    };

    let target = std::env::current_exe().into_diagnostic()?;

    let mut linked = Vec::new();
    for bin in &bins {
        let link = dir.join(bin);
        if let Err(e) = replace_link(&target, &link) {
            fail(
                &PmError::cache_error(format!("Failed to link {}: {e}", link.display())),
                json,
            );
        }
        debug!(link = %link.display(), target = %target.display(), "Linked binary");
        linked.push(link);
    }

    if json {
        print_json(&serde_json::json!({ "ok": true, "linked": linked }))?;
    } else {
        for link in &linked {
            println!("Linked {}", link.display());
        }
    }
    Ok(())
}

pub fn disable(
    config: &Config,
    install_directory: Option<PathBuf>,
    names: &[String],
    json: bool,
) -> Result<()> {
    let engine = load_engine(config)?;
    let (dir, bins) = match plan(&engine, install_directory, names) {
        Ok(plan) => plan,
        Err(e) => fail(&e, json),
    };

    let mut removed = Vec::new();
    for bin in &bins {
        let link = dir.join(bin);
        // Only links are ours to remove; real files are left alone
        let is_link = fs::symlink_metadata(&link)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            continue;
        }
        if let Err(e) = fs::remove_file(&link) {
            fail(
                &PmError::cache_error(format!("Failed to remove {}: {e}", link.display())),
                json,
            );
        }
        debug!(link = %link.display(), "Removed link");
        removed.push(link);
    }

    if json {
        print_json(&serde_json::json!({ "ok": true, "removed": removed }))?;
    } else {
        for link in &removed {
            println!("Removed {}", link.display());
        }
    }
    Ok(())
}

/// The link directory and the binary names to link, for `names` or every tool.
fn plan(
    engine: &Engine<RegistryClient>,
    install_directory: Option<PathBuf>,
    names: &[String],
) -> Result<(PathBuf, Vec<String>), PmError> {
    let dir = match install_directory.or_else(self_root) {
        Some(dir) => dir,
        None => {
            return Err(PmError::cache_error(
                "Could not determine the pmshim install directory; pass --install-directory",
            ))
        }
    };

    let tools: Vec<String> = if names.is_empty() {
        engine.supported_tools().into_iter().map(str::to_string).collect()
    } else {
        names.to_vec()
    };

    let mut bins = Vec::new();
    for tool in &tools {
        bins.extend(engine.definition(tool)?.bin_names());
    }
    bins.sort();
    bins.dedup();

    Ok((dir, bins))
}

/// Point `link` at `target`, replacing an existing link or file.
fn replace_link(target: &Path, link: &Path) -> io::Result<()> {
    match fs::symlink_metadata(link) {
        Ok(_) => fs::remove_file(link)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }

    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(target, link)
    }
}

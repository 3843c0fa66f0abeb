//! `pmshim cache` command implementations.

use super::{fail, load_engine, print_json};
use miette::Result;
use pmshim_core::Config;
use pmshim_util::fs::dir_size;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
struct CachedRelease {
    name: String,
    version: String,
    path: PathBuf,
    size_bytes: u64,
}

pub fn list(config: &Config, json: bool) -> Result<()> {
    let engine = load_engine(config)?;
    let store = engine.store();

    let releases: Vec<CachedRelease> = store
        .list_installed()
        .into_iter()
        .map(|(name, version)| {
            let path = store.version_dir(&name, &version);
            let size_bytes = dir_size(&path);
            CachedRelease {
                name,
                version,
                path,
                size_bytes,
            }
        })
        .collect();

    if json {
        return print_json(&serde_json::json!({
            "ok": true,
            "root": store.root(),
            "releases": releases,
        }));
    }

    if releases.is_empty() {
        println!("No package managers installed in {}", store.root().display());
        return Ok(());
    }

    for release in &releases {
        println!(
            "{}@{}  {}",
            release.name,
            release.version,
            format_size(release.size_bytes)
        );
    }
    Ok(())
}

pub fn clean(config: &Config, json: bool) -> Result<()> {
    let engine = load_engine(config)?;

    let removed = match engine.store().clean() {
        Ok(removed) => removed,
        Err(e) => fail(&e, json),
    };

    if json {
        return print_json(&serde_json::json!({ "ok": true, "removed": removed }));
    }

    println!("Removed {removed} cache entries");
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;

    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

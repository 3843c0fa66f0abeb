//! The last-known-good override file.
//!
//! A flat JSON object mapping tool names to the version a previous
//! invocation activated. Reads are best effort; a missing or corrupt file
//! simply means "no override".

use super::error::PmError;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

/// Read the whole file, or `None` if it is absent or not a JSON object.
#[must_use]
pub fn read(path: &Path) -> Option<Map<String, Value>> {
    let content = pmshim_util::fs::read_to_string_lossy(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) | Err(_) => {
            debug!(path = %path.display(), "Ignoring malformed last-known-good file");
            None
        }
    }
}

/// The recorded version for `name`, if it is present and a string.
#[must_use]
pub fn lookup(path: &Path, name: &str) -> Option<String> {
    read(path)?.get(name)?.as_str().map(str::to_string)
}

/// Merge `name → reference` into the file, creating it and its parents.
///
/// Unrelated entries are preserved. Concurrent writers race; the last one wins.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn record(path: &Path, name: &str, reference: &str) -> Result<(), PmError> {
    let mut map = read(path).unwrap_or_default();
    map.insert(name.to_string(), Value::String(reference.to_string()));

    let mut content = serde_json::to_string_pretty(&Value::Object(map))?;
    content.push('\n');

    pmshim_util::fs::atomic_write(path, content.as_bytes()).map_err(|e| {
        PmError::cache_error(format!(
            "Failed to write '{}': {e}",
            path.display()
        ))
    })
}

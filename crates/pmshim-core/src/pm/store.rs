//! Install store.
//!
//! Releases live at `<root>/<name>/<version>/`. A version directory only ever
//! appears under its final name through a single `rename` from a temporary
//! directory inside the root, so readers never observe a partial install.

use super::archive::extract_tgz_reader;
use super::definition::ReleaseSpec;
use super::descriptor::Locator;
use super::error::PmError;
use super::registry::RegistryClient;
use super::semver::{is_tag, max_satisfying, Range};
use crate::paths::LAST_KNOWN_GOOD_FILE;
use bytes::{Buf, Bytes};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tracing::debug;

/// Maximum download size (200 MB).
pub const MAX_DOWNLOAD_SIZE: u64 = 200 * 1024 * 1024;

/// Download timeout in seconds.
const DOWNLOAD_TIMEOUT_SECS: u64 = 120;

/// Prefix of in-progress install directories inside the root.
const TEMP_PREFIX: &str = ".tmp-";

/// Downloaded chunks buffered ahead of the extractor.
const CHUNK_QUEUE: usize = 16;

/// What a download URL serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Gzipped tarball, extracted with its top-level directory stripped.
    Archive,
    /// A single file stored verbatim under its basename.
    SingleFile { file_name: String },
}

impl Payload {
    /// Classify a download URL by its path.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let path = url::Url::parse(url).map_or_else(
            |_| url.split(['?', '#']).next().unwrap_or(url).to_string(),
            |u| u.path().to_string(),
        );

        if path.ends_with(".tgz") || path.ends_with(".tar.gz") {
            return Self::Archive;
        }

        let file_name = path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("index.js")
            .to_string();
        Self::SingleFile { file_name }
    }
}

/// A release materialized on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRelease {
    /// Absolute path of the version directory.
    pub location: PathBuf,
    /// The release spec it was installed from.
    pub spec: ReleaseSpec,
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Async mutexes keyed by path.
///
/// A key's entry exists only while someone holds or waits for it.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<PathBuf, KeyLock>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &Path) -> KeyedGuard<'_> {
        let lock = {
            let mut locks = self.map();
            // Entries left behind by cancelled waiters
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.to_path_buf()).or_default())
        };

        let mut guard = KeyedGuard {
            owner: self,
            key: key.to_path_buf(),
            guard: None,
        };
        guard.guard = Some(lock.lock_owned().await);
        guard
    }

    /// Number of keys currently held or waited for.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, KeyLock>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive access to one key of a [`KeyedLocks`].
#[derive(Debug)]
pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    key: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.owner.map();
        // Release under the map lock so no new waiter can clone the entry
        // between the release and the count check
        drop(self.guard.take());
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// The on-disk cache of installed releases.
#[derive(Debug)]
pub struct InstallStore {
    root: PathBuf,
    client: RegistryClient,
    locks: KeyedLocks,
}

impl InstallStore {
    /// Create a store rooted at `root`, downloading through `client`.
    #[must_use]
    pub fn new(root: PathBuf, client: RegistryClient) -> Self {
        Self {
            root,
            client,
            locks: KeyedLocks::new(),
        }
    }

    /// Get the store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Directory a version of `name` is installed to.
    #[must_use]
    pub fn version_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(name).join(version)
    }

    /// Highest installed version of `name` strictly satisfying `range`.
    ///
    /// Tags, unparseable ranges and unreadable directories yield `None`.
    #[must_use]
    pub fn find_installed(&self, name: &str, range: &str) -> Option<String> {
        if is_tag(range) {
            return None;
        }
        let range = Range::parse(range).ok()?;

        let installed = self.installed_versions(name);
        let found = max_satisfying(installed.iter().map(String::as_str), &range, false)?;
        Some(found.to_string())
    }

    /// Version directory names under `<root>/<name>/`, dotfiles excluded.
    fn installed_versions(&self, name: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.root.join(name)) else {
            return Vec::new();
        };

        entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect()
    }

    /// Every installed `(name, version)`, sorted.
    #[must_use]
    pub fn list_installed(&self) -> Vec<(String, String)> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut result: Vec<(String, String)> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .flat_map(|name| {
                self.installed_versions(&name)
                    .into_iter()
                    .map(move |version| (name.clone(), version))
            })
            .collect();
        result.sort();
        result
    }

    /// Remove every installed release and leftover temporary directory.
    ///
    /// The last-known-good file is kept. Returns the number of entries removed.
    ///
    /// # Errors
    /// Returns an error if an entry cannot be removed.
    pub fn clean(&self) -> Result<usize, PmError> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Ok(0);
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            if entry.file_name() == LAST_KNOWN_GOOD_FILE {
                continue;
            }
            let path = entry.path();
            let result = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|e| {
                PmError::cache_error(format!("Failed to remove '{}': {e}", path.display()))
            })?;
            removed += 1;
        }

        debug!(root = %self.root.display(), removed, "Cleaned install store");
        Ok(removed)
    }

    /// Make sure `locator` is installed; returns its version directory.
    ///
    /// Installs of the same target serialize; different targets proceed in
    /// parallel. A rename that loses to another process counts as success.
    ///
    /// # Errors
    /// Returns an error if the download, extraction or final rename fails.
    pub async fn ensure_installed(
        &self,
        locator: &Locator,
        spec: &ReleaseSpec,
    ) -> Result<PathBuf, PmError> {
        let install_dir = self.version_dir(&locator.name, &locator.reference);
        if install_dir.is_dir() {
            debug!(locator = %locator, "Release already installed");
            return Ok(install_dir);
        }

        let _guard = self.locks.lock(&install_dir).await;
        if install_dir.is_dir() {
            debug!(locator = %locator, "Release installed while waiting");
            return Ok(install_dir);
        }

        let url = self
            .client
            .rewrite_download_url(&spec.download_url(&locator.reference));
        let payload = Payload::from_url(&url);

        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            PmError::cache_error(format!(
                "Failed to create install root '{}': {e}",
                self.root.display()
            ))
        })?;
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| PmError::cache_error(format!("Failed to create temp dir: {e}")))?;

        debug!(locator = %locator, url = %url, ?payload, "Installing release");
        let mut body = self.download(&url).await?;

        match payload {
            Payload::Archive => {
                let (tx, rx) = mpsc::channel(CHUNK_QUEUE);
                let dest = temp.path().to_path_buf();
                let extractor = tokio::task::spawn_blocking(move || {
                    extract_tgz_reader(ChunkReader::new(rx), &dest)
                });

                // A failing extractor drops its receiver, which ends the download early
                let streamed = async {
                    while let Some(chunk) = body.next_chunk().await? {
                        if tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    Ok::<_, PmError>(())
                }
                .await;
                drop(tx);

                let extracted = extractor
                    .await
                    .map_err(|e| PmError::extract_failed(format!("Extraction task failed: {e}")))?;
                streamed?;
                extracted?;
            }
            Payload::SingleFile { file_name } => {
                let path = temp.path().join(&file_name);
                let mut file = tokio::fs::File::create(&path).await?;
                while let Some(chunk) = body.next_chunk().await? {
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                drop(file);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    tokio::fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).await?;
                }
            }
        }

        if let Some(parent) = install_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // On success the TempDir drop finds nothing left to remove
        match tokio::fs::rename(temp.path(), &install_dir).await {
            Ok(()) => {
                debug!(locator = %locator, path = %install_dir.display(), "Installed release");
                Ok(install_dir)
            }
            Err(_) if install_dir.is_dir() => {
                debug!(locator = %locator, "Another process installed the release first");
                Ok(install_dir)
            }
            Err(e) => Err(PmError::cache_error(format!(
                "Failed to move release into '{}': {e}",
                install_dir.display()
            ))),
        }
    }

    /// Start downloading `url`; the body is read chunk by chunk.
    async fn download(&self, url: &str) -> Result<Download, PmError> {
        if !self.client.network_enabled() {
            return Err(PmError::network_disabled(url));
        }

        let response = self
            .client
            .http()
            .get(url)
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| PmError::download_failed(format!("Failed to download '{url}': {e}")))?;

        if !response.status().is_success() {
            return Err(PmError::download_failed(format!(
                "Server answered with HTTP {} when downloading '{url}'",
                response.status().as_u16()
            )));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_DOWNLOAD_SIZE {
                return Err(PmError::download_failed(format!(
                    "Download too large: {len} bytes (max: {MAX_DOWNLOAD_SIZE})"
                )));
            }
        }

        Ok(Download {
            response,
            received: 0,
        })
    }
}

/// A response body being read, with the running size checked against
/// [`MAX_DOWNLOAD_SIZE`].
struct Download {
    response: reqwest::Response,
    received: u64,
}

impl Download {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, PmError> {
        let chunk = self
            .response
            .chunk()
            .await
            .map_err(|e| PmError::download_failed(format!("Failed to read response body: {e}")))?;

        if let Some(chunk) = &chunk {
            self.received += chunk.len() as u64;
            if self.received > MAX_DOWNLOAD_SIZE {
                return Err(PmError::download_failed(format!(
                    "Download too large: over {MAX_DOWNLOAD_SIZE} bytes"
                )));
            }
        }
        Ok(chunk)
    }
}

/// Blocking reader over chunks sent from the download task.
struct ChunkReader {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
}

impl ChunkReader {
    fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

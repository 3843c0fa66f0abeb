//! Fixtures shared by the `pm` unit tests.

use super::definition::{
    BinSpec, Definition, Definitions, RangeEntry, RegistryFields, RegistrySpec, ReleaseSpec,
    Transparent,
};
use super::error::PmError;
use super::registry::ReleaseSource;
use axum::Router;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Build a gzipped tarball from `(path, contents, mode)` triples.
pub(crate) fn build_tgz(files: &[(&str, &[u8], u32)]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut tar_bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for (path, data, mode) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        builder.finish().unwrap();
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    encoder.finish().unwrap()
}

/// Serve `app` on an ephemeral local port; returns `http://127.0.0.1:PORT/`.
pub(crate) async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

/// Listing key for a registry spec; npm package name or listing URL.
fn listing_key(spec: &RegistrySpec) -> String {
    match spec {
        RegistrySpec::Npm { package } => package.clone(),
        RegistrySpec::Url { url, .. } => url.clone(),
    }
}

/// In-memory [`ReleaseSource`] that records every listing it serves.
#[derive(Default)]
pub(crate) struct StaticSource {
    versions: HashMap<String, Vec<String>>,
    tags: HashMap<String, BTreeMap<String, String>>,
    fetched: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_versions(mut self, spec: &RegistrySpec, versions: &[&str]) -> Self {
        self.versions.insert(
            listing_key(spec),
            versions.iter().map(|v| (*v).to_string()).collect(),
        );
        self
    }

    pub(crate) fn with_tag(mut self, spec: &RegistrySpec, tag: &str, version: &str) -> Self {
        self.tags
            .entry(listing_key(spec))
            .or_default()
            .insert(tag.to_string(), version.to_string());
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Listing keys whose versions were fetched, in call order.
    pub(crate) fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl ReleaseSource for StaticSource {
    async fn fetch_tags(&self, spec: &RegistrySpec) -> Result<BTreeMap<String, String>, PmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tags
            .get(&listing_key(spec))
            .cloned()
            .ok_or_else(|| PmError::registry(format!("no tags for {}", listing_key(spec))))
    }

    async fn fetch_versions(&self, spec: &RegistrySpec) -> Result<Vec<String>, PmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = listing_key(spec);
        self.fetched.lock().unwrap().push(key.clone());
        self.versions
            .get(&key)
            .cloned()
            .ok_or_else(|| PmError::registry(format!("no versions for {key}")))
    }
}

/// [`ReleaseSource`] that fails the test when touched.
pub(crate) struct PanicSource;

impl ReleaseSource for PanicSource {
    async fn fetch_tags(&self, spec: &RegistrySpec) -> Result<BTreeMap<String, String>, PmError> {
        panic!("unexpected tags fetch for {spec:?}");
    }

    async fn fetch_versions(&self, spec: &RegistrySpec) -> Result<Vec<String>, PmError> {
        panic!("unexpected versions fetch for {spec:?}");
    }
}

pub(crate) fn npm_registry(package: &str) -> RegistrySpec {
    RegistrySpec::Npm {
        package: package.to_string(),
    }
}

pub(crate) fn url_registry(url: &str) -> RegistrySpec {
    RegistrySpec::Url {
        url: url.to_string(),
        fields: RegistryFields {
            tags: "latest".to_string(),
            versions: "tags".to_string(),
        },
    }
}

/// A `tool` definition with a classic range below 2.0.0 (tarball, bin map)
/// and a modern range from 2.0.0 (single `.js` file, bin list).
///
/// `base` is the download host, e.g. the address returned by [`serve`].
pub(crate) fn two_range_definitions(base: &str) -> Definitions {
    let classic = RangeEntry {
        range: "<2.0.0".to_string(),
        spec: ReleaseSpec {
            url: format!("{base}tool/-/tool-{{}}.tgz"),
            bin: BinSpec::Map(BTreeMap::from([(
                "tool".to_string(),
                "bin/tool.js".to_string(),
            )])),
            registry: npm_registry("tool"),
        },
    };
    let modern = RangeEntry {
        range: ">=2.0.0".to_string(),
        spec: ReleaseSpec {
            url: format!("{base}modern/{{}}/tool.js"),
            bin: BinSpec::List(vec!["tool".to_string(), "toolx".to_string()]),
            registry: url_registry("https://listing.test/tags"),
        },
    };

    let definition = Definition {
        default: "1.0.0".to_string(),
        transparent: Transparent {
            default: Some("2.1.0".to_string()),
            commands: vec![vec!["tool".to_string(), "init".to_string()]],
        },
        ranges: vec![classic, modern],
    };

    Definitions::from_map(BTreeMap::from([("tool".to_string(), definition)])).unwrap()
}

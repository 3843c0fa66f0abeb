//! Release listings.
//!
//! [`ReleaseSource`] is the seam the resolution engine fetches tags and
//! versions through; [`RegistryClient`] is the HTTP implementation.

use super::definition::RegistrySpec;
use super::error::PmError;
use crate::config::{Config, DEFAULT_REGISTRY};
use crate::version::user_agent;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Abbreviated npm metadata is enough to list versions and dist-tags.
const NPM_ACCEPT: &str = "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8, */*";

/// Registries download URLs in the definitions may point at; rewritten
/// onto the configured registry when it differs.
const KNOWN_NPM_MIRRORS: [&str; 2] = [DEFAULT_REGISTRY, "https://registry.yarnpkg.com/"];

/// Source of tag and version listings for a [`RegistrySpec`].
pub trait ReleaseSource: Send + Sync {
    /// Map of tag name to version.
    fn fetch_tags(
        &self,
        spec: &RegistrySpec,
    ) -> impl Future<Output = Result<BTreeMap<String, String>, PmError>> + Send;

    /// Every published version.
    fn fetch_versions(
        &self,
        spec: &RegistrySpec,
    ) -> impl Future<Output = Result<Vec<String>, PmError>> + Send;
}

/// HTTP registry client.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
    network_enabled: bool,
}

impl RegistryClient {
    /// Create a new registry client with the given npm registry base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str, network_enabled: bool) -> Result<Self, PmError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| PmError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .user_agent(user_agent())
            .build()
            .map_err(|e| PmError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            http,
            network_enabled,
        })
    }

    /// Create a client from the registry URL and network flag in `config`.
    ///
    /// # Errors
    /// Returns an error if the client cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, PmError> {
        Self::new(&config.registry_url, config.network_enabled)
    }

    /// Get the base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the HTTP client (for reuse in downloads).
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    #[must_use]
    pub fn network_enabled(&self) -> bool {
        self.network_enabled
    }

    /// Point a download URL on a well-known npm registry at the configured one.
    #[must_use]
    pub fn rewrite_download_url(&self, url: &str) -> String {
        let base = self.base_url.as_str();
        for mirror in KNOWN_NPM_MIRRORS {
            if base != mirror {
                if let Some(rest) = url.strip_prefix(mirror) {
                    return format!("{base}{rest}");
                }
            }
        }
        url.to_string()
    }

    fn document_url(&self, spec: &RegistrySpec) -> Result<Url, PmError> {
        match spec {
            RegistrySpec::Npm { package } => {
                let encoded = package.replace('/', "%2F");
                self.base_url.join(&encoded).map_err(|e| {
                    PmError::registry(format!("Failed to build URL for '{package}': {e}"))
                })
            }
            RegistrySpec::Url { url, .. } => Url::parse(url)
                .map_err(|e| PmError::registry(format!("Invalid listing URL '{url}': {e}"))),
        }
    }

    async fn fetch_document(&self, spec: &RegistrySpec) -> Result<Value, PmError> {
        let url = self.document_url(spec)?;

        if !self.network_enabled {
            return Err(PmError::network_disabled(url.as_str()));
        }

        debug!(url = %url, "Fetching release listing");

        let mut request = self.http.get(url.as_str());
        if matches!(spec, RegistrySpec::Npm { .. }) {
            request = request.header(reqwest::header::ACCEPT, NPM_ACCEPT);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(PmError::registry(format!(
                "Server answered with HTTP {} when performing the request to {url}",
                response.status().as_u16()
            )));
        }

        Ok(response.json().await?)
    }
}

impl ReleaseSource for RegistryClient {
    async fn fetch_tags(&self, spec: &RegistrySpec) -> Result<BTreeMap<String, String>, PmError> {
        let doc = self.fetch_document(spec).await?;
        tags_from_document(&doc, spec)
    }

    async fn fetch_versions(&self, spec: &RegistrySpec) -> Result<Vec<String>, PmError> {
        let doc = self.fetch_document(spec).await?;
        versions_from_document(&doc, spec)
    }
}

/// Extract the tag map from a listing document.
///
/// # Errors
/// Returns an error if the tags field is missing or not an object.
pub fn tags_from_document(
    doc: &Value,
    spec: &RegistrySpec,
) -> Result<BTreeMap<String, String>, PmError> {
    let field = match spec {
        RegistrySpec::Npm { .. } => "dist-tags",
        RegistrySpec::Url { fields, .. } => fields.tags.as_str(),
    };

    let tags = doc
        .get(field)
        .and_then(Value::as_object)
        .ok_or_else(|| PmError::registry(format!("Listing has no '{field}' object")))?;

    Ok(tags
        .iter()
        .filter_map(|(tag, version)| version.as_str().map(|v| (tag.clone(), v.to_string())))
        .collect())
}

/// Extract the version list from a listing document.
///
/// The field may be an array of strings or an object keyed by version.
///
/// # Errors
/// Returns an error if the versions field is missing or has another shape.
pub fn versions_from_document(doc: &Value, spec: &RegistrySpec) -> Result<Vec<String>, PmError> {
    let field = match spec {
        RegistrySpec::Npm { .. } => "versions",
        RegistrySpec::Url { fields, .. } => fields.versions.as_str(),
    };

    match doc.get(field) {
        Some(Value::Object(map)) => Ok(map.keys().cloned().collect()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()),
        _ => Err(PmError::registry(format!(
            "Listing has no '{field}' array or object"
        ))),
    }
}

//! Package registry client.
//!
//! Resolves a package name to the metadata of its `latest` version and
//! opens the tarball it points to.

use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::types::{AddonError, RemotePackageInfo};

/// Default registry base URL.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Default transport timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Registry provider trait, so tests can stand in for the network.
pub trait RegistryProvider: Send + Sync {
    /// Looks up the latest version of a package.
    fn resolve_latest(&self, name: &str) -> Result<RemotePackageInfo, AddonError>;

    /// Opens the archive at `url` as a byte stream.
    fn open_archive(&self, url: &str) -> Result<Box<dyn Read + Send>, AddonError>;
}

/// Registry document for a single version.
#[derive(Debug, Deserialize)]
struct VersionDocument {
    name: String,
    version: String,
    dist: Dist,
    #[serde(default)]
    lacona: Option<Value>,
}

/// Distribution info.
#[derive(Debug, Deserialize)]
struct Dist {
    tarball: String,
}

impl VersionDocument {
    fn into_info(self) -> RemotePackageInfo {
        let is_addon = matches!(self.lacona, Some(Value::Object(_)));
        RemotePackageInfo {
            name: self.name,
            latest_version: self.version,
            archive_url: self.dist.tarball,
            is_addon,
        }
    }
}

/// Parses a `/{name}/latest` response body.
///
/// Non-addon packages are rejected here, before anything is downloaded.
pub fn parse_latest(name: &str, body: &str) -> Result<RemotePackageInfo, AddonError> {
    let origin = format!("registry metadata for {}", name);
    let value: Value =
        serde_json::from_str(body).map_err(|e| AddonError::malformed(&origin, e))?;

    if !matches!(value.get("lacona"), Some(Value::Object(_))) {
        return Err(AddonError::NotAnAddon(name.to_string()));
    }

    let document: VersionDocument =
        serde_json::from_value(value).map_err(|e| AddonError::malformed(&origin, e))?;
    Ok(document.into_info())
}

/// npm-compatible registry over HTTP.
pub struct NpmRegistry {
    /// HTTP client.
    client: reqwest::blocking::Client,
    /// Base URL without trailing slash.
    base_url: String,
}

impl NpmRegistry {
    /// Creates a registry client.
    ///
    /// A zero `timeout` disables the transport timeout.
    pub fn new(base_url: &str, timeout: Duration, user_agent: &str) -> Result<Self, AddonError> {
        let mut builder = reqwest::blocking::Client::builder().user_agent(user_agent);
        builder = if timeout.is_zero() {
            builder.timeout(None::<Duration>)
        } else {
            builder.timeout(timeout)
        };
        let client = builder
            .build()
            .map_err(|e| AddonError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Returns the metadata URL for a package.
    #[must_use]
    pub fn latest_url(&self, name: &str) -> String {
        format!("{}/{}/latest", self.base_url, name)
    }
}

impl RegistryProvider for NpmRegistry {
    fn resolve_latest(&self, name: &str) -> Result<RemotePackageInfo, AddonError> {
        let url = self.latest_url(name);
        info!("[ADDON-REGISTRY] Resolving {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| {
                warn!("[ADDON-REGISTRY] Request failed: {}", e);
                AddonError::Network(format!("{} could not be loaded: {}", name, e))
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AddonError::NotFound(name.to_string()));
        }
        if !status.is_success() {
            return Err(AddonError::Network(format!(
                "registry returned HTTP {} for {}",
                status, name
            )));
        }

        let body = response
            .text()
            .map_err(|e| AddonError::Network(format!("failed to read response: {}", e)))?;
        debug!("[ADDON-REGISTRY] Received {} bytes of metadata", body.len());

        let info = parse_latest(name, &body)?;
        info!(
            "[ADDON-REGISTRY] {}@{} -> {}",
            info.name, info.latest_version, info.archive_url
        );
        Ok(info)
    }

    fn open_archive(&self, url: &str) -> Result<Box<dyn Read + Send>, AddonError> {
        info!("[ADDON-REGISTRY] Downloading {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| AddonError::Network(format!("failed to download {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AddonError::Network(format!(
                "tarball download returned HTTP {}",
                status
            )));
        }

        Ok(Box::new(response))
    }
}

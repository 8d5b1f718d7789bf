//! Package manifest parsing.
//!
//! Reads `package.json` files and decides whether they declare a Lacona
//! addon. The `lacona` section is what makes a package an addon:
//!
//! ```json
//! {
//!   "name": "lacona-demo",
//!   "version": "1.0.0",
//!   "lacona": { "title": "Demo", "extensions": "build/extensions.js" }
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::types::{AddonDescriptor, AddonError, SlotName};

/// Manifest filename at the root of every package.
pub const MANIFEST_FILE: &str = "package.json";

/// Maximum manifest size accepted (1MB).
const MAX_MANIFEST_SIZE: u64 = 1_048_576;

/// The parts of `package.json` this crate reads.
///
/// Fields that only inform packing are kept as raw JSON so an odd value
/// there never hides an installed addon.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageManifest {
    /// Package name.
    #[serde(default)]
    pub name: Option<String>,
    /// Package version.
    #[serde(default)]
    pub version: Option<String>,
    /// Package description.
    #[serde(default)]
    pub description: Option<Value>,
    /// Publish whitelist.
    #[serde(default)]
    pub files: Option<Value>,
    /// Runtime dependencies.
    #[serde(default)]
    pub dependencies: Option<Value>,
    /// Dependencies shipped inside the package.
    #[serde(default, rename = "bundleDependencies", alias = "bundledDependencies")]
    pub bundle_dependencies: Option<Value>,
    /// Lacona addon section.
    #[serde(default)]
    pub lacona: Option<LaconaSection>,
}

/// The `lacona` section of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LaconaSection {
    /// Display title.
    #[serde(default)]
    pub title: Option<Value>,
    /// Description shown in the host's preferences.
    #[serde(default)]
    pub description: Option<Value>,
    /// Entry point for the addon's extensions.
    #[serde(default)]
    pub extensions: Option<Value>,
    /// Preferences schema, inline or as a path.
    #[serde(default)]
    pub config: Option<Value>,
}

impl LaconaSection {
    /// Returns the title when it is a string.
    #[must_use]
    pub fn title_text(&self) -> Option<&str> {
        self.title.as_ref().and_then(Value::as_str)
    }
}

impl PackageManifest {
    /// Reads a manifest from disk without requiring addon metadata.
    pub fn load(path: &Path) -> Result<Self, AddonError> {
        let value = read_manifest_value(path)?;
        Self::from_value(value, &path.display().to_string())
    }

    fn from_value(value: Value, origin: &str) -> Result<Self, AddonError> {
        serde_json::from_value(value).map_err(|e| AddonError::malformed(origin, e))
    }

    /// Returns the validated package name.
    pub fn slot_name(&self, origin: &str) -> Result<SlotName, AddonError> {
        let name = self
            .name
            .as_deref()
            .ok_or_else(|| AddonError::malformed(origin, "missing \"name\""))?;
        SlotName::new(name)
    }

    /// Returns the `files` whitelist, if the package declares one.
    ///
    /// Non-string entries are dropped. A `files` value that is not an
    /// array is treated as absent.
    #[must_use]
    pub fn files_whitelist(&self) -> Option<Vec<String>> {
        let entries = self.files.as_ref()?.as_array()?;
        Some(
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(|entry| entry.trim_start_matches("./").trim_end_matches('/'))
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Returns the names of dependencies bundled into the package.
    ///
    /// `true` bundles every entry of `dependencies`.
    #[must_use]
    pub fn bundled_dependencies(&self) -> Vec<String> {
        match &self.bundle_dependencies {
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::Bool(true)) => self
                .dependencies
                .as_ref()
                .and_then(Value::as_object)
                .map(|deps| deps.keys().cloned().collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

/// Parses a manifest file into an addon descriptor.
///
/// Fails with `NotAnAddon` when the `lacona` section is missing, before any
/// other field is looked at.
pub fn parse(path: &Path) -> Result<AddonDescriptor, AddonError> {
    let value = read_manifest_value(path)?;
    descriptor_from_value(value, &path.display().to_string())
}

/// Parses manifest text into an addon descriptor.
pub fn parse_str(content: &str, origin: &str) -> Result<AddonDescriptor, AddonError> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| AddonError::malformed(origin, e))?;
    descriptor_from_value(value, origin)
}

fn descriptor_from_value(value: Value, origin: &str) -> Result<AddonDescriptor, AddonError> {
    let Some(object) = value.as_object() else {
        return Err(AddonError::malformed(origin, "manifest is not a JSON object"));
    };

    let name_hint = object
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(origin)
        .to_string();

    match object.get("lacona") {
        None | Some(Value::Null) => return Err(AddonError::NotAnAddon(name_hint)),
        Some(Value::Object(_)) => {}
        Some(_) => {
            return Err(AddonError::malformed(origin, "\"lacona\" must be an object"));
        }
    }

    let manifest = PackageManifest::from_value(value, origin)?;
    let slot = manifest.slot_name(origin)?;

    let version = manifest
        .version
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AddonError::malformed(origin, "missing \"version\""))?;

    let title = manifest
        .lacona
        .as_ref()
        .and_then(LaconaSection::title_text)
        .unwrap_or_default()
        .to_string();

    Ok(AddonDescriptor {
        name: slot.as_str().to_string(),
        title,
        version,
        has_lacona_metadata: true,
    })
}

fn read_manifest_value(path: &Path) -> Result<Value, AddonError> {
    let origin = path.display().to_string();

    let metadata = fs::metadata(path).map_err(|e| AddonError::malformed(&origin, e))?;
    if metadata.len() > MAX_MANIFEST_SIZE {
        return Err(AddonError::malformed(origin, "manifest exceeds 1MB"));
    }

    let content = fs::read_to_string(path).map_err(|e| AddonError::malformed(&origin, e))?;
    serde_json::from_str(&content).map_err(|e| AddonError::malformed(origin, e))
}

//! Add-on type definitions.
//!
//! Core data structures shared by the store, the registry client, and the
//! lifecycle operations.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Maximum length of an addon name, matching npm's package name limit.
pub const MAX_NAME_LEN: usize = 214;

/// Display title used when an addon does not declare one.
pub const UNTITLED: &str = "Untitled";

/// Validated, filesystem-safe addon name.
///
/// Used as the directory name of a slot in the addon store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotName(String);

impl SlotName {
    /// Validates a name for use as a slot directory.
    pub fn new(name: &str) -> Result<Self, AddonError> {
        validate_name(name)?;
        Ok(Self(name.to_string()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SlotName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Checks that `name` is an npm-safe, single path component.
fn validate_name(name: &str) -> Result<(), AddonError> {
    let invalid = |reason: &str| AddonError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 214 characters"));
    }
    if name.starts_with('.') || name.starts_with('_') {
        return Err(invalid("name cannot start with '.' or '_'"));
    }
    if name.contains(['/', '\\']) {
        return Err(invalid("name cannot contain path separators"));
    }

    let allowed = |c: char| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_' | '~')
    };
    if let Some(bad) = name.chars().find(|c| !allowed(*c)) {
        return Err(invalid(&format!("name contains invalid character {:?}", bad)));
    }

    Ok(())
}

/// Installed state of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing occupies the slot.
    Absent,
    /// The slot is an ordinary directory holding addon files.
    Materialized,
    /// The slot is a symbolic link to a development checkout.
    Linked,
}

impl SlotState {
    /// Returns a display string for this state.
    #[must_use]
    pub fn display(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Materialized => "installed",
            Self::Linked => "linked",
        }
    }
}

/// Addon metadata extracted from a package manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonDescriptor {
    /// Package name, also the slot name.
    pub name: String,
    /// Human-readable title; empty when the manifest omits it.
    pub title: String,
    /// Package version.
    pub version: String,
    /// Whether the manifest carries a `lacona` section.
    pub has_lacona_metadata: bool,
}

impl AddonDescriptor {
    /// Returns the title, or "Untitled" when none was declared.
    #[must_use]
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            UNTITLED
        } else {
            &self.title
        }
    }

    /// Renders the `ls` line: `Title (name@version)`.
    #[must_use]
    pub fn listing_line(&self) -> String {
        format!("{} ({}@{})", self.display_title(), self.name, self.version)
    }
}

/// Package metadata resolved from the registry. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePackageInfo {
    /// Package name as reported by the registry.
    pub name: String,
    /// Version tagged `latest`.
    pub latest_version: String,
    /// Location of the gzip tarball.
    pub archive_url: String,
    /// Whether the metadata declares a `lacona` section.
    pub is_addon: bool,
}

/// Add-on error types.
#[derive(Debug, Error)]
pub enum AddonError {
    /// The package does not declare Lacona addon metadata.
    #[error("{0} is not a Lacona addon")]
    NotAnAddon(String),

    /// The registry has no such package.
    #[error("{0} was not found in the registry")]
    NotFound(String),

    /// A manifest or registry document could not be read or parsed.
    #[error("malformed manifest in {origin}: {reason}")]
    MalformedManifest { origin: String, reason: String },

    /// The addon name is not safe to use as a directory name.
    #[error("invalid addon name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// A non-symlink already occupies the slot.
    #[error("non-symlink exists at {}", .0.display())]
    Conflict(PathBuf),

    /// Transport failure talking to the registry.
    #[error("network error: {0}")]
    Network(String),

    /// The archive stream could not be unpacked.
    #[error("error unpacking {origin}: {reason}")]
    Extraction { origin: String, reason: String },

    /// Filesystem failure in the addon store.
    #[error("filesystem error: {0}")]
    Filesystem(#[from] io::Error),

    /// An external host command failed.
    #[error("{command} failed: {reason}")]
    HostCommand { command: String, reason: String },

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl AddonError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NotAnAddon(_) => 10,
            Self::NotFound(_) => 11,
            Self::MalformedManifest { .. } | Self::InvalidName { .. } => 12,
            Self::Conflict(_) => 13,
            Self::Network(_) => 14,
            Self::Extraction { .. } => 15,
            Self::Filesystem(_) => 16,
            Self::HostCommand { .. } => 17,
            Self::Config(_) => 18,
        }
    }

    pub(crate) fn extraction(origin: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Extraction {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(origin: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::MalformedManifest {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }
}

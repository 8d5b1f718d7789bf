//! Add-ons system for Lacona.
//!
//! This module installs, links, removes, and lists addon packages in the
//! host's addons folder.
//!
//! # Architecture
//!
//! - **types**: Core data structures (`AddonDescriptor`, `SlotName`, `AddonError`)
//! - **manifest**: `package.json` parsing and addon validation
//! - **storage**: The addons folder, one slot per addon
//! - **registry**: npm registry client for named installs
//! - **archive**: Packing local checkouts and unpacking tarballs
//! - **host**: `npm install` and the host reload signal
//! - **installer**: The `install`, `uninstall`, `link`, and `ls` operations
//!
//! # Usage
//!
//! ```ignore
//! use lacona_addons::addons::{AddonManager, AddonStore, NpmRegistry, OperationContext, SystemHost};
//!
//! let store = AddonStore::new(addons_dir);
//! let registry = NpmRegistry::new(DEFAULT_REGISTRY_URL, timeout, "lacona-addons")?;
//! let manager = AddonManager::new(store, registry, SystemHost::new());
//! manager.install(&OperationContext::from_process()?, Some("lacona-todo"))?;
//! ```

mod archive;
mod host;
mod installer;
mod manifest;
mod registry;
mod storage;
mod types;

pub use archive::{
    pack_local_directory, packed_files, unpack_archive, IgnoreRules, PackSummary,
    DEFAULT_IGNORES, PACKAGE_PREFIX,
};
pub use host::{HostBridge, SystemHost, HOST_APP};
pub use installer::{
    render_listing, AddonManager, InstallOutcome, InstallSource, LinkOutcome, OperationContext,
    UninstallOutcome,
};
pub use manifest::{parse, parse_str, LaconaSection, PackageManifest, MANIFEST_FILE};
pub use registry::{
    parse_latest, NpmRegistry, RegistryProvider, DEFAULT_REGISTRY_URL, DEFAULT_TIMEOUT_SECS,
};
pub use storage::{AddonStore, LinkResult, SkippedEntry, SlotEntry, SlotListing};
pub use types::{
    AddonDescriptor, AddonError, RemotePackageInfo, SlotName, SlotState, MAX_NAME_LEN, UNTITLED,
};

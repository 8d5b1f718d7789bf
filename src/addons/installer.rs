//! Add-on lifecycle operations.
//!
//! `install`, `uninstall`, `link`, and `ls` built on the store, the
//! registry client, and the archive helpers. Every call is independent;
//! the working directory is passed in explicitly.

use super::archive::{self, IgnoreRules};
use super::host::HostBridge;
use super::manifest::{self, MANIFEST_FILE, PackageManifest};
use super::registry::RegistryProvider;
use super::storage::{AddonStore, SlotListing};
use super::types::{AddonDescriptor, AddonError, SlotName, SlotState};
use std::env;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Packs up to this size stay in memory before spilling to disk (8MB).
const MAX_IN_MEMORY_PACK: usize = 8 * 1024 * 1024;

/// Where an operation runs from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    /// Directory holding the current package.
    cwd: PathBuf,
}

impl OperationContext {
    /// Creates a context for the package at `cwd`.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self { cwd }
    }

    /// Creates a context from the process working directory.
    pub fn from_process() -> Result<Self, AddonError> {
        Ok(Self::new(env::current_dir()?))
    }

    /// Returns the package directory.
    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Returns the path of the current package's manifest.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.cwd.join(MANIFEST_FILE)
    }

    /// Parses the current package as an addon.
    pub fn current_addon(&self) -> Result<AddonDescriptor, AddonError> {
        manifest::parse(&self.manifest_path())
    }

    /// Returns the current package's name, addon or not.
    pub fn current_package_name(&self) -> Result<SlotName, AddonError> {
        let path = self.manifest_path();
        PackageManifest::load(&path)?.slot_name(&path.display().to_string())
    }
}

/// Where an installed addon came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// Packed from a local checkout.
    Local(PathBuf),
    /// Downloaded from the registry.
    Registry {
        /// Tarball URL.
        archive_url: String,
    },
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Slot that now holds the addon.
    pub slot: SlotName,
    /// Descriptor of the installed files.
    pub descriptor: AddonDescriptor,
    /// Where the files came from.
    pub source: InstallSource,
    /// Number of files written.
    pub files: usize,
}

/// Result of an uninstall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UninstallOutcome {
    /// The slot was removed.
    Removed(SlotName),
    /// Nothing was installed under that name.
    AlreadyAbsent(SlotName),
}

impl UninstallOutcome {
    /// Returns the slot the operation targeted.
    #[must_use]
    pub fn slot(&self) -> &SlotName {
        match self {
            Self::Removed(name) | Self::AlreadyAbsent(name) => name,
        }
    }
}

/// Result of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Slot that now points at the checkout.
    pub slot: SlotName,
    /// Path of the slot symlink.
    pub slot_path: PathBuf,
    /// Checkout the slot points to.
    pub target: PathBuf,
    /// Whether a previous link was replaced.
    pub replaced: bool,
}

/// Add-on lifecycle manager.
pub struct AddonManager<R, H> {
    /// Directory store for installed addons.
    store: AddonStore,
    /// Registry used for named installs.
    registry: R,
    /// Host collaborators.
    host: H,
    /// Extra ignore patterns for local packs.
    extra_ignores: Vec<String>,
}

impl<R: RegistryProvider, H: HostBridge> AddonManager<R, H> {
    /// Creates a manager.
    #[must_use]
    pub fn new(store: AddonStore, registry: R, host: H) -> Self {
        Self {
            store,
            registry,
            host,
            extra_ignores: Vec::new(),
        }
    }

    /// Adds ignore patterns applied when packing a local checkout.
    #[must_use]
    pub fn with_extra_ignores(mut self, patterns: Vec<String>) -> Self {
        self.extra_ignores = patterns;
        self
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &AddonStore {
        &self.store
    }

    /// Returns the registry client.
    #[must_use]
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Returns the host bridge.
    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Installs `package` from the registry, or the current checkout when
    /// no name is given.
    pub fn install(
        &self,
        ctx: &OperationContext,
        package: Option<&str>,
    ) -> Result<InstallOutcome, AddonError> {
        match package {
            Some(name) => self.install_remote(name),
            None => self.install_local(ctx),
        }
    }

    fn install_local(&self, ctx: &OperationContext) -> Result<InstallOutcome, AddonError> {
        let descriptor = ctx.current_addon()?;
        let slot = SlotName::new(&descriptor.name)?;
        info!(
            "[ADDON-INSTALL] Installing {}@{} from {:?}",
            descriptor.name,
            descriptor.version,
            ctx.cwd()
        );

        let rules = IgnoreRules::for_package(ctx.cwd(), &self.extra_ignores)?;
        let spool = tempfile::spooled_tempfile(MAX_IN_MEMORY_PACK);
        let (mut spool, summary) = archive::pack_local_directory(ctx.cwd(), &rules, spool)?;
        spool.seek(SeekFrom::Start(0))?;
        debug!(
            "[ADDON-INSTALL] Packed {} files ({} bytes)",
            summary.files, summary.bytes
        );

        let origin = ctx.cwd().display().to_string();
        let mut files = 0;
        let installed = self.store.materialize_slot(&slot, |staging| {
            files = archive::unpack_archive(spool, staging, &origin)?;
            Ok(())
        })?;

        info!("[ADDON-INSTALL] {} installed from local checkout", slot);
        Ok(InstallOutcome {
            slot,
            descriptor: installed,
            source: InstallSource::Local(ctx.cwd().to_path_buf()),
            files,
        })
    }

    fn install_remote(&self, package: &str) -> Result<InstallOutcome, AddonError> {
        let slot = SlotName::new(package)?;
        info!("[ADDON-INSTALL] Installing {} from the registry", slot);

        let remote = self.registry.resolve_latest(package).map_err(|e| {
            warn!("[ADDON-INSTALL] Could not resolve {}: {}", package, e);
            e
        })?;
        if !remote.is_addon {
            return Err(AddonError::NotAnAddon(package.to_string()));
        }

        let mut files = 0;
        let installed = self.store.materialize_slot(&slot, |staging| {
            let stream = self.registry.open_archive(&remote.archive_url)?;
            files = archive::unpack_archive(stream, staging, package)?;
            Ok(())
        })?;

        info!(
            "[ADDON-INSTALL] {} installed successfully ({}@{})",
            slot, installed.name, installed.version
        );
        Ok(InstallOutcome {
            slot,
            descriptor: installed,
            source: InstallSource::Registry {
                archive_url: remote.archive_url,
            },
            files,
        })
    }

    /// Removes `package`, or the current package when no name is given.
    ///
    /// Uninstalling something that is not installed succeeds.
    pub fn uninstall(
        &self,
        ctx: &OperationContext,
        package: Option<&str>,
    ) -> Result<UninstallOutcome, AddonError> {
        let slot = match package {
            Some(name) => SlotName::new(name)?,
            None => ctx.current_package_name()?,
        };

        if self.store.remove_slot(&slot)? {
            info!("[ADDON-INSTALL] Uninstalled addon {}", slot);
            Ok(UninstallOutcome::Removed(slot))
        } else {
            Ok(UninstallOutcome::AlreadyAbsent(slot))
        }
    }

    /// Links the current checkout into the store for development.
    ///
    /// Installs the checkout's dependencies first and signals the host
    /// afterwards.
    pub fn link(&self, ctx: &OperationContext) -> Result<LinkOutcome, AddonError> {
        let descriptor = ctx.current_addon()?;
        let slot = SlotName::new(&descriptor.name)?;

        if self.store.slot_state(&slot)? == SlotState::Materialized {
            return Err(AddonError::Conflict(self.store.slot_path(&slot)));
        }

        self.host.install_dependencies(ctx.cwd())?;

        let target = ctx.cwd().to_path_buf();
        let result = self.store.link_slot(&slot, &target)?;

        self.host.reload_addons();

        Ok(LinkOutcome {
            slot,
            slot_path: result.slot_path,
            target,
            replaced: result.replaced,
        })
    }

    /// Lists installed addons.
    pub fn list(&self) -> Result<SlotListing, AddonError> {
        self.store.list_slots()
    }
}

/// Renders a listing as output lines.
///
/// With `verbose`, link state and skipped directories are included.
#[must_use]
pub fn render_listing(listing: &SlotListing, verbose: bool) -> Vec<String> {
    let mut lines: Vec<String> = listing
        .entries
        .iter()
        .map(|entry| {
            let line = entry.descriptor.listing_line();
            if verbose && entry.state == SlotState::Linked {
                format!("{} [{}]", line, entry.state.display())
            } else {
                line
            }
        })
        .collect();

    if verbose {
        if listing.truncated {
            lines.push(format!(
                "listing truncated after {} entries",
                listing.entries.len() + listing.skipped.len()
            ));
        }
        lines.extend(
            listing
                .skipped
                .iter()
                .map(|skipped| format!("skipped {}: {}", skipped.slot, skipped.reason)),
        );
    }

    lines
}

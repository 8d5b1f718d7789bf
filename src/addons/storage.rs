//! Add-on directory store.
//!
//! Owns the addons root directory. Every installed addon lives in its own
//! slot, a subdirectory (or symlink) named after the package. Entries whose
//! names start with `.` are reserved for staging and never listed.

use super::manifest::{self, MANIFEST_FILE};
use super::types::{AddonDescriptor, AddonError, SlotName, SlotState};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Maximum number of root entries inspected while listing.
const MAX_LISTED_ENTRIES: usize = 10_000;

/// An addon found while listing the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    /// Directory name of the slot.
    pub slot: String,
    /// Descriptor parsed from the slot's manifest.
    pub descriptor: AddonDescriptor,
    /// Whether the slot is a copy or a development link.
    pub state: SlotState,
}

/// A root entry that was skipped while listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Directory name.
    pub slot: String,
    /// Why it was not listed.
    pub reason: String,
}

/// Result of enumerating the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotListing {
    /// Addons, sorted by name.
    pub entries: Vec<SlotEntry>,
    /// Directories without a usable addon manifest.
    pub skipped: Vec<SkippedEntry>,
    /// Whether entries past the listing limit were left out.
    pub truncated: bool,
}

/// Outcome of `link_slot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkResult {
    /// Path of the slot.
    pub slot_path: PathBuf,
    /// Whether an existing link was replaced.
    pub replaced: bool,
}

/// Addon directory store.
#[derive(Debug, Clone)]
pub struct AddonStore {
    /// Root directory holding one slot per addon.
    root: PathBuf,
}

impl AddonStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of a slot.
    #[must_use]
    pub fn slot_path(&self, name: &SlotName) -> PathBuf {
        self.root.join(name.as_str())
    }

    fn staging_path(&self, name: &SlotName) -> PathBuf {
        self.root.join(format!(".{}.tmp", name))
    }

    fn backup_path(&self, name: &SlotName) -> PathBuf {
        self.root.join(format!(".{}.old", name))
    }

    fn ensure_root(&self) -> Result<(), AddonError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Reports the current state of a slot.
    pub fn slot_state(&self, name: &SlotName) -> Result<SlotState, AddonError> {
        state_of(&self.slot_path(name))
    }

    /// Lists every slot holding a parseable addon manifest.
    ///
    /// Directories without one are skipped, not reported as errors. An
    /// absent root lists as empty.
    pub fn list_slots(&self) -> Result<SlotListing, AddonError> {
        self.list_slots_limited(MAX_LISTED_ENTRIES)
    }

    fn list_slots_limited(&self, limit: usize) -> Result<SlotListing, AddonError> {
        let mut listing = SlotListing::default();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("[ADDON-STORE] Root {:?} does not exist yet", self.root);
                return Ok(listing);
            }
            Err(e) => return Err(e.into()),
        };

        let mut inspected = 0;
        for entry in entries {
            let entry = entry?;
            let slot = entry.file_name().to_string_lossy().into_owned();
            if slot.starts_with('.') {
                continue;
            }
            if inspected == limit {
                warn!(
                    "[ADDON-STORE] Listing stopped after {} entries in {:?}",
                    limit, self.root
                );
                listing.truncated = true;
                break;
            }
            inspected += 1;

            let path = entry.path();
            let state = state_of(&path)?;
            if !path.is_dir() {
                listing.skipped.push(SkippedEntry {
                    slot,
                    reason: "not a directory".to_string(),
                });
                continue;
            }

            let manifest_path = path.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                listing.skipped.push(SkippedEntry {
                    slot,
                    reason: "no manifest".to_string(),
                });
                continue;
            }

            match manifest::parse(&manifest_path) {
                Ok(descriptor) => listing.entries.push(SlotEntry {
                    slot,
                    descriptor,
                    state,
                }),
                Err(e) => {
                    debug!("[ADDON-STORE] Skipping {}: {}", slot, e);
                    let reason = match e {
                        AddonError::NotAnAddon(_) => "not an addon".to_string(),
                        other => other.to_string(),
                    };
                    listing.skipped.push(SkippedEntry { slot, reason });
                }
            }
        }

        listing.entries.sort_by(|a, b| {
            a.descriptor
                .name
                .cmp(&b.descriptor.name)
                .then_with(|| a.slot.cmp(&b.slot))
        });
        listing.skipped.sort_by(|a, b| a.slot.cmp(&b.slot));

        Ok(listing)
    }

    /// Removes a slot. Returns `false` when there was nothing to remove.
    pub fn remove_slot(&self, name: &SlotName) -> Result<bool, AddonError> {
        let path = self.slot_path(name);
        let removed = remove_entry(&path)?;
        if removed {
            info!("[ADDON-STORE] Removed slot {:?}", path);
        } else {
            debug!("[ADDON-STORE] Slot {:?} already absent", path);
        }
        Ok(removed)
    }

    /// Replaces a slot with freshly written contents.
    ///
    /// `write` fills a hidden staging directory. The staged tree must hold
    /// a valid addon manifest; only then is it renamed over the slot. On
    /// any failure the staging directory is discarded and the previous
    /// slot is left as it was.
    pub fn materialize_slot<F>(
        &self,
        name: &SlotName,
        write: F,
    ) -> Result<AddonDescriptor, AddonError>
    where
        F: FnOnce(&Path) -> Result<(), AddonError>,
    {
        self.ensure_root()?;

        let staging = self.staging_path(name);
        if remove_entry(&staging)? {
            warn!("[ADDON-STORE] Removed stale staging directory {:?}", staging);
        }
        fs::create_dir(&staging)?;

        let staged = write(&staging).and_then(|()| manifest::parse(&staging.join(MANIFEST_FILE)));
        let descriptor = match staged {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("[ADDON-STORE] Staging {} failed: {}", name, e);
                if let Err(cleanup) = remove_entry(&staging) {
                    warn!("[ADDON-STORE] Failed to clean {:?}: {}", staging, cleanup);
                }
                return Err(e);
            }
        };

        self.commit(name, &staging)?;
        info!(
            "[ADDON-STORE] Materialized {} ({}@{})",
            name, descriptor.name, descriptor.version
        );
        Ok(descriptor)
    }

    /// Swaps the staging directory into place.
    fn commit(&self, name: &SlotName, staging: &Path) -> Result<(), AddonError> {
        let slot = self.slot_path(name);
        let backup = self.backup_path(name);

        remove_entry(&backup)?;
        let had_previous = state_of(&slot)? != SlotState::Absent;
        if had_previous {
            fs::rename(&slot, &backup)?;
        }

        if let Err(e) = fs::rename(staging, &slot) {
            warn!("[ADDON-STORE] Rename into {:?} failed: {}", slot, e);
            if had_previous {
                if let Err(restore) = fs::rename(&backup, &slot) {
                    warn!("[ADDON-STORE] Could not restore {:?}: {}", slot, restore);
                }
            }
            let _ = remove_entry(staging);
            return Err(e.into());
        }

        if had_previous {
            if let Err(e) = remove_entry(&backup) {
                warn!("[ADDON-STORE] Failed to remove backup {:?}: {}", backup, e);
            }
        }
        Ok(())
    }

    /// Points a slot at a development checkout.
    ///
    /// An existing symlink is replaced; anything else in the slot is a
    /// `Conflict` and is left untouched.
    pub fn link_slot(&self, name: &SlotName, target: &Path) -> Result<LinkResult, AddonError> {
        self.ensure_root()?;
        let slot_path = self.slot_path(name);

        let replaced = match state_of(&slot_path)? {
            SlotState::Absent => false,
            SlotState::Linked => {
                info!("[ADDON-STORE] Unlinking existing {:?}", slot_path);
                remove_link(&slot_path)?;
                true
            }
            SlotState::Materialized => {
                warn!("[ADDON-STORE] Non-symlink exists at {:?}", slot_path);
                return Err(AddonError::Conflict(slot_path));
            }
        };

        info!("[ADDON-STORE] Symlinking {:?} -> {:?}", slot_path, target);
        make_link(target, &slot_path)?;

        Ok(LinkResult {
            slot_path,
            replaced,
        })
    }
}

/// Determines a slot's state without following symlinks.
fn state_of(path: &Path) -> Result<SlotState, AddonError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Ok(SlotState::Linked),
        Ok(_) => Ok(SlotState::Materialized),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(SlotState::Absent),
        Err(e) => Err(e.into()),
    }
}

/// Removes a file, directory tree, or symlink. Returns `false` if absent.
fn remove_entry(path: &Path) -> io::Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if meta.file_type().is_symlink() {
        remove_link(path)?;
    } else if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}

#[cfg(unix)]
fn make_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(unix)]
fn remove_link(link: &Path) -> io::Result<()> {
    fs::remove_file(link)
}

#[cfg(windows)]
fn remove_link(link: &Path) -> io::Result<()> {
    // Directory symlinks are removed like directories on Windows.
    fs::remove_dir(link).or_else(|_| fs::remove_file(link))
}

//! Host application bridge.
//!
//! The addon manager never touches the running host directly. It asks the
//! package manager to install a checkout's dependencies and tells the host
//! to re-scan its addons folder.

use super::types::AddonError;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

/// Name of the host application.
pub const HOST_APP: &str = "Lacona";

/// External collaborators used by the lifecycle operations.
pub trait HostBridge {
    /// Installs the dependencies of the package at `dir`.
    fn install_dependencies(&self, dir: &Path) -> Result<(), AddonError>;

    /// Asks the host to reload its addons. Fire-and-forget.
    fn reload_addons(&self);
}

/// Bridge backed by `npm` and, on macOS, AppleScript.
#[derive(Debug, Clone)]
pub struct SystemHost {
    /// Package manager executable.
    npm: String,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemHost {
    /// Creates a bridge using `npm` from PATH.
    #[must_use]
    pub fn new() -> Self {
        let npm = if cfg!(windows) { "npm.cmd" } else { "npm" };
        Self {
            npm: npm.to_string(),
        }
    }

    /// Returns the AppleScript sent to the host.
    #[must_use]
    pub fn reload_script() -> String {
        format!("tell application \"{}\" to reload addons", HOST_APP)
    }
}

impl HostBridge for SystemHost {
    fn install_dependencies(&self, dir: &Path) -> Result<(), AddonError> {
        let command = format!("{} install", self.npm);
        info!("[ADDON-HOST] Running `{}` in {:?}", command, dir);

        let output = Command::new(&self.npm)
            .arg("install")
            .current_dir(dir)
            .output()
            .map_err(|e| AddonError::HostCommand {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let truncated: String = stderr.chars().take(500).collect();
            warn!("[ADDON-HOST] `{}` failed: {}", command, truncated);
            return Err(AddonError::HostCommand {
                command,
                reason: format!("{}: {}", output.status, truncated.trim()),
            });
        }

        debug!("[ADDON-HOST] `{}` finished", command);
        Ok(())
    }

    fn reload_addons(&self) {
        #[cfg(target_os = "macos")]
        {
            let script = Self::reload_script();
            info!("[ADDON-HOST] Reloading addons");
            match Command::new("osascript").arg("-e").arg(&script).output() {
                Ok(output) if output.status.success() => {}
                Ok(output) => debug!("[ADDON-HOST] osascript exited with {}", output.status),
                Err(e) => debug!("[ADDON-HOST] osascript could not run: {}", e),
            }
        }

        #[cfg(not(target_os = "macos"))]
        {
            info!(
                "[ADDON-HOST] {} only runs on macOS; skipping reload signal",
                HOST_APP
            );
        }
    }
}

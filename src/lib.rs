//! lacona-addons
//!
//! Installs, links, removes, and lists addons for the Lacona launcher.
//!
//! # Architecture
//!
//! - **Addons Module**: Addons folder store, manifest validation, npm
//!   registry client, archive packing, and the lifecycle operations
//! - **Config Module**: `~/.lacona/addons.toml` plus env and flag overrides
//! - **Logging Module**: Daily rolling log files and stderr output
//!
//! # Usage
//!
//! ```no_run
//! use lacona_addons::addons::{AddonManager, AddonStore, NpmRegistry, OperationContext, SystemHost};
//! use lacona_addons::config::{Config, ConfigOverrides};
//!
//! let config = Config::load(None, &ConfigOverrides::default()).expect("config");
//! let registry = NpmRegistry::new(&config.registry_url, config.http_timeout, &config.user_agent)
//!     .expect("registry");
//! let manager = AddonManager::new(AddonStore::new(config.addons_dir), registry, SystemHost::new());
//! let ctx = OperationContext::from_process().expect("cwd");
//! manager.install(&ctx, Some("lacona-todo")).expect("install");
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub mod addons;
pub mod config;
pub mod logging;

// Re-export main types
pub use addons::{AddonError, AddonManager, AddonStore, OperationContext};
pub use config::Config;

/// Current version of lacona-addons.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

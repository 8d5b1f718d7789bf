//! Configuration module for lacona-addons.
//!
//! Handles loading the optional `~/.lacona/addons.toml` file and layering
//! environment and command-line overrides on top of it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::addons::{AddonError, DEFAULT_REGISTRY_URL, DEFAULT_TIMEOUT_SECS};
use crate::logging::LogConfig;

/// Maximum config file size (256KB).
const MAX_CONFIG_SIZE: u64 = 256 * 1024;

/// Environment variable naming an alternate config file.
pub const ENV_CONFIG: &str = "LACONA_CONFIG";

/// Environment variable overriding the addons folder.
pub const ENV_ADDONS_DIR: &str = "LACONA_ADDONS_DIR";

/// Environment variable overriding the registry URL.
pub const ENV_REGISTRY: &str = "LACONA_REGISTRY";

/// Example configuration with every key documented.
pub const EXAMPLE_CONFIG: &str = r#"# lacona-addons configuration
# ===========================
# All keys are optional.

# Folder the host loads addons from.
# addons_dir = "~/Library/Application Support/Lacona/Addons"

# Registry used by `lacona install <package>`.
# registry_url = "https://registry.npmjs.org"

# Network timeout in seconds (0 disables the timeout).
# http_timeout_secs = 30

# User-Agent sent to the registry.
# user_agent = "lacona-addons"

# Extra patterns (gitignore syntax) left out of local installs.
# ignore = ["docs", "*.psd"]

[log]
# enabled = true
# level = "info"            # trace, debug, info, warn, error, off
# retention_hours = 168
"#;

/// Raw TOML file contents.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    addons_dir: Option<PathBuf>,
    registry_url: Option<String>,
    http_timeout_secs: Option<u64>,
    user_agent: Option<String>,
    #[serde(default)]
    ignore: Vec<String>,
    #[serde(default)]
    log: LogSection,
}

/// `[log]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogSection {
    enabled: Option<bool>,
    level: Option<String>,
    retention_hours: Option<u32>,
}

/// Values given on the command line, highest precedence.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// `--addons-dir`.
    pub addons_dir: Option<PathBuf>,
    /// `--registry`.
    pub registry_url: Option<String>,
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Addons folder (the store root).
    pub addons_dir: PathBuf,
    /// Registry base URL.
    pub registry_url: String,
    /// Transport timeout; zero disables it.
    pub http_timeout: Duration,
    /// User-Agent for registry requests.
    pub user_agent: String,
    /// Extra ignore patterns for local packs.
    pub extra_ignores: Vec<String>,
    /// Logging settings.
    pub log_config: LogConfig,
    /// File the configuration was read from, if any.
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addons_dir: default_addons_dir(),
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: format!("lacona-addons/{}", env!("CARGO_PKG_VERSION")),
            extra_ignores: Vec::new(),
            log_config: LogConfig::default(),
            config_path: None,
        }
    }
}

/// Returns the lacona-addons data directory (~/.lacona).
#[must_use]
pub fn lacona_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lacona")
}

/// Returns the host's addons folder.
///
/// On macOS this is `~/Library/Application Support/Lacona/Addons`.
#[must_use]
pub fn default_addons_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(lacona_dir)
        .join("Lacona")
        .join("Addons")
}

impl Config {
    /// Returns the default config file path (~/.lacona/addons.toml).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        lacona_dir().join("addons.toml")
    }

    /// Loads configuration the way the CLI does.
    ///
    /// `explicit` comes from `--config`; otherwise `LACONA_CONFIG`, then the
    /// default path. Environment overrides and `overrides` are applied on
    /// top.
    pub fn load(explicit: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, AddonError> {
        Self::load_with_env(explicit, overrides, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`] with a custom environment lookup.
    pub fn load_with_env<F>(
        explicit: Option<&Path>,
        overrides: &ConfigOverrides,
        env: F,
    ) -> Result<Self, AddonError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match env(ENV_CONFIG).filter(|v| !v.is_empty()) {
                Some(path) => (PathBuf::from(path), true),
                None => (Self::default_config_path(), false),
            },
        };

        let mut config = if path.exists() || required {
            Self::load_from(&path)?
        } else {
            Self::default()
        };

        if let Some(dir) = env(ENV_ADDONS_DIR).filter(|v| !v.is_empty()) {
            config.addons_dir = expand_home(Path::new(&dir));
        }
        if let Some(url) = env(ENV_REGISTRY).filter(|v| !v.is_empty()) {
            config.registry_url = url;
        }

        if let Some(ref dir) = overrides.addons_dir {
            config.addons_dir = expand_home(dir);
        }
        if let Some(ref url) = overrides.registry_url {
            config.registry_url = url.clone();
        }

        Ok(config)
    }

    /// Loads configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, AddonError> {
        let display = path.display();

        let metadata = fs::metadata(path)
            .map_err(|e| AddonError::Config(format!("cannot read {}: {}", display, e)))?;
        if metadata.len() > MAX_CONFIG_SIZE {
            return Err(AddonError::Config(format!(
                "{} is too large (max {} bytes)",
                display, MAX_CONFIG_SIZE
            )));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| AddonError::Config(format!("cannot read {}: {}", display, e)))?;
        let mut config = Self::parse(&content)
            .map_err(|e| AddonError::Config(format!("{}: {}", display, e)))?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parses TOML configuration text over the defaults.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(content)?;
        let mut config = Self::default();

        if let Some(dir) = file.addons_dir {
            config.addons_dir = expand_home(&dir);
        }
        if let Some(url) = file.registry_url {
            config.registry_url = url;
        }
        if let Some(secs) = file.http_timeout_secs {
            config.http_timeout = Duration::from_secs(secs);
        }
        if let Some(agent) = file.user_agent.filter(|a| !a.is_empty()) {
            config.user_agent = agent;
        }
        config.extra_ignores = file.ignore;

        if let Some(enabled) = file.log.enabled {
            config.log_config.enabled = enabled;
        }
        if let Some(ref level) = file.log.level {
            config.log_config.level = LogConfig::parse_level(level);
        }
        if let Some(hours) = file.log.retention_hours {
            config.log_config.retention_hours = hours;
        }

        Ok(config)
    }
}

/// Expands a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.registry_url, DEFAULT_REGISTRY_URL);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(config.addons_dir.ends_with(Path::new("Lacona").join("Addons")));
        assert!(config.user_agent.starts_with("lacona-addons/"));
        assert!(config.extra_ignores.is_empty());
    }

    #[test]
    fn test_example_config_parses() {
        let config = Config::parse(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config.registry_url, DEFAULT_REGISTRY_URL);
    }

    #[test]
    fn test_parse_all_keys() {
        let config = Config::parse(
            r#"
addons_dir = "/opt/lacona/addons"
registry_url = "https://npm.example.com"
http_timeout_secs = 0
user_agent = "custom"
ignore = ["docs"]

[log]
enabled = false
level = "WARNING"
retention_hours = 12
"#,
        )
        .unwrap();

        assert_eq!(config.addons_dir, PathBuf::from("/opt/lacona/addons"));
        assert_eq!(config.registry_url, "https://npm.example.com");
        assert!(config.http_timeout.is_zero());
        assert_eq!(config.user_agent, "custom");
        assert_eq!(config.extra_ignores, vec!["docs".to_string()]);
        assert!(!config.log_config.enabled);
        assert_eq!(config.log_config.level, "warn");
        assert_eq!(config.log_config.retention_hours, 12);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(Config::parse("regsitry_url = \"typo\"").is_err());
    }

    #[test]
    fn test_tilde_expansion() {
        let config = Config::parse("addons_dir = \"~/Addons\"").unwrap();
        assert!(!config.addons_dir.starts_with("~"));
        assert!(config.addons_dir.ends_with("Addons"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let err =
            Config::load_with_env(Some(&missing), &ConfigOverrides::default(), no_env).unwrap_err();
        assert!(matches!(err, AddonError::Config(_)));
        assert_eq!(err.exit_code(), 18);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("addons.toml");
        fs::write(&path, "addons_dir = [").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(AddonError::Config(_))
        ));
    }

    #[test]
    fn test_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("addons.toml");
        fs::write(
            &path,
            "addons_dir = \"/from/file\"\nregistry_url = \"https://file.example\"\n",
        )
        .unwrap();

        let env: HashMap<&str, &str> = [(ENV_ADDONS_DIR, "/from/env")].into_iter().collect();
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let config =
            Config::load_with_env(Some(&path), &ConfigOverrides::default(), lookup).unwrap();
        assert_eq!(config.addons_dir, PathBuf::from("/from/env"));
        assert_eq!(config.registry_url, "https://file.example");
        assert_eq!(config.config_path.as_deref(), Some(path.as_path()));

        let overrides = ConfigOverrides {
            addons_dir: Some(PathBuf::from("/from/flag")),
            registry_url: Some("https://flag.example".to_string()),
        };
        let config = Config::load_with_env(Some(&path), &overrides, lookup).unwrap();
        assert_eq!(config.addons_dir, PathBuf::from("/from/flag"));
        assert_eq!(config.registry_url, "https://flag.example");
    }

    #[test]
    fn test_env_config_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "http_timeout_secs = 5\n").unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let lookup = |key: &str| (key == ENV_CONFIG).then(|| path_str.clone());
        let config = Config::load_with_env(None, &ConfigOverrides::default(), lookup).unwrap();
        assert_eq!(config.http_timeout, Duration::from_secs(5));
    }
}

//! Logging module for lacona-addons.
//!
//! Every invocation logs to a daily rolling file under `~/.lacona/logs/`,
//! and warnings (or more, with `-v`) go to stderr. Old files are cleaned up
//! at startup.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Default log retention in hours (one week).
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 168;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Prefix of every log file name.
pub const LOG_FILE_PREFIX: &str = "lacona-addons.log";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log retention period in hours.
    pub retention_hours: u32,
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Whether file logging is enabled.
    pub enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            level: DEFAULT_LOG_LEVEL.to_string(),
            enabled: true,
        }
    }
}

impl LogConfig {
    /// Parses log level from string.
    #[must_use]
    pub fn parse_level(value: &str) -> String {
        match value.to_lowercase().as_str() {
            "trace" => "trace".to_string(),
            "debug" => "debug".to_string(),
            "info" => "info".to_string(),
            "warn" | "warning" => "warn".to_string(),
            "error" => "error".to_string(),
            "off" | "none" | "disabled" => "off".to_string(),
            _ => DEFAULT_LOG_LEVEL.to_string(),
        }
    }

    /// Maps `-v` repetitions to a stderr level.
    #[must_use]
    pub fn stderr_level(verbosity: u8) -> &'static str {
        match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Returns the log directory path (~/.lacona/logs/).
#[must_use]
pub fn log_directory() -> PathBuf {
    crate::config::lacona_dir().join("logs")
}

fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX))
}

/// Cleans up log files in `log_dir` older than the retention period.
///
/// # Errors
/// Returns error if directory cannot be read.
pub fn cleanup_old_logs(log_dir: &Path, retention_hours: u32) -> io::Result<u32> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let retention_duration = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut deleted_count = 0;

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();

        if !is_log_file(&path) {
            continue;
        }

        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            if let Ok(age) = now.duration_since(modified) {
                if age > retention_duration && fs::remove_file(&path).is_ok() {
                    deleted_count += 1;
                }
            }
        }
    }

    Ok(deleted_count)
}

/// Returns retained log files, oldest first.
pub fn log_files(log_dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !log_dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| is_log_file(p))
        .collect();
    // Daily files carry a YYYY-MM-DD suffix, so name order is date order.
    files.sort();
    Ok(files)
}

/// Returns the last `max_lines` lines across all retained log files.
pub fn tail_logs(log_dir: &Path, max_lines: usize) -> io::Result<Vec<String>> {
    let mut lines = Vec::new();

    for path in log_files(log_dir)? {
        let file = fs::File::open(&path)?;
        for line in BufReader::new(file).lines() {
            lines.push(line?);
        }
        if lines.len() > max_lines {
            lines.drain(..lines.len() - max_lines);
        }
    }

    Ok(lines)
}

/// Initializes the logging system.
///
/// Sets up stderr logging at the given verbosity and, when enabled, file
/// logging with retention cleanup. Keep the returned guard alive for the
/// whole process so buffered lines are flushed.
///
/// # Errors
/// Returns error if the log directory cannot be prepared.
pub fn init(config: &LogConfig, verbosity: u8) -> io::Result<Option<WorkerGuard>> {
    let stderr_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(LogConfig::stderr_level(verbosity)));
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(stderr_filter);

    if !config.enabled || config.level == "off" {
        tracing_subscriber::registry().with(stderr_layer).init();
        return Ok(None);
    }

    let log_dir = log_directory();
    fs::create_dir_all(&log_dir)?;
    let deleted = cleanup_old_logs(&log_dir, config.retention_hours)?;

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_filter(EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    tracing::debug!("Log directory: {}", log_dir.display());
    tracing::debug!("Log level: {}", config.level);
    if deleted > 0 {
        tracing::debug!("Cleaned up {} old log file(s)", deleted);
    }

    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.retention_hours, DEFAULT_LOG_RETENTION_HOURS);
        assert_eq!(config.level, DEFAULT_LOG_LEVEL);
        assert!(config.enabled);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(LogConfig::parse_level("debug"), "debug");
        assert_eq!(LogConfig::parse_level("DEBUG"), "debug");
        assert_eq!(LogConfig::parse_level("warn"), "warn");
        assert_eq!(LogConfig::parse_level("warning"), "warn");
        assert_eq!(LogConfig::parse_level("off"), "off");
        assert_eq!(LogConfig::parse_level("invalid"), DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_stderr_level() {
        assert_eq!(LogConfig::stderr_level(0), "warn");
        assert_eq!(LogConfig::stderr_level(1), "info");
        assert_eq!(LogConfig::stderr_level(2), "debug");
        assert_eq!(LogConfig::stderr_level(9), "trace");
    }

    #[test]
    fn test_log_directory() {
        let dir = log_directory();
        assert!(dir.to_string_lossy().contains(".lacona"));
        assert!(dir.ends_with("logs"));
    }

    #[test]
    fn test_cleanup_keeps_recent_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("lacona-addons.log.2026-10-17"), "recent").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let deleted = cleanup_old_logs(dir.path(), 1).unwrap();
        assert_eq!(deleted, 0);

        let deleted = cleanup_old_logs(&dir.path().join("missing"), 1).unwrap();
        assert_eq!(deleted, 0);
    }

    #[test]
    fn test_tail_logs_spans_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("lacona-addons.log.2026-10-16"), "a\nb\nc\n").unwrap();
        fs::write(dir.path().join("lacona-addons.log.2026-10-17"), "d\ne\n").unwrap();
        fs::write(dir.path().join("other.log"), "x\n").unwrap();

        assert_eq!(tail_logs(dir.path(), 3).unwrap(), vec!["c", "d", "e"]);
        assert_eq!(tail_logs(dir.path(), 100).unwrap().len(), 5);
        assert!(tail_logs(&dir.path().join("none"), 10).unwrap().is_empty());
    }
}

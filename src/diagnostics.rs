//! Diagnostics for the dashboard client.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Logging setup**: console plus a daily rolling file in the log directory
//! - **Log rotation**: keeps the newest `MAX_LOG_FILES` files
//! - **Redaction**: strips secrets from JSON before it is printed or logged

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Prefix of the rolling log files (`dashboard.YYYY-MM-DD`).
const LOG_FILE_PREFIX: &str = "dashboard";

const DEFAULT_LOG_FILTER: &str = "info,restaurant_dashboard_lib=debug";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

/// Returns version, build timestamp, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

/// Effective configuration, for `about`.
pub fn config_summary(config: &AppConfig) -> Value {
    json!({
        "apiBaseUrl": config.api_base_url,
        "transport": config.transport.as_str(),
        "pollIntervalSecs": config.poll_interval.as_secs(),
        "reconnectDelaySecs": config.reconnect_delay.as_secs(),
        "requestTimeoutSecs": config.request_timeout.as_secs(),
        "sessionBackend": config.session_backend.as_str(),
        "dataDir": config.data_dir.to_string_lossy(),
        "logDir": config.log_dir().to_string_lossy(),
    })
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the global subscriber: `RUST_LOG` (or the default filter), a
/// console layer, and a non-blocking daily file. The returned guard flushes
/// the file writer on drop and must live until exit.
pub fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);

    let log_dir = config.log_dir();
    prune_old_logs(&log_dir);
    if let Err(e) = fs::create_dir_all(&log_dir) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        warn!(dir = %log_dir.display(), error = %e, "file logging disabled");
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Some(guard)
}

/// Prune old log files in `log_dir`, keeping only the most recent
/// `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

// ---------------------------------------------------------------------------
// Redaction
// ---------------------------------------------------------------------------

pub fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, value) in map {
                if should_redact_key(&key) {
                    redacted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key, redact_sensitive_fields(value));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    ["secret", "password", "token", "authorization", "cookie"]
        .iter()
        .any(|marker| normalized.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        for key in ["version", "buildTimestamp", "gitSha", "platform", "arch"] {
            assert!(info.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_config_summary_names_transport() {
        let summary = config_summary(&AppConfig::default());
        assert_eq!(summary["transport"], "polling");
        assert_eq!(summary["pollIntervalSecs"], 10);
        assert_eq!(summary["sessionBackend"], "file");
    }

    #[test]
    fn test_prune_keeps_newest_log_files() {
        let dir = std::env::temp_dir().join(format!("dashboard-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        for day in 0..(MAX_LOG_FILES + 3) {
            let path = dir.join(format!("dashboard.2026-01-{:02}", day + 1));
            let file = fs::File::create(&path).unwrap();
            file.set_modified(base + Duration::from_secs(day as u64 * 60)).unwrap();
        }
        fs::write(dir.join("unrelated.txt"), "keep").unwrap();

        prune_old_logs(&dir);

        let mut left: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left.len(), MAX_LOG_FILES + 1);
        assert!(left.contains(&"unrelated.txt".to_string()));
        assert!(!left.contains(&"dashboard.2026-01-01".to_string()));
        assert!(left.contains(&"dashboard.2026-01-13".to_string()));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_redact_sensitive_fields_recurses_through_objects() {
        let redacted = redact_sensitive_fields(json!({
            "adminData": { "id": "1", "username": "amy" },
            "token": "abc",
            "nested": [{ "Authorization": "Bearer x", "ok": 1 }]
        }));
        assert_eq!(redacted["token"], "[REDACTED]");
        assert_eq!(redacted["adminData"]["username"], "amy");
        assert_eq!(redacted["nested"][0]["Authorization"], "[REDACTED]");
        assert_eq!(redacted["nested"][0]["ok"], 1);
    }
}

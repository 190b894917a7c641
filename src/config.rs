//! Runtime configuration for the dashboard client.
//!
//! Everything is read from the process environment with built-in defaults, so
//! a bare `restaurant-dashboard watch` talks to the hosted backend. Invalid
//! values are logged and replaced by their default rather than aborting.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::api::normalize_base_url;

/// Backend origin used when `DASHBOARD_API_BASE_URL` is unset.
pub const DEFAULT_API_BASE_URL: &str = "https://credit-management-system-40i5.onrender.com";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const ENV_API_BASE_URL: &str = "DASHBOARD_API_BASE_URL";
const ENV_SYNC_TRANSPORT: &str = "DASHBOARD_SYNC_TRANSPORT";
const ENV_POLL_INTERVAL: &str = "DASHBOARD_POLL_INTERVAL_SECS";
const ENV_RECONNECT_DELAY: &str = "DASHBOARD_RECONNECT_DELAY_SECS";
const ENV_REQUEST_TIMEOUT: &str = "DASHBOARD_REQUEST_TIMEOUT_SECS";
const ENV_SESSION_BACKEND: &str = "DASHBOARD_SESSION_BACKEND";
const ENV_DATA_DIR: &str = "DASHBOARD_DATA_DIR";

/// Which update source backs the order synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Polling,
    Push,
}

impl TransportKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "poll" | "polling" | "http" => Some(Self::Polling),
            "push" | "ws" | "websocket" | "stomp" => Some(Self::Push),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::Push => "push",
        }
    }
}

/// Where the admin session is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackendKind {
    File,
    Keyring,
}

impl SessionBackendKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "file" | "local" | "localstorage" => Some(Self::File),
            "keyring" | "os" => Some(Self::Keyring),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Keyring => "keyring",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Normalised backend origin, without a trailing slash or `/api`.
    pub api_base_url: String,
    pub transport: TransportKind,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub session_backend: SessionBackendKind,
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            transport: TransportKind::Polling,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session_backend: SessionBackendKind::File,
            data_dir: default_data_dir(),
        }
    }
}

impl AppConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = read(ENV_API_BASE_URL) {
            let normalized = normalize_base_url(&raw);
            if normalized.is_empty() {
                warn!(key = ENV_API_BASE_URL, "empty base url, using default");
            } else {
                config.api_base_url = normalized;
            }
        }

        if let Some(raw) = read(ENV_SYNC_TRANSPORT) {
            match TransportKind::parse(&raw) {
                Some(kind) => config.transport = kind,
                None => warn!(key = ENV_SYNC_TRANSPORT, value = %raw, "unknown transport, using polling"),
            }
        }

        if let Some(raw) = read(ENV_SESSION_BACKEND) {
            match SessionBackendKind::parse(&raw) {
                Some(kind) => config.session_backend = kind,
                None => warn!(key = ENV_SESSION_BACKEND, value = %raw, "unknown session backend, using file"),
            }
        }

        if let Some(secs) = read(ENV_POLL_INTERVAL).and_then(|v| parse_secs(ENV_POLL_INTERVAL, &v)) {
            config.poll_interval = secs;
        }
        if let Some(secs) =
            read(ENV_RECONNECT_DELAY).and_then(|v| parse_secs(ENV_RECONNECT_DELAY, &v))
        {
            config.reconnect_delay = secs;
        }
        if let Some(secs) =
            read(ENV_REQUEST_TIMEOUT).and_then(|v| parse_secs(ENV_REQUEST_TIMEOUT, &v))
        {
            config.request_timeout = secs;
        }

        if let Some(dir) = read(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir.trim());
        }

        config
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }
}

/// Parse a strictly positive number of seconds.
fn parse_secs(key: &str, raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            warn!(key, value = %raw, "expected a positive number of seconds, using default");
            None
        }
        Ok(secs) => Some(Duration::from_secs(secs)),
    }
}

/// Platform data directory for logs and the session file.
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("restaurant-dashboard")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = config_from(&[]);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.transport, TransportKind::Polling);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.session_backend, SessionBackendKind::File);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = config_from(&[
            ("DASHBOARD_API_BASE_URL", "localhost:8080/api/"),
            ("DASHBOARD_SYNC_TRANSPORT", "WebSocket"),
            ("DASHBOARD_POLL_INTERVAL_SECS", "3"),
            ("DASHBOARD_SESSION_BACKEND", "keyring"),
            ("DASHBOARD_DATA_DIR", "/tmp/dash"),
        ]);
        assert_eq!(config.api_base_url, "http://localhost:8080");
        assert_eq!(config.transport, TransportKind::Push);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.session_backend, SessionBackendKind::Keyring);
        assert_eq!(config.session_file(), PathBuf::from("/tmp/dash/session.json"));
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("DASHBOARD_SYNC_TRANSPORT", "carrier-pigeon"),
            ("DASHBOARD_POLL_INTERVAL_SECS", "0"),
            ("DASHBOARD_RECONNECT_DELAY_SECS", "soon"),
            ("DASHBOARD_API_BASE_URL", "   "),
        ]);
        assert_eq!(config.transport, TransportKind::Polling);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.reconnect_delay, DEFAULT_RECONNECT_DELAY);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var("DASHBOARD_POLL_INTERVAL_SECS", "42");
        let config = AppConfig::from_env();
        std::env::remove_var("DASHBOARD_POLL_INTERVAL_SECS");
        assert_eq!(config.poll_interval, Duration::from_secs(42));
    }
}

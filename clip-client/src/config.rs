//! Configuration loading for duoclip clients.
//!
//! Configuration is loaded from a TOML file. Every section and field is
//! optional; missing values fall back to the defaults below.

use clip_core::SharedSecret;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a duoclip client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Relay connection.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Poll cadences.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Sync engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Pairing settings.
    #[serde(default)]
    pub pairing: PairingConfig,
}

/// Relay connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Base URL of the relay (default: http://localhost:3210).
    #[serde(default = "default_relay_url")]
    pub url: String,
    /// Deadline for one relay call in milliseconds (default: 30000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Poll cadences.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Inbound clipboard poll interval in milliseconds (default: 500).
    #[serde(default = "default_clipboard_interval_ms")]
    pub clipboard_interval_ms: u64,
    /// Host poll interval while waiting for a joiner (default: 1000).
    #[serde(default = "default_pairing_watch_interval_ms")]
    pub pairing_watch_interval_ms: u64,
    /// Pairing existence check interval (default: 2000).
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    /// Wait after a failed poll before retrying (default: 2000).
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

/// Sync engine tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Echo suppression window after a remote apply (default: 2000).
    #[serde(default = "default_echo_window_ms")]
    pub echo_window_ms: u64,
    /// Watchdog check period (default: 30000).
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
    /// Heartbeat age that triggers a listener restart (default: 60000).
    #[serde(default = "default_watchdog_stale_ms")]
    pub watchdog_stale_ms: u64,
    /// Start attempts while pairing credentials are missing (default: 5).
    #[serde(default = "default_start_retry_attempts")]
    pub start_retry_attempts: u32,
    /// Delay between start attempts (default: 1000).
    #[serde(default = "default_start_retry_delay_ms")]
    pub start_retry_delay_ms: u64,
    /// History entries kept in memory (default: 100).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

/// Pairing settings.
#[derive(Clone, Deserialize)]
pub struct PairingConfig {
    /// Name shown to the paired device on first run (default: "duoclip").
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Key used when a scanned payload carries no secret.
    ///
    /// Deprecated: only for hosts that predate per-pairing secrets.
    #[serde(default)]
    pub legacy_secret_hex: Option<String>,
}

impl std::fmt::Debug for PairingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingConfig")
            .field("device_name", &self.device_name)
            .field(
                "legacy_secret_hex",
                &self.legacy_secret_hex.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

fn default_relay_url() -> String {
    "http://localhost:3210".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_clipboard_interval_ms() -> u64 {
    500
}

fn default_pairing_watch_interval_ms() -> u64 {
    1_000
}

fn default_status_interval_ms() -> u64 {
    2_000
}

fn default_error_backoff_ms() -> u64 {
    2_000
}

fn default_echo_window_ms() -> u64 {
    2_000
}

fn default_watchdog_interval_ms() -> u64 {
    30_000
}

fn default_watchdog_stale_ms() -> u64 {
    60_000
}

fn default_start_retry_attempts() -> u32 {
    5
}

fn default_start_retry_delay_ms() -> u64 {
    1_000
}

fn default_history_limit() -> usize {
    100
}

fn default_device_name() -> String {
    "duoclip".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            clipboard_interval_ms: default_clipboard_interval_ms(),
            pairing_watch_interval_ms: default_pairing_watch_interval_ms(),
            status_interval_ms: default_status_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            echo_window_ms: default_echo_window_ms(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            watchdog_stale_ms: default_watchdog_stale_ms(),
            start_retry_attempts: default_start_retry_attempts(),
            start_retry_delay_ms: default_start_retry_delay_ms(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            legacy_secret_hex: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.url.trim().is_empty() {
            return Err(ConfigError::Invalid("relay.url must not be empty".into()));
        }
        let intervals = [
            ("relay.request_timeout_ms", self.relay.request_timeout_ms),
            ("polling.clipboard_interval_ms", self.polling.clipboard_interval_ms),
            (
                "polling.pairing_watch_interval_ms",
                self.polling.pairing_watch_interval_ms,
            ),
            ("polling.status_interval_ms", self.polling.status_interval_ms),
            ("polling.error_backoff_ms", self.polling.error_backoff_ms),
            ("engine.watchdog_interval_ms", self.engine.watchdog_interval_ms),
            ("engine.watchdog_stale_ms", self.engine.watchdog_stale_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if self.engine.start_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "engine.start_retry_attempts must be at least 1".into(),
            ));
        }
        if self.engine.history_limit == 0 {
            return Err(ConfigError::Invalid(
                "engine.history_limit must be at least 1".into(),
            ));
        }
        self.legacy_secret()?;
        Ok(())
    }

    /// The deprecated fallback secret, if configured.
    pub fn legacy_secret(&self) -> Result<Option<SharedSecret>, ConfigError> {
        match &self.pairing.legacy_secret_hex {
            Some(hex) => SharedSecret::from_hex(hex)
                .map(Some)
                .map_err(|e| ConfigError::Invalid(format!("pairing.legacy_secret_hex: {}", e))),
            None => Ok(None),
        }
    }

    /// Deadline for one relay call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.relay.request_timeout_ms)
    }

    /// Inbound clipboard poll interval.
    pub fn clipboard_interval(&self) -> Duration {
        Duration::from_millis(self.polling.clipboard_interval_ms)
    }

    /// Host poll interval while waiting for a joiner.
    pub fn pairing_watch_interval(&self) -> Duration {
        Duration::from_millis(self.polling.pairing_watch_interval_ms)
    }

    /// Pairing existence check interval.
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.polling.status_interval_ms)
    }

    /// Wait after a failed poll.
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.polling.error_backoff_ms)
    }

    /// Echo suppression window.
    pub fn echo_window(&self) -> Duration {
        Duration::from_millis(self.engine.echo_window_ms)
    }

    /// Watchdog check period.
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.engine.watchdog_interval_ms)
    }

    /// Heartbeat age that triggers a listener restart.
    pub fn watchdog_stale(&self) -> Duration {
        Duration::from_millis(self.engine.watchdog_stale_ms)
    }

    /// Delay between start attempts.
    pub fn start_retry_delay(&self) -> Duration {
        Duration::from_millis(self.engine.start_retry_delay_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

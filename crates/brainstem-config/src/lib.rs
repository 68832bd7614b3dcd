#![deny(unsafe_code)]

//! Configuration loading and validation for brainstem.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure shared by the daemon, the CLI and the
//! reconnecting client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Largest frame cap an operator may configure (16 MiB).
pub const MAX_FRAME_BYTES_LIMIT: u32 = 16 * 1024 * 1024;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon (server side) configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Client connection and reconnection configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the daemon's IPC server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket path. Defaults to `<data_local_dir>/brainstem/daemon.sock`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,

    /// Timeout for reading a frame body and for each write, in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Largest accepted frame payload in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,

    /// Responses queued per connection before the peer is considered stalled.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            io_timeout_ms: default_io_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl DaemonConfig {
    /// Resolve the socket path from config or fall back to the per-user default.
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(default_socket_path)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

fn default_io_timeout_ms() -> u64 {
    5_000
}

fn default_max_frame_bytes() -> u32 {
    1024 * 1024 // 1 MiB
}

fn default_outbound_queue() -> usize {
    32
}

/// Per-user default socket location.
///
/// Uses the platform's local data directory (`~/.local/share` on Linux,
/// `~/Library/Application Support` on macOS) and falls back to the system
/// temp dir when no home directory can be resolved.
pub fn default_socket_path() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        debug!("no local data directory, using temp dir for socket");
        std::env::temp_dir()
    });
    base.join("brainstem").join("daemon.sock")
}

/// Reconnect delay growth between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Retry after the same delay forever.
    Fixed,
    /// Double the delay after each failure, capped at `max_retry_delay_ms`.
    Exponential,
}

/// Configuration for clients connecting to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Delay before a reconnect attempt, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Delay growth strategy.
    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,

    /// Upper bound for exponential backoff, in milliseconds.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// How long a client waits for the reply to a request, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            backoff: default_backoff(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_backoff() -> BackoffKind {
    BackoffKind::Fixed
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load the file if it exists, otherwise return the defaults.
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if tokio::fs::try_exists(path).await? {
            Self::load(path).await
        } else {
            debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let daemon = &self.daemon;
        if let Some(path) = &daemon.socket_path {
            if path.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "daemon.socket_path must not be empty".to_string(),
                ));
            }
        }
        if daemon.io_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "daemon.io_timeout_ms must be non-zero".to_string(),
            ));
        }
        if daemon.max_frame_bytes == 0 || daemon.max_frame_bytes > MAX_FRAME_BYTES_LIMIT {
            return Err(ConfigError::Validation(format!(
                "daemon.max_frame_bytes must be in 1..={MAX_FRAME_BYTES_LIMIT}, got {}",
                daemon.max_frame_bytes
            )));
        }
        if daemon.outbound_queue == 0 {
            return Err(ConfigError::Validation(
                "daemon.outbound_queue must be at least 1".to_string(),
            ));
        }

        let client = &self.client;
        if client.retry_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "client.retry_delay_ms must be non-zero".to_string(),
            ));
        }
        if client.max_retry_delay_ms < client.retry_delay_ms {
            return Err(ConfigError::Validation(format!(
                "client.max_retry_delay_ms ({}) must not be below client.retry_delay_ms ({})",
                client.max_retry_delay_ms, client.retry_delay_ms
            )));
        }
        if client.request_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "client.request_timeout_ms must be non-zero".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Validation(
                "logging.level must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

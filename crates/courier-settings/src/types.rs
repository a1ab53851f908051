//! Settings types.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document (`~/.courier/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    /// Outbound connection settings.
    pub client: ClientSettings,
    /// Inbound connection settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl CourierSettings {
    /// Reject values that would make connections unusable.
    pub fn validate(&self) -> Result<()> {
        if self.client.sync_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "client.syncTimeoutMs must be positive".into(),
            ));
        }
        if self.client.close_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "client.closeTimeoutMs must be positive".into(),
            ));
        }
        if self.client.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "client.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if self.server.max_consecutive_read_errors == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConsecutiveReadErrors must be positive".into(),
            ));
        }
        if !matches!(self.logging.format.to_ascii_lowercase().as_str(), "compact" | "json") {
            return Err(SettingsError::InvalidValue(format!(
                "logging.format must be compact or json: {}",
                self.logging.format
            )));
        }
        if !self.server.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.path must start with '/': {}",
                self.server.path
            )));
        }
        Ok(())
    }
}

/// Outbound (dialing) connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Default wait for a synchronous reply, in milliseconds.
    pub sync_timeout_ms: u64,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Dial timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Upper bound on writing the close frame, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
            close_timeout_ms: 5_000,
        }
    }
}

/// Inbound (accepting) connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Route that accepts the upgrade.
    pub path: String,
    /// Request header carrying the caller identity.
    pub identity_header: String,
    /// Consecutive read errors tolerated before a connection is dropped.
    pub max_consecutive_read_errors: u32,
    /// Time allowed for connections to close on shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            path: "/ws".to_string(),
            identity_header: "identity".to_string(),
            max_consecutive_read_errors: 8,
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace`..`error`), or any `EnvFilter` directive.
    pub level: String,
    /// Output format: `compact` or `json`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

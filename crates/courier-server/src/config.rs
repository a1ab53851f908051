//! Server configuration.

use std::time::Duration;

use courier_settings::ServerSettings;

/// Runtime configuration for a [`ServerPool`](crate::ServerPool).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Route that accepts the upgrade.
    pub path: String,
    /// Request header carrying the caller identity.
    pub identity_header: String,
    /// Consecutive read errors tolerated before a connection is dropped.
    pub max_consecutive_read_errors: u32,
    /// How long [`ServerPool::clean`](crate::ServerPool::clean) waits for
    /// each connection to finish closing.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// `host:port` for binding a listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            path: settings.path.clone(),
            identity_header: settings.identity_header.clone(),
            max_consecutive_read_errors: settings.max_consecutive_read_errors.max(1),
            shutdown_timeout: Duration::from_millis(settings.shutdown_timeout_ms),
        }
    }
}

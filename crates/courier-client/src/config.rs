//! Runtime client configuration.

use std::time::Duration;

use courier_settings::ClientSettings;

/// Timeouts applied to every [`Client`](crate::Client) built with this config.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Default wait for a synchronous reply.
    pub sync_timeout: Duration,
    /// Interval used by [`Client::heart`](crate::Client::heart) when called with zero.
    pub heartbeat_interval: Duration,
    /// Upper bound on the dial and handshake.
    pub connect_timeout: Duration,
    /// Upper bound on [`Client::close`](crate::Client::close) writing the close frame.
    pub close_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            sync_timeout: Duration::from_millis(settings.sync_timeout_ms),
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            close_timeout: Duration::from_millis(settings.close_timeout_ms),
        }
    }
}

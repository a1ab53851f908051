//! Connection and registry error types.

use thiserror::Error;

/// Errors raised by Courier connections and registries.
///
/// Connection-level failures are delivered to caller handlers and retained
/// as the connection's last error, so the type is cheap to clone and carries
/// transport failures as rendered strings.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WsError {
    /// A connection was constructed with missing or invalid options.
    #[error("invalid websocket connection option: {0}")]
    ConnOption(String),

    /// The connection is not online.
    #[error("websocket connection is offline")]
    Offline,

    /// A synchronous call received no reply in time.
    #[error("sync message timed out")]
    SyncMessageTimeout,

    /// An asynchronous call was issued without a callback or with a zero timeout.
    #[error("async message requires a callback and a positive timeout")]
    AsyncMessageCallbackEmpty,

    /// An asynchronous call received no correlated reply in time.
    #[error("async message timed out")]
    AsyncMessageTimeout,

    /// A client (or client group) with this name is already registered.
    #[error("websocket client already exists: {0}")]
    ClientExist(String),

    /// No client (or client group) with this name is registered.
    #[error("websocket client does not exist: {0}")]
    ClientNotExist(String),

    /// No accepted connection is registered under this address.
    #[error("websocket server connection not found: {0}")]
    ServerNotExist(String),

    /// The identity check rejected an inbound connection.
    #[error("identity check failed: {0}")]
    IdentityCheck(String),

    /// A server connection was booted without a receive handler.
    #[error("websocket server receive handler must not be empty")]
    ReceiveHandlerEmpty,

    /// The receive slot closed while a synchronous call was waiting.
    #[error("receive channel closed")]
    ReceiveChannelClosed,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl WsError {
    /// Wrap any displayable transport failure.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type for connection and registry operations.
pub type Result<T> = std::result::Result<T, WsError>;

//! Pool shutdown driven by a `CancellationToken`.
//!
//! The listener and the pool watch the same token: the listener stops
//! accepting once it is cancelled, and [`ShutdownCoordinator::drain`] then
//! closes every pooled connection.

use std::sync::Arc;

use courier_core::WsError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pool::ServerPool;

/// Shuts down one [`ServerPool`]. Clones share the same token.
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    pool: Arc<ServerPool>,
}

impl ShutdownCoordinator {
    /// Coordinator for `pool`, not yet shutting down.
    pub fn new(pool: Arc<ServerPool>) -> Self {
        Self {
            token: CancellationToken::new(),
            pool,
        }
    }

    /// Token cancelled when shutdown is requested.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!(connections = self.pool.len(), "shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until shutdown is requested, then close every connection.
    ///
    /// Returns one error per connection that did not finish closing within
    /// the pool's shutdown timeout.
    pub async fn drain(&self) -> Vec<WsError> {
        self.token.cancelled().await;

        let errors = self.pool.clean().await;
        if errors.is_empty() {
            info!("all connections closed");
        } else {
            warn!(failures = errors.len(), "some connections did not close in time");
        }
        errors
    }

    /// Request shutdown and drain immediately.
    pub async fn graceful_shutdown(&self) -> Vec<WsError> {
        self.shutdown();
        self.drain().await
    }
}

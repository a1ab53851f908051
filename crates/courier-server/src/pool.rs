//! Accepted connections indexed by remote address and identity.
//!
//! One pool is created at startup and shared as `Arc<ServerPool>`. Each
//! accepted connection is recorded under its remote address, together with
//! the identity the caller-supplied check extracted from the upgrade request.
//! Both index entries live behind one lock so they are added and removed
//! together.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ConnectInfo;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use courier_core::{Message, Result, WsError};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::handlers::{ServerHandlers, boxed_receive};
use crate::server::Server;

/// Extracts the caller identity from upgrade request headers.
pub type IdentityCheck = Arc<dyn Fn(&HeaderMap) -> Result<String> + Send + Sync>;

#[derive(Default)]
struct PoolIndex {
    connections: IndexMap<String, Server>,
    identities: IndexMap<String, String>,
}

/// Registry of accepted connections.
pub struct ServerPool {
    config: ServerConfig,
    index: RwLock<PoolIndex>,
    handlers: RwLock<ServerHandlers>,
}

/// Identity check that reads a single request header.
///
/// A missing, empty, or non-ASCII header fails with
/// [`WsError::IdentityCheck`].
pub fn header_identity(
    header: impl Into<String>,
) -> impl Fn(&HeaderMap) -> Result<String> + Send + Sync + 'static {
    let header = header.into();
    move |headers: &HeaderMap| {
        headers
            .get(header.as_str())
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| WsError::IdentityCheck(format!("missing {header} header")))
    }
}

impl ServerPool {
    /// Create an empty pool.
    pub fn new(config: ServerConfig, handlers: ServerHandlers) -> Arc<Self> {
        Arc::new(Self {
            config,
            index: RwLock::new(PoolIndex::default()),
            handlers: RwLock::new(handlers),
        })
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Snapshot of the current handler set.
    pub fn handlers(&self) -> ServerHandlers {
        self.handlers.read().clone()
    }

    // ── Handler setters ─────────────────────────────────────────────
    //
    // Receive and close handlers are captured when a connection boots, so
    // replacing them only affects connections accepted afterwards.

    /// Replace the connection-failure handler.
    pub fn set_on_connection_fail(&self, f: impl Fn(&WsError) + Send + Sync + 'static) -> &Self {
        self.handlers.write().on_connection_fail = Some(Arc::new(f));
        self
    }

    /// Replace the connection-success handler.
    pub fn set_on_connection_success(
        &self,
        f: impl Fn(&Server) -> Result<()> + Send + Sync + 'static,
    ) -> &Self {
        self.handlers.write().on_connection_success = Some(Arc::new(f));
        self
    }

    /// Replace the send-success handler.
    pub fn set_on_send_message_success(
        &self,
        f: impl Fn(&Server, &Bytes, &Bytes) + Send + Sync + 'static,
    ) -> &Self {
        self.handlers.write().on_send_success = Some(Arc::new(f));
        self
    }

    /// Replace the send-failure handler.
    pub fn set_on_send_message_fail(
        &self,
        f: impl Fn(&WsError) + Send + Sync + 'static,
    ) -> &Self {
        self.handlers.write().on_send_fail = Some(Arc::new(f));
        self
    }

    /// Replace the receive handler.
    pub fn set_on_receive_message_success<F, Fut>(&self, f: F) -> &Self
    where
        F: Fn(Server, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.write().on_receive_success = Some(boxed_receive(f));
        self
    }

    /// Replace the receive-failure handler.
    pub fn set_on_receive_message_fail(
        &self,
        f: impl Fn(&Server, &WsError) + Send + Sync + 'static,
    ) -> &Self {
        self.handlers.write().on_receive_fail = Some(Arc::new(f));
        self
    }

    /// Replace the close handler.
    pub fn set_on_close(&self, f: impl Fn(&Server) + Send + Sync + 'static) -> &Self {
        self.handlers.write().on_close = Some(Arc::new(f));
        self
    }

    // ── Accepting ───────────────────────────────────────────────────

    /// Axum route serving the upgrade at `path`.
    ///
    /// Serve with `into_make_service_with_connect_info::<SocketAddr>()` so the
    /// remote address is available.
    pub fn router<F>(self: &Arc<Self>, path: &str, check: F) -> Router
    where
        F: Fn(&HeaderMap) -> Result<String> + Send + Sync + 'static,
    {
        let check: IdentityCheck = Arc::new(check);
        let pool = Arc::clone(self);
        Router::new().route(
            path,
            get(
                move |ws: WebSocketUpgrade,
                      ConnectInfo(remote): ConnectInfo<SocketAddr>,
                      headers: HeaderMap| {
                    let pool = Arc::clone(&pool);
                    let check = Arc::clone(&check);
                    async move { pool.handle(ws, remote, &headers, check.as_ref()) }
                },
            ),
        )
    }

    /// Check identity, then upgrade and register the connection.
    ///
    /// A failed identity check answers `401` and fires the connection-failure
    /// handler without registering anything.
    pub fn handle(
        self: &Arc<Self>,
        ws: WebSocketUpgrade,
        remote: SocketAddr,
        headers: &HeaderMap,
        check: &(dyn Fn(&HeaderMap) -> Result<String> + Send + Sync),
    ) -> Response {
        let identity = match check(headers) {
            Ok(identity) => identity,
            Err(err) => {
                let err = match err {
                    WsError::IdentityCheck(_) => err,
                    other => WsError::IdentityCheck(other.to_string()),
                };
                warn!(addr = %remote, error = %err, "identity check failed");
                self.handlers().connection_fail(&err);
                return (StatusCode::UNAUTHORIZED, err.to_string()).into_response();
            }
        };

        let pool = Arc::clone(self);
        let on_failed = Arc::clone(self);
        ws.on_failed_upgrade(move |err| {
            let err = WsError::transport(err);
            warn!(addr = %remote, error = %err, "upgrade failed");
            on_failed.handlers().connection_fail(&err);
        })
        .on_upgrade(move |socket| async move {
            pool.accept(socket, remote.to_string(), identity);
        })
    }

    fn accept(self: &Arc<Self>, socket: WebSocket, addr: String, identity: String) {
        let server = Server::new(addr, socket, self.config.max_consecutive_read_errors);
        self.register(&server, identity.clone());

        let handlers = self.handlers();
        if let Err(err) = server.boot(self.connection_handlers(&handlers)) {
            warn!(addr = %server.addr(), error = %err, "boot failed");
            handlers.connection_fail(&err);
            let _ = self.deregister(&server);
            server.close();
            return;
        }
        info!(addr = %server.addr(), identity = %identity, "connection registered");

        if let Err(err) = handlers.connection_success(&server) {
            warn!(addr = %server.addr(), error = %err, "connection rejected");
            handlers.connection_fail(&err);
            let _ = self.deregister(&server);
            server.close();
        }
    }

    /// Handlers for one connection: the pool's set, with a close handler
    /// that drops the connection from the index first.
    fn connection_handlers(self: &Arc<Self>, handlers: &ServerHandlers) -> ServerHandlers {
        let mut handlers = handlers.clone();
        let user_close = handlers.on_close.take();
        let pool = Arc::downgrade(self);
        handlers.on_close = Some(Arc::new(move |server: &Server| {
            if let Some(pool) = pool.upgrade() {
                let _ = pool.deregister(server);
            }
            if let Some(f) = &user_close {
                f(server);
            }
        }));
        handlers
    }

    fn register(&self, server: &Server, identity: String) {
        let addr = server.addr().to_owned();
        let previous = {
            let mut index = self.index.write();
            let _ = index.identities.insert(addr.clone(), identity);
            index.connections.insert(addr, server.clone())
        };
        if let Some(previous) = previous {
            warn!(addr = %previous.addr(), "replacing stale connection");
            previous.close();
        }
    }

    /// Drop `server` from both indexes if it is still the registered
    /// connection for its address.
    fn deregister(&self, server: &Server) -> bool {
        let mut index = self.index.write();
        let registered = index
            .connections
            .get(server.addr())
            .is_some_and(|current| current.same_connection(server));
        if registered {
            let _ = index.connections.shift_remove(server.addr());
            let _ = index.identities.shift_remove(server.addr());
            debug!(addr = %server.addr(), "connection deregistered");
        }
        registered
    }

    // ── Lookup ──────────────────────────────────────────────────────

    /// Connection registered under `addr`.
    pub fn get(&self, addr: &str) -> Option<Server> {
        self.index.read().connections.get(addr).cloned()
    }

    /// Whether a connection is registered under `addr`.
    pub fn has(&self, addr: &str) -> bool {
        self.index.read().connections.contains_key(addr)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.index.read().connections.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.index.read().connections.is_empty()
    }

    /// Registered addresses in accept order.
    pub fn addrs(&self) -> Vec<String> {
        self.index.read().connections.keys().cloned().collect()
    }

    /// Identity recorded for `addr`.
    pub fn identity_of(&self, addr: &str) -> Option<String> {
        self.index.read().identities.get(addr).cloned()
    }

    /// Every address currently mapped to `identity`.
    pub fn addrs_for_identity(&self, identity: &str) -> Vec<String> {
        self.index
            .read()
            .identities
            .iter()
            .filter(|(_, id)| id.as_str() == identity)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Send a correlated frame to the connection at `addr`.
    ///
    /// An unknown address fires the send-failure handler with
    /// [`WsError::ServerNotExist`].
    pub async fn send_message_by_addr(
        &self,
        addr: &str,
        payload: impl Into<Bytes>,
    ) -> Result<String> {
        let handlers = self.handlers();
        match self.get(addr) {
            Some(server) => server.async_message(payload, &handlers).await,
            None => {
                let err = WsError::ServerNotExist(addr.to_owned());
                debug!(addr, "send to unknown address");
                handlers.send_fail(&err);
                Err(err)
            }
        }
    }

    /// Send a correlated frame to every connection mapped to `identity`.
    ///
    /// Returns how many connections the frame was written to. Individual
    /// failures go to the send-failure handler.
    pub async fn send_message_by_auth_id(&self, identity: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let targets: Vec<Server> = {
            let index = self.index.read();
            index
                .identities
                .iter()
                .filter(|(_, id)| id.as_str() == identity)
                .filter_map(|(addr, _)| index.connections.get(addr).cloned())
                .collect()
        };
        if targets.is_empty() {
            debug!(identity, "no connections for identity");
            return 0;
        }

        let handlers = self.handlers();
        let mut delivered = 0;
        for server in targets {
            if server.async_message(payload.clone(), &handlers).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Evict the connection at `addr`: drop both index entries, then close it.
    pub fn remove(&self, addr: &str) -> Result<Server> {
        let server = {
            let mut index = self.index.write();
            let _ = index.identities.shift_remove(addr);
            index.connections.shift_remove(addr)
        };
        let server = server.ok_or_else(|| WsError::ServerNotExist(addr.to_owned()))?;
        info!(addr, "connection evicted");
        server.close();
        Ok(server)
    }

    /// Close every connection and empty both indexes.
    ///
    /// Waits up to the configured shutdown timeout for each connection to
    /// finish closing; connections that do not are reported as errors.
    pub async fn clean(&self) -> Vec<WsError> {
        let drained: Vec<Server> = {
            let mut index = self.index.write();
            index.identities.clear();
            index.connections.drain(..).map(|(_, server)| server).collect()
        };
        for server in &drained {
            server.close();
        }

        let timeout = self.config.shutdown_timeout;
        let mut errors = Vec::new();
        for server in drained {
            if time::timeout(timeout, server.closed()).await.is_err() {
                warn!(addr = %server.addr(), ?timeout, "connection did not close in time");
                errors.push(WsError::Transport(format!(
                    "close of {} timed out after {timeout:?}",
                    server.addr()
                )));
            }
        }
        errors
    }
}

impl fmt::Debug for ServerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPool")
            .field("config", &self.config)
            .field("connections", &self.len())
            .finish_non_exhaustive()
    }
}

//! Callbacks for accepted connections.
//!
//! Only the receive handler is required, and only when a connection boots.
//! The rest default to no-ops.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use courier_core::{Message, Result, WsError};
use futures::future::BoxFuture;

use crate::server::Server;

/// Connection setup failed (identity check, upgrade, boot).
pub type ConnectionFailFn = Arc<dyn Fn(&WsError) + Send + Sync>;
/// Connection registered and booted. An error evicts it.
pub type ConnectionSuccessFn = Arc<dyn Fn(&Server) -> Result<()> + Send + Sync>;
/// A frame was written: `(server, wire, payload)`.
pub type SendSuccessFn = Arc<dyn Fn(&Server, &Bytes, &Bytes) + Send + Sync>;
/// A frame could not be written, or its target was not found.
pub type SendFailFn = Arc<dyn Fn(&WsError) + Send + Sync>;
/// A text or binary frame arrived. Awaited on the reader task.
pub type ReceiveSuccessFn = Arc<dyn Fn(Server, Message) -> BoxFuture<'static, ()> + Send + Sync>;
/// A read failed.
pub type ReceiveFailFn = Arc<dyn Fn(&Server, &WsError) + Send + Sync>;
/// The connection went offline.
pub type CloseFn = Arc<dyn Fn(&Server) + Send + Sync>;

/// Handler set shared by a pool and the connections it accepts.
#[derive(Clone, Default)]
pub struct ServerHandlers {
    pub(crate) on_connection_fail: Option<ConnectionFailFn>,
    pub(crate) on_connection_success: Option<ConnectionSuccessFn>,
    pub(crate) on_send_success: Option<SendSuccessFn>,
    pub(crate) on_send_fail: Option<SendFailFn>,
    pub(crate) on_receive_success: Option<ReceiveSuccessFn>,
    pub(crate) on_receive_fail: Option<ReceiveFailFn>,
    pub(crate) on_close: Option<CloseFn>,
}

impl ServerHandlers {
    /// Empty handler set.
    pub fn new() -> Self {
        Self::default()
    }

    /// See [`ConnectionFailFn`].
    #[must_use]
    pub fn on_connection_fail(mut self, f: impl Fn(&WsError) + Send + Sync + 'static) -> Self {
        self.on_connection_fail = Some(Arc::new(f));
        self
    }

    /// See [`ConnectionSuccessFn`].
    #[must_use]
    pub fn on_connection_success(
        mut self,
        f: impl Fn(&Server) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_connection_success = Some(Arc::new(f));
        self
    }

    /// See [`SendSuccessFn`].
    #[must_use]
    pub fn on_send_success(
        mut self,
        f: impl Fn(&Server, &Bytes, &Bytes) + Send + Sync + 'static,
    ) -> Self {
        self.on_send_success = Some(Arc::new(f));
        self
    }

    /// See [`SendFailFn`].
    #[must_use]
    pub fn on_send_fail(mut self, f: impl Fn(&WsError) + Send + Sync + 'static) -> Self {
        self.on_send_fail = Some(Arc::new(f));
        self
    }

    /// See [`ReceiveSuccessFn`].
    #[must_use]
    pub fn on_receive_success<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Server, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_receive_success = Some(boxed_receive(f));
        self
    }

    /// See [`ReceiveFailFn`].
    #[must_use]
    pub fn on_receive_fail(
        mut self,
        f: impl Fn(&Server, &WsError) + Send + Sync + 'static,
    ) -> Self {
        self.on_receive_fail = Some(Arc::new(f));
        self
    }

    /// See [`CloseFn`].
    #[must_use]
    pub fn on_close(mut self, f: impl Fn(&Server) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Whether the required receive handler is installed.
    pub fn has_receive_handler(&self) -> bool {
        self.on_receive_success.is_some()
    }

    pub(crate) fn connection_fail(&self, err: &WsError) {
        if let Some(f) = &self.on_connection_fail {
            f(err);
        }
    }

    pub(crate) fn connection_success(&self, server: &Server) -> Result<()> {
        match &self.on_connection_success {
            Some(f) => f(server),
            None => Ok(()),
        }
    }

    pub(crate) fn send_success(&self, server: &Server, wire: &Bytes, payload: &Bytes) {
        if let Some(f) = &self.on_send_success {
            f(server, wire, payload);
        }
    }

    pub(crate) fn send_fail(&self, err: &WsError) {
        if let Some(f) = &self.on_send_fail {
            f(err);
        }
    }

    pub(crate) async fn receive_success(&self, server: Server, message: Message) {
        if let Some(f) = &self.on_receive_success {
            f(server, message).await;
        }
    }

    pub(crate) fn receive_fail(&self, server: &Server, err: &WsError) {
        if let Some(f) = &self.on_receive_fail {
            f(server, err);
        }
    }

    pub(crate) fn close(&self, server: &Server) {
        if let Some(f) = &self.on_close {
            f(server);
        }
    }
}

pub(crate) fn boxed_receive<F, Fut>(f: F) -> ReceiveSuccessFn
where
    F: Fn(Server, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |server, message| Box::pin(f(server, message)))
}

impl fmt::Debug for ServerHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandlers")
            .field("on_connection_fail", &self.on_connection_fail.is_some())
            .field("on_connection_success", &self.on_connection_success.is_some())
            .field("on_send_success", &self.on_send_success.is_some())
            .field("on_send_fail", &self.on_send_fail.is_some())
            .field("on_receive_success", &self.on_receive_success.is_some())
            .field("on_receive_fail", &self.on_receive_fail.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn receive_handler_required_flag() {
        assert!(!ServerHandlers::new().has_receive_handler());
        let handlers = ServerHandlers::new().on_receive_success(|_, _| async {});
        assert!(handlers.has_receive_handler());
    }

    #[test]
    fn missing_connection_success_accepts() {
        let handlers = ServerHandlers::new();
        assert!(handlers.on_connection_success.is_none());
        handlers.connection_fail(&WsError::IdentityCheck("x".into()));
        handlers.send_fail(&WsError::Offline);
    }

    #[test]
    fn failure_handlers_receive_error() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handlers = ServerHandlers::new().on_send_fail(move |err| {
            assert_eq!(*err, WsError::ServerNotExist("1.2.3.4:5".into()));
            let _ = c.fetch_add(1, Ordering::SeqCst);
        });
        handlers.send_fail(&WsError::ServerNotExist("1.2.3.4:5".into()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_lists_installed_handlers() {
        let handlers = ServerHandlers::new().on_connection_fail(|_| {});
        let debug = format!("{handlers:?}");
        assert!(debug.contains("on_connection_fail: true"));
        assert!(debug.contains("on_receive_success: false"));
    }
}

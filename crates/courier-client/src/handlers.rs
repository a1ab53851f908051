//! Optional lifecycle callbacks for a [`Client`](crate::Client).
//!
//! Every handler receives the client's group and name first. Unset handlers
//! are no-ops.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use courier_core::WsError;

/// Callback for successful lifecycle transitions (connect, close).
pub type LifecycleFn = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Callback for failures (connect, close, receive, send).
pub type FailureFn = Arc<dyn Fn(&str, &str, &WsError) + Send + Sync>;
/// Callback for every text or binary frame received, with the decoded payload.
pub type ReceiveFn = Arc<dyn Fn(&str, &str, &Bytes) + Send + Sync>;

/// Handler set for one client.
#[derive(Clone, Default)]
pub struct ClientHandlers {
    on_conn_success: Option<LifecycleFn>,
    on_conn_fail: Option<FailureFn>,
    on_close_success: Option<LifecycleFn>,
    on_close_fail: Option<FailureFn>,
    on_receive_success: Option<ReceiveFn>,
    on_receive_fail: Option<FailureFn>,
    on_send_fail: Option<FailureFn>,
}

impl ClientHandlers {
    /// Empty handler set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after a successful dial.
    #[must_use]
    pub fn on_conn_success(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_conn_success = Some(Arc::new(f));
        self
    }

    /// Called when dialing fails.
    #[must_use]
    pub fn on_conn_fail(
        mut self,
        f: impl Fn(&str, &str, &WsError) + Send + Sync + 'static,
    ) -> Self {
        self.on_conn_fail = Some(Arc::new(f));
        self
    }

    /// Called after the connection is closed.
    #[must_use]
    pub fn on_close_success(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_close_success = Some(Arc::new(f));
        self
    }

    /// Called when writing the close frame fails.
    #[must_use]
    pub fn on_close_fail(
        mut self,
        f: impl Fn(&str, &str, &WsError) + Send + Sync + 'static,
    ) -> Self {
        self.on_close_fail = Some(Arc::new(f));
        self
    }

    /// Called on the reader task for every data frame, before correlation.
    #[must_use]
    pub fn on_receive_success(
        mut self,
        f: impl Fn(&str, &str, &Bytes) + Send + Sync + 'static,
    ) -> Self {
        self.on_receive_success = Some(Arc::new(f));
        self
    }

    /// Called when the reader stops on a transport error.
    #[must_use]
    pub fn on_receive_fail(
        mut self,
        f: impl Fn(&str, &str, &WsError) + Send + Sync + 'static,
    ) -> Self {
        self.on_receive_fail = Some(Arc::new(f));
        self
    }

    /// Called when a send fails or a reply does not arrive in time.
    #[must_use]
    pub fn on_send_fail(
        mut self,
        f: impl Fn(&str, &str, &WsError) + Send + Sync + 'static,
    ) -> Self {
        self.on_send_fail = Some(Arc::new(f));
        self
    }

    pub(crate) fn conn_success(&self, group: &str, name: &str) {
        if let Some(f) = &self.on_conn_success {
            f(group, name);
        }
    }

    pub(crate) fn conn_fail(&self, group: &str, name: &str, err: &WsError) {
        if let Some(f) = &self.on_conn_fail {
            f(group, name, err);
        }
    }

    pub(crate) fn close_success(&self, group: &str, name: &str) {
        if let Some(f) = &self.on_close_success {
            f(group, name);
        }
    }

    pub(crate) fn close_fail(&self, group: &str, name: &str, err: &WsError) {
        if let Some(f) = &self.on_close_fail {
            f(group, name, err);
        }
    }

    pub(crate) fn receive_success(&self, group: &str, name: &str, payload: &Bytes) {
        if let Some(f) = &self.on_receive_success {
            f(group, name, payload);
        }
    }

    pub(crate) fn receive_fail(&self, group: &str, name: &str, err: &WsError) {
        if let Some(f) = &self.on_receive_fail {
            f(group, name, err);
        }
    }

    pub(crate) fn send_fail(&self, group: &str, name: &str, err: &WsError) {
        if let Some(f) = &self.on_send_fail {
            f(group, name, err);
        }
    }
}

impl fmt::Debug for ClientHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandlers")
            .field("on_conn_success", &self.on_conn_success.is_some())
            .field("on_conn_fail", &self.on_conn_fail.is_some())
            .field("on_close_success", &self.on_close_success.is_some())
            .field("on_close_fail", &self.on_close_fail.is_some())
            .field("on_receive_success", &self.on_receive_success.is_some())
            .field("on_receive_fail", &self.on_receive_fail.is_some())
            .field("on_send_fail", &self.on_send_fail.is_some())
            .finish()
    }
}

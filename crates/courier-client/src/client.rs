//! One outbound connection.
//!
//! A [`Client`] dials once per [`boot`](Client::boot) and hands the read half
//! to a dedicated reader task. Replies are routed two ways:
//!
//! - **Correlated** frames (`<uuid>:<payload>`) are matched against the
//!   pending-callback table. Both the reader and the expiry timer remove
//!   entries with an atomic take, so a callback and its timeout never both
//!   fire.
//! - **Uncorrelated** frames go to a single-slot channel that
//!   [`sync_message`](Client::sync_message) waits on. The slot's receiver
//!   lives behind an async mutex held for the whole request/reply exchange,
//!   which serializes concurrent synchronous callers.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use courier_core::{ConnStatus, Frame, Message, Result, WsError};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message as WireMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::handlers::ClientHandlers;
use crate::transport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WireMessage>;
type WsSource = SplitStream<WsStream>;

/// Callback invoked once with the reply payload of a correlated message.
pub type AsyncCallback = Box<dyn FnOnce(&str, &str, Bytes) + Send>;

/// Handle to one outbound connection. Clones share the same connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    group_name: String,
    name: String,
    addr: String,
    config: ClientConfig,
    handlers: ClientHandlers,
    headers: Mutex<IndexMap<String, String>>,
    status: Mutex<ConnStatus>,
    session: Mutex<Option<Session>>,
    /// Held from the online check through installing the new session.
    boot_lock: AsyncMutex<()>,
    next_session: AtomicU64,
    receive_slot: AsyncMutex<Option<mpsc::Receiver<Bytes>>>,
    pending: PendingReplies,
    heartbeat: Mutex<Option<CancellationToken>>,
    last_error: Mutex<Option<WsError>>,
}

/// Callbacks awaiting a correlated reply, keyed by message id.
///
/// Callbacks are only `Send`, so the table is guarded by a `Mutex`.
#[derive(Default)]
struct PendingReplies(Mutex<IndexMap<String, AsyncCallback>>);

impl PendingReplies {
    fn insert(&self, message_id: String, callback: AsyncCallback) {
        let _ = self.0.lock().insert(message_id, callback);
    }

    /// Exactly one of several racing callers gets the callback.
    fn take(&self, message_id: &str) -> Option<AsyncCallback> {
        self.0.lock().shift_remove(message_id)
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// State for one successful dial.
struct Session {
    id: u64,
    sink: Arc<AsyncMutex<WsSink>>,
    close: CancellationToken,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.close.cancel();
        }
        if let Some(heartbeat) = self.heartbeat.get_mut().take() {
            heartbeat.cancel();
        }
    }
}

impl Client {
    /// Create an offline client. Call [`boot`](Self::boot) to connect.
    pub fn new(
        group_name: impl Into<String>,
        name: impl Into<String>,
        addr: impl Into<String>,
        handlers: ClientHandlers,
        config: ClientConfig,
    ) -> Result<Self> {
        let name = name.into();
        let addr = addr.into();
        if name.is_empty() || addr.is_empty() {
            return Err(WsError::ConnOption(
                "name and address must not be empty".into(),
            ));
        }

        Ok(Self {
            inner: Arc::new(ClientInner {
                group_name: group_name.into(),
                name,
                addr,
                config,
                handlers,
                headers: Mutex::new(IndexMap::new()),
                status: Mutex::new(ConnStatus::Offline),
                session: Mutex::new(None),
                boot_lock: AsyncMutex::new(()),
                next_session: AtomicU64::new(0),
                receive_slot: AsyncMutex::new(None),
                pending: PendingReplies::default(),
                heartbeat: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
        })
    }

    /// Group this client belongs to.
    pub fn group_name(&self) -> &str {
        &self.inner.group_name
    }

    /// Client name, unique within its group.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Dial address.
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Current connection status.
    pub fn status(&self) -> ConnStatus {
        *self.inner.status.lock()
    }

    /// Whether the connection is online.
    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    /// Timeouts in effect.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Request headers sent on the next dial.
    pub fn headers(&self) -> IndexMap<String, String> {
        self.inner.headers.lock().clone()
    }

    /// Replace every request header.
    pub fn set_headers<I, K, V>(&self, headers: I) -> &Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        *self.inner.headers.lock() = headers;
        self
    }

    /// Add request headers, overwriting existing keys.
    pub fn append_headers<I, K, V>(&self, headers: I) -> &Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut current = self.inner.headers.lock();
        for (k, v) in headers {
            let _ = current.insert(k.into(), v.into());
        }
        drop(current);
        self
    }

    /// Return and clear the last connection-level error.
    pub fn take_error(&self) -> Option<WsError> {
        self.inner.last_error.lock().take()
    }

    /// Correlated messages still waiting for a reply.
    pub fn pending_replies(&self) -> usize {
        self.inner.pending.len()
    }

    /// Dial and start the reader task.
    ///
    /// A failed dial leaves the client offline and fires `on_conn_fail`.
    /// Booting an online client is a no-op. Concurrent calls dial at most
    /// once; the others wait and then find the client online.
    pub async fn boot(&self) -> Result<()> {
        let inner = &self.inner;
        let _booting = inner.boot_lock.lock().await;
        if self.is_online() {
            debug!(group = %inner.group_name, client = %inner.name, "client already online");
            return Ok(());
        }

        let stream = match self.dial().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(
                    group = %inner.group_name,
                    client = %inner.name,
                    addr = %inner.addr,
                    error = %err,
                    "dial failed"
                );
                inner.handlers.conn_fail(&inner.group_name, &inner.name, &err);
                return Err(self.record(err));
            }
        };

        let (sink, source) = stream.split();
        let (slot_tx, slot_rx) = mpsc::channel(1);
        *inner.receive_slot.lock().await = Some(slot_rx);

        let id = inner.next_session.fetch_add(1, Ordering::Relaxed);
        let close = CancellationToken::new();
        {
            let mut session = inner.session.lock();
            *session = Some(Session {
                id,
                sink: Arc::new(AsyncMutex::new(sink)),
                close: close.clone(),
            });
            *inner.status.lock() = ConnStatus::Online;
        }

        info!(group = %inner.group_name, client = %inner.name, addr = %inner.addr, "client online");
        inner.handlers.conn_success(&inner.group_name, &inner.name);

        let _ = tokio::spawn(read_loop(
            Arc::downgrade(inner),
            id,
            source,
            close,
            slot_tx,
        ));
        Ok(())
    }

    async fn dial(&self) -> Result<WsStream> {
        let mut request = self
            .inner
            .addr
            .as_str()
            .into_client_request()
            .map_err(|e| WsError::ConnOption(e.to_string()))?;

        for (key, value) in self.headers() {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| WsError::ConnOption(format!("header {key}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| WsError::ConnOption(format!("header {key}: {e}")))?;
            let _ = request.headers_mut().insert(name, value);
        }

        let connect_timeout = self.inner.config.connect_timeout;
        match time::timeout(connect_timeout, connect_async(request)).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(err)) => Err(WsError::transport(err)),
            Err(_) => Err(WsError::Transport(format!(
                "dial timed out after {connect_timeout:?}"
            ))),
        }
    }

    /// Send an uncorrelated frame and wait for the next uncorrelated reply.
    ///
    /// `timeout` of `None` or zero uses the configured default. Concurrent
    /// calls on one client are served one at a time, each receiving the reply
    /// to its own request.
    pub async fn sync_message(
        &self,
        payload: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        if !self.is_online() {
            return Err(self.send_failed(WsError::Offline));
        }

        let mut slot = self.inner.receive_slot.lock().await;
        let Some(receiver) = slot.as_mut() else {
            return Err(self.send_failed(WsError::Offline));
        };
        if !self.is_online() {
            return Err(self.send_failed(WsError::Offline));
        }

        // A reply that arrived after an earlier call timed out is not ours.
        while let Ok(stale) = receiver.try_recv() {
            debug!(client = %self.inner.name, bytes = stale.len(), "discarding stale reply");
        }

        let message = Message::new(false, payload);
        if let Err(err) = self.write(Frame::data(message.wire().clone())).await {
            return Err(self.send_failed(err));
        }

        let timeout = timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.inner.config.sync_timeout);
        match time::timeout(timeout, receiver.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(self.send_failed(WsError::ReceiveChannelClosed)),
            Err(_) => {
                warn!(
                    group = %self.inner.group_name,
                    client = %self.inner.name,
                    ?timeout,
                    "sync reply timed out"
                );
                Err(self.send_failed(WsError::SyncMessageTimeout))
            }
        }
    }

    /// Send a correlated frame and register `callback` for its reply.
    ///
    /// Returns the message id. If no reply arrives within `timeout` the
    /// callback is dropped and `on_send_fail` fires with
    /// [`WsError::AsyncMessageTimeout`].
    pub async fn async_message(
        &self,
        payload: impl Into<Bytes>,
        callback: Option<AsyncCallback>,
        timeout: Duration,
    ) -> Result<String> {
        let Some(callback) = callback.filter(|_| !timeout.is_zero()) else {
            return Err(self.record(WsError::AsyncMessageCallbackEmpty));
        };
        if !self.is_online() {
            return Err(self.send_failed(WsError::Offline));
        }

        let message = Message::new(true, payload);
        let message_id = message.message_id().to_owned();
        self.inner.pending.insert(message_id.clone(), callback);

        if let Err(err) = self.write(Frame::data(message.wire().clone())).await {
            let _ = self.inner.pending.take(&message_id);
            return Err(self.send_failed(err));
        }

        self.expire_after(message_id.clone(), timeout);
        Ok(message_id)
    }

    fn expire_after(&self, message_id: String, timeout: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let _ = tokio::spawn(async move {
            time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.pending.take(&message_id).is_some() {
                warn!(
                    group = %inner.group_name,
                    client = %inner.name,
                    message_id = %message_id,
                    "async reply timed out"
                );
                let _ = Client { inner }.send_failed(WsError::AsyncMessageTimeout);
            }
        });
    }

    /// Send the default ping: a text frame holding the current timestamp.
    pub async fn ping(&self) -> Result<()> {
        self.ping_with(|| Frame::Text(chrono::Local::now().to_rfc3339()))
            .await
    }

    /// Send the frame built by `frame`.
    pub async fn ping_with(&self, frame: impl FnOnce() -> Frame) -> Result<()> {
        self.write(frame()).await.map_err(|err| self.record(err))
    }

    /// Run `f` every `interval` until the client closes or `heart` is called
    /// again. A zero interval uses the configured heartbeat interval.
    pub fn heart<F, Fut>(&self, interval: Duration, f: F)
    where
        F: Fn(Client) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interval = if interval.is_zero() {
            self.inner.config.heartbeat_interval
        } else {
            interval
        };
        let interval = interval.max(Duration::from_millis(1));

        let stop = CancellationToken::new();
        if let Some(previous) = self.inner.heartbeat.lock().replace(stop.clone()) {
            previous.cancel();
        }

        debug!(client = %self.inner.name, ?interval, "heartbeat armed");
        let weak = Arc::downgrade(&self.inner);
        let _ = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        f(Client { inner }).await;
                    }
                }
            }
        });
    }

    fn stop_heartbeat(&self) {
        if let Some(heartbeat) = self.inner.heartbeat.lock().take() {
            heartbeat.cancel();
        }
    }

    /// Write a close frame and go offline.
    ///
    /// Closing an offline client is a no-op. If the close frame cannot be
    /// written within the configured close timeout the client stays online
    /// and `on_close_fail` fires.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        let taken = inner.session.lock().take();
        let Some(session) = taken else {
            *inner.status.lock() = ConnStatus::Offline;
            self.stop_heartbeat();
            return Ok(());
        };

        let close_timeout = inner.config.close_timeout;
        let result = time::timeout(close_timeout, async {
            let mut sink = session.sink.lock().await;
            sink.close().await
        })
        .await;

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => None,
            Ok(Err(err)) => Some(WsError::transport(err)),
            Err(_) => Some(WsError::Transport(format!(
                "close timed out after {close_timeout:?}"
            ))),
        };
        if let Some(err) = failure {
            warn!(group = %inner.group_name, client = %inner.name, error = %err, "close failed");
            {
                let mut slot = inner.session.lock();
                if slot.is_none() && !session.close.is_cancelled() {
                    *slot = Some(session);
                } else {
                    *inner.status.lock() = ConnStatus::Offline;
                }
            }
            inner.handlers.close_fail(&inner.group_name, &inner.name, &err);
            return Err(self.record(err));
        }

        session.close.cancel();
        *inner.status.lock() = ConnStatus::Offline;
        self.stop_heartbeat();
        info!(group = %inner.group_name, client = %inner.name, "client closed");
        inner.handlers.close_success(&inner.group_name, &inner.name);
        Ok(())
    }

    /// Close, then boot again. Returns the first error.
    pub async fn reboot(&self) -> Result<()> {
        self.close().await?;
        self.boot().await
    }

    async fn write(&self, frame: Frame) -> Result<()> {
        let sink = self
            .inner
            .session
            .lock()
            .as_ref()
            .map(|session| Arc::clone(&session.sink))
            .ok_or(WsError::Offline)?;
        let mut sink = sink.lock().await;
        sink.send(transport::to_message(frame))
            .await
            .map_err(WsError::transport)
    }

    fn dispatch(&self, data: Bytes, slot: &mpsc::Sender<Bytes>) {
        let inner = &self.inner;
        let message = Message::parse(data);
        inner
            .handlers
            .receive_success(&inner.group_name, &inner.name, message.payload());

        if message.is_async() {
            let message_id = message.message_id().to_owned();
            match inner.pending.take(&message_id) {
                Some(callback) => {
                    callback(&inner.group_name, &inner.name, message.into_payload());
                }
                None => debug!(client = %inner.name, message_id = %message_id, "no pending callback"),
            }
            return;
        }

        match slot.try_send(message.into_payload()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(group = %inner.group_name, client = %inner.name, "receive slot full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(client = %inner.name, "receive slot closed, dropping frame");
            }
        }
    }

    fn on_read_failure(&self, session_id: u64, err: WsError) {
        let inner = &self.inner;
        warn!(group = %inner.group_name, client = %inner.name, error = %err, "read failed");
        inner
            .handlers
            .receive_fail(&inner.group_name, &inner.name, &err);
        let _ = self.record(err);

        let current = {
            let mut session = inner.session.lock();
            if session.as_ref().is_some_and(|s| s.id == session_id) {
                *inner.status.lock() = ConnStatus::Offline;
                session.take()
            } else {
                None
            }
        };
        if let Some(session) = current {
            session.close.cancel();
            self.stop_heartbeat();
            info!(group = %inner.group_name, client = %inner.name, "client offline");
        }
    }

    fn send_failed(&self, err: WsError) -> WsError {
        let inner = &self.inner;
        inner
            .handlers
            .send_fail(&inner.group_name, &inner.name, &err);
        self.record(err)
    }

    fn record(&self, err: WsError) -> WsError {
        *self.inner.last_error.lock() = Some(err.clone());
        err
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("group_name", &self.inner.group_name)
            .field("name", &self.inner.name)
            .field("addr", &self.inner.addr)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

async fn read_loop(
    weak: Weak<ClientInner>,
    session_id: u64,
    mut source: WsSource,
    close: CancellationToken,
    slot: mpsc::Sender<Bytes>,
) {
    loop {
        let next = tokio::select! {
            () = close.cancelled() => break,
            next = source.next() => next,
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let client = Client { inner };

        match next {
            Some(Ok(message)) => match transport::to_frame(message) {
                Some(Frame::Close) => {
                    debug!(client = %client.name(), "close frame received");
                    if let Err(err) = client.close().await {
                        client.on_read_failure(session_id, err);
                    }
                    break;
                }
                Some(Frame::Ping(_)) => {
                    if let Err(err) = client.write(Frame::empty_text()).await {
                        debug!(client = %client.name(), error = %err, "ping reply failed");
                    }
                }
                Some(frame) => {
                    trace!(client = %client.name(), kind = frame.kind(), "frame received");
                    if let Some(data) = frame.into_data() {
                        client.dispatch(data, &slot);
                    }
                }
                None => {}
            },
            Some(Err(err)) => {
                client.on_read_failure(session_id, WsError::transport(err));
                break;
            }
            None => {
                client.on_read_failure(
                    session_id,
                    WsError::Transport("connection closed by peer".into()),
                );
                break;
            }
        }
    }
    debug!(session_id, "reader stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use assert_matches::assert_matches;
    use courier_core::logging::capture_logs;
    use tracing::Level;

    use super::*;

    fn offline_client(handlers: ClientHandlers) -> Client {
        Client::new(
            "orders",
            "primary",
            "ws://127.0.0.1:9/ws",
            handlers,
            ClientConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn new_requires_name_and_addr() {
        let err = Client::new("g", "", "ws://x", ClientHandlers::new(), ClientConfig::default())
            .unwrap_err();
        assert_matches!(err, WsError::ConnOption(_));
        let err = Client::new("g", "n", "", ClientHandlers::new(), ClientConfig::default())
            .unwrap_err();
        assert_matches!(err, WsError::ConnOption(_));
    }

    #[test]
    fn new_client_is_offline() {
        let client = offline_client(ClientHandlers::new());
        assert_eq!(client.status(), ConnStatus::Offline);
        assert_eq!(client.group_name(), "orders");
        assert_eq!(client.name(), "primary");
        assert_eq!(client.addr(), "ws://127.0.0.1:9/ws");
        assert!(client.take_error().is_none());
    }

    #[test]
    fn headers_set_and_append() {
        let client = offline_client(ClientHandlers::new());
        let _ = client.set_headers([("identity", "alice"), ("x-trace", "1")]);
        let _ = client.append_headers([("x-trace", "2"), ("x-extra", "y")]);

        let headers = client.headers();
        assert_eq!(headers.get("identity").map(String::as_str), Some("alice"));
        assert_eq!(headers.get("x-trace").map(String::as_str), Some("2"));
        assert_eq!(headers.len(), 3);

        let _ = client.set_headers([("only", "one")]);
        assert_eq!(client.headers().len(), 1);
    }

    #[tokio::test]
    async fn sync_message_offline_fails_without_write() {
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        let client = offline_client(ClientHandlers::new().on_send_fail(move |_, _, err| {
            assert_eq!(*err, WsError::Offline);
            let _ = seen.fetch_add(1, Ordering::SeqCst);
        }));

        let err = client.sync_message("hello", None).await.unwrap_err();
        assert_eq!(err, WsError::Offline);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(client.take_error(), Some(WsError::Offline));
        assert!(client.take_error().is_none());
    }

    #[tokio::test]
    async fn async_message_requires_callback_and_timeout() {
        let client = offline_client(ClientHandlers::new());

        let err = client
            .async_message("ping", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, WsError::AsyncMessageCallbackEmpty);

        let callback: AsyncCallback = Box::new(|_, _, _| {});
        let err = client
            .async_message("ping", Some(callback), Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, WsError::AsyncMessageCallbackEmpty);
        assert_eq!(client.pending_replies(), 0);
    }

    #[test]
    fn async_callback_may_hold_non_sync_state() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Client>();

        let hits = std::cell::Cell::new(0);
        let callback: AsyncCallback = Box::new(move |_, _, payload| {
            hits.set(hits.get() + payload.len());
            assert_eq!(hits.get(), 3);
        });
        callback("orders", "primary", Bytes::from_static(b"abc"));
    }

    #[test]
    fn pending_reply_is_taken_once() {
        let pending = PendingReplies::default();
        pending.insert("id".into(), Box::new(|_, _, _| {}));
        assert_eq!(pending.len(), 1);
        assert!(pending.take("id").is_some());
        assert!(pending.take("id").is_none());
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn async_message_offline_registers_nothing() {
        let client = offline_client(ClientHandlers::new());
        let callback: AsyncCallback = Box::new(|_, _, _| {});
        let err = client
            .async_message("ping", Some(callback), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, WsError::Offline);
        assert_eq!(client.pending_replies(), 0);
    }

    #[tokio::test]
    async fn close_offline_twice_is_noop() {
        let closes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&closes);
        let client = offline_client(ClientHandlers::new().on_close_success(move |_, _| {
            let _ = seen.fetch_add(1, Ordering::SeqCst);
        }));

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(client.status(), ConnStatus::Offline);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn boot_failure_reports_and_stays_offline() {
        let (logs, _guard) = capture_logs();
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        let client = Client::new(
            "orders",
            "primary",
            "not a url",
            ClientHandlers::new().on_conn_fail(move |_, _, _| {
                let _ = seen.fetch_add(1, Ordering::SeqCst);
            }),
            ClientConfig::default(),
        )
        .unwrap();

        let err = client.boot().await.unwrap_err();
        assert_matches!(err, WsError::ConnOption(_));
        assert_eq!(client.status(), ConnStatus::Offline);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(client.take_error().is_some());
        assert!(logs.has_event(Level::WARN, "dial failed"));
        assert_eq!(logs.field_of("dial failed", "client").as_deref(), Some("primary"));
    }

    #[tokio::test]
    async fn ping_offline_records_error() {
        let client = offline_client(ClientHandlers::new());
        assert_eq!(client.ping().await.unwrap_err(), WsError::Offline);
        assert_eq!(client.take_error(), Some(WsError::Offline));
    }

    #[tokio::test(start_paused = true)]
    async fn heart_rearm_replaces_previous_task() {
        let client = offline_client(ClientHandlers::new());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        client.heart(Duration::from_millis(100), move |_| {
            let f = Arc::clone(&f);
            async move {
                let _ = f.fetch_add(1, Ordering::SeqCst);
            }
        });
        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(first.load(Ordering::SeqCst), 2);

        let s = Arc::clone(&second);
        client.heart(Duration::from_millis(100), move |_| {
            let s = Arc::clone(&s);
            async move {
                let _ = s.fetch_add(1, Ordering::SeqCst);
            }
        });
        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);

        client.close().await.unwrap();
        time::sleep(Duration::from_millis(250)).await;
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn debug_shows_identity() {
        let client = offline_client(ClientHandlers::new());
        let debug = format!("{client:?}");
        assert!(debug.contains("primary"));
        assert!(debug.contains("Offline"));
    }
}

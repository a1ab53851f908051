//! One accepted connection.

use std::fmt;
use std::sync::Arc;

use axum::extract::ws::{Message as WireMessage, WebSocket};
use bytes::Bytes;
use courier_core::{ConnStatus, Frame, Message, Result, WsError};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::handlers::ServerHandlers;
use crate::transport;

/// Handle to one accepted connection. Clones share the same connection.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    addr: String,
    sink: AsyncMutex<SplitSink<WebSocket, WireMessage>>,
    /// Read half, held until [`Server::boot`] hands it to the reader task.
    source: Mutex<Option<SplitStream<WebSocket>>>,
    status: Mutex<ConnStatus>,
    close: CancellationToken,
    terminated: CancellationToken,
    max_read_errors: u32,
    last_error: Mutex<Option<WsError>>,
}

impl Server {
    /// Wrap an upgraded socket. The connection stays offline until booted.
    pub fn new(addr: impl Into<String>, socket: WebSocket, max_consecutive_read_errors: u32) -> Self {
        let (sink, source) = socket.split();
        Self {
            inner: Arc::new(ServerInner {
                addr: addr.into(),
                sink: AsyncMutex::new(sink),
                source: Mutex::new(Some(source)),
                status: Mutex::new(ConnStatus::Offline),
                close: CancellationToken::new(),
                terminated: CancellationToken::new(),
                max_read_errors: max_consecutive_read_errors.max(1),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// Remote address of the peer.
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

    /// Whether the connection is offline.
    pub fn is_offline(&self) -> bool {
        !self.is_online()
    }

    /// Return and clear the last recorded error.
    pub fn take_error(&self) -> Option<WsError> {
        self.inner.last_error.lock().take()
    }

    /// Whether both handles refer to the same accepted connection.
    pub fn same_connection(&self, other: &Server) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Go online and start the reader task.
    ///
    /// Fails with [`WsError::ReceiveHandlerEmpty`] when `handlers` has no
    /// receive handler; no reader is started in that case.
    pub fn boot(&self, handlers: ServerHandlers) -> Result<()> {
        if !handlers.has_receive_handler() {
            return Err(self.record(WsError::ReceiveHandlerEmpty));
        }
        let Some(source) = self.inner.source.lock().take() else {
            debug!(addr = %self.inner.addr, "connection already booted or closed");
            return Ok(());
        };

        *self.inner.status.lock() = ConnStatus::Online;
        let _ = tokio::spawn(read_loop(self.clone(), source, handlers));
        Ok(())
    }

    /// Write an uncorrelated frame.
    pub async fn sync_message(
        &self,
        payload: impl Into<Bytes>,
        handlers: &ServerHandlers,
    ) -> Result<()> {
        self.send(Message::new(false, payload), handlers).await
    }

    /// Write a correlated frame and return its message id.
    ///
    /// Nothing waits for a reply; the peer answers with a frame of its own.
    pub async fn async_message(
        &self,
        payload: impl Into<Bytes>,
        handlers: &ServerHandlers,
    ) -> Result<String> {
        let message = Message::new(true, payload);
        let message_id = message.message_id().to_owned();
        self.send(message, handlers).await?;
        Ok(message_id)
    }

    async fn send(&self, message: Message, handlers: &ServerHandlers) -> Result<()> {
        if self.is_offline() {
            let err = WsError::Offline;
            debug!(addr = %self.inner.addr, "send to offline connection");
            handlers.send_fail(&err);
            return Err(self.record(err));
        }
        if let Err(err) = self.write(Frame::data(message.wire().clone())).await {
            warn!(addr = %self.inner.addr, error = %err, "send failed");
            handlers.send_fail(&err);
            return Err(self.record(err));
        }
        handlers.send_success(self, message.wire(), message.payload());
        Ok(())
    }

    /// Signal the reader to close the connection. Safe to call repeatedly.
    pub fn close(&self) {
        self.inner.close.cancel();
        // Never booted: there is no reader to tear down.
        if self.inner.source.lock().take().is_some() {
            *self.inner.status.lock() = ConnStatus::Offline;
            self.inner.terminated.cancel();
        }
    }

    /// Resolves once the connection has finished closing.
    pub async fn closed(&self) {
        self.inner.terminated.cancelled().await;
    }

    async fn write(&self, frame: Frame) -> Result<()> {
        let mut sink = self.inner.sink.lock().await;
        sink.send(transport::to_message(frame))
            .await
            .map_err(WsError::transport)
    }

    async fn teardown(&self, handlers: &ServerHandlers, reason: &'static str) {
        *self.inner.status.lock() = ConnStatus::Offline;
        self.inner.close.cancel();
        {
            let mut sink = self.inner.sink.lock().await;
            if let Err(err) = sink.close().await {
                debug!(addr = %self.inner.addr, error = %err, "close frame not sent");
            }
        }
        info!(addr = %self.inner.addr, reason, "connection offline");
        handlers.close(self);
        self.inner.terminated.cancel();
    }

    fn record(&self, err: WsError) -> WsError {
        *self.inner.last_error.lock() = Some(err.clone());
        err
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.inner.addr)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Receive handlers run inline, so frames are handled in arrival order.
///
/// A peer that vanishes without a close handshake tears the connection down
/// without `on_receive_fail`. Other read errors are reported and reading
/// continues until `max_read_errors` arrive back to back. axum fuses its
/// stream after any error, so on a live socket the stream ends right after
/// the first one.
async fn read_loop<S>(server: Server, mut source: S, handlers: ServerHandlers)
where
    S: Stream<Item = std::result::Result<WireMessage, axum::Error>> + Unpin,
{
    let mut consecutive_errors: u32 = 0;

    let reason = loop {
        let next = tokio::select! {
            () = server.inner.close.cancelled() => break "closed locally",
            next = source.next() => next,
        };

        match next {
            Some(Ok(message)) => {
                consecutive_errors = 0;
                match transport::to_frame(message) {
                    Frame::Close => break "close frame",
                    Frame::Ping(_) => {
                        if let Err(err) = server.write(Frame::empty_text()).await {
                            handlers.send_fail(&err);
                            let _ = server.record(err);
                        }
                    }
                    frame => {
                        trace!(addr = %server.inner.addr, kind = frame.kind(), "frame received");
                        if let Some(wire) = frame.into_data() {
                            handlers
                                .receive_success(server.clone(), Message::parse(wire))
                                .await;
                        }
                    }
                }
            }
            Some(Err(err)) if transport::is_abnormal_closure(&err) => {
                debug!(addr = %server.inner.addr, error = %err, "peer dropped without close");
                let _ = server.record(WsError::transport(err));
                break "abnormal closure";
            }
            Some(Err(err)) => {
                consecutive_errors += 1;
                let err = WsError::transport(err);
                warn!(addr = %server.inner.addr, error = %err, consecutive_errors, "read failed");
                handlers.receive_fail(&server, &err);
                let _ = server.record(err);
                if consecutive_errors >= server.inner.max_read_errors {
                    break "too many read errors";
                }
            }
            None => break "stream ended",
        }
    };

    server.teardown(&handlers, reason).await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use axum::Router;
    use axum::extract::ws::WebSocketUpgrade;
    use axum::routing::get;
    use courier_core::logging::capture_logs;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::{self, Message as ClientMessage};
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
    use tracing::Level;

    use super::*;

    type Peer = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Accept one connection and hand back both ends.
    async fn accepted() -> (Server, Peer) {
        let (tx, mut rx) = mpsc::channel::<WebSocket>(1);
        let app = Router::new().route(
            "/ws",
            get(move |ws: WebSocketUpgrade| {
                let tx = tx.clone();
                async move {
                    ws.on_upgrade(move |socket| async move {
                        let _ = tx.send(socket).await;
                    })
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _ = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (peer, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let socket = rx.recv().await.unwrap();
        (Server::new("peer", socket, 3), peer)
    }

    type Scripted = Vec<std::result::Result<WireMessage, axum::Error>>;

    /// Run the reader over `items` in place of the socket's read half.
    async fn drive(server: &Server, items: Scripted, handlers: ServerHandlers) {
        let _ = server.inner.source.lock().take();
        *server.inner.status.lock() = ConnStatus::Online;
        read_loop(server.clone(), futures::stream::iter(items), handlers).await;
    }

    fn malformed() -> axum::Error {
        axum::Error::new(tungstenite::Error::Utf8("bad byte".into()))
    }

    fn text(body: &str) -> std::result::Result<WireMessage, axum::Error> {
        Ok(WireMessage::Text(body.into()))
    }

    /// Handlers counting receive failures and closes, collecting payloads.
    fn counting_handlers() -> (ServerHandlers, Arc<AtomicUsize>, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let failures = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let (f, c, r) = (Arc::clone(&failures), Arc::clone(&closes), Arc::clone(&received));
        let handlers = ServerHandlers::new()
            .on_receive_success(move |_, message| {
                let r = Arc::clone(&r);
                async move {
                    r.lock()
                        .push(String::from_utf8_lossy(message.payload()).into_owned());
                }
            })
            .on_receive_fail(move |_, _| {
                let _ = f.fetch_add(1, Ordering::SeqCst);
            })
            .on_close(move |_| {
                let _ = c.fetch_add(1, Ordering::SeqCst);
            });
        (handlers, failures, closes, received)
    }

    async fn next_text(peer: &mut Peer) -> String {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), peer.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap()
            {
                ClientMessage::Text(text) => return text.as_str().to_owned(),
                ClientMessage::Close(_) => panic!("unexpected close"),
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn boot_requires_receive_handler() {
        let (server, _peer) = accepted().await;
        let err = server.boot(ServerHandlers::new()).unwrap_err();
        assert_eq!(err, WsError::ReceiveHandlerEmpty);
        assert!(server.is_offline());
        assert_eq!(server.take_error(), Some(WsError::ReceiveHandlerEmpty));
    }

    #[tokio::test]
    async fn send_before_boot_is_offline() {
        let (server, _peer) = accepted().await;
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        let handlers = ServerHandlers::new().on_send_fail(move |err| {
            assert_eq!(*err, WsError::Offline);
            let _ = seen.fetch_add(1, Ordering::SeqCst);
        });
        let err = server.sync_message("hi", &handlers).await.unwrap_err();
        assert_eq!(err, WsError::Offline);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sync_and_async_framing_on_the_wire() {
        let (server, mut peer) = accepted().await;
        let sent = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&sent);
        let handlers = ServerHandlers::new()
            .on_receive_success(|_, _| async {})
            .on_send_success(move |_, _, _| {
                let _ = seen.fetch_add(1, Ordering::SeqCst);
            });
        server.boot(handlers.clone()).unwrap();
        assert!(server.is_online());

        server.sync_message("plain", &handlers).await.unwrap();
        assert_eq!(next_text(&mut peer).await, "plain");

        let id = server.async_message("tagged", &handlers).await.unwrap();
        assert_eq!(next_text(&mut peer).await, format!("{id}:tagged"));
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn receive_handler_sees_parsed_messages_in_order() {
        let (server, mut peer) = accepted().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handlers = ServerHandlers::new().on_receive_success(move |_, message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
            }
        });
        server.boot(handlers).unwrap();

        let correlated = Message::new(true, "b");
        peer.send(ClientMessage::Text("a".into())).await.unwrap();
        peer.send(ClientMessage::Binary(correlated.wire().clone()))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(!first.is_async());
        assert_eq!(first.payload().as_ref(), b"a");
        let second = rx.recv().await.unwrap();
        assert!(second.is_async());
        assert_eq!(second.message_id(), correlated.message_id());
        assert_eq!(second.payload().as_ref(), b"b");
    }

    #[tokio::test]
    async fn ping_is_answered_with_empty_text() {
        let (server, mut peer) = accepted().await;
        server
            .boot(ServerHandlers::new().on_receive_success(|_, _| async {}))
            .unwrap();
        peer.send(ClientMessage::Ping(Bytes::from_static(b"hb")))
            .await
            .unwrap();
        assert_eq!(next_text(&mut peer).await, "");
    }

    #[tokio::test]
    async fn close_fires_on_close_once() {
        let (server, mut peer) = accepted().await;
        let closes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&closes);
        server
            .boot(
                ServerHandlers::new()
                    .on_receive_success(|_, _| async {})
                    .on_close(move |_| {
                        let _ = seen.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .unwrap();

        server.close();
        server.close();
        tokio::time::timeout(Duration::from_secs(2), server.closed())
            .await
            .unwrap();
        assert!(server.is_offline());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let frame = tokio::time::timeout(Duration::from_secs(2), peer.next())
            .await
            .unwrap();
        assert_matches!(frame, Some(Ok(ClientMessage::Close(_))));
    }

    #[tokio::test]
    async fn peer_drop_without_close_is_not_a_receive_failure() {
        let (server, peer) = accepted().await;
        let (handlers, failures, closes, _) = counting_handlers();
        server.boot(handlers).unwrap();

        drop(peer);
        tokio::time::timeout(Duration::from_secs(2), server.closed())
            .await
            .unwrap();
        assert!(server.is_offline());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 0);
        assert_matches!(server.take_error(), Some(WsError::Transport(_)));
    }

    #[tokio::test]
    async fn read_errors_tear_down_after_budget() {
        let (logs, _guard) = capture_logs();
        let (server, _peer) = accepted().await;
        let (handlers, failures, closes, received) = counting_handlers();

        // Budget is 3; the good frame in between resets the count.
        let items = vec![
            Err(malformed()),
            Err(malformed()),
            text("kept"),
            Err(malformed()),
            Err(malformed()),
            Err(malformed()),
            text("never read"),
        ];
        drive(&server, items, handlers).await;

        assert_eq!(failures.load(Ordering::SeqCst), 5);
        assert_eq!(received.lock().as_slice(), ["kept"]);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(server.is_offline());
        assert_eq!(
            logs.field_of("connection offline", "reason").as_deref(),
            Some("too many read errors")
        );
        assert!(logs.has_event(Level::WARN, "read failed"));
    }

    #[tokio::test]
    async fn scripted_abnormal_closure_skips_receive_fail() {
        let (logs, _guard) = capture_logs();
        let (server, _peer) = accepted().await;
        let (handlers, failures, closes, received) = counting_handlers();

        let reset = axum::Error::new(tungstenite::Error::Protocol(
            tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
        ));
        drive(&server, vec![text("first"), Err(reset), text("after")], handlers).await;

        assert_eq!(failures.load(Ordering::SeqCst), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(received.lock().as_slice(), ["first"]);
        assert_eq!(
            logs.field_of("connection offline", "reason").as_deref(),
            Some("abnormal closure")
        );
    }

    #[tokio::test]
    async fn close_before_boot_terminates_immediately() {
        let (server, _peer) = accepted().await;
        server.close();
        tokio::time::timeout(Duration::from_millis(100), server.closed())
            .await
            .unwrap();
        server
            .boot(ServerHandlers::new().on_receive_success(|_, _| async {}))
            .unwrap();
        assert!(server.is_offline());
    }
}

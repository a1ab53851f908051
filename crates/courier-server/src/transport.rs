//! Conversion between axum WebSocket messages and [`Frame`], and read
//! error classification.

use std::error::Error as _;
use std::io;

use axum::extract::ws::Message as WireMessage;
use courier_core::Frame;
use tokio_tungstenite::tungstenite::{self, error::ProtocolError};

pub(crate) fn to_frame(message: WireMessage) -> Frame {
    match message {
        WireMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
        WireMessage::Binary(data) => Frame::Binary(data),
        WireMessage::Ping(data) => Frame::Ping(data),
        WireMessage::Pong(data) => Frame::Pong(data),
        WireMessage::Close(_) => Frame::Close,
    }
}

pub(crate) fn to_message(frame: Frame) -> WireMessage {
    match frame {
        Frame::Text(text) => WireMessage::Text(text.into()),
        Frame::Binary(data) => WireMessage::Binary(data),
        Frame::Close => WireMessage::Close(None),
        Frame::Ping(data) => WireMessage::Ping(data),
        Frame::Pong(data) => WireMessage::Pong(data),
    }
}

/// Whether a read error means the peer went away without a close handshake.
///
/// axum boxes the tungstenite error, so the cause chain is walked. I/O
/// failures count as well: the socket is gone either way.
pub(crate) fn is_abnormal_closure(err: &axum::Error) -> bool {
    let mut cause = err.source();
    while let Some(current) = cause {
        if current.is::<io::Error>() {
            return true;
        }
        if let Some(err) = current.downcast_ref::<tungstenite::Error>() {
            return matches!(
                err,
                tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
                    | tungstenite::Error::Io(_)
                    | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
            );
        }
        cause = current.source();
    }
    false
}

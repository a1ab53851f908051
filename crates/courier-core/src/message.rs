//! Correlation envelope.
//!
//! A correlated message travels as `<id>:<payload>` where `<id>` is a
//! hyphenated UUID. An uncorrelated message travels as the raw payload.
//! Parsing only treats a frame as correlated when the text before the first
//! `:` is a hyphenated UUID, so payloads may themselves contain `:`.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

const SEPARATOR: u8 = b':';
const HYPHENATED_LEN: usize = 36;

/// A framed message, either correlated (async) or raw (sync).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    correlated: bool,
    message_id: String,
    wire: Bytes,
    payload: Bytes,
}

impl Message {
    /// Frame `payload` for sending.
    ///
    /// When `correlated` is set a fresh message id is generated and the wire
    /// form becomes `<id>:<payload>`; otherwise the wire form is the payload.
    pub fn new(correlated: bool, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        if !correlated {
            return Self {
                correlated,
                message_id: String::new(),
                wire: payload.clone(),
                payload,
            };
        }

        let message_id = Uuid::now_v7().hyphenated().to_string();
        let mut wire = BytesMut::with_capacity(message_id.len() + 1 + payload.len());
        wire.put_slice(message_id.as_bytes());
        wire.put_u8(SEPARATOR);
        wire.put_slice(&payload);

        Self {
            correlated,
            message_id,
            wire: wire.freeze(),
            payload,
        }
    }

    /// Interpret a received frame.
    pub fn parse(wire: impl Into<Bytes>) -> Self {
        let wire = wire.into();
        if let Some(split) = wire.iter().position(|b| *b == SEPARATOR) {
            let id = &wire[..split];
            if id.len() == HYPHENATED_LEN && Uuid::try_parse_ascii(id).is_ok() {
                return Self {
                    correlated: true,
                    message_id: String::from_utf8_lossy(id).into_owned(),
                    payload: wire.slice(split + 1..),
                    wire,
                };
            }
        }

        Self {
            correlated: false,
            message_id: String::new(),
            payload: wire.clone(),
            wire,
        }
    }

    /// Bytes as they appear on the wire.
    pub fn wire(&self) -> &Bytes {
        &self.wire
    }

    /// Application payload without any correlation prefix.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Correlation id, empty for uncorrelated messages.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Whether the message carries a correlation id.
    pub fn is_async(&self) -> bool {
        self.correlated
    }

    /// Consume the message, returning the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

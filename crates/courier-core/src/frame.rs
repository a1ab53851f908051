//! Transport frame kinds.
//!
//! Both the client (tungstenite) and server (axum) read loops convert the
//! library's message type into [`Frame`] and match on it exhaustively.

use bytes::Bytes;

/// One WebSocket frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 data frame.
    Text(String),
    /// Binary data frame.
    Binary(Bytes),
    /// Close control frame.
    Close,
    /// Ping control frame.
    Ping(Bytes),
    /// Pong control frame.
    Pong(Bytes),
}

impl Frame {
    /// Data frame for `wire`: text when it is valid UTF-8, binary otherwise.
    pub fn data(wire: Bytes) -> Self {
        match std::str::from_utf8(&wire) {
            Ok(text) => Self::Text(text.to_owned()),
            Err(_) => Self::Binary(wire),
        }
    }

    /// Empty text frame, used to answer pings.
    pub fn empty_text() -> Self {
        Self::Text(String::new())
    }

    /// Payload of a data frame, `None` for control frames.
    pub fn into_data(self) -> Option<Bytes> {
        match self {
            Self::Text(text) => Some(Bytes::from(text)),
            Self::Binary(data) => Some(data),
            Self::Close | Self::Ping(_) | Self::Pong(_) => None,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Close => "close",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_prefers_text() {
        assert_eq!(Frame::data(Bytes::from_static(b"hi")), Frame::Text("hi".into()));
    }

    #[test]
    fn data_falls_back_to_binary() {
        let raw = Bytes::from_static(&[0xff, 0xfe, 0x00]);
        assert_eq!(Frame::data(raw.clone()), Frame::Binary(raw));
    }

    #[test]
    fn into_data_only_for_data_frames() {
        assert_eq!(
            Frame::Text("a".into()).into_data(),
            Some(Bytes::from_static(b"a"))
        );
        assert_eq!(
            Frame::Binary(Bytes::from_static(b"b")).into_data(),
            Some(Bytes::from_static(b"b"))
        );
        assert!(Frame::Close.into_data().is_none());
        assert!(Frame::Ping(Bytes::new()).into_data().is_none());
        assert!(Frame::Pong(Bytes::new()).into_data().is_none());
    }

    #[test]
    fn kinds() {
        assert_eq!(Frame::empty_text().kind(), "text");
        assert_eq!(Frame::Close.kind(), "close");
    }
}

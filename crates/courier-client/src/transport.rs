//! Conversion between tungstenite messages and [`Frame`].

use courier_core::Frame;
use tokio_tungstenite::tungstenite::Message as WireMessage;

/// Map a received message onto the frame set the read loop dispatches on.
///
/// Raw frames never surface from a read and yield `None`.
pub(crate) fn to_frame(message: WireMessage) -> Option<Frame> {
    match message {
        WireMessage::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        WireMessage::Binary(data) => Some(Frame::Binary(data)),
        WireMessage::Ping(data) => Some(Frame::Ping(data)),
        WireMessage::Pong(data) => Some(Frame::Pong(data)),
        WireMessage::Close(_) => Some(Frame::Close),
        WireMessage::Frame(_) => None,
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

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn text_maps_both_ways() {
        let frame = to_frame(WireMessage::Text("hello".into()));
        assert_eq!(frame, Some(Frame::Text("hello".into())));
        assert_eq!(
            to_message(Frame::Text("hello".into())),
            WireMessage::Text("hello".into())
        );
    }

    #[test]
    fn control_frames() {
        assert_eq!(to_frame(WireMessage::Close(None)), Some(Frame::Close));
        assert_eq!(
            to_frame(WireMessage::Ping(Bytes::from_static(b"p"))),
            Some(Frame::Ping(Bytes::from_static(b"p")))
        );
        assert_eq!(to_message(Frame::Close), WireMessage::Close(None));
    }

    #[test]
    fn binary_keeps_bytes() {
        let data = Bytes::from_static(&[0, 159, 146, 150]);
        assert_eq!(
            to_frame(WireMessage::Binary(data.clone())),
            Some(Frame::Binary(data.clone()))
        );
        assert_eq!(to_message(Frame::Binary(data.clone())), WireMessage::Binary(data));
    }
}

//! Adapter for sockets upgraded by axum's `WebSocketUpgrade` extractor

use ::axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};

use super::{CloseReason, Connection, Frame};
use crate::error::TransportError;

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::Message(Bytes::from(text)),
            Message::Binary(data) => Frame::Message(Bytes::from(data)),
            Message::Ping(data) => Frame::Ping(Bytes::from(data)),
            Message::Pong(data) => Frame::Pong(Bytes::from(data)),
            Message::Close(frame) => {
                Frame::Close(frame.map(|f| CloseReason::new(f.code, f.reason.into_owned())))
            }
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            // Text when the payload is UTF-8, binary otherwise.
            Frame::Message(payload) => match String::from_utf8(payload.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            },
            Frame::Ping(data) => Message::Ping(data.to_vec()),
            Frame::Pong(data) => Message::Pong(data.to_vec()),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: r.code,
                reason: r.reason.into(),
            })),
        }
    }
}

impl From<WebSocket> for Connection {
    fn from(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));
        let stream = stream.map(|msg| msg.map(Frame::from).map_err(TransportError::from));

        Connection::from_parts(sink, stream)
    }
}

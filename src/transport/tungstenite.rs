//! Adapter for `tokio-tungstenite` streams and server-side handshakes over raw TCP

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use super::{CloseReason, Connection, Frame, RequestMeta, Upgrade, Upgraded};
use crate::error::TransportError;

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::Message(Bytes::from(text)),
            Message::Binary(data) => Frame::Message(Bytes::from(data)),
            Message::Ping(data) => Frame::Ping(Bytes::from(data)),
            Message::Pong(data) => Frame::Pong(Bytes::from(data)),
            Message::Close(frame) => Frame::Close(
                frame.map(|f| CloseReason::new(u16::from(f.code), f.reason.into_owned())),
            ),
            raw @ Message::Frame(_) => Frame::Message(Bytes::from(raw.into_data())),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Message(payload) => match String::from_utf8(payload.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            },
            Frame::Ping(data) => Message::Ping(data.to_vec()),
            Frame::Pong(data) => Message::Pong(data.to_vec()),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: CloseCode::from(r.code),
                reason: r.reason.into(),
            })),
        }
    }
}

impl<S> From<WebSocketStream<S>> for Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn from(socket: WebSocketStream<S>) -> Self {
        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));
        let stream = stream.map(|msg| msg.map(Frame::from).map_err(TransportError::from));

        Connection::from_parts(sink, stream)
    }
}

/// Server-side WebSocket handshake over an accepted TCP stream
pub struct TcpUpgrade {
    stream: TcpStream,
}

impl TcpUpgrade {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Upgrade for TcpUpgrade {
    async fn upgrade(self, read_limit: usize) -> Result<Upgraded, TransportError> {
        let remote_addr = self.stream.peer_addr().ok();

        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(read_limit);

        let mut target = String::new();
        let capture_target = |req: &Request, resp: Response| {
            target = req.uri().to_string();
            Ok::<_, ErrorResponse>(resp)
        };

        let socket = tokio_tungstenite::accept_hdr_async_with_config(
            self.stream,
            capture_target,
            Some(config),
        )
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

        debug!(path = %target, peer = ?remote_addr, "WebSocket handshake complete");

        Ok(Upgraded::new(
            Connection::from(socket),
            RequestMeta::from_target(&target, remote_addr),
        ))
    }
}

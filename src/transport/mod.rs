//! Transport abstraction
//!
//! The pumps only need a stream of inbound frames and a sink for outbound
//! frames. Handshakes, framing and control-frame encoding stay with the
//! underlying WebSocket library; the adapters in this module translate its
//! messages into [`Frame`]s.

pub mod axum;
pub mod memory;
pub mod tungstenite;

pub use self::tungstenite::TcpUpgrade;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};

use crate::error::TransportError;

/// Close code for a normal closure
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code sent by a peer that is going away (page unload, server restart)
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// One discrete unit exchanged with a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete data message
    Message(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseReason>),
}

/// Close code and reason carried by a close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure and going-away are the only codes a healthy peer sends.
    pub fn is_expected(&self) -> bool {
        matches!(self.code, CLOSE_NORMAL | CLOSE_GOING_AWAY)
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

/// An upgraded connection, split into its write and read halves.
///
/// The writer pump takes the sink and the reader pump takes the stream, so a
/// connection never has more than one writer.
pub struct Connection {
    sink: FrameSink,
    stream: FrameStream,
}

impl Connection {
    /// Wrap a duplex socket that already speaks [`Frame`]s.
    pub fn new<S>(socket: S) -> Self
    where
        S: Stream<Item = Result<Frame, TransportError>>
            + Sink<Frame, Error = TransportError>
            + Send
            + 'static,
    {
        let (sink, stream) = socket.split();
        Self::from_parts(sink, stream)
    }

    pub fn from_parts<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<Frame, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    pub fn into_parts(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }

    /// Close the write half, which ends the connection for the peer.
    pub async fn close(mut self) -> Result<(), TransportError> {
        self.sink.close().await
    }
}

/// Request metadata captured during the upgrade and handed to client factories
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Request path, e.g. `/ws`
    pub path: String,
    /// Decoded query parameters
    pub query: HashMap<String, String>,
    /// Address of the connecting peer, when known
    pub remote_addr: Option<SocketAddr>,
}

impl RequestMeta {
    /// Build metadata from a request target such as `/ws?id=7`.
    pub fn from_target(target: &str, remote_addr: Option<SocketAddr>) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        Self {
            path: path.to_string(),
            query: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            remote_addr,
        }
    }

    /// Get a single query parameter
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

/// Result of a successful handshake
pub struct Upgraded {
    pub connection: Connection,
    pub meta: RequestMeta,
}

impl Upgraded {
    pub fn new(connection: Connection, meta: RequestMeta) -> Self {
        Self { connection, meta }
    }
}

/// Performs the protocol handshake for one inbound request.
#[async_trait]
pub trait Upgrade: Send {
    /// Handshake, rejecting inbound messages larger than `read_limit` bytes
    /// where the underlying library supports it.
    async fn upgrade(self, read_limit: usize) -> Result<Upgraded, TransportError>;
}

/// Connections handshaken elsewhere (e.g. by axum) upgrade trivially.
#[async_trait]
impl Upgrade for Upgraded {
    async fn upgrade(self, _read_limit: usize) -> Result<Upgraded, TransportError> {
        Ok(self)
    }
}

//! In-memory loopback transport
//!
//! [`pair`] returns a server-side [`Connection`] plus the [`Peer`] driving the
//! other end. Used to embed clients without sockets and by the test suites.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::channel::mpsc;
use futures::task::AtomicWaker;
use futures::{Sink, StreamExt};

use super::{CloseReason, Connection, Frame};
use crate::error::TransportError;

/// Create a connected loopback pair.
pub fn pair() -> (Connection, Peer) {
    let (to_server, server_rx) = mpsc::unbounded();
    let (server_tx, from_server) = mpsc::unbounded();
    let state = Arc::new(SinkState::default());

    let sink = MemorySink {
        tx: server_tx,
        state: Arc::clone(&state),
        closed: false,
    };

    (
        Connection::from_parts(sink, server_rx),
        Peer {
            to_server,
            from_server,
            state,
        },
    )
}

#[derive(Debug, Default)]
struct SinkState {
    closes: AtomicUsize,
    stalled: AtomicBool,
    /// Send parked on a stalled peer
    unstalled: AtomicWaker,
}

struct MemorySink {
    tx: mpsc::UnboundedSender<Frame>,
    state: Arc<SinkState>,
    closed: bool,
}

impl Sink<Frame> for MemorySink {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.closed || self.tx.is_closed() {
            return Poll::Ready(Err(TransportError::ConnectionClosed));
        }
        if self.state.stalled.load(Ordering::Acquire) {
            self.state.unstalled.register(cx.waker());
            // re-check: stall(false) may have run before the waker was stored
            if self.state.stalled.load(Ordering::Acquire) {
                return Poll::Pending;
            }
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        self.tx
            .unbounded_send(item)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.get_mut();
        if !this.closed {
            this.closed = true;
            this.state.closes.fetch_add(1, Ordering::AcqRel);
            this.tx.close_channel();
        }
        Poll::Ready(Ok(()))
    }
}

/// The remote end of a loopback connection
pub struct Peer {
    to_server: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    from_server: mpsc::UnboundedReceiver<Frame>,
    state: Arc<SinkState>,
}

impl Peer {
    /// Deliver a frame to the server side. Returns false once the server dropped its reader.
    pub fn send(&self, frame: Frame) -> bool {
        self.to_server.unbounded_send(Ok(frame)).is_ok()
    }

    pub fn send_message(&self, payload: impl Into<Bytes>) -> bool {
        self.send(Frame::Message(payload.into()))
    }

    /// Answer a keepalive ping.
    pub fn pong(&self) -> bool {
        self.send(Frame::Pong(Bytes::new()))
    }

    pub fn send_close(&self, code: u16, reason: &str) -> bool {
        self.send(Frame::Close(Some(CloseReason::new(code, reason))))
    }

    /// Make the server's next read fail with `err`.
    pub fn fail(&self, err: TransportError) -> bool {
        self.to_server.unbounded_send(Err(err)).is_ok()
    }

    /// Next frame written by the server, `None` once the server closed its sink.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_server.next().await
    }

    /// Next data message written by the server, skipping control frames.
    pub async fn recv_message(&mut self) -> Option<Bytes> {
        while let Some(frame) = self.recv().await {
            if let Frame::Message(payload) = frame {
                return Some(payload);
            }
        }
        None
    }

    /// Stop accepting server writes. Pending writes resume once un-stalled.
    pub fn stall(&self, stalled: bool) {
        self.state.stalled.store(stalled, Ordering::Release);
        if !stalled {
            self.state.unstalled.wake();
        }
    }

    /// How many times the server closed its write half
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::Acquire)
    }

    /// End the server's inbound stream as a vanished peer would.
    pub fn disconnect(&self) {
        self.to_server.close_channel();
    }
}

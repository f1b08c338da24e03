//! Default client: a reader pump and a writer pump around one connection

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::{Client, ClientId, OnMessage};
use crate::error::TransportError;
use crate::hub::{fired, Hub};
use crate::transport::{Connection, Frame, FrameSink, FrameStream};

/// A payload plus the ack the writer pump sends when it takes it
type Outbound = (Bytes, oneshot::Sender<()>);

pub struct Socket {
    id: ClientId,
    hub: Hub,
    on_message: OnMessage,
    /// Present until `listen` hands it to the pumps
    connection: Mutex<Option<Connection>>,
    outbound_tx: mpsc::Sender<Outbound>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
    /// One-shot close signal; flips to true exactly once
    closed: watch::Sender<bool>,
    /// Flips once the sink is closed, by `close` or by the writer pump
    transport_closed: watch::Sender<bool>,
    closing: AtomicBool,
}

impl Socket {
    pub fn new(hub: &Hub, connection: Connection, on_message: OnMessage) -> Arc<Self> {
        Self::with_id(ClientId::new(), hub, connection, on_message)
    }

    /// Create a socket with a caller-chosen id, so callbacks built before the
    /// socket exists can refer to it.
    pub fn with_id(
        id: ClientId,
        hub: &Hub,
        connection: Connection,
        on_message: OnMessage,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(1);
        let (closed, _) = watch::channel(false);
        let (transport_closed, _) = watch::channel(false);

        Arc::new(Self {
            id,
            hub: hub.clone(),
            on_message,
            connection: Mutex::new(Some(connection)),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            closed,
            transport_closed,
            closing: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn read_pump(&self, mut stream: FrameStream) {
        let mut closed = self.closed.subscribe();
        let read_limit = self.hub.read_limit();
        let mut deadline = self.hub.read_deadline();

        loop {
            let next = tokio::select! {
                _ = fired(&mut closed) => break,
                next = timeout_at(deadline, stream.next()) => next,
            };

            match next {
                Err(_) => {
                    warn!(client = %self.id, "No pong within pong wait, dropping client");
                    break;
                }
                Ok(None) => {
                    debug!(client = %self.id, "Peer ended the stream");
                    break;
                }
                Ok(Some(Err(e))) => {
                    if e.is_expected_closure() {
                        debug!(client = %self.id, "Connection closed");
                    } else {
                        warn!(client = %self.id, error = %e, "Read failed");
                    }
                    break;
                }
                Ok(Some(Ok(Frame::Message(payload)))) => {
                    if payload.len() > read_limit {
                        let e = TransportError::MessageTooLarge {
                            size: payload.len(),
                            limit: read_limit,
                        };
                        warn!(client = %self.id, error = %e, "Read failed");
                        break;
                    }
                    (self.on_message)(payload).await;
                }
                Ok(Some(Ok(Frame::Pong(_)))) => {
                    deadline = self.hub.read_deadline();
                }
                // the transport answers pings on its own
                Ok(Some(Ok(Frame::Ping(_)))) => {}
                Ok(Some(Ok(Frame::Close(reason)))) => {
                    match reason {
                        Some(r) if !r.is_expected() => {
                            warn!(client = %self.id, code = r.code, reason = %r.reason, "Abnormal closure");
                        }
                        _ => debug!(client = %self.id, "Peer closed the connection"),
                    }
                    break;
                }
            }
        }

        self.close().await;
    }

    async fn write_pump(self: Arc<Self>, mut sink: FrameSink, mut outbound: mpsc::Receiver<Outbound>) {
        let mut closed = self.closed.subscribe();
        let period = self.hub.ping_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let result = tokio::select! {
                _ = fired(&mut closed) => break,
                _ = ticker.tick() => {
                    self.send_frame(&mut sink, Frame::Ping(Bytes::new()), &mut closed).await
                }
                Some((payload, ack)) = outbound.recv() => {
                    let _ = ack.send(());
                    self.send_frame(&mut sink, Frame::Message(payload), &mut closed).await
                }
            };

            if let Err(e) = result {
                if e.is_expected_closure() {
                    debug!(client = %self.id, "Write abandoned, client closing");
                } else {
                    warn!(client = %self.id, error = %e, "Write failed");
                }
                break;
            }
        }

        // Payloads still queued are never taken; their writers see the close signal.
        drop(outbound);

        match timeout_at(self.hub.write_deadline(), sink.close()).await {
            Ok(Ok(())) => trace!(client = %self.id, "Transport closed"),
            Ok(Err(e)) => debug!(client = %self.id, error = %e, "Error closing transport"),
            Err(_) => debug!(client = %self.id, "Timed out closing transport"),
        }
        self.transport_closed.send_replace(true);

        self.close().await;
    }

    /// Send one frame under the write deadline, abandoning it if the client closes.
    async fn send_frame(
        &self,
        sink: &mut FrameSink,
        frame: Frame,
        closed: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        tokio::select! {
            biased;
            _ = fired(closed) => Err(TransportError::ConnectionClosed),
            sent = timeout_at(self.hub.write_deadline(), sink.send(frame)) => {
                sent.map_err(|_| TransportError::Timeout)?
            }
        }
    }
}

#[async_trait]
impl Client for Socket {
    fn id(&self) -> ClientId {
        self.id
    }

    async fn write(&self, payload: Bytes) {
        if self.is_closed() {
            trace!(client = %self.id, "Dropping write to closed client");
            return;
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        let handoff = async {
            if self.outbound_tx.send((payload, ack_tx)).await.is_ok() {
                // Err means the writer stopped before taking it.
                let _ = ack_rx.await;
            }
        };

        let mut closed = self.closed.subscribe();
        tokio::select! {
            biased;
            _ = fired(&mut closed) => {
                trace!(client = %self.id, "Client closed while writing");
            }
            _ = handoff => {}
        }
    }

    async fn listen(self: Arc<Self>) {
        let connection = self.connection.lock().take();
        let outbound = self.outbound_rx.lock().take();

        let (Some(connection), Some(outbound)) = (connection, outbound) else {
            debug!(client = %self.id, "Client already listening or closed");
            return;
        };

        let (sink, stream) = connection.into_parts();
        let writer = tokio::spawn(Arc::clone(&self).write_pump(sink, outbound));

        self.read_pump(stream).await;

        if let Err(e) = writer.await {
            warn!(client = %self.id, error = %e, "Writer pump failed");
        }
    }

    /// Close the transport, fire the close signal and deregister, in that
    /// order. Returns once all three are done.
    async fn close(&self) {
        if self
            .closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        // Not listening yet: nobody else owns the transport.
        let idle = self.connection.lock().take();
        if let Some(connection) = idle {
            if timeout_at(self.hub.write_deadline(), connection.close())
                .await
                .is_err()
            {
                debug!(client = %self.id, "Timed out closing transport");
            }
            self.transport_closed.send_replace(true);
        }

        self.closed.send_replace(true);

        // Listening: the writer pump owns the sink and closes it on the signal.
        let mut transport_closed = self.transport_closed.subscribe();
        if timeout_at(self.hub.write_deadline(), fired(&mut transport_closed))
            .await
            .is_err()
        {
            debug!(client = %self.id, "Timed out waiting for writer to close transport");
        }

        self.hub.remove(self.id).await;

        debug!(client = %self.id, "Client closed");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

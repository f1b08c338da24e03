//! Clients: one per live connection
//!
//! The hub treats clients polymorphically through the [`Client`] trait and
//! keys its registry on [`ClientId`], never on the concrete type. Custom
//! client types usually wrap a [`Socket`] and add identity fields of their own.

mod socket;

pub use socket::Socket;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hub::Hub;
use crate::transport::{Connection, RequestMeta};

/// Opaque, stable identity of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Capabilities the hub needs from a connection
#[async_trait]
pub trait Client: Send + Sync + 'static {
    fn id(&self) -> ClientId;

    /// Hand a payload to the writer. Waits while the writer is busy and
    /// returns immediately, dropping the payload, once the client is closed.
    async fn write(&self, payload: Bytes);

    /// Run the client's pumps until it closes. Called once by the hub.
    async fn listen(self: Arc<Self>);

    /// Close the transport, wake every waiter and deregister from the hub.
    /// Only the first call has any effect.
    async fn close(&self);

    /// Access to the concrete type, for predicates over custom clients.
    fn as_any(&self) -> &dyn Any;
}

/// Callback invoked for every inbound message
pub type OnMessage = Arc<dyn Fn(Bytes) -> BoxFuture<'static, ()> + Send + Sync>;

/// Builds the client for a freshly upgraded connection
pub type ClientFactory =
    Arc<dyn Fn(&Hub, Connection, &RequestMeta) -> Arc<dyn Client> + Send + Sync>;

/// Box an async closure into an [`OnMessage`] callback.
pub fn on_message<F, Fut>(f: F) -> OnMessage
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| -> BoxFuture<'static, ()> { Box::pin(f(payload)) })
}

/// Factory used when none is given: every inbound message is rebroadcast to
/// all registered clients, the sender included.
pub fn default_factory() -> ClientFactory {
    Arc::new(|hub: &Hub, connection: Connection, _meta: &RequestMeta| {
        let broadcaster = hub.clone();
        let callback = on_message(move |payload| {
            let hub = broadcaster.clone();
            async move { hub.broadcast(payload).await }
        });

        Socket::new(hub, connection, callback) as Arc<dyn Client>
    })
}

/// Factory whose clients rebroadcast inbound messages to everyone except the sender.
pub fn broadcast_to_others_factory() -> ClientFactory {
    Arc::new(|hub: &Hub, connection: Connection, _meta: &RequestMeta| {
        let id = ClientId::new();
        let broadcaster = hub.clone();
        let callback = on_message(move |payload| {
            let hub = broadcaster.clone();
            async move {
                hub.broadcast_to(payload, move |client| client.id() != id)
                    .await
            }
        });

        Socket::with_id(id, hub, connection, callback) as Arc<dyn Client>
    })
}

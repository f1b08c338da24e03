//! The hub: registry of live clients
//!
//! Every registry mutation goes through one command queue drained by a
//! single consumer task, so mutations are totally ordered and nothing is
//! ever locked. Shutdown is a terminal command; anything queued behind it is
//! discarded, not executed.

mod registry;
mod settings;

pub use registry::Connections;
pub use settings::{HubSettings, MAX_WAIT, MIN_PING_INTERVAL};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use crate::client::{default_factory, Client, ClientFactory, ClientId};
use crate::config::HubConfig;
use crate::error::{HubError, Result, TransportError};
use crate::transport::{Connection, RequestMeta, Upgrade, Upgraded};

/// A registry operation, run by the hub's consumer
pub type Op = Box<dyn for<'a> FnOnce(&'a mut Connections) -> BoxFuture<'a, ()> + Send>;

enum Command {
    Run(Op),
    Shutdown,
}

struct Lifecycle {
    /// Set once the consumer has taken the shutdown command
    initiated: watch::Sender<bool>,
    /// Set once every client is closed and its pumps have stopped
    complete: watch::Sender<bool>,
}

struct HubInner {
    settings: HubSettings,
    factory: ClientFactory,
    commands: mpsc::Sender<Command>,
    /// Taken by whichever call starts the consumer
    consumer: Mutex<Option<mpsc::Receiver<Command>>>,
    lifecycle: Arc<Lifecycle>,
}

/// Cheaply cloneable handle to a hub
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

/// Wait until a one-shot signal fires (or its sender is gone).
pub(crate) async fn fired(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|set| *set).await;
}

impl Hub {
    /// Create a hub. Without a factory, clients rebroadcast every inbound
    /// message to all connected clients.
    pub fn new(config: HubConfig, factory: Option<ClientFactory>) -> Self {
        let (commands, consumer) = mpsc::channel(config.command_queue.max(1));
        let (initiated, _) = watch::channel(false);
        let (complete, _) = watch::channel(false);

        Self {
            inner: Arc::new(HubInner {
                settings: HubSettings::new(&config),
                factory: factory.unwrap_or_else(default_factory),
                commands,
                consumer: Mutex::new(Some(consumer)),
                lifecycle: Arc::new(Lifecycle {
                    initiated,
                    complete,
                }),
            }),
        }
    }

    pub fn settings(&self) -> &HubSettings {
        &self.inner.settings
    }

    /// Set the pong wait; the ping interval becomes nine tenths of it.
    pub fn set_pong_wait(&self, d: Duration) {
        self.inner.settings.set_pong_wait(d);
    }

    pub fn set_write_wait(&self, d: Duration) {
        self.inner.settings.set_write_wait(d);
    }

    pub fn set_read_limit(&self, size: usize) {
        self.inner.settings.set_read_limit(size);
    }

    pub fn write_deadline(&self) -> Instant {
        self.inner.settings.write_deadline()
    }

    pub fn read_deadline(&self) -> Instant {
        self.inner.settings.read_deadline()
    }

    pub fn ping_interval(&self) -> Duration {
        self.inner.settings.ping_interval()
    }

    pub fn read_limit(&self) -> usize {
        self.inner.settings.read_limit()
    }

    /// Whether shutdown has begun. New connections are refused from then on.
    pub fn is_shutting_down(&self) -> bool {
        *self.inner.lifecycle.initiated.borrow()
    }

    /// Upgrade an inbound request and register a client for it.
    ///
    /// Handshake errors, including a handshake outlasting the write deadline,
    /// come back as [`HubError::UpgradeFailed`] and are not retried. Fails with [`HubError::HubClosed`] once shutdown has begun,
    /// including when shutdown overtakes the registration.
    pub async fn accept<U: Upgrade>(&self, upgrade: U) -> Result<ClientId> {
        if self.is_shutting_down() {
            return Err(HubError::HubClosed);
        }
        self.ensure_started();

        // A peer that never completes the handshake is dropped at the write deadline.
        let Upgraded { connection, meta } =
            timeout_at(self.write_deadline(), upgrade.upgrade(self.read_limit()))
                .await
                .unwrap_or(Err(TransportError::Timeout))
                .map_err(|e| {
                    warn!(error = %e, "WebSocket upgrade failed");
                    HubError::UpgradeFailed(e)
                })?;

        self.register(connection, meta).await
    }

    async fn register(&self, connection: Connection, meta: RequestMeta) -> Result<ClientId> {
        let (registered_tx, registered_rx) = oneshot::channel();
        let hub = self.clone();

        self.execute(move |conns| {
            let client = (hub.inner.factory)(&hub, connection, &meta);
            let id = client.id();
            let pumps = tokio::spawn(Arc::clone(&client).listen());

            if conns.insert(client, pumps).is_some() {
                warn!(client = %id, "Client id registered twice, previous entry detached");
            }
            info!(client = %id, peer = ?meta.remote_addr, path = %meta.path, "Client registered");

            let _ = registered_tx.send(id);
            Box::pin(async {})
        })
        .await;

        registered_rx.await.map_err(|_| HubError::HubClosed)
    }

    /// Deliver `payload` to every client registered when the command runs.
    pub async fn broadcast(&self, payload: Bytes) {
        self.execute(move |conns| {
            Box::pin(async move {
                trace!(recipients = conns.len(), "Broadcasting message");
                join_all(conns.clients().map(|client| client.write(payload.clone()))).await;
            })
        })
        .await;
    }

    /// Deliver `payload` to the registered clients for which `predicate` holds
    /// when the command runs.
    pub async fn broadcast_to<P>(&self, payload: Bytes, predicate: P)
    where
        P: Fn(&dyn Client) -> bool + Send + Sync + 'static,
    {
        self.execute(move |conns| {
            Box::pin(async move {
                let writes: Vec<_> = conns
                    .clients()
                    .filter(|client| predicate(client.as_ref()))
                    .map(|client| client.write(payload.clone()))
                    .collect();
                trace!(recipients = writes.len(), "Broadcasting message to subset");
                join_all(writes).await;
            })
        })
        .await;
    }

    /// Deregister a client. Its transport stays open; call
    /// [`Client::close`] as well to end the connection.
    pub async fn remove(&self, id: ClientId) {
        self.execute(move |conns| {
            Box::pin(async move {
                if conns.remove(&id).is_some() {
                    debug!(client = %id, "Client removed");
                }
            })
        })
        .await;
    }

    /// Run `op` against the registry, ordered with every other registry
    /// operation. Returns once the command is queued.
    ///
    /// After shutdown has begun the op is dropped without running. An op must
    /// not await [`Client::close`] on a registered client: closing submits a
    /// removal to this same queue. Take the client out of the map and close
    /// it from a separate task instead.
    pub async fn execute<F>(&self, op: F)
    where
        F: for<'a> FnOnce(&'a mut Connections) -> BoxFuture<'a, ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            trace!("Hub shutting down, dropping command");
            return;
        }
        self.ensure_started();

        if self
            .inner
            .commands
            .send(Command::Run(Box::new(op)))
            .await
            .is_err()
        {
            trace!("Hub stopped, dropping command");
        }
    }

    /// Read the registry in order with every other registry operation.
    pub async fn inspect<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connections) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        self.execute(move |conns| {
            let _ = tx.send(f(conns));
            Box::pin(async {})
        })
        .await;

        rx.await.map_err(|_| HubError::HubClosed)
    }

    /// Number of registered clients; zero once the hub is shut down.
    pub async fn len(&self) -> usize {
        self.inspect(|conns| conns.len()).await.unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Finish every operation queued before this call, close all registered
    /// clients, wait for their pumps and stop the hub.
    ///
    /// Safe to call repeatedly and concurrently; every call returns once the
    /// hub has fully stopped.
    pub async fn shutdown(&self) {
        self.ensure_started();
        let mut complete = self.inner.lifecycle.complete.subscribe();

        if !self.is_shutting_down() {
            // Fails only if the consumer already stopped, which also ends in `complete`.
            let _ = self.inner.commands.send(Command::Shutdown).await;
        }

        fired(&mut complete).await;
    }

    /// Start the consumer on first use, exactly once.
    fn ensure_started(&self) {
        let pending = self.inner.consumer.lock().take();
        if let Some(commands) = pending {
            tokio::spawn(consume(commands, Arc::clone(&self.inner.lifecycle)));
        }
    }
}

/// The only code that ever touches the registry mutably.
async fn consume(mut commands: mpsc::Receiver<Command>, lifecycle: Arc<Lifecycle>) {
    let mut conns = Connections::new();
    debug!("Hub consumer started");

    loop {
        match commands.recv().await {
            Some(Command::Run(op)) => op(&mut conns).await,
            Some(Command::Shutdown) => {
                info!(clients = conns.len(), "Hub shutting down");
                break;
            }
            None => {
                debug!("Every hub handle dropped, stopping consumer");
                break;
            }
        }
    }

    lifecycle.initiated.send_replace(true);

    // Release blocked submitters, then discard what is still queued.
    commands.close();
    let mut discarded = 0usize;
    while commands.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!(discarded, "Discarded commands queued behind shutdown");
    }

    let registered = conns.drain();
    let closed = registered.len();
    let mut pumps = Vec::with_capacity(closed);
    let mut clients = Vec::with_capacity(closed);
    for (client, handle) in registered {
        clients.push(client);
        pumps.extend(handle);
    }

    // Removals these closes submit are dropped: shutdown has been initiated.
    join_all(clients.iter().map(|client| client.close())).await;

    for result in join_all(pumps).await {
        if let Err(e) = result {
            warn!(error = %e, "Client task failed during shutdown");
        }
    }

    lifecycle.complete.send_replace(true);
    info!(clients = closed, "Hub stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{broadcast_to_others_factory, on_message, Socket};
    use crate::transport::memory::{self, Peer};
    use std::any::Any;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use tokio::time::timeout;

    fn test_config() -> HubConfig {
        HubConfig {
            write_wait: Duration::from_secs(1),
            pong_wait: Duration::from_secs(10),
            read_limit: 1024,
            command_queue: 8,
        }
    }

    async fn connect(hub: &Hub) -> (ClientId, Peer) {
        connect_with(hub, RequestMeta::default()).await
    }

    async fn connect_with(hub: &Hub, meta: RequestMeta) -> (ClientId, Peer) {
        let (conn, peer) = memory::pair();
        let id = hub.accept(Upgraded::new(conn, meta)).await.unwrap();
        (id, peer)
    }

    async fn registered_ids(hub: &Hub) -> HashSet<ClientId> {
        hub.inspect(|conns| conns.ids().collect()).await.unwrap()
    }

    /// Socket that counts inbound messages instead of rebroadcasting them.
    fn silent_factory(received: Arc<AtomicUsize>) -> ClientFactory {
        Arc::new(move |hub: &Hub, conn: Connection, _meta: &RequestMeta| {
            let received = Arc::clone(&received);
            Socket::new(
                hub,
                conn,
                on_message(move |_| {
                    received.fetch_add(1, Ordering::SeqCst);
                    async {}
                }),
            ) as Arc<dyn Client>
        })
    }

    struct FailingUpgrade;

    #[async_trait]
    impl Upgrade for FailingUpgrade {
        async fn upgrade(self, _read_limit: usize) -> std::result::Result<Upgraded, TransportError> {
            Err(TransportError::Handshake("missing Sec-WebSocket-Key".into()))
        }
    }

    /// A peer that connects and never sends its handshake.
    struct SilentUpgrade;

    #[async_trait]
    impl Upgrade for SilentUpgrade {
        async fn upgrade(self, _read_limit: usize) -> std::result::Result<Upgraded, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_default_factory_echoes_to_sender() {
        let hub = Hub::new(test_config(), None);
        let (_, mut peer) = connect(&hub).await;

        peer.send_message("Test Message\n");

        let echoed = timeout(Duration::from_secs(1), peer.recv_message()).await.unwrap();
        assert_eq!(echoed, Some(Bytes::from_static(b"Test Message\n")));

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_to_others_skips_sender() {
        let hub = Hub::new(test_config(), Some(broadcast_to_others_factory()));
        let (_, mut a) = connect(&hub).await;
        let (_, mut b) = connect(&hub).await;

        a.send_message("hello");

        let got = timeout(Duration::from_secs(1), b.recv_message()).await.unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"hello")));
        assert!(timeout(Duration::from_millis(200), a.recv_message()).await.is_err());

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_registered_clients_only() {
        let hub = Hub::new(test_config(), Some(silent_factory(Arc::default())));
        let (_, mut a) = connect(&hub).await;
        let (b_id, mut b) = connect(&hub).await;

        hub.remove(b_id).await;
        hub.broadcast(Bytes::from("news")).await;

        let got = timeout(Duration::from_secs(1), a.recv_message()).await.unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"news")));
        assert!(timeout(Duration::from_millis(200), b.recv_message()).await.is_err());

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_to_filters_with_predicate() {
        let hub = Hub::new(test_config(), Some(silent_factory(Arc::default())));
        let (a_id, mut a) = connect(&hub).await;
        let (_, mut b) = connect(&hub).await;

        hub.broadcast_to(Bytes::from("only a"), move |client| client.id() == a_id)
            .await;

        let got = timeout(Duration::from_secs(1), a.recv_message()).await.unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"only a")));
        assert!(timeout(Duration::from_millis(200), b.recv_message()).await.is_err());

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_does_not_close_transport() {
        let hub = Hub::new(test_config(), Some(silent_factory(Arc::default())));
        let (id, peer) = connect(&hub).await;

        hub.remove(id).await;

        assert!(registered_ids(&hub).await.is_empty());
        assert_eq!(peer.close_count(), 0);
        assert!(peer.send_message("still open"));

        hub.shutdown().await;
        // removed clients are not the hub's to close
        assert_eq!(peer.close_count(), 0);
    }

    #[tokio::test]
    async fn test_client_close_deregisters() {
        let hub = Hub::new(test_config(), Some(silent_factory(Arc::default())));
        let (id, mut peer) = connect(&hub).await;
        let (other, _other_peer) = connect(&hub).await;

        let client = hub
            .inspect(move |conns| conns.get(&id).cloned())
            .await
            .unwrap()
            .expect("client registered");
        client.close().await;
        client.close().await;

        assert_eq!(peer.close_count(), 1);
        assert_eq!(peer.recv().await, None);
        assert_eq!(registered_ids(&hub).await, HashSet::from([other]));

        hub.shutdown().await;
    }

    /// Read whatever a peer has been sent, without waiting for a close.
    async fn received(peer: &mut Peer) -> Vec<Bytes> {
        let mut got = Vec::new();
        while let Ok(Some(payload)) = timeout(Duration::from_millis(100), peer.recv_message()).await {
            got.push(payload);
        }
        got
    }

    #[tokio::test]
    async fn test_operations_apply_in_submission_order() {
        let hub = Hub::new(test_config(), Some(silent_factory(Arc::default())));

        // each task: accept a and b, remove b, broadcast, accept c, remove a
        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let hub = hub.clone();
                tokio::spawn(async move {
                    let (a_id, a) = connect(&hub).await;
                    let (b_id, b) = connect(&hub).await;
                    hub.remove(b_id).await;
                    hub.broadcast(Bytes::from(format!("m{i}"))).await;
                    let (c_id, c) = connect(&hub).await;
                    hub.remove(a_id).await;
                    (format!("m{i}"), [(a_id, a), (b_id, b), (c_id, c)])
                })
            })
            .collect();

        let mut runs = Vec::new();
        for task in tasks {
            runs.push(task.await.unwrap());
        }

        let expected: HashSet<ClientId> = runs.iter().map(|(_, [_, _, (c_id, _)])| *c_id).collect();
        assert_eq!(registered_ids(&hub).await, expected);

        for (message, [(_, a), (_, b), (_, c)]) in &mut runs {
            let message = Bytes::from(message.clone());
            // registered before the broadcast and removed after it
            assert!(received(a).await.contains(&message));
            // removed before it, or registered after it
            assert!(!received(b).await.contains(&message));
            assert!(!received(c).await.contains(&message));
        }

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_close_deregisters_once() {
        let hub = Hub::new(test_config(), Some(silent_factory(Arc::default())));
        let (id, peer) = connect(&hub).await;
        let client = hub
            .inspect(move |conns| conns.get(&id).cloned())
            .await
            .unwrap()
            .expect("client registered");

        // hold the consumer so every removal the closes submit stays queued
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        hub.execute(move |_| {
            Box::pin(async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
            })
        })
        .await;
        started_rx.await.unwrap();
        let idle = hub.inner.commands.capacity();

        let closers: Vec<_> = (0..16)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.close().await })
            })
            .collect();
        for closer in closers {
            closer.await.unwrap();
        }

        assert_eq!(idle - hub.inner.commands.capacity(), 1);
        assert_eq!(peer.close_count(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(hub.len().await, 0);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_serializes_mutations() {
        let hub = Hub::new(test_config(), None);
        let counter = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let hub = hub.clone();
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    hub.execute(move |_conns| {
                        Box::pin(async move {
                            // a non-atomic read-modify-write is safe inside the consumer
                            let seen = counter.load(Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            counter.store(seen + 1, Ordering::SeqCst);
                        })
                    })
                    .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        // a read queued last observes every earlier op
        let observed = {
            let counter = Arc::clone(&counter);
            hub.inspect(move |_| counter.load(Ordering::SeqCst)).await.unwrap()
        };
        assert_eq!(observed, 50);

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let hub = Hub::new(test_config(), Some(silent_factory(Arc::default())));
        let mut peers = Vec::new();
        for _ in 0..3 {
            peers.push(connect(&hub).await.1);
        }

        timeout(Duration::from_secs(2), hub.shutdown()).await.unwrap();

        assert!(hub.is_shutting_down());
        assert_eq!(hub.len().await, 0);
        for peer in &mut peers {
            assert_eq!(peer.close_count(), 1);
            assert_eq!(peer.recv_message().await, None);
        }
    }

    #[tokio::test]
    async fn test_shutdown_completes_queued_work_first() {
        let hub = Hub::new(test_config(), Some(silent_factory(Arc::default())));
        let _peer = connect(&hub).await;

        let seen = Arc::new(AtomicUsize::new(0));
        let record = Arc::clone(&seen);
        hub.execute(move |conns| {
            record.store(conns.len(), Ordering::SeqCst);
            Box::pin(async {})
        })
        .await;
        hub.shutdown().await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accept_after_shutdown_is_rejected() {
        let hub = Hub::new(test_config(), None);
        hub.shutdown().await;

        let (conn, peer) = memory::pair();
        let err = hub.accept(Upgraded::new(conn, RequestMeta::default())).await;

        assert!(matches!(err, Err(HubError::HubClosed)));
        assert!(matches!(hub.inspect(|c| c.len()).await, Err(HubError::HubClosed)));
        assert_eq!(peer.close_count(), 0);
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_are_dropped() {
        let hub = Hub::new(test_config(), None);
        hub.shutdown().await;

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        timeout(
            Duration::from_millis(200),
            hub.execute(move |_| {
                flag.fetch_add(1, Ordering::SeqCst);
                Box::pin(async {})
            }),
        )
        .await
        .unwrap();
        timeout(Duration::from_millis(200), hub.broadcast(Bytes::from("x")))
            .await
            .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_shutdown_calls_all_return() {
        let hub = Hub::new(test_config(), None);
        let _peer = connect(&hub).await;

        let calls: Vec<_> = (0..4)
            .map(|_| {
                let hub = hub.clone();
                tokio::spawn(async move { hub.shutdown().await })
            })
            .collect();
        for call in calls {
            timeout(Duration::from_secs(2), call).await.unwrap().unwrap();
        }
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_upgrade_failure_is_propagated() {
        let hub = Hub::new(test_config(), None);

        let err = hub.accept(FailingUpgrade).await.unwrap_err();

        assert!(matches!(
            err,
            HubError::UpgradeFailed(TransportError::Handshake(_))
        ));
        assert_eq!(hub.len().await, 0);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_stuck_handshake_hits_write_deadline() {
        let hub = Hub::new(test_config(), None);
        hub.set_write_wait(Duration::from_millis(100));

        let err = timeout(Duration::from_secs(1), hub.accept(SilentUpgrade))
            .await
            .expect("accept bounded by the write deadline");

        assert!(matches!(
            err,
            Err(HubError::UpgradeFailed(TransportError::Timeout))
        ));
        assert_eq!(hub.len().await, 0);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_unresponsive_client_removed_automatically() {
        let hub = Hub::new(test_config(), Some(silent_factory(Arc::default())));
        hub.set_pong_wait(Duration::from_millis(200));

        let (_, silent) = connect(&hub).await;
        assert_eq!(hub.len().await, 1);

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(hub.len().await, 0);
        assert_eq!(silent.close_count(), 1);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_settings_are_runtime_adjustable() {
        let hub = Hub::new(test_config(), None);

        hub.set_pong_wait(Duration::from_secs(20));
        hub.set_write_wait(Duration::from_secs(2));
        hub.set_read_limit(2048);

        assert_eq!(hub.ping_interval(), Duration::from_secs(18));
        assert_eq!(hub.settings().write_wait(), Duration::from_secs(2));
        assert_eq!(hub.read_limit(), 2048);
        assert!(hub.read_deadline() > hub.write_deadline());
    }

    /// A user-defined client carrying extra identity, as custom factories build them.
    struct Tagged {
        inner: Arc<Socket>,
        room: String,
    }

    #[async_trait]
    impl Client for Tagged {
        fn id(&self) -> ClientId {
            self.inner.id()
        }

        async fn write(&self, payload: Bytes) {
            self.inner.write(payload).await
        }

        async fn listen(self: Arc<Self>) {
            Arc::clone(&self.inner).listen().await
        }

        async fn close(&self) {
            self.inner.close().await
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn test_custom_clients_are_filtered_by_their_fields() {
        let factory: ClientFactory =
            Arc::new(|hub: &Hub, conn: Connection, meta: &RequestMeta| {
                let inner = Socket::new(hub, conn, on_message(|_| async {}));
                let room = meta.query_param("room").unwrap_or("lobby").to_string();
                Arc::new(Tagged { inner, room }) as Arc<dyn Client>
            });
        let hub = Hub::new(test_config(), Some(factory));

        let (_, mut red) =
            connect_with(&hub, RequestMeta::from_target("/ws?room=red", None)).await;
        let (blue_id, mut blue) =
            connect_with(&hub, RequestMeta::from_target("/ws?room=blue", None)).await;

        hub.broadcast_to(Bytes::from("red only"), |client| {
            client
                .as_any()
                .downcast_ref::<Tagged>()
                .is_some_and(|tagged| tagged.room == "red")
        })
        .await;

        let got = timeout(Duration::from_secs(1), red.recv_message()).await.unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"red only")));
        assert!(timeout(Duration::from_millis(200), blue.recv_message()).await.is_err());

        // the wrapper deregisters through the inner socket's id
        let blue_client = hub
            .inspect(move |conns| conns.get(&blue_id).cloned())
            .await
            .unwrap()
            .expect("blue registered");
        blue_client.close().await;
        assert_eq!(hub.len().await, 1);

        hub.shutdown().await;
    }
}

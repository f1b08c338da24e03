use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::client::{Client, ClientId};

struct Registration {
    client: Arc<dyn Client>,
    /// Task running the client's pumps; detached when the client is removed.
    pumps: Option<JoinHandle<()>>,
}

/// The live clients of a hub.
///
/// Only the hub's command consumer ever holds this mutably; everyone else
/// reaches it through [`Hub::execute`](super::Hub::execute).
#[derive(Default)]
pub struct Connections {
    entries: HashMap<ClientId, Registration>,
}

impl Connections {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a client. Returns the client previously registered under the same id.
    pub(crate) fn insert(
        &mut self,
        client: Arc<dyn Client>,
        pumps: JoinHandle<()>,
    ) -> Option<Arc<dyn Client>> {
        self.entries
            .insert(
                client.id(),
                Registration {
                    client,
                    pumps: Some(pumps),
                },
            )
            .map(|previous| previous.client)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &ClientId) -> Option<&Arc<dyn Client>> {
        self.entries.get(id).map(|entry| &entry.client)
    }

    pub fn ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.entries.keys().copied()
    }

    pub fn clients(&self) -> impl Iterator<Item = &Arc<dyn Client>> {
        self.entries.values().map(|entry| &entry.client)
    }

    /// Deregister a client without closing it.
    pub fn remove(&mut self, id: &ClientId) -> Option<Arc<dyn Client>> {
        self.entries.remove(id).map(|entry| entry.client)
    }

    /// Keep only the clients for which `keep` returns true; the others are
    /// deregistered without being closed.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Arc<dyn Client>) -> bool,
    {
        self.entries.retain(|_, entry| keep(&entry.client));
    }

    /// Empty the registry, handing back every client with its pump task.
    pub(crate) fn drain(&mut self) -> Vec<(Arc<dyn Client>, Option<JoinHandle<()>>)> {
        self.entries
            .drain()
            .map(|(_, entry)| (entry.client, entry.pumps))
            .collect()
    }
}

//! Client registry
//!
//! The set of currently open connections. Fan-out never iterates the live
//! map: it takes a [`ClientRegistry::snapshot`] and works on that, so
//! clients may connect and disconnect while a broadcast is in flight.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::client::{Client, ClientId};

#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, Arc<Client>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. Returns `false` if the ID was already present, in
    /// which case the registry is unchanged.
    pub fn add(&self, client: Arc<Client>) -> bool {
        let mut clients = self.clients.write();
        if clients.contains_key(&client.id) {
            return false;
        }
        clients.insert(client.id.clone(), client);
        true
    }

    /// Deregister a client. Removing an absent ID is a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.write().remove(id)
    }

    /// Point-in-time copy of the members
    pub fn snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.len())
            .finish()
    }
}

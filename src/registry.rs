use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::endpoint_key::EndpointKey;

/// The node's neighbours: every connection that completed establishment and was not torn down
///  yet, by peer.
///
/// NB: The registry is owned by the node driver and never shared, so it needs no locking.
#[derive(Default)]
pub struct Registry {
    connections: FxHashMap<EndpointKey, ConnectionHandle>,
}

impl Registry {
    pub fn contains(&self, key: &EndpointKey) -> bool {
        self.connections.contains_key(key)
    }

    pub fn get(&self, key: &EndpointKey) -> Option<&ConnectionHandle> {
        self.connections.get(key)
    }

    /// Keys are unique: if there is a connection for the handle's key already, the handle is
    ///  returned and the registry is left unchanged
    pub fn insert(&mut self, handle: ConnectionHandle) -> Result<(), ConnectionHandle> {
        match self.connections.entry(handle.key()) {
            Entry::Occupied(_) => Err(handle),
            Entry::Vacant(e) => {
                e.insert(handle);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, key: &EndpointKey) -> Option<ConnectionHandle> {
        self.connections.remove(key)
    }

    /// Removes the connection only if it is the one with the given id: a notification from a
    ///  connection that was replaced in the meantime must not remove its successor
    pub fn remove_connection(&mut self, key: &EndpointKey, id: ConnectionId) -> Option<ConnectionHandle> {
        match self.connections.entry(*key) {
            Entry::Occupied(e) if e.get().id() == id => Some(e.remove()),
            _ => None,
        }
    }

    pub fn keys(&self) -> Vec<EndpointKey> {
        self.connections.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn drain(&mut self) -> Vec<ConnectionHandle> {
        self.connections.drain()
            .map(|(_, handle)| handle)
            .collect()
    }
}

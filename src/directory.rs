//! Address book of directly connected peers.
//!
//! The address book is the concrete [`NetworkDirectory`] used by
//! [`crate::node::DiagNode`]. It maps peer identities to socket addresses and
//! keeps the most recent round-trip time the transport measured for each
//! one. It supports peer enumeration.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::identity::Identity;
use crate::protocols::{NetworkDirectory, PeerEnumeration, PeerHandle};

/// Maximum number of peers tracked.
pub const MAX_PEERS: usize = 1000;

#[derive(Clone, Copy, Debug)]
struct PeerEntry {
    addr: SocketAddr,
    latency: Duration,
}

/// Shared peer table (cheap to clone; clones share state).
#[derive(Clone)]
pub struct AddressBook {
    identity: Identity,
    /// Insertion order, so fan-out walks peers in the order they were added.
    order: Arc<RwLock<Vec<Identity>>>,
    peers: Arc<RwLock<HashMap<Identity, PeerEntry>>>,
}

impl AddressBook {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            order: Arc::new(RwLock::new(Vec::new())),
            peers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add or re-address a peer. Returns false if the table is full or the
    /// peer is this node.
    pub fn add_peer(&self, id: Identity, addr: SocketAddr) -> bool {
        if id == self.identity {
            return false;
        }
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(&id) {
            entry.addr = addr;
            return true;
        }
        if peers.len() >= MAX_PEERS {
            debug!(peer = %id.short(), max = MAX_PEERS, "address book full, ignoring peer");
            return false;
        }
        peers.insert(id, PeerEntry { addr, latency: Duration::ZERO });
        self.order.write().unwrap_or_else(|e| e.into_inner()).push(id);
        true
    }

    pub fn remove_peer(&self, id: &Identity) -> bool {
        let removed = self
            .peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some();
        if removed {
            self.order
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|p| p != id);
        }
        removed
    }

    pub fn addr_of(&self, id: &Identity) -> Option<SocketAddr> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|e| e.addr)
    }

    /// Record a measured round-trip time for a known peer.
    pub fn record_latency(&self, id: &Identity, rtt: Duration) {
        if let Some(entry) = self
            .peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(id)
        {
            entry.latency = rtt;
        }
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PeerEnumeration for AddressBook {
    fn connected_peers(&self) -> Vec<PeerHandle> {
        let order = self.order.read().unwrap_or_else(|e| e.into_inner());
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        order
            .iter()
            .filter_map(|id| peers.get(id).map(|e| PeerHandle::new(*id, e.latency)))
            .collect()
    }
}

impl NetworkDirectory for AddressBook {
    fn self_identity(&self) -> Identity {
        self.identity
    }

    fn peer_enumeration(&self) -> Option<&dyn PeerEnumeration> {
        Some(self)
    }
}

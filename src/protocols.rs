//! Protocol trait definitions for the diagnostics layer.
//!
//! The gather engine talks to its surroundings only through these seams:
//!
//! | Collaborator | Trait | Purpose |
//! |--------------|-------|---------|
//! | Peer directory | [`NetworkDirectory`] | self identity |
//! | Peer listing | [`PeerEnumeration`] | currently connected peers (optional) |
//! | Transport | [`Transport`] | one request/response exchange |
//!
//! ## Design
//!
//! Not every network implementation can list its peers. Enumeration is
//! therefore a separate capability that a directory may or may not expose;
//! without it a node still answers requests, it just has nobody to forward
//! them to.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::identity::Identity;

/// A currently connected peer as seen by the local directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerHandle {
    id: Identity,
    latency: Duration,
}

impl PeerHandle {
    pub fn new(id: Identity, latency: Duration) -> Self {
        Self { id, latency }
    }

    pub fn id(&self) -> Identity {
        self.id
    }

    /// Best-effort measured round-trip latency; zero when unknown.
    pub fn latency(&self) -> Duration {
        self.latency
    }
}

/// Lists the peers this node is connected to right now.
pub trait PeerEnumeration: Send + Sync {
    fn connected_peers(&self) -> Vec<PeerHandle>;
}

/// The local node's view of the network.
pub trait NetworkDirectory: Send + Sync + 'static {
    fn self_identity(&self) -> Identity;

    /// Peer enumeration capability, if this directory supports it.
    fn peer_enumeration(&self) -> Option<&dyn PeerEnumeration> {
        None
    }
}

/// Single request/response exchange with a remote peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send an encoded envelope to `to` and wait for the reply.
    ///
    /// `Ok(None)` means the exchange completed but the peer sent no message.
    /// Callers bound the call with their own deadline.
    async fn send_request(&self, to: &Identity, envelope: Vec<u8>) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send_request(&self, to: &Identity, envelope: Vec<u8>) -> Result<Option<Vec<u8>>> {
        (**self).send_request(to, envelope).await
    }
}

impl<D: NetworkDirectory + ?Sized> NetworkDirectory for std::sync::Arc<D> {
    fn self_identity(&self) -> Identity {
        (**self).self_identity()
    }

    fn peer_enumeration(&self) -> Option<&dyn PeerEnumeration> {
        (**self).peer_enumeration()
    }
}

/// Inbound envelope handed over by the transport layer.
#[derive(Clone, Debug, Default)]
pub struct InboundMessage {
    pub sender: Option<Identity>,
    pub payload: Option<Vec<u8>>,
}

impl InboundMessage {
    pub fn new(sender: Identity, payload: Vec<u8>) -> Self {
        Self {
            sender: Some(sender),
            payload: Some(payload),
        }
    }
}

/// Reply envelope addressed back to the requesting peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: Identity,
    pub payload: Vec<u8>,
}

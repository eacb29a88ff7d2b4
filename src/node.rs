//! # High-Level Node API
//!
//! A [`DiagNode`] is a complete diagnostic participant: a TCP listener that
//! answers relayed requests, an address book of directly connected peers,
//! and a gather engine for starting rounds of its own.
//!
//! ## Quick Start
//!
//! ```ignore
//! let node = DiagNode::bind("0.0.0.0:0").await?;
//! node.add_peer(peer_id, "10.0.0.7:4100".parse()?);
//!
//! for info in node.diagnostic(Duration::from_secs(5)).await? {
//!     println!("{} runs {}", info.id, info.code_version);
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::directory::AddressBook;
use crate::error::GatherError;
use crate::gather::{GatherConfig, GatherEngine};
use crate::identity::Identity;
use crate::protocols::{PeerEnumeration, PeerHandle};
use crate::snapshot::PeerInfo;
use crate::transport::{self, TcpTransport};

pub struct DiagNode {
    identity: Identity,
    local_addr: SocketAddr,
    book: AddressBook,
    engine: GatherEngine<AddressBook, TcpTransport>,
    listener: JoinHandle<Result<()>>,
}

impl DiagNode {
    /// Bind with a fresh random identity and default settings.
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with(addr, Identity::random(), GatherConfig::default()).await
    }

    pub async fn bind_with(addr: &str, identity: Identity, config: GatherConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        let local_addr = listener.local_addr().context("failed to read local address")?;

        let book = AddressBook::new(identity);
        let transport = Arc::new(TcpTransport::new(identity, book.clone()));
        let engine = GatherEngine::new(Arc::new(book.clone()), transport, config);

        let listener = tokio::spawn(transport::serve(listener, engine.clone()));

        info!("Node {}/{}", local_addr, identity);

        Ok(Self {
            identity,
            local_addr,
            book,
            engine,
            listener,
        })
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register a directly connected peer. Returns false if it was rejected.
    pub fn add_peer(&self, id: Identity, addr: SocketAddr) -> bool {
        self.book.add_peer(id, addr)
    }

    pub fn remove_peer(&self, id: &Identity) -> bool {
        self.book.remove_peer(id)
    }

    pub fn peers(&self) -> Vec<PeerHandle> {
        self.book.connected_peers()
    }

    /// Gather a snapshot from every node reachable within `timeout`. The
    /// first entry is always this node.
    pub async fn diagnostic(&self, timeout: Duration) -> Result<Vec<PeerInfo>, GatherError> {
        self.engine.initiate(timeout).await
    }

    /// Stop answering inbound requests.
    pub fn shutdown(&self) {
        self.listener.abort();
    }
}

impl Drop for DiagNode {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

//! # Gather Engine
//!
//! Runs diagnostic gather rounds. A round floods one request id through the
//! peer graph and collects every reachable node's snapshot into a single
//! result.
//!
//! ## Originator
//!
//! [`GatherEngine::initiate`] claims a fresh request id, snapshots the local
//! node, asks every connected peer, and decodes whatever comes back. All peer
//! RPCs in a round share one deadline.
//!
//! ## Responder
//!
//! [`GatherEngine::handle_message`] is called by the transport for each
//! inbound request. If the id was already claimed here it replies with an
//! empty payload, which is what stops the flood on cycles. Otherwise it
//! snapshots itself, forwards the same request to its own peers under a
//! fixed fan-out timeout, and returns everything concatenated.
//!
//! ## Failure policy
//!
//! A peer that fails, times out, or sends garbage is logged and left out.
//! A round never fails because of peers; it returns whatever subset of the
//! network answered in time.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::GatherError;
use crate::identity::Identity;
use crate::ledger::{DedupLedger, DEFAULT_LEDGER_CAPACITY, DEFAULT_LEDGER_TTL};
use crate::messages::{self, DiagnosticRequest, DiagnosticResponse, MAX_RESPONSE_DATA};
use crate::protocols::{InboundMessage, NetworkDirectory, OutboundMessage, PeerHandle, Transport};
use crate::rpc::RpcClient;
use crate::snapshot::{self, PeerInfo, SnapshotBuilder, DEFAULT_CODE_VERSION};

/// Timeout for a responder's own fan-out. Deadlines do not cross hops, so
/// each hop bounds its forwarding independently.
pub const DEFAULT_RESPONDER_FANOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Stand-in deadline for timeouts too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// How a node walks its peers when forwarding a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FanOut {
    /// One peer at a time, in directory order. Later peers get whatever is
    /// left of the shared deadline.
    #[default]
    Sequential,
    /// All peers at once, joined against the shared deadline. Results keep
    /// arrival order.
    Concurrent,
}

#[derive(Clone, Debug)]
pub struct GatherConfig {
    /// Deadline applied by a responder to its own fan-out.
    pub responder_fanout_timeout: Duration,
    pub fanout: FanOut,
    /// How long a request id stays claimed. Must exceed the longest round.
    pub ledger_ttl: Duration,
    pub ledger_capacity: usize,
    /// Build identifier reported in local snapshots.
    pub code_version: String,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            responder_fanout_timeout: DEFAULT_RESPONDER_FANOUT_TIMEOUT,
            fanout: FanOut::Sequential,
            ledger_ttl: DEFAULT_LEDGER_TTL,
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            code_version: DEFAULT_CODE_VERSION.to_string(),
        }
    }
}

/// Diagnostic gather engine (cheap to clone; clones share the ledger).
pub struct GatherEngine<D: NetworkDirectory, T: Transport> {
    directory: Arc<D>,
    rpc: RpcClient<T>,
    ledger: Arc<DedupLedger>,
    builder: SnapshotBuilder,
    fanout: FanOut,
    responder_fanout_timeout: Duration,
}

impl<D: NetworkDirectory, T: Transport> Clone for GatherEngine<D, T> {
    fn clone(&self) -> Self {
        Self {
            directory: self.directory.clone(),
            rpc: self.rpc.clone(),
            ledger: self.ledger.clone(),
            builder: self.builder.clone(),
            fanout: self.fanout,
            responder_fanout_timeout: self.responder_fanout_timeout,
        }
    }
}

impl<D: NetworkDirectory, T: Transport> GatherEngine<D, T> {
    pub fn new(directory: Arc<D>, transport: Arc<T>, config: GatherConfig) -> Self {
        let builder = SnapshotBuilder::new(directory.self_identity(), config.code_version);
        Self {
            directory,
            rpc: RpcClient::new(transport),
            ledger: Arc::new(DedupLedger::new(config.ledger_ttl, config.ledger_capacity)),
            builder,
            fanout: config.fanout,
            responder_fanout_timeout: config.responder_fanout_timeout,
        }
    }

    pub fn identity(&self) -> Identity {
        self.builder.identity()
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    /// Currently connected peers, or none if the directory cannot list them.
    pub fn connected_peers(&self) -> Vec<PeerHandle> {
        match self.directory.peer_enumeration() {
            Some(peers) => peers.connected_peers(),
            None => {
                trace!("network directory does not support peer enumeration");
                Vec::new()
            }
        }
    }

    /// Run a gather round from this node.
    ///
    /// The first element is always this node's own snapshot. Only a failure
    /// to construct the request is reported as an error.
    pub async fn initiate(&self, timeout: Duration) -> Result<Vec<PeerInfo>, GatherError> {
        // the originator's claim must outlive the flood
        let ttl = self.ledger.ttl();
        let timeout = if timeout > ttl {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                ttl_ms = ttl.as_millis() as u64,
                "round timeout exceeds ledger TTL, clamping"
            );
            ttl
        } else {
            timeout
        };
        let deadline = deadline_after(timeout);
        let request = DiagnosticRequest::fresh();
        messages::encode_request(&request)
            .map_err(|e| GatherError::EncodingInvariant(e.to_string()))?;

        self.ledger.try_claim(&request.request_id);

        let peers = self.connected_peers();
        debug!(
            request = %request.request_id,
            peers = peers.len(),
            timeout_ms = timeout.as_millis() as u64,
            "starting diagnostic round"
        );

        let mut out = vec![self.builder.snapshot(&peers)];
        for (peer, response) in self.fan_out(deadline, &peers, &request).await {
            snapshot::decode_into(&response.data, &peer, &mut out);
        }

        info!(
            request = %request.request_id,
            snapshots = out.len(),
            peers = peers.len(),
            "diagnostic round complete"
        );
        Ok(out)
    }

    /// Answer a request relayed by `from`.
    pub async fn respond(
        &self,
        from: &Identity,
        request: DiagnosticRequest,
    ) -> Result<DiagnosticResponse, GatherError> {
        if self.ledger.try_claim(&request.request_id) {
            debug!(
                from = %from.short(),
                request = %request.request_id,
                "diagnostic request already handled, replying empty"
            );
            return Ok(DiagnosticResponse::empty(request.request_id));
        }

        let peers = self.connected_peers();
        let mut data = Vec::new();
        self.builder.snapshot(&peers).write_to(&mut data)?;

        let deadline = deadline_after(self.responder_fanout_timeout.min(self.ledger.ttl()));
        for (peer, response) in self.fan_out(deadline, &peers, &request).await {
            if data.len() + response.data.len() > MAX_RESPONSE_DATA {
                warn!(
                    peer = %peer.short(),
                    size = response.data.len(),
                    max = MAX_RESPONSE_DATA,
                    "dropping peer data, aggregated response would exceed limit"
                );
                continue;
            }
            data.extend_from_slice(&response.data);
        }

        Ok(DiagnosticResponse {
            request_id: request.request_id,
            data,
        })
    }

    /// Inbound entry point used by the transport's request dispatcher.
    pub async fn handle_message(&self, inbound: InboundMessage) -> Result<OutboundMessage, GatherError> {
        let Some(payload) = inbound.payload else {
            return Err(GatherError::MalformedInbound("message did not include a payload".into()));
        };
        let Some(sender) = inbound.sender else {
            return Err(GatherError::MalformedInbound("message did not include a sender".into()));
        };

        let request = messages::decode_request(&payload)
            .map_err(|e| GatherError::MalformedInbound(format!("failed to decode request: {}", e)))?;

        info!(
            node = %self.identity().short(),
            from = %sender.short(),
            request = %request.request_id,
            "received diagnostic request"
        );

        let response = self.respond(&sender, request).await?;
        let payload = messages::encode_response(&response)
            .map_err(|e| GatherError::EncodingInvariant(e.to_string()))?;

        Ok(OutboundMessage { to: sender, payload })
    }

    /// Send `request` to every peer; successful replies in arrival order.
    async fn fan_out(
        &self,
        deadline: Instant,
        peers: &[PeerHandle],
        request: &DiagnosticRequest,
    ) -> Vec<(Identity, DiagnosticResponse)> {
        let mut out = Vec::with_capacity(peers.len());

        match self.fanout {
            FanOut::Sequential => {
                for peer in peers {
                    let id = peer.id();
                    match self.rpc.send(deadline, &id, request).await {
                        Ok(response) => out.push((id, response)),
                        Err(e) => log_peer_failure(&id, &e),
                    }
                }
            }
            FanOut::Concurrent => {
                let mut join_set = JoinSet::new();
                for peer in peers {
                    let rpc = self.rpc.clone();
                    let request = request.clone();
                    let id = peer.id();
                    join_set.spawn(async move {
                        let result = rpc.send(deadline, &id, &request).await;
                        (id, result)
                    });
                }

                while let Some(joined) = join_set.join_next().await {
                    match joined {
                        Ok((id, Ok(response))) => out.push((id, response)),
                        Ok((id, Err(e))) => log_peer_failure(&id, &e),
                        Err(e) => warn!(error = %e, "diagnostic fan-out task failed"),
                    }
                }
            }
        }

        out
    }
}

/// `timeout` from now, saturating at a far-future instant.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

fn log_peer_failure(peer: &Identity, error: &GatherError) {
    if error.is_timeout() {
        debug!(peer = %peer.short(), error = %error, "diagnostic request timed out");
    } else {
        warn!(peer = %peer.short(), error = %error, "diagnostic request failed");
    }
}

//! # meshdiag - Mesh Diagnostic Gathering
//!
//! meshdiag collects a point-in-time picture of a peer-to-peer network. One
//! node starts a round; the request floods through every node's direct peers
//! and each reachable node contributes a snapshot of itself:
//!
//! - **Identity**: 32-byte node identifier
//! - **Connections**: directly connected peers with measured latency
//! - **Lifespan**: time since the node started
//! - **Code version**: build identifier
//!
//! ## Termination
//!
//! Every node remembers the request ids it has processed in a bounded
//! [`DedupLedger`]. A node fans out at most once per id and answers repeats
//! with an empty payload, so floods through cyclic graphs terminate.
//!
//! ## Failure Model
//!
//! Peers that fail, time out, or return garbage are logged and skipped. A
//! round always returns at least the originator's own snapshot.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `node` | High-level API: listener + address book + engine |
//! | `gather` | Originator and responder logic, fan-out |
//! | `rpc` | One request/response exchange under a deadline |
//! | `ledger` | Request-id deduplication |
//! | `snapshot` | Per-node snapshot type and stream decoding |
//! | `messages` | Wire types and bounded codec |
//! | `protocols` | Directory and transport traits |
//! | `directory` | Concrete address book |
//! | `transport` | Length-prefixed TCP transport and inbound server |
//! | `identity` | Node identifiers |
//! | `error` | Error classification |

mod directory;
mod error;
mod gather;
mod identity;
mod ledger;
mod messages;
mod node;
mod protocols;
mod rpc;
mod snapshot;
mod transport;

pub use directory::{AddressBook, MAX_PEERS};
pub use error::GatherError;
pub use gather::{FanOut, GatherConfig, GatherEngine, DEFAULT_RESPONDER_FANOUT_TIMEOUT};
pub use identity::{Identity, IDENTITY_LEN};
pub use ledger::{DedupLedger, DEFAULT_LEDGER_CAPACITY, DEFAULT_LEDGER_TTL};
pub use messages::{
    decode_request, decode_response, encode_request, encode_response, DiagnosticRequest,
    DiagnosticResponse, RequestId, MAX_RESPONSE_DATA, REQUEST_ID_LEN,
};
pub use node::DiagNode;
pub use protocols::{
    InboundMessage, NetworkDirectory, OutboundMessage, PeerEnumeration, PeerHandle, Transport,
};
pub use rpc::RpcClient;
pub use snapshot::{
    decode_stream, ConnectionInfo, PeerInfo, SnapshotBuilder, SnapshotStream, DEFAULT_CODE_VERSION,
};
pub use transport::{serve, TcpTransport};

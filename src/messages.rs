//! # Wire Protocol Messages
//!
//! Diagnostic envelopes exchanged between peers. Envelopes are serialized
//! with bincode (fixint encoding) and every decode goes through size-bounded
//! options to prevent memory exhaustion.
//!
//! | Direction | Type | Fields |
//! |-----------|------|--------|
//! | request | [`DiagnosticRequest`] | `request_id` |
//! | response | [`DiagnosticResponse`] | `request_id`, `data` |
//!
//! `data` is zero or more snapshot encodings concatenated without framing;
//! see [`crate::snapshot`] for how they are split back apart.

use bincode::Options;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Number of random bytes in a freshly generated request id.
pub const REQUEST_ID_LEN: usize = 4;

/// Maximum aggregated payload carried by one response (4 MiB).
/// A full mesh round concatenates one snapshot per reachable node.
pub const MAX_RESPONSE_DATA: usize = 4 * 1024 * 1024;

/// Maximum buffer size for deserialization.
/// Set slightly larger than MAX_RESPONSE_DATA to allow for envelope overhead.
pub const MAX_DESERIALIZE_SIZE: u64 = (MAX_RESPONSE_DATA as u64) + 4096;

/// Request ids longer than this are rejected on decode.
pub const MAX_REQUEST_ID_LEN: usize = 64;

/// Returns bincode options with size limits enforced.
fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_DESERIALIZE_SIZE)
        .with_fixint_encoding()
}

/// Deserialize with size bounds enforced.
pub fn deserialize_bounded<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    bincode_options().deserialize(bytes)
}

fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode_options().serialize(value)
}

/// Opaque token identifying one gather round across every hop.
///
/// Four random bytes is enough to break forwarding loops; it is not a
/// security token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Vec<u8>);

impl RequestId {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = vec![0u8; REQUEST_ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Debug for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RequestId({})", self.to_hex())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRequest {
    pub request_id: RequestId,
}

impl DiagnosticRequest {
    pub fn new(request_id: RequestId) -> Self {
        Self { request_id }
    }

    /// A request carrying a freshly generated id.
    pub fn fresh() -> Self {
        Self::new(RequestId::random())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticResponse {
    pub request_id: RequestId,
    /// Concatenated snapshot encodings, possibly empty.
    pub data: Vec<u8>,
}

impl DiagnosticResponse {
    /// The loop-breaking reply: same id, no data.
    pub fn empty(request_id: RequestId) -> Self {
        Self { request_id, data: Vec::new() }
    }
}

pub fn encode_request(request: &DiagnosticRequest) -> Result<Vec<u8>, bincode::Error> {
    serialize(request)
}

pub fn decode_request(bytes: &[u8]) -> Result<DiagnosticRequest, bincode::Error> {
    let request: DiagnosticRequest = deserialize_bounded(bytes)?;
    if request.request_id.as_bytes().len() > MAX_REQUEST_ID_LEN {
        return Err(Box::new(bincode::ErrorKind::Custom(format!(
            "request id too long: {} bytes (max {})",
            request.request_id.as_bytes().len(),
            MAX_REQUEST_ID_LEN
        ))));
    }
    Ok(request)
}

pub fn encode_response(response: &DiagnosticResponse) -> Result<Vec<u8>, bincode::Error> {
    serialize(response)
}

pub fn decode_response(bytes: &[u8]) -> Result<DiagnosticResponse, bincode::Error> {
    deserialize_bounded(bytes)
}

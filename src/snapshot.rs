//! # Peer Info Snapshots
//!
//! A snapshot is a point-in-time self-description of one node: identity,
//! uptime and the measured latency of each currently connected peer.
//!
//! Snapshots are encoded as JSON objects. A JSON object is self-delimiting,
//! so snapshots from many peers can be concatenated back-to-back in a single
//! response payload and split apart again with a streaming decoder that
//! consumes exactly one object at a time.
//!
//! ```text
//! {"id":"ab..","connections":[{"id":"cd..","latency":1200000}],"keys":[],"lifespan":5000000000,"code_version":"meshdiag/0.1.0"}{"id":"cd..",...}
//! ```
//!
//! Durations are integer nanoseconds.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GatherError;
use crate::identity::Identity;
use crate::protocols::PeerHandle;

/// Default build identifier reported in snapshots.
pub const DEFAULT_CODE_VERSION: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

/// Latency to one directly connected peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: String,
    #[serde(with = "duration_nanos")]
    pub latency: Duration,
}

/// Self-description of one node at the moment it answered a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub connections: Vec<ConnectionInfo>,
    /// Content identifiers stored locally. The datastore is not introspected,
    /// so this is always empty.
    pub keys: Vec<String>,
    #[serde(with = "duration_nanos")]
    pub lifespan: Duration,
    pub code_version: String,
}

impl PeerInfo {
    /// Encode as a single self-delimiting JSON object.
    pub fn to_bytes(&self) -> Result<Vec<u8>, GatherError> {
        serde_json::to_vec(self).map_err(|e| GatherError::EncodingInvariant(e.to_string()))
    }

    /// Append the encoding to an accumulating payload buffer.
    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), GatherError> {
        serde_json::to_writer(&mut *buf, self)
            .map_err(|e| GatherError::EncodingInvariant(e.to_string()))
    }
}

/// Builds snapshots of the local node.
///
/// Uptime is measured from the builder's creation, which the node does once
/// at startup.
#[derive(Clone, Debug)]
pub struct SnapshotBuilder {
    identity: Identity,
    birth: Instant,
    code_version: String,
}

impl SnapshotBuilder {
    pub fn new(identity: Identity, code_version: impl Into<String>) -> Self {
        Self::with_birth(identity, code_version, Instant::now())
    }

    pub fn with_birth(identity: Identity, code_version: impl Into<String>, birth: Instant) -> Self {
        Self {
            identity,
            birth,
            code_version: code_version.into(),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn snapshot(&self, peers: &[PeerHandle]) -> PeerInfo {
        PeerInfo {
            id: self.identity.to_hex(),
            connections: peers
                .iter()
                .map(|p| ConnectionInfo {
                    id: p.id().to_hex(),
                    latency: p.latency(),
                })
                .collect(),
            keys: Vec::new(),
            lifespan: self.birth.elapsed(),
            code_version: self.code_version.clone(),
        }
    }
}

/// Iterator over snapshots concatenated in a byte payload.
///
/// Yields each complete snapshot in order and stops at the end of the
/// payload. A decode failure also stops iteration; snapshots yielded before
/// the failure are unaffected and the failure is kept in [`Self::error`].
pub struct SnapshotStream<'a> {
    inner: serde_json::StreamDeserializer<'a, serde_json::de::SliceRead<'a>, PeerInfo>,
    error: Option<serde_json::Error>,
    done: bool,
}

impl SnapshotStream<'_> {
    /// The decode error that ended the stream, if it did not end cleanly.
    pub fn error(&self) -> Option<&serde_json::Error> {
        self.error.as_ref()
    }

    /// Bytes consumed by successfully decoded snapshots so far.
    pub fn byte_offset(&self) -> usize {
        self.inner.byte_offset()
    }
}

impl Iterator for SnapshotStream<'_> {
    type Item = PeerInfo;

    fn next(&mut self) -> Option<PeerInfo> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(info)) => Some(info),
            Some(Err(e)) => {
                self.done = true;
                self.error = Some(e);
                None
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Split a payload of concatenated snapshots.
pub fn decode_stream(data: &[u8]) -> SnapshotStream<'_> {
    SnapshotStream {
        inner: serde_json::Deserializer::from_slice(data).into_iter::<PeerInfo>(),
        error: None,
        done: false,
    }
}

/// Decode every snapshot in `data` onto `out`, logging and discarding an
/// undecodable tail. Returns the number of snapshots appended.
pub fn decode_into(data: &[u8], from: &Identity, out: &mut Vec<PeerInfo>) -> usize {
    let before = out.len();
    let mut stream = decode_stream(data);
    out.extend(&mut stream);
    if let Some(e) = stream.error() {
        warn!(
            peer = %from.short(),
            decoded = out.len() - before,
            offset = stream.byte_offset(),
            error = %e,
            "discarding undecodable snapshot data"
        );
    }
    out.len() - before
}

//! Error taxonomy for diagnostic gather rounds.
//!
//! Per-peer failures (`Transport`, `EmptyResponse`, `MalformedResponse`) are
//! recoverable: the gather engine logs them and drops that peer's
//! contribution. `MalformedInbound` rejects a single inbound call.
//! `EncodingInvariant` means locally built data failed to serialize, which
//! is a defect in this node rather than a runtime condition.

use thiserror::Error;

use crate::identity::Identity;

#[derive(Debug, Error)]
pub enum GatherError {
    /// Inbound envelope lacked a payload or sender, or the payload was not
    /// a diagnostic request.
    #[error("malformed inbound message: {0}")]
    MalformedInbound(String),

    /// The transport exchange itself failed (refused, reset, timed out).
    #[error("transport error talking to {peer}: {cause:#}")]
    Transport {
        peer: Identity,
        timeout: bool,
        cause: anyhow::Error,
    },

    /// The transport succeeded but returned no message.
    #[error("no response from {peer}")]
    EmptyResponse { peer: Identity },

    /// Response bytes did not decode as a diagnostic response.
    #[error("malformed response from {peer}: {reason}")]
    MalformedResponse { peer: Identity, reason: String },

    /// A locally built request or snapshot failed to encode.
    #[error("failed to encode local data: {0}")]
    EncodingInvariant(String),
}

impl GatherError {
    pub(crate) fn transport(peer: Identity, cause: anyhow::Error) -> Self {
        Self::Transport { peer, timeout: false, cause }
    }

    pub(crate) fn timed_out(peer: Identity) -> Self {
        Self::Transport {
            peer,
            timeout: true,
            cause: anyhow::anyhow!("diagnostic deadline exceeded"),
        }
    }

    /// True for transport failures caused by an exhausted deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { timeout: true, .. })
    }

    /// True for failures that only cost one peer's contribution to a round.
    pub fn is_per_peer(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::EmptyResponse { .. } | Self::MalformedResponse { .. }
        )
    }
}

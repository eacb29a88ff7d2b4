//! # RPC Layer
//!
//! One diagnostic exchange with one peer: encode the request, hand it to the
//! transport bounded by the caller's deadline, decode the reply.
//!
//! Failures are classified so callers can tell network trouble from peer
//! bugs:
//!
//! | Condition | Error |
//! |-----------|-------|
//! | deadline already passed or elapsed mid-call | `Transport` (timeout) |
//! | transport call failed | `Transport` |
//! | transport succeeded with no message | `EmptyResponse` |
//! | reply bytes not a diagnostic response | `MalformedResponse` |

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, trace};

use crate::error::GatherError;
use crate::identity::Identity;
use crate::messages::{self, DiagnosticRequest, DiagnosticResponse};
use crate::protocols::Transport;

/// Handle for issuing diagnostic RPCs (cheap to clone).
pub struct RpcClient<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for RpcClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
        }
    }
}

impl<T: Transport> RpcClient<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Send `request` to `peer`, giving up at `deadline`.
    pub async fn send(
        &self,
        deadline: Instant,
        peer: &Identity,
        request: &DiagnosticRequest,
    ) -> Result<DiagnosticResponse, GatherError> {
        let envelope = messages::encode_request(request)
            .map_err(|e| GatherError::EncodingInvariant(e.to_string()))?;

        let start = Instant::now();
        if start >= deadline {
            trace!(peer = %peer.short(), "deadline exhausted before send");
            return Err(GatherError::timed_out(*peer));
        }

        let reply = match tokio::time::timeout_at(deadline, self.transport.send_request(peer, envelope)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(GatherError::transport(*peer, e)),
            Err(_) => return Err(GatherError::timed_out(*peer)),
        };

        let Some(bytes) = reply else {
            return Err(GatherError::EmptyResponse { peer: *peer });
        };

        info!(
            peer = %peer.short(),
            request = %request.request_id,
            rtt_ms = start.elapsed().as_millis() as u64,
            "diagnostic request completed"
        );

        let response = messages::decode_response(&bytes).map_err(|e| GatherError::MalformedResponse {
            peer: *peer,
            reason: e.to_string(),
        })?;

        if response.request_id != request.request_id {
            return Err(GatherError::MalformedResponse {
                peer: *peer,
                reason: format!(
                    "request id mismatch: sent {}, got {}",
                    request.request_id, response.request_id
                ),
            });
        }

        Ok(response)
    }
}

//! # Dedup Ledger
//!
//! Per-node record of diagnostic request ids that have already been
//! processed. Claiming an id is an atomic check-and-set: exactly one caller
//! sees it as new, every later caller sees it as claimed. This is what makes
//! flooding through a cyclic peer graph terminate: a node fans out at most
//! once per request id.
//!
//! ## Bounds
//!
//! - Entries older than the configured TTL are evicted lazily on each claim.
//!   The TTL must exceed the longest plausible gather round so that an id is
//!   never forgotten while its round is still in flight.
//! - A hard capacity caps memory; when full, the oldest entry is dropped.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::trace;

use crate::messages::RequestId;

/// Default time an id stays claimed.
pub const DEFAULT_LEDGER_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of remembered ids.
pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

pub struct DedupLedger {
    ttl: Duration,
    /// Entries are only inserted, never touched, so LRU order is
    /// first-seen order.
    seen: Mutex<LruCache<RequestId, Instant>>,
}

impl DedupLedger {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Claim `id`. Returns `true` if it was already claimed before this call.
    pub fn try_claim(&self, id: &RequestId) -> bool {
        self.try_claim_at(id, Instant::now())
    }

    pub(crate) fn try_claim_at(&self, id: &RequestId, now: Instant) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        Self::expire(&mut seen, self.ttl, now);

        if seen.peek(id).is_some() {
            return true;
        }
        if let Some((evicted, _)) = seen.push(id.clone(), now)
            && evicted != *id
        {
            trace!(request = %evicted, "ledger full, evicted oldest request id");
        }
        false
    }

    /// Whether `id` is currently claimed, without claiming it.
    pub fn contains(&self, id: &RequestId) -> bool {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.peek(id)
            .is_some_and(|first_seen| first_seen.elapsed() <= self.ttl)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expire(seen: &mut LruCache<RequestId, Instant>, ttl: Duration, now: Instant) {
        while let Some((_, first_seen)) = seen.peek_lru() {
            if now.saturating_duration_since(*first_seen) > ttl {
                seen.pop_lru();
            } else {
                break;
            }
        }
    }
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_TTL, DEFAULT_LEDGER_CAPACITY)
    }
}

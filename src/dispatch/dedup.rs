//! Duplicate-delivery suppression.
//!
//! The platform delivers at least once; the same user action can arrive
//! twice. Delivery ids are remembered for a bounded window so replays
//! become no-ops. This is pure suppression, not a correctness mechanism:
//! the state-machine invariants hold without it.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

/// How long a delivery id is remembered.
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Time-bounded seen-set of opaque delivery ids.
pub struct DedupCache {
    ttl: Duration,
    seen: DashMap<String, Instant>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl DedupCache {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: DashMap::new(),
        }
    }

    /// Record the id and report whether it was already inside the window.
    pub fn check(&self, delivery_id: &str) -> bool {
        self.check_at(delivery_id, Instant::now())
    }

    fn check_at(&self, delivery_id: &str, now: Instant) -> bool {
        match self.seen.entry(delivery_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                false
            }
            Entry::Occupied(mut slot) => {
                if now.duration_since(*slot.get()) < self.ttl {
                    true
                } else {
                    slot.insert(now);
                    false
                }
            }
        }
    }

    /// Drop expired ids. Called from the maintenance loop.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.seen.len();
        self.seen.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

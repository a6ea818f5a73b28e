//! Time-bounded routing-decision cache.
//!
//! Keys are SHA-256 digests of the inputs that determine a decision (sorted
//! required capabilities, tier, priority, latency target, strategy).
//! Entries are never invalidated explicitly; they simply age out.

use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::Instant;

use relaygate_types::{CapabilitySet, Priority, StrategyKind, UserTier};

use crate::router::RoutingDecision;

/// Build the cache key for a decision.
pub fn cache_key(
    required: &CapabilitySet,
    tier: UserTier,
    priority: Priority,
    latency_target_ms: u64,
    strategy: StrategyKind,
) -> String {
    let material = format!("{required}|{tier}|{priority}|{latency_target_ms}|{strategy}");
    format!("{:x}", Sha256::digest(material.as_bytes()))
}

/// A cached decision that no longer matches live state.
///
/// Never surfaces to callers; the router logs it and recomputes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheInconsistency {
    #[error("cached backend {0} is no longer registered")]
    Unregistered(String),
    #[error("cached backend {0} has an open circuit")]
    CircuitOpen(String),
}

struct CachedDecision {
    decision: RoutingDecision,
    stored_at: Instant,
}

/// Routing decisions keyed by [`cache_key`].
pub struct DecisionCache {
    entries: DashMap<String, CachedDecision>,
    ttl: Duration,
}

impl DecisionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A copy of the cached decision, if one younger than the TTL exists.
    pub fn get(&self, key: &str) -> Option<RoutingDecision> {
        let fresh = {
            let entry = self.entries.get(key)?;
            (entry.stored_at.elapsed() < self.ttl).then(|| entry.decision.clone())
        };
        if fresh.is_none() {
            self.evict_if_stale(key);
        }
        fresh
    }

    /// Remove `key` only if it is still expired, so an entry refreshed
    /// since the caller looked survives.
    fn evict_if_stale(&self, key: &str) {
        self.entries
            .remove_if(key, |_, cached| cached.stored_at.elapsed() >= self.ttl);
    }

    pub fn insert(&self, key: String, decision: RoutingDecision) {
        self.entries.insert(
            key,
            CachedDecision {
                decision,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, cached| cached.stored_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

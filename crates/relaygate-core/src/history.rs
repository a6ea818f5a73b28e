//! Per-backend fallback outcome history.
//!
//! Observational only: the router does not score on it, but it is exposed
//! through health snapshots and the event stream for operators.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Entries kept per backend.
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackHistoryEntry {
    pub backend: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Bounded outcome ring per backend.
pub struct FallbackHistory {
    entries: DashMap<String, VecDeque<FallbackHistoryEntry>>,
    capacity: usize,
}

impl Default for FallbackHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl FallbackHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, backend: &str, success: bool) {
        let mut ring = self.entries.entry(backend.to_string()).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(FallbackHistoryEntry {
            backend: backend.to_string(),
            success,
            timestamp: Utc::now(),
        });
    }

    /// Entries for `backend`, oldest first.
    pub fn entries(&self, backend: &str) -> Vec<FallbackHistoryEntry> {
        self.entries
            .get(backend)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Fraction of recorded outcomes that succeeded, if any were recorded.
    pub fn success_rate(&self, backend: &str) -> Option<f64> {
        let ring = self.entries.get(backend)?;
        if ring.is_empty() {
            return None;
        }
        let successes = ring.iter().filter(|e| e.success).count();
        Some(successes as f64 / ring.len() as f64)
    }
}

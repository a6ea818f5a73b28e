//! Latency tracking.
//!
//! Successful calls feed two bounded rings: a global one used for
//! percentiles and throughput, and a per-backend one whose mean is the
//! latency baseline the router scores against.

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Capacity of the global sample ring.
pub const GLOBAL_WINDOW: usize = 1000;

/// Capacity of each per-backend latency ring.
pub const BACKEND_WINDOW: usize = 10;

/// Newest global samples considered for percentiles.
pub const PERCENTILE_WINDOW: usize = 100;

/// Baseline assumed for a backend with no samples yet.
pub const DEFAULT_BASELINE_MS: f64 = 1000.0;

#[derive(Debug, Clone)]
struct Sample {
    latency_ms: u64,
    at: Instant,
}

/// Latency percentiles over the newest [`PERCENTILE_WINDOW`] samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    /// Samples per second between the oldest and newest sample considered.
    pub throughput_per_sec: f64,
    pub sample_count: usize,
}

/// Bounded latency history.
pub struct PerformanceTracker {
    global: Mutex<VecDeque<Sample>>,
    per_backend: DashMap<String, VecDeque<u64>>,
    global_window: usize,
    backend_window: usize,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::with_windows(GLOBAL_WINDOW, BACKEND_WINDOW)
    }

    pub fn with_windows(global_window: usize, backend_window: usize) -> Self {
        Self {
            global: Mutex::new(VecDeque::with_capacity(global_window)),
            per_backend: DashMap::new(),
            global_window: global_window.max(1),
            backend_window: backend_window.max(1),
        }
    }

    /// Record the latency of a successful call.
    pub fn record(&self, backend: &str, latency_ms: u64) {
        {
            let mut global = self.global.lock();
            if global.len() == self.global_window {
                global.pop_front();
            }
            global.push_back(Sample {
                latency_ms,
                at: Instant::now(),
            });
        }

        let mut ring = self.per_backend.entry(backend.to_string()).or_default();
        if ring.len() == self.backend_window {
            ring.pop_front();
        }
        ring.push_back(latency_ms);
    }

    /// Mean latency over the backend's ring, if it has any samples.
    pub fn average_latency(&self, backend: &str) -> Option<f64> {
        let ring = self.per_backend.get(backend)?;
        if ring.is_empty() {
            return None;
        }
        let sum: u64 = ring.iter().sum();
        Some(sum as f64 / ring.len() as f64)
    }

    /// Latency baseline used for scoring.
    pub fn baseline(&self, backend: &str) -> f64 {
        self.average_latency(backend).unwrap_or(DEFAULT_BASELINE_MS)
    }

    /// Number of samples held for `backend`.
    pub fn sample_count(&self, backend: &str) -> usize {
        self.per_backend.get(backend).map_or(0, |r| r.len())
    }

    /// Percentiles and throughput over the newest [`PERCENTILE_WINDOW`]
    /// global samples.
    pub fn stats(&self) -> LatencyStats {
        let (mut sorted, span) = {
            let global = self.global.lock();
            let skip = global.len().saturating_sub(PERCENTILE_WINDOW);
            let window: Vec<&Sample> = global.iter().skip(skip).collect();
            let span = match (window.first(), window.last()) {
                (Some(oldest), Some(newest)) => newest.at.saturating_duration_since(oldest.at),
                _ => return LatencyStats::default(),
            };
            let latencies: Vec<u64> = window.iter().map(|s| s.latency_ms).collect();
            (latencies, span)
        };
        sorted.sort_unstable();

        let span_secs = span.as_secs_f64();
        let throughput_per_sec = if span_secs > 0.0 {
            sorted.len() as f64 / span_secs
        } else {
            0.0
        };

        LatencyStats {
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
            throughput_per_sec,
            sample_count: sorted.len(),
        }
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64) * q).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

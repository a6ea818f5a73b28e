//! System health aggregation.
//!
//! The [`HealthAggregator`] is an [`EventSink`]: it folds execution results
//! and health-check results into per-backend counters as they happen.
//! [`recompute`](HealthAggregator::recompute) turns those counters, plus
//! breaker and latency state borrowed for the duration of the call, into a
//! fresh [`SystemHealthSnapshot`]. The aggregator is the only writer of the
//! snapshot.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use relaygate_types::{HealthCheckResult, HealthStatus};

use crate::breaker::CircuitBreakerBank;
use crate::classifier::ErrorClassifier;
use crate::events::{EventSink, GatewayEvent};
use crate::performance::{LatencyStats, PerformanceTracker};
use crate::registry::CapabilityRegistry;

/// Outcomes kept per backend for the recent error rate.
pub const RECENT_WINDOW: usize = 20;

/// Recent error rate above which a backend is unhealthy.
pub const UNHEALTHY_ERROR_RATE: f64 = 0.5;

/// Recent error rate above which a backend is degraded.
pub const DEGRADED_ERROR_RATE: f64 = 0.2;

/// Average latency above `declared * LATENCY_DEGRADE_FACTOR` degrades a backend.
pub const LATENCY_DEGRADE_FACTOR: f64 = 2.0;

// ── Snapshot types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    #[default]
    Healthy,
    Degraded,
    Critical,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Healthy => "healthy",
            OverallStatus::Degraded => "degraded",
            OverallStatus::Critical => "critical",
        }
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All healthy → healthy, at least 70 % → degraded, otherwise critical.
/// An empty system is healthy.
pub fn overall_status(healthy: usize, total: usize) -> OverallStatus {
    if healthy >= total {
        OverallStatus::Healthy
    } else if healthy * 10 >= total * 7 {
        OverallStatus::Degraded
    } else {
        OverallStatus::Critical
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendHealth {
    pub backend: String,
    pub status: HealthStatus,
    pub circuit_open: bool,
    pub total_requests: u64,
    pub total_failures: u64,
    /// Failure share of the last [`RECENT_WINDOW`] outcomes.
    pub recent_error_rate: f64,
    /// Mean of the backend's recent latency samples.
    pub average_latency_ms: Option<f64>,
    pub declared_latency_ms: u64,
    pub last_check: Option<HealthCheckResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub total_requests: u64,
    pub total_failures: u64,
    /// Failure share across every backend's recent window.
    pub error_rate: f64,
    /// Mean latency across every backend's recent window.
    pub average_latency_ms: f64,
    pub latency: LatencyStats,
    /// Classified failures keyed by category name.
    pub error_distribution: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealthSnapshot {
    pub overall: OverallStatus,
    pub healthy_backends: usize,
    pub total_backends: usize,
    pub backends: Vec<BackendHealth>,
    pub metrics: AggregateMetrics,
    pub generated_at: DateTime<Utc>,
}

impl Default for SystemHealthSnapshot {
    fn default() -> Self {
        Self {
            overall: OverallStatus::Healthy,
            healthy_backends: 0,
            total_backends: 0,
            backends: Vec::new(),
            metrics: AggregateMetrics::default(),
            generated_at: Utc::now(),
        }
    }
}

impl SystemHealthSnapshot {
    pub fn backend(&self, id: &str) -> Option<&BackendHealth> {
        self.backends.iter().find(|b| b.backend == id)
    }
}

/// State borrowed from the rest of the engine for one recompute.
pub struct HealthInputs<'a> {
    pub registry: &'a CapabilityRegistry,
    pub breakers: &'a CircuitBreakerBank,
    pub performance: &'a PerformanceTracker,
    pub classifier: &'a ErrorClassifier,
}

/// Status of one backend from its observed state.
///
/// `unknown` is returned only when nothing else applies and no health
/// check has said otherwise.
pub fn derive_status(
    circuit_open: bool,
    last_check: Option<&HealthCheckResult>,
    recent_error_rate: Option<f64>,
    average_latency_ms: Option<f64>,
    declared_latency_ms: u64,
) -> HealthStatus {
    let checked = last_check.map(|c| c.status).unwrap_or_default();
    if circuit_open || checked == HealthStatus::Unhealthy {
        return HealthStatus::Unhealthy;
    }
    let error_rate = recent_error_rate.unwrap_or(0.0);
    if error_rate > UNHEALTHY_ERROR_RATE {
        return HealthStatus::Unhealthy;
    }
    let slow = average_latency_ms
        .is_some_and(|avg| avg > declared_latency_ms as f64 * LATENCY_DEGRADE_FACTOR);
    if error_rate > DEGRADED_ERROR_RATE || slow {
        return HealthStatus::Degraded;
    }
    checked
}

/// Healthy for aggregation purposes.
fn counts_as_healthy(status: HealthStatus) -> bool {
    matches!(status, HealthStatus::Healthy | HealthStatus::Unknown)
}

// ── Aggregator ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    requests: u64,
    failures: u64,
    /// (success, latency_ms), newest at the back.
    recent: VecDeque<(bool, u64)>,
    last_check: Option<HealthCheckResult>,
}

impl Counters {
    fn observe(&mut self, success: bool, latency_ms: u64) {
        self.requests += 1;
        if !success {
            self.failures += 1;
        }
        if self.recent.len() == RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back((success, latency_ms));
    }

    fn recent_error_rate(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return None;
        }
        let failed = self.recent.iter().filter(|(ok, _)| !ok).count();
        Some(failed as f64 / self.recent.len() as f64)
    }
}

/// Folds gateway events into a [`SystemHealthSnapshot`].
#[derive(Default)]
pub struct HealthAggregator {
    counters: DashMap<String, Counters>,
    snapshot: RwLock<SystemHealthSnapshot>,
}

impl HealthAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last computed snapshot.
    pub fn snapshot(&self) -> SystemHealthSnapshot {
        self.snapshot.read().clone()
    }

    pub fn last_check(&self, backend: &str) -> Option<HealthCheckResult> {
        self.counters
            .get(backend)
            .and_then(|c| c.last_check.clone())
    }

    /// Build a fresh snapshot, store it, and return it.
    pub fn recompute(&self, inputs: HealthInputs<'_>) -> SystemHealthSnapshot {
        let mut backends = Vec::new();
        let mut totals = AggregateMetrics::default();
        let mut recent_outcomes = 0usize;
        let mut recent_failures = 0usize;
        let mut recent_latency_total = 0u64;

        for descriptor in inputs.registry.descriptors() {
            let id = descriptor.id.clone();
            let circuit_open = inputs.breakers.is_open(&id);
            let average_latency_ms = inputs.performance.average_latency(&id);

            let (total_requests, total_failures, recent_error_rate, last_check) =
                match self.counters.get(&id) {
                    Some(counters) => {
                        recent_outcomes += counters.recent.len();
                        for (ok, latency) in &counters.recent {
                            if !ok {
                                recent_failures += 1;
                            }
                            recent_latency_total += latency;
                        }
                        (
                            counters.requests,
                            counters.failures,
                            counters.recent_error_rate(),
                            counters.last_check.clone(),
                        )
                    }
                    None => (0, 0, None, None),
                };

            totals.total_requests += total_requests;
            totals.total_failures += total_failures;

            let status = derive_status(
                circuit_open,
                last_check.as_ref(),
                recent_error_rate,
                average_latency_ms,
                descriptor.declared_latency_ms,
            );
            backends.push(BackendHealth {
                backend: id,
                status,
                circuit_open,
                total_requests,
                total_failures,
                recent_error_rate: recent_error_rate.unwrap_or(0.0),
                average_latency_ms,
                declared_latency_ms: descriptor.declared_latency_ms,
                last_check,
            });
        }

        if recent_outcomes > 0 {
            totals.error_rate = recent_failures as f64 / recent_outcomes as f64;
            totals.average_latency_ms = recent_latency_total as f64 / recent_outcomes as f64;
        }
        totals.latency = inputs.performance.stats();
        totals.error_distribution = inputs
            .classifier
            .distribution()
            .into_iter()
            .map(|(category, count)| (category.as_str().to_string(), count))
            .collect();

        let healthy_backends = backends
            .iter()
            .filter(|b| counts_as_healthy(b.status))
            .count();
        let snapshot = SystemHealthSnapshot {
            overall: overall_status(healthy_backends, backends.len()),
            healthy_backends,
            total_backends: backends.len(),
            backends,
            metrics: totals,
            generated_at: Utc::now(),
        };
        debug!(
            overall = %snapshot.overall,
            healthy = snapshot.healthy_backends,
            total = snapshot.total_backends,
            "health recomputed"
        );
        *self.snapshot.write() = snapshot.clone();
        snapshot
    }
}

impl EventSink for HealthAggregator {
    fn emit(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::ExecutionSucceeded {
                backend,
                latency_ms,
                ..
            } => self
                .counters
                .entry(backend.clone())
                .or_default()
                .observe(true, *latency_ms),
            GatewayEvent::ExecutionFailed {
                backend,
                latency_ms,
                ..
            } => self
                .counters
                .entry(backend.clone())
                .or_default()
                .observe(false, *latency_ms),
            GatewayEvent::HealthChecked { backend, result } => {
                self.counters
                    .entry(backend.clone())
                    .or_default()
                    .last_check = Some(result.clone());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use relaygate_types::{BackendDescriptor, Capability};

    use super::*;
    use crate::backend::DescriptorOnly;
    use crate::classifier::ErrorCategory;
    use crate::error::BackendError;
    use crate::events::NoopSink;

    struct Fixture {
        registry: CapabilityRegistry,
        breakers: Arc<CircuitBreakerBank>,
        performance: PerformanceTracker,
        classifier: ErrorClassifier,
        aggregator: HealthAggregator,
    }

    impl Fixture {
        fn with_backends(count: usize) -> Self {
            let registry = CapabilityRegistry::new();
            let breakers = Arc::new(CircuitBreakerBank::new(
                3,
                Duration::from_secs(60),
                Arc::new(NoopSink),
            ));
            for i in 0..count {
                let id = format!("b{i}");
                breakers.register(&id);
                registry
                    .register(Arc::new(DescriptorOnly::new(BackendDescriptor::new(
                        id,
                        [Capability::Text],
                    ))))
                    .unwrap();
            }
            Self {
                registry,
                classifier: ErrorClassifier::new(breakers.clone(), Arc::new(NoopSink)),
                breakers,
                performance: PerformanceTracker::new(),
                aggregator: HealthAggregator::new(),
            }
        }

        fn recompute(&self) -> SystemHealthSnapshot {
            self.aggregator.recompute(HealthInputs {
                registry: &self.registry,
                breakers: &self.breakers,
                performance: &self.performance,
                classifier: &self.classifier,
            })
        }

        fn outcome(&self, backend: &str, success: bool, latency_ms: u64) {
            let event = if success {
                GatewayEvent::ExecutionSucceeded {
                    backend: backend.into(),
                    latency_ms,
                    attempt: 0,
                }
            } else {
                GatewayEvent::ExecutionFailed {
                    backend: backend.into(),
                    latency_ms,
                    category: ErrorCategory::Unknown,
                    retryable: true,
                    message: "boom".into(),
                }
            };
            self.aggregator.emit(&event);
        }

        fn mark_unhealthy(&self, backend: &str) {
            self.aggregator.emit(&GatewayEvent::HealthChecked {
                backend: backend.into(),
                result: HealthCheckResult::failed("health check failed"),
            });
        }
    }

    #[test]
    fn overall_thresholds() {
        assert_eq!(overall_status(0, 0), OverallStatus::Healthy);
        assert_eq!(overall_status(4, 4), OverallStatus::Healthy);
        assert_eq!(overall_status(7, 10), OverallStatus::Degraded);
        assert_eq!(overall_status(6, 10), OverallStatus::Critical);
        assert_eq!(overall_status(0, 1), OverallStatus::Critical);
    }

    #[test]
    fn three_of_ten_unhealthy_is_degraded() {
        let f = Fixture::with_backends(10);
        for i in 0..3 {
            f.mark_unhealthy(&format!("b{i}"));
        }
        let snapshot = f.recompute();
        assert_eq!(snapshot.overall, OverallStatus::Degraded);
        assert_eq!(snapshot.healthy_backends, 7);
    }

    #[test]
    fn four_of_ten_unhealthy_is_critical() {
        let f = Fixture::with_backends(10);
        for i in 0..4 {
            f.mark_unhealthy(&format!("b{i}"));
        }
        assert_eq!(f.recompute().overall, OverallStatus::Critical);
    }

    #[test]
    fn no_backends_is_healthy() {
        let f = Fixture::with_backends(0);
        let snapshot = f.recompute();
        assert_eq!(snapshot.overall, OverallStatus::Healthy);
        assert!(snapshot.backends.is_empty());
    }

    #[tokio::test]
    async fn open_circuit_is_unhealthy() {
        let f = Fixture::with_backends(2);
        for _ in 0..3 {
            f.breakers.record_failure("b0");
        }
        let snapshot = f.recompute();
        let b0 = snapshot.backend("b0").unwrap();
        assert!(b0.circuit_open);
        assert_eq!(b0.status, HealthStatus::Unhealthy);
        assert_eq!(snapshot.overall, OverallStatus::Critical);
    }

    #[test]
    fn error_rate_drives_status() {
        let f = Fixture::with_backends(2);
        // b0: 3 of 4 failed → unhealthy. b1: 1 of 4 failed → degraded.
        for ok in [false, false, false, true] {
            f.outcome("b0", ok, 100);
        }
        for ok in [false, true, true, true] {
            f.outcome("b1", ok, 100);
        }
        let snapshot = f.recompute();
        assert_eq!(snapshot.backend("b0").unwrap().status, HealthStatus::Unhealthy);
        assert_eq!(snapshot.backend("b1").unwrap().status, HealthStatus::Degraded);
        assert_eq!(snapshot.metrics.total_requests, 8);
        assert_eq!(snapshot.metrics.total_failures, 4);
        assert!((snapshot.metrics.error_rate - 0.5).abs() < 1e-9);
        assert!((snapshot.metrics.average_latency_ms - 100.0).abs() < 1e-9);
    }

    #[test]
    fn recent_window_forgets_old_failures() {
        let f = Fixture::with_backends(1);
        for _ in 0..10 {
            f.outcome("b0", false, 50);
        }
        for _ in 0..RECENT_WINDOW {
            f.outcome("b0", true, 50);
        }
        let snapshot = f.recompute();
        let b0 = snapshot.backend("b0").unwrap();
        assert_eq!(b0.recent_error_rate, 0.0);
        assert_eq!(b0.total_failures, 10);
        assert_eq!(b0.status, HealthStatus::Unknown);
        assert_eq!(snapshot.overall, OverallStatus::Healthy);
    }

    #[test]
    fn slow_backend_is_degraded() {
        let f = Fixture::with_backends(1);
        // Declared latency defaults to 1000ms.
        f.performance.record("b0", 2500);
        let snapshot = f.recompute();
        assert_eq!(snapshot.backend("b0").unwrap().status, HealthStatus::Degraded);
        assert_eq!(snapshot.overall, OverallStatus::Critical);
    }

    #[test]
    fn health_check_status_passes_through() {
        let f = Fixture::with_backends(1);
        f.aggregator.emit(&GatewayEvent::HealthChecked {
            backend: "b0".into(),
            result: HealthCheckResult::new(HealthStatus::Healthy, 12),
        });
        let snapshot = f.recompute();
        assert_eq!(snapshot.backend("b0").unwrap().status, HealthStatus::Healthy);
        assert_eq!(f.aggregator.last_check("b0").unwrap().latency_ms, 12);
    }

    #[test]
    fn distribution_comes_from_classifier() {
        let f = Fixture::with_backends(1);
        f.classifier
            .record("b0", &BackendError::retryable("429", "rate_limit exceeded"));
        let snapshot = f.recompute();
        assert_eq!(snapshot.metrics.error_distribution.get("rate_limit"), Some(&1));
    }

    #[test]
    fn snapshot_is_stored() {
        let f = Fixture::with_backends(3);
        f.mark_unhealthy("b0");
        let computed = f.recompute();
        assert_eq!(f.aggregator.snapshot(), computed);
    }

    #[test]
    fn derive_status_rules() {
        let unhealthy = HealthCheckResult::failed("down");
        assert_eq!(derive_status(true, None, None, None, 1000), HealthStatus::Unhealthy);
        assert_eq!(
            derive_status(false, Some(&unhealthy), None, None, 1000),
            HealthStatus::Unhealthy
        );
        assert_eq!(derive_status(false, None, Some(0.6), None, 1000), HealthStatus::Unhealthy);
        assert_eq!(derive_status(false, None, Some(0.5), None, 1000), HealthStatus::Degraded);
        assert_eq!(derive_status(false, None, Some(0.2), None, 1000), HealthStatus::Unknown);
        assert_eq!(
            derive_status(false, None, None, Some(2000.0), 1000),
            HealthStatus::Unknown
        );
        assert_eq!(
            derive_status(false, None, None, Some(2001.0), 1000),
            HealthStatus::Degraded
        );
    }
}

//! The routing decision engine.
//!
//! [`RoutingEngine::decide`] is synchronous, performs no I/O and only reads
//! shared in-memory state: the registry, the performance tracker and the
//! breaker bank. Its single side effect is a write to the decision cache.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use relaygate_types::{GatewayConfig, GenerationRequest, StrategyKind, TierBudgets};

use crate::breaker::CircuitBreakerBank;
use crate::cache::{CacheInconsistency, DecisionCache, cache_key};
use crate::error::{GatewayError, Result};
use crate::events::{EventSink, GatewayEvent};
use crate::performance::PerformanceTracker;
use crate::registry::{CapabilityRegistry, required_capabilities};
use crate::scoring::{
    RoutingStrategy, ScoreFactors, availability_factor, capability_factor, cost_factor,
    latency_factor,
};

/// Number of runner-up backends recorded as fallbacks.
pub const FALLBACK_COUNT: usize = 2;

/// The engine's choice for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub selected_backend: String,
    /// The selected backend's combined score.
    pub confidence: f64,
    /// Human-readable explanation naming the dominant factor.
    pub reasoning: String,
    /// Next-best candidates, best first.
    pub fallbacks: Vec<String>,
    /// Time spent deciding (or looking up the cache).
    pub routing_time_ms: f64,
    /// Factors of the selected backend.
    pub factors: ScoreFactors,
    pub strategy: StrategyKind,
    /// Whether this decision was served from the cache.
    pub from_cache: bool,
}

/// Engine tunables taken from [`GatewayConfig`].
#[derive(Debug, Clone)]
pub struct RoutingSettings {
    /// Latency target for requests that do not set one.
    pub default_latency_target_ms: u64,
    pub tier_budgets: TierBudgets,
    /// Decisions slower than this are logged.
    pub budget: Duration,
}

impl RoutingSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            default_latency_target_ms: config.latency_target_ms,
            tier_budgets: config.tier_budgets.clone(),
            budget: Duration::from_millis(config.routing_budget_ms),
        }
    }
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

struct Candidate {
    id: String,
    factors: ScoreFactors,
    score: f64,
}

/// Scores capable backends and picks one.
pub struct RoutingEngine {
    registry: Arc<CapabilityRegistry>,
    performance: Arc<PerformanceTracker>,
    breakers: Arc<CircuitBreakerBank>,
    cache: Arc<DecisionCache>,
    strategy: RoutingStrategy,
    settings: RoutingSettings,
    events: Arc<dyn EventSink>,
}

impl RoutingEngine {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        performance: Arc<PerformanceTracker>,
        breakers: Arc<CircuitBreakerBank>,
        cache: Arc<DecisionCache>,
        strategy: RoutingStrategy,
        settings: RoutingSettings,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            performance,
            breakers,
            cache,
            strategy,
            settings,
            events,
        }
    }

    pub fn strategy(&self) -> &RoutingStrategy {
        &self.strategy
    }

    /// Decide which backend serves `request`.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::NoCapableBackend`] if no registered backend covers
    ///   the required capabilities.
    /// - [`GatewayError::AllBackendsUnavailable`] if every capable backend
    ///   has an open circuit.
    pub fn decide(&self, request: &GenerationRequest) -> Result<RoutingDecision> {
        let started = Instant::now();
        let required = required_capabilities(request);
        let target = request
            .latency_target_ms
            .unwrap_or(self.settings.default_latency_target_ms);
        let preferred = request.preferred_backend.as_deref();

        // Preferences change the outcome without changing the key, and a
        // retry must see the failure it is retrying from.
        let cacheable = preferred.is_none() && request.retry_count == 0;
        let key = cacheable.then(|| {
            cache_key(
                &required,
                request.user_tier,
                request.priority,
                target,
                self.strategy.kind(),
            )
        });

        if let Some(key) = &key
            && let Some(mut cached) = self.cache.get(key)
        {
            match self.validate_cached(&cached) {
                Ok(()) => {
                    cached.routing_time_ms = elapsed_ms(started);
                    cached.from_cache = true;
                    debug!(backend = %cached.selected_backend, "routing decision served from cache");
                    return Ok(cached);
                }
                Err(reason) => {
                    debug!(%reason, "discarding inconsistent cached routing decision");
                }
            }
        }

        let capable = self.registry.capable(&required);
        if capable.is_empty() {
            return Err(GatewayError::NoCapableBackend { required });
        }

        let budget = self.settings.tier_budgets.for_tier(request.user_tier);
        let mut open = Vec::new();
        let mut candidates = Vec::with_capacity(capable.len());
        for descriptor in &capable {
            if self.breakers.is_open(&descriptor.id) {
                open.push(descriptor.id.clone());
                continue;
            }
            let factors = ScoreFactors {
                latency: latency_factor(self.performance.baseline(&descriptor.id), target),
                cost: cost_factor(descriptor.estimated_cost(request.max_tokens), budget),
                availability: availability_factor(
                    self.breakers.failure_count(&descriptor.id),
                    false,
                ),
                capability: capability_factor(&descriptor.capabilities, &required),
            };
            candidates.push(Candidate {
                id: descriptor.id.clone(),
                score: self.strategy.score(&factors),
                factors,
            });
        }

        if candidates.is_empty() {
            return Err(GatewayError::AllBackendsUnavailable { candidates: open });
        }

        // Stable: equal scores keep registration order.
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let mut promoted = false;
        if let Some(preferred) = preferred
            && let Some(pos) = candidates.iter().position(|c| c.id == preferred)
        {
            let candidate = candidates.remove(pos);
            candidates.insert(0, candidate);
            promoted = true;
        }

        let top = &candidates[0];
        let dominant = self.strategy.dominant_factor(&top.factors);
        let reasoning = format!(
            "Selected {}{} via {} strategy; dominant factor: {} (score {:.3}, {} of {} capable backend(s) available)",
            top.id,
            if promoted { " (preferred)" } else { "" },
            self.strategy.kind(),
            dominant,
            top.score,
            candidates.len(),
            capable.len(),
        );

        let mut decision = RoutingDecision {
            selected_backend: top.id.clone(),
            confidence: top.score,
            reasoning,
            fallbacks: candidates
                .iter()
                .skip(1)
                .take(FALLBACK_COUNT)
                .map(|c| c.id.clone())
                .collect(),
            routing_time_ms: 0.0,
            factors: top.factors,
            strategy: self.strategy.kind(),
            from_cache: false,
        };

        if let Some(key) = key {
            self.cache.insert(key, decision.clone());
        }

        decision.routing_time_ms = elapsed_ms(started);
        let budget_ms = self.settings.budget.as_millis() as u64;
        if decision.routing_time_ms > budget_ms as f64 {
            warn!(
                routing_time_ms = decision.routing_time_ms,
                budget_ms, "routing decision exceeded its time budget"
            );
            self.events.emit(&GatewayEvent::RoutingBudgetExceeded {
                routing_time_ms: decision.routing_time_ms,
                budget_ms,
            });
        }

        Ok(decision)
    }

    /// A cached decision is only served while every backend it names is
    /// still registered and closed.
    fn validate_cached(&self, decision: &RoutingDecision) -> std::result::Result<(), CacheInconsistency> {
        for id in std::iter::once(&decision.selected_backend).chain(&decision.fallbacks) {
            if !self.registry.contains(id) {
                return Err(CacheInconsistency::Unregistered(id.clone()));
            }
            if self.breakers.is_open(id) {
                return Err(CacheInconsistency::CircuitOpen(id.clone()));
            }
        }
        Ok(())
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

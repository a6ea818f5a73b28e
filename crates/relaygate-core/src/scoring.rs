//! Routing strategies and score factors.
//!
//! Every candidate backend gets four factors in `[0, 1]`; a
//! [`RoutingStrategy`] folds them into one score. Factor functions are pure
//! so they can be tested in isolation from the router.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use relaygate_types::{CapabilitySet, ConfigError, StrategyKind};

/// Normalized per-candidate factors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreFactors {
    pub latency: f64,
    pub cost: f64,
    pub availability: f64,
    pub capability: f64,
}

/// A caller-supplied scoring function for [`StrategyKind::Custom`].
pub type CustomScorer = Arc<dyn Fn(&ScoreFactors) -> f64 + Send + Sync>;

// ── Factor functions ────────────────────────────────────────────────────

/// 1.0 while `baseline_ms` meets the target, then linear decay reaching 0
/// when the baseline is twice the target.
pub fn latency_factor(baseline_ms: f64, target_ms: u64) -> f64 {
    let target = target_ms as f64;
    if target <= 0.0 || baseline_ms <= target {
        return 1.0;
    }
    (1.0 - (baseline_ms - target) / target).max(0.0)
}

/// 1.0 while the estimated cost fits the tier budget, then linear decay
/// reaching 0 at twice the budget.
pub fn cost_factor(estimated_cost: f64, budget: f64) -> f64 {
    if estimated_cost <= budget {
        return 1.0;
    }
    if budget <= 0.0 {
        return 0.0;
    }
    (1.0 - (estimated_cost - budget) / budget).max(0.0)
}

/// `1 - failures/10`, floored at 0; always 0 for an open circuit.
pub fn availability_factor(failure_count: u32, open: bool) -> f64 {
    if open {
        return 0.0;
    }
    (1.0 - f64::from(failure_count) / 10.0).max(0.0)
}

/// Share of `required` that `declared` covers.
///
/// Candidates are capability-filtered before scoring, so in practice this
/// is always 1.0.
pub fn capability_factor(declared: &CapabilitySet, required: &CapabilitySet) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    declared.matched(required) as f64 / required.len() as f64
}

// ── Strategies ──────────────────────────────────────────────────────────

/// Fixed factor weights of a named strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub latency: f64,
    pub cost: f64,
    pub availability: f64,
    pub capability: f64,
}

impl Weights {
    const LATENCY: Weights = Weights {
        latency: 0.8,
        cost: 0.0,
        availability: 0.2,
        capability: 0.0,
    };
    const COST: Weights = Weights {
        latency: 0.3,
        cost: 0.6,
        availability: 0.1,
        capability: 0.0,
    };
    const QUALITY: Weights = Weights {
        latency: 0.3,
        cost: 0.0,
        availability: 0.2,
        capability: 0.5,
    };
    const BALANCED: Weights = Weights {
        latency: 0.3,
        cost: 0.25,
        availability: 0.2,
        capability: 0.25,
    };

    fn apply(&self, f: &ScoreFactors) -> f64 {
        self.latency * f.latency
            + self.cost * f.cost
            + self.availability * f.availability
            + self.capability * f.capability
    }
}

/// How candidates are ranked.
#[derive(Clone)]
pub enum RoutingStrategy {
    Latency,
    Cost,
    Quality,
    Balanced,
    Custom(CustomScorer),
}

impl fmt::Debug for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingStrategy::Custom(_) => f.write_str("Custom(<fn>)"),
            other => write!(f, "{}", other.kind().as_str()),
        }
    }
}

impl RoutingStrategy {
    /// Build the strategy named by `kind`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when `kind` is `custom` and no scorer is
    /// supplied.
    pub fn from_kind(kind: StrategyKind, custom: Option<CustomScorer>) -> Result<Self, ConfigError> {
        Ok(match kind {
            StrategyKind::Latency => RoutingStrategy::Latency,
            StrategyKind::Cost => RoutingStrategy::Cost,
            StrategyKind::Quality => RoutingStrategy::Quality,
            StrategyKind::Balanced => RoutingStrategy::Balanced,
            StrategyKind::Custom => RoutingStrategy::Custom(custom.ok_or_else(|| {
                ConfigError::Invalid(
                    "routing_strategy is \"custom\" but no scoring function was installed".into(),
                )
            })?),
        })
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            RoutingStrategy::Latency => StrategyKind::Latency,
            RoutingStrategy::Cost => StrategyKind::Cost,
            RoutingStrategy::Quality => StrategyKind::Quality,
            RoutingStrategy::Balanced => StrategyKind::Balanced,
            RoutingStrategy::Custom(_) => StrategyKind::Custom,
        }
    }

    /// Weights of a named strategy; `None` for custom.
    pub fn weights(&self) -> Option<Weights> {
        match self {
            RoutingStrategy::Latency => Some(Weights::LATENCY),
            RoutingStrategy::Cost => Some(Weights::COST),
            RoutingStrategy::Quality => Some(Weights::QUALITY),
            RoutingStrategy::Balanced => Some(Weights::BALANCED),
            RoutingStrategy::Custom(_) => None,
        }
    }

    /// Combined score for one candidate.
    pub fn score(&self, factors: &ScoreFactors) -> f64 {
        match self {
            RoutingStrategy::Custom(scorer) => scorer(factors),
            named => named.weights().map_or(0.0, |w| w.apply(factors)),
        }
    }

    /// Name of the factor contributing most to the score.
    ///
    /// Custom strategies have no weights, so the largest raw factor wins.
    /// Ties resolve in the order latency, cost, capability, availability.
    pub fn dominant_factor(&self, factors: &ScoreFactors) -> &'static str {
        let w = self.weights().unwrap_or(Weights {
            latency: 1.0,
            cost: 1.0,
            availability: 1.0,
            capability: 1.0,
        });
        let contributions = [
            ("latency", w.latency * factors.latency),
            ("cost", w.cost * factors.cost),
            ("capability", w.capability * factors.capability),
            ("availability", w.availability * factors.availability),
        ];
        let mut best = contributions[0];
        for candidate in &contributions[1..] {
            if candidate.1 > best.1 {
                best = *candidate;
            }
        }
        best.0
    }
}

//! Backend descriptors and the request-side tier/priority enums.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::{Capability, CapabilitySet};

// ── UserTier ─────────────────────────────────────────────────────────────

/// Service tier of the caller. Selects the cost budget used during scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTier {
    Free,
    #[default]
    Standard,
    Premium,
    Enterprise,
}

impl UserTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserTier::Free => "free",
            UserTier::Standard => "standard",
            UserTier::Premium => "premium",
            UserTier::Enterprise => "enterprise",
        }
    }

    /// Parse a tier name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "free" => Some(UserTier::Free),
            "standard" => Some(UserTier::Standard),
            "premium" => Some(UserTier::Premium),
            "enterprise" => Some(UserTier::Enterprise),
            _ => None,
        }
    }
}

impl fmt::Display for UserTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Priority ─────────────────────────────────────────────────────────────

/// Request priority. Part of the routing-decision cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── BackendDescriptor ────────────────────────────────────────────────────

/// Static description of a backend, fixed at registration.
///
/// Descriptors can be declared in the gateway config file (`[[backends]]`)
/// for dry-run routing, or returned by a live
/// `Backend` implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique backend identifier (e.g. `"claude-sonnet"`).
    pub id: String,

    /// Capabilities the backend supports.
    #[serde(default)]
    pub capabilities: CapabilitySet,

    /// Blended price per generated token, in USD.
    #[serde(default, alias = "costPerToken")]
    pub cost_per_token: f64,

    /// The latency the backend advertises, in milliseconds.
    #[serde(default = "default_declared_latency", alias = "declaredLatencyMs")]
    pub declared_latency_ms: u64,

    /// Free-form tier label (e.g. `"flagship"`, `"fast"`).
    #[serde(default)]
    pub tier: String,
}

fn default_declared_latency() -> u64 {
    1000
}

impl BackendDescriptor {
    /// Create a descriptor with exactly the given capabilities.
    ///
    /// Every request requires `text`, so a backend that should serve plain
    /// prompts must declare it.
    pub fn new(id: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().collect(),
            cost_per_token: 0.0,
            declared_latency_ms: default_declared_latency(),
            tier: String::new(),
        }
    }

    /// Set the per-token cost (builder pattern).
    pub fn with_cost_per_token(mut self, cost: f64) -> Self {
        self.cost_per_token = cost;
        self
    }

    /// Set the declared latency target (builder pattern).
    pub fn with_declared_latency_ms(mut self, latency_ms: u64) -> Self {
        self.declared_latency_ms = latency_ms;
        self
    }

    /// Set the tier label (builder pattern).
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = tier.into();
        self
    }

    /// Estimated cost of generating `tokens` tokens.
    pub fn estimated_cost(&self, tokens: u32) -> f64 {
        self.cost_per_token * f64::from(tokens)
    }
}

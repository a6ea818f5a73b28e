//! Gateway configuration schema.
//!
//! All fields accept both `snake_case` and `camelCase` names. Every field
//! has a default, so an empty file yields a working configuration. Files
//! ending in `.json` are parsed as JSON; anything else is parsed as TOML.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{BackendDescriptor, UserTier};

// ── Errors ───────────────────────────────────────────────────────────────

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse failure.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parse failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file parsed but a value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── RetryBackoff ─────────────────────────────────────────────────────────

/// Delay growth between executor attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryBackoff {
    /// `base`
    Fixed,
    /// `base * (attempt + 1)`
    Linear,
    /// `base * 2^attempt`
    #[default]
    Exponential,
}

// ── StrategyKind ─────────────────────────────────────────────────────────

/// Named scoring strategy. `Custom` requires a scoring function to be
/// installed programmatically when the gateway is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Latency,
    Cost,
    Quality,
    #[default]
    Balanced,
    Custom,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Latency => "latency",
            StrategyKind::Cost => "cost",
            StrategyKind::Quality => "quality",
            StrategyKind::Balanced => "balanced",
            StrategyKind::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "latency" => Some(StrategyKind::Latency),
            "cost" => Some(StrategyKind::Cost),
            "quality" => Some(StrategyKind::Quality),
            "balanced" => Some(StrategyKind::Balanced),
            "custom" => Some(StrategyKind::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── TierBudgets ──────────────────────────────────────────────────────────

/// Per-request cost ceiling (USD) for each user tier.
///
/// A backend whose estimated cost stays under the caller's ceiling scores a
/// full `1.0` on the cost factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBudgets {
    pub free: f64,
    pub standard: f64,
    pub premium: f64,
    pub enterprise: f64,
}

impl Default for TierBudgets {
    fn default() -> Self {
        Self {
            free: 0.01,
            standard: 0.05,
            premium: 0.25,
            enterprise: 1.0,
        }
    }
}

impl TierBudgets {
    pub fn for_tier(&self, tier: UserTier) -> f64 {
        match tier {
            UserTier::Free => self.free,
            UserTier::Standard => self.standard,
            UserTier::Premium => self.premium,
            UserTier::Enterprise => self.enterprise,
        }
    }
}

// ── AlertConfig ──────────────────────────────────────────────────────────

/// Alerting thresholds and sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Aggregate error rate (0.0-1.0) above which an alert fires.
    #[serde(default = "default_alert_error_rate", alias = "errorRate")]
    pub error_rate: f64,

    /// Average latency (ms) above which an alert fires.
    #[serde(default = "default_alert_latency", alias = "latencyMs", alias = "latency")]
    pub latency_ms: u64,

    /// Seconds between alert evaluations.
    #[serde(default = "default_alert_interval", alias = "checkIntervalSecs")]
    pub check_interval_secs: u64,

    /// Webhook URLs that receive a JSON POST for every alert.
    #[serde(default)]
    pub webhooks: Vec<String>,

    /// Alerts older than this are pruned from the in-memory log.
    #[serde(default = "default_alert_retention", alias = "retentionHours")]
    pub retention_hours: u64,
}

fn default_alert_error_rate() -> f64 {
    0.1
}

fn default_alert_latency() -> u64 {
    5000
}

fn default_alert_interval() -> u64 {
    60
}

fn default_alert_retention() -> u64 {
    24
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            error_rate: default_alert_error_rate(),
            latency_ms: default_alert_latency(),
            check_interval_secs: default_alert_interval(),
            webhooks: Vec::new(),
            retention_hours: default_alert_retention(),
        }
    }
}

// ── GatewayConfig ────────────────────────────────────────────────────────

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds.
    #[serde(default = "default_retry_delay", alias = "retryDelayMs", alias = "retryDelay")]
    pub retry_delay_ms: u64,

    /// Backoff growth policy.
    #[serde(default, alias = "retryBackoff")]
    pub retry_backoff: RetryBackoff,

    /// Backend tried once, directly, after every retry is exhausted.
    #[serde(default, alias = "emergencyFallback")]
    pub emergency_fallback: Option<String>,

    /// Static fallback chain. Each retry pops the head and prefers it.
    #[serde(default, alias = "fallbackChain")]
    pub fallback_chain: Vec<String>,

    /// Failures before a backend's circuit opens.
    #[serde(default = "default_breaker_threshold", alias = "circuitBreakerThreshold")]
    pub circuit_breaker_threshold: u32,

    /// Seconds an open circuit stays open.
    #[serde(default = "default_breaker_cooldown", alias = "circuitBreakerCooldownSecs")]
    pub circuit_breaker_cooldown_secs: u64,

    /// Scoring strategy.
    #[serde(default, alias = "routingStrategy")]
    pub routing_strategy: StrategyKind,

    /// Latency target used when a request does not carry one.
    #[serde(default = "default_latency_target", alias = "latencyTargetMs")]
    pub latency_target_ms: u64,

    /// Routing computations slower than this log a warning.
    #[serde(default = "default_routing_budget", alias = "routingBudgetMs")]
    pub routing_budget_ms: u64,

    /// Lifetime of cached routing decisions.
    #[serde(default = "default_cache_ttl", alias = "decisionCacheTtlSecs")]
    pub decision_cache_ttl_secs: u64,

    /// Reconnects allowed per streamed call.
    #[serde(default = "default_max_reconnects", alias = "maxReconnects")]
    pub max_reconnects: u32,

    /// Base reconnect delay; the n-th reconnect waits `n` times this.
    #[serde(default = "default_reconnect_delay", alias = "reconnectDelayMs")]
    pub reconnect_delay_ms: u64,

    /// Cost ceilings per user tier.
    #[serde(default, alias = "tierBudgets")]
    pub tier_budgets: TierBudgets,

    /// Seconds between out-of-band backend health checks.
    #[serde(default = "default_health_check_interval", alias = "healthCheckIntervalSecs")]
    pub health_check_interval_secs: u64,

    /// Seconds between health snapshot recomputations.
    #[serde(default = "default_health_recompute", alias = "healthRecomputeIntervalSecs")]
    pub health_recompute_interval_secs: u64,

    /// Alerting thresholds and sinks.
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Descriptors for dry-run routing from the CLI.
    #[serde(default)]
    pub backends: Vec<BackendDescriptor>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_cooldown() -> u64 {
    60
}

fn default_latency_target() -> u64 {
    2000
}

fn default_routing_budget() -> u64 {
    75
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_max_reconnects() -> u32 {
    3
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_health_check_interval() -> u64 {
    60
}

fn default_health_recompute() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            retry_backoff: RetryBackoff::default(),
            emergency_fallback: None,
            fallback_chain: Vec::new(),
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_cooldown_secs: default_breaker_cooldown(),
            routing_strategy: StrategyKind::default(),
            latency_target_ms: default_latency_target(),
            routing_budget_ms: default_routing_budget(),
            decision_cache_ttl_secs: default_cache_ttl(),
            max_reconnects: default_max_reconnects(),
            reconnect_delay_ms: default_reconnect_delay(),
            tier_budgets: TierBudgets::default(),
            health_check_interval_secs: default_health_check_interval(),
            health_recompute_interval_secs: default_health_recompute(),
            alerts: AlertConfig::default(),
            backends: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document and validate it.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from disk, choosing the parser by file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker_threshold must be at least 1".into(),
            ));
        }
        if self.latency_target_ms == 0 {
            return Err(ConfigError::Invalid(
                "latency_target_ms must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.alerts.error_rate) {
            return Err(ConfigError::Invalid(format!(
                "alerts.error_rate must be within 0.0..=1.0, got {}",
                self.alerts.error_rate
            )));
        }
        let budgets = &self.tier_budgets;
        for (name, value) in [
            ("free", budgets.free),
            ("standard", budgets.standard),
            ("premium", budgets.premium),
            ("enterprise", budgets.enterprise),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "tier_budgets.{name} must be positive, got {value}"
                )));
            }
        }
        if let Some(id) = self.fallback_chain.iter().find(|id| id.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "fallback_chain contains an empty backend id: {id:?}"
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "backend id declared twice: {}",
                    backend.id
                )));
            }
        }
        Ok(())
    }
}

//! Health-check results reported by backends.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a single backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// No health information yet, or the backend has no health check.
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one out-of-band health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    /// A result with the given status, stamped now.
    pub fn new(status: HealthStatus, latency_ms: u64) -> Self {
        Self {
            status,
            latency_ms,
            errors: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    /// The result recorded for backends that declare no health check.
    pub fn unknown() -> Self {
        Self::new(HealthStatus::Unknown, 0)
    }

    /// An unhealthy result carrying one error message.
    pub fn failed(error: impl Into<String>) -> Self {
        let mut result = Self::new(HealthStatus::Unhealthy, 0);
        result.errors.push(error.into());
        result
    }
}

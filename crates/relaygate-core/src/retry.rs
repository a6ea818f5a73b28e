//! Backoff policy for the fallback executor.
//!
//! Unlike a per-provider retry wrapper, every attempt here goes back through
//! the router, so the policy only decides how many attempts are made and
//! how long to wait between them.

use std::time::Duration;

use relaygate_types::{GatewayConfig, RetryBackoff};

/// Retry budget and backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (so `max_retries + 1` attempts total).
    pub max_retries: u32,
    /// Base delay between attempts.
    pub base_delay: Duration,
    pub backoff: RetryBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_delay_ms),
            backoff: config.retry_backoff,
        }
    }

    /// Delay before the attempt following attempt `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        compute_delay(self.backoff, self.base_delay, attempt)
    }
}

/// Delay after attempt `attempt` (0-indexed).
///
/// - `fixed`: `base`
/// - `linear`: `base * (attempt + 1)`
/// - `exponential`: `base * 2^attempt`
///
/// Arithmetic saturates instead of overflowing.
pub fn compute_delay(backoff: RetryBackoff, base: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis() as u64;
    let ms = match backoff {
        RetryBackoff::Fixed => base_ms,
        RetryBackoff::Linear => base_ms.saturating_mul(u64::from(attempt) + 1),
        RetryBackoff::Exponential => base_ms.saturating_mul(2u64.saturating_pow(attempt)),
    };
    Duration::from_millis(ms)
}

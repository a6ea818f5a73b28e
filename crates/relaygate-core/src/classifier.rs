//! Error classification and adaptive threshold tuning.
//!
//! Backend error messages are sorted into a small set of categories by
//! ordered substring rules. The classifier counts each category; once a
//! category recurs often enough, the failing backend's breaker threshold is
//! lowered so that a persistently failing backend trips sooner.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::breaker::CircuitBreakerBank;
use crate::error::BackendError;
use crate::events::{EventSink, GatewayEvent};

/// Occurrences of a category after which thresholds start dropping.
pub const ESCALATION_COUNT: u64 = 5;

/// Coarse failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimit,
    Timeout,
    Network,
    Auth,
    Safety,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Safety => "safety",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rules are tried in order; the first keyword hit wins.
const RULES: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::RateLimit, &["rate_limit", "quota", "throttl"]),
    (ErrorCategory::Timeout, &["timeout", "deadline", "slow"]),
    (ErrorCategory::Network, &["network", "connection", "socket"]),
    (ErrorCategory::Auth, &["auth", "permission", "unauthorized", "forbidden"]),
    (ErrorCategory::Safety, &["safety", "policy", "violation", "blocked"]),
];

/// Result of classifying one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    /// The keyword that matched, or `"*"` for [`ErrorCategory::Unknown`].
    pub matcher: &'static str,
}

/// Classify an error message.
pub fn classify(message: &str) -> Classification {
    let lowered = message.to_lowercase();
    for (category, keywords) in RULES {
        if let Some(matcher) = keywords.iter().copied().find(|k| lowered.contains(k)) {
            return Classification {
                category: *category,
                matcher,
            };
        }
    }
    Classification {
        category: ErrorCategory::Unknown,
        matcher: "*",
    }
}

/// Running count of one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPattern {
    pub category: ErrorCategory,
    /// Keyword that matched most recently.
    pub matcher: String,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
}

/// Classifies failures and tunes breaker thresholds.
pub struct ErrorClassifier {
    patterns: DashMap<ErrorCategory, ErrorPattern>,
    breakers: Arc<CircuitBreakerBank>,
    events: Arc<dyn EventSink>,
}

impl ErrorClassifier {
    pub fn new(breakers: Arc<CircuitBreakerBank>, events: Arc<dyn EventSink>) -> Self {
        Self {
            patterns: DashMap::new(),
            breakers,
            events,
        }
    }

    /// Classify `error`, count it, and lower `backend`'s threshold if the
    /// category has now been seen more than [`ESCALATION_COUNT`] times.
    pub fn record(&self, backend: &str, error: &BackendError) -> ErrorCategory {
        let Classification { category, matcher } = classify(&error.message);
        let count = {
            let mut pattern = self.patterns.entry(category).or_insert_with(|| ErrorPattern {
                category,
                matcher: matcher.to_string(),
                count: 0,
                last_seen: Utc::now(),
            });
            if pattern.matcher != matcher {
                pattern.matcher = matcher.to_string();
            }
            pattern.count += 1;
            pattern.last_seen = Utc::now();
            pattern.count
        };
        debug!(backend, %category, matcher, count, "error classified");

        if count > ESCALATION_COUNT {
            let before = self.breakers.threshold(backend);
            let threshold = self.breakers.lower_threshold(backend);
            if threshold < before {
                self.events.emit(&GatewayEvent::ThresholdLowered {
                    backend: backend.to_string(),
                    category,
                    threshold,
                });
            }
        }
        category
    }

    /// Count per category.
    pub fn distribution(&self) -> BTreeMap<ErrorCategory, u64> {
        self.patterns
            .iter()
            .map(|entry| (*entry.key(), entry.value().count))
            .collect()
    }

    /// Every pattern seen so far, most frequent first.
    pub fn patterns(&self) -> Vec<ErrorPattern> {
        let mut all: Vec<ErrorPattern> = self.patterns.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| b.count.cmp(&a.count).then(a.category.cmp(&b.category)));
        all
    }
}

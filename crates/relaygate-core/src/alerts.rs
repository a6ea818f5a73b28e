//! Threshold alerts and webhook delivery.
//!
//! [`AlertManager::evaluate`] compares a health snapshot against the
//! configured error-rate and latency thresholds. A breach produces an
//! [`Alert`] that is appended to an aged in-memory log and can be posted as
//! JSON to every configured webhook. Delivery is fire-and-forget: each POST
//! runs on its own task with a 10 s timeout and failures are only logged.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use relaygate_types::AlertConfig;

use crate::events::{EventSink, GatewayEvent};
use crate::health::{OverallStatus, SystemHealthSnapshot};

/// Per-request timeout for webhook POSTs.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard cap on the alert log, independent of retention.
pub const MAX_ALERTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub level: AlertLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub health_snapshot: SystemHealthSnapshot,
}

pub struct AlertManager {
    config: AlertConfig,
    client: reqwest::Client,
    log: Mutex<VecDeque<Alert>>,
    events: Arc<dyn EventSink>,
}

impl AlertManager {
    pub fn new(config: AlertConfig, events: Arc<dyn EventSink>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            log: Mutex::new(VecDeque::new()),
            events,
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Check `snapshot` against the thresholds, logging and returning an
    /// alert on breach.
    ///
    /// The alert is critical when the system is critical or a metric is at
    /// least twice its threshold.
    pub fn evaluate(&self, snapshot: &SystemHealthSnapshot) -> Option<Alert> {
        let metrics = &snapshot.metrics;
        let error_threshold = self.config.error_rate;
        let latency_threshold = self.config.latency_ms as f64;

        let mut breaches = Vec::new();
        let mut severe = snapshot.overall == OverallStatus::Critical;
        if metrics.error_rate > error_threshold {
            breaches.push(format!(
                "error rate {:.1}% exceeds threshold {:.1}%",
                metrics.error_rate * 100.0,
                error_threshold * 100.0
            ));
            severe |= metrics.error_rate >= error_threshold * 2.0;
        }
        if metrics.average_latency_ms > latency_threshold {
            breaches.push(format!(
                "average latency {:.0}ms exceeds threshold {}ms",
                metrics.average_latency_ms, self.config.latency_ms
            ));
            severe |= metrics.average_latency_ms >= latency_threshold * 2.0;
        }
        if breaches.is_empty() {
            return None;
        }

        let level = if severe {
            AlertLevel::Critical
        } else {
            AlertLevel::Warning
        };
        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            level,
            message: breaches.join("; "),
            timestamp: Utc::now(),
            health_snapshot: snapshot.clone(),
        };
        warn!(
            alert_id = %alert.id,
            level = level.as_str(),
            overall = %snapshot.overall,
            "{}",
            alert.message
        );
        self.record(alert.clone());
        self.events.emit(&GatewayEvent::AlertRaised {
            alert_id: alert.id.clone(),
            level,
            message: alert.message.clone(),
        });
        Some(alert)
    }

    fn record(&self, alert: Alert) {
        let mut log = self.log.lock();
        if log.len() == MAX_ALERTS {
            log.pop_front();
        }
        log.push_back(alert);
    }

    /// POST `alert` to every webhook on its own task.
    ///
    /// The handles are returned for callers that want to wait; dropping
    /// them does not cancel delivery.
    pub fn dispatch(&self, alert: &Alert) -> Vec<JoinHandle<()>> {
        self.config
            .webhooks
            .iter()
            .map(|url| {
                let client = self.client.clone();
                let url = url.clone();
                let alert = alert.clone();
                tokio::spawn(async move {
                    let sent = client
                        .post(&url)
                        .json(&alert)
                        .send()
                        .await
                        .and_then(|resp| resp.error_for_status());
                    match sent {
                        Ok(resp) => {
                            debug!(url = %url, alert_id = %alert.id, status = %resp.status(), "alert delivered")
                        }
                        Err(err) => {
                            warn!(url = %url, alert_id = %alert.id, error = %err, "alert webhook failed")
                        }
                    }
                })
            })
            .collect()
    }

    /// Drop alerts older than the retention window. Returns how many went.
    pub fn prune(&self) -> usize {
        let retention = chrono::Duration::hours(self.config.retention_hours as i64);
        let cutoff = Utc::now() - retention;
        let mut log = self.log.lock();
        let before = log.len();
        log.retain(|alert| alert.timestamp >= cutoff);
        let pruned = before - log.len();
        if pruned > 0 {
            debug!(pruned, "pruned aged alerts");
        }
        pruned
    }

    /// Logged alerts, oldest first.
    pub fn recent(&self) -> Vec<Alert> {
        self.log.lock().iter().cloned().collect()
    }
}

//! Gateway events and the [`EventSink`] observer interface.
//!
//! Every component that changes observable state (breakers, the executor,
//! health checks, alerts) reports it through an `Arc<dyn EventSink>`. The
//! health aggregator is one sink; [`BroadcastSink`] fans events out to
//! external subscribers.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use relaygate_types::HealthCheckResult;

use crate::alerts::AlertLevel;
use crate::classifier::ErrorCategory;

/// Something observable happened inside the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A backend was added to the registry.
    BackendRegistered { backend: String },

    /// A backend call succeeded.
    ExecutionSucceeded {
        backend: String,
        latency_ms: u64,
        /// Zero-based attempt index within the logical call.
        attempt: u32,
    },

    /// A backend call failed.
    ExecutionFailed {
        backend: String,
        latency_ms: u64,
        category: ErrorCategory,
        retryable: bool,
        message: String,
    },

    /// A circuit breaker opened.
    CircuitOpened {
        backend: String,
        failure_count: u32,
        threshold: u32,
    },

    /// A circuit breaker closed after its cool-down.
    CircuitClosed { backend: String },

    /// A recurring error pattern lowered a backend's failure threshold.
    ThresholdLowered {
        backend: String,
        category: ErrorCategory,
        threshold: u32,
    },

    /// An out-of-band health check completed.
    HealthChecked {
        backend: String,
        result: HealthCheckResult,
    },

    /// An alert was raised.
    AlertRaised {
        alert_id: String,
        level: AlertLevel,
        message: String,
    },

    /// The emergency backend was called after normal fallback was spent.
    EmergencyFallback { backend: String, success: bool },

    /// A failed stream is being reopened.
    StreamReconnect {
        backend: String,
        reconnect: u32,
        delay_ms: u64,
    },

    /// A routing decision took longer than the configured budget.
    RoutingBudgetExceeded { routing_time_ms: f64, budget_ms: u64 },
}

impl GatewayEvent {
    /// Backend the event concerns, if any.
    pub fn backend(&self) -> Option<&str> {
        match self {
            GatewayEvent::BackendRegistered { backend }
            | GatewayEvent::ExecutionSucceeded { backend, .. }
            | GatewayEvent::ExecutionFailed { backend, .. }
            | GatewayEvent::CircuitOpened { backend, .. }
            | GatewayEvent::CircuitClosed { backend }
            | GatewayEvent::ThresholdLowered { backend, .. }
            | GatewayEvent::HealthChecked { backend, .. }
            | GatewayEvent::EmergencyFallback { backend, .. }
            | GatewayEvent::StreamReconnect { backend, .. } => Some(backend),
            GatewayEvent::AlertRaised { .. } | GatewayEvent::RoutingBudgetExceeded { .. } => None,
        }
    }
}

/// Receives gateway events.
///
/// Implementations must be cheap and must not block: `emit` is called on
/// the request path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GatewayEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &GatewayEvent) {}
}

/// Publishes events on a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest events; the sender never waits.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<GatewayEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &GatewayEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event.clone());
    }
}

/// Forwards every event to each inner sink, in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &GatewayEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Records every event. Test helper shared by the module tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub events: parking_lot::Mutex<Vec<GatewayEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn take(&self) -> Vec<GatewayEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn emit(&self, event: &GatewayEvent) {
        self.events.lock().push(event.clone());
    }
}

//! Per-backend circuit breakers.
//!
//! Each backend has a consecutive-failure counter. When the counter reaches
//! the backend's threshold the circuit opens and the router stops
//! considering the backend until the cool-down elapses, at which point it
//! closes fully (there is no half-open trial call). Expiry is checked lazily on
//! every read and by a periodic [`sweep_expired`](CircuitBreakerBank::sweep_expired).
//!
//! Times come from `tokio::time::Instant`, so tests drive cool-downs with a
//! paused clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{EventSink, GatewayEvent};

/// Thresholds are never tuned below this.
pub const MIN_TUNED_THRESHOLD: u32 = 2;

#[derive(Debug, Clone)]
struct BreakerState {
    failure_count: u32,
    threshold: u32,
    opened_at: Option<Instant>,
    last_failure: Option<DateTime<Utc>>,
    total_successes: u64,
    total_failures: u64,
}

impl BreakerState {
    fn new(threshold: u32) -> Self {
        Self {
            failure_count: 0,
            threshold,
            opened_at: None,
            last_failure: None,
            total_successes: 0,
            total_failures: 0,
        }
    }

    fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    /// Close the circuit if the cool-down has elapsed. Returns `true` if it
    /// closed.
    fn expire(&mut self, cooldown: Duration, now: Instant) -> bool {
        match self.opened_at {
            Some(opened) if now.saturating_duration_since(opened) >= cooldown => {
                self.opened_at = None;
                self.failure_count = 0;
                true
            }
            _ => false,
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub backend: String,
    pub failure_count: u32,
    pub threshold: u32,
    pub open: bool,
    pub last_failure: Option<DateTime<Utc>>,
    pub total_successes: u64,
    pub total_failures: u64,
}

/// All circuit breakers, keyed by backend id.
///
/// State for an unseen backend is created on first touch with the default
/// threshold.
pub struct CircuitBreakerBank {
    states: DashMap<String, BreakerState>,
    default_threshold: u32,
    cooldown: Duration,
    events: Arc<dyn EventSink>,
}

impl CircuitBreakerBank {
    pub fn new(default_threshold: u32, cooldown: Duration, events: Arc<dyn EventSink>) -> Self {
        Self {
            states: DashMap::new(),
            default_threshold: default_threshold.max(1),
            cooldown,
            events,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Make sure `backend` has a breaker.
    pub fn register(&self, backend: &str) {
        self.states
            .entry(backend.to_string())
            .or_insert_with(|| BreakerState::new(self.default_threshold));
    }

    /// Record a successful call. A closed breaker forgives one failure; an
    /// open one stays open until its cool-down.
    pub fn record_success(&self, backend: &str) {
        let closed = {
            let mut state = self.state_mut(backend);
            let closed = state.expire(self.cooldown, Instant::now());
            state.total_successes += 1;
            if !state.is_open() {
                state.failure_count = state.failure_count.saturating_sub(1);
            }
            closed
        };
        if closed {
            self.emit_closed(backend);
        }
    }

    /// Record a failed call. Returns `true` if this failure opened the
    /// circuit.
    pub fn record_failure(&self, backend: &str) -> bool {
        let now = Instant::now();
        let (closed, opened, failure_count, threshold) = {
            let mut state = self.state_mut(backend);
            let closed = state.expire(self.cooldown, now);
            state.failure_count = state.failure_count.saturating_add(1);
            state.total_failures += 1;
            state.last_failure = Some(Utc::now());

            let opened = !state.is_open() && state.failure_count >= state.threshold;
            if opened {
                state.opened_at = Some(now);
            }
            (closed, opened, state.failure_count, state.threshold)
        };

        if closed {
            self.emit_closed(backend);
        }
        if opened {
            warn!(
                backend,
                failure_count,
                threshold,
                cooldown_secs = self.cooldown.as_secs(),
                "circuit opened"
            );
            self.events.emit(&GatewayEvent::CircuitOpened {
                backend: backend.to_string(),
                failure_count,
                threshold,
            });
        } else {
            debug!(backend, failure_count, threshold, "failure recorded");
        }
        opened
    }

    /// Whether the circuit for `backend` is currently open.
    ///
    /// An elapsed cool-down is applied before answering.
    pub fn is_open(&self, backend: &str) -> bool {
        let (open, closed) = match self.states.get_mut(backend) {
            Some(mut state) => {
                let closed = state.expire(self.cooldown, Instant::now());
                (state.is_open(), closed)
            }
            None => (false, false),
        };
        if closed {
            self.emit_closed(backend);
        }
        open
    }

    pub fn failure_count(&self, backend: &str) -> u32 {
        self.is_open(backend);
        self.states.get(backend).map_or(0, |s| s.failure_count)
    }

    pub fn threshold(&self, backend: &str) -> u32 {
        self.states
            .get(backend)
            .map_or(self.default_threshold, |s| s.threshold)
    }

    /// Lower the backend's threshold by one, not below
    /// [`MIN_TUNED_THRESHOLD`]. Returns the resulting threshold.
    pub fn lower_threshold(&self, backend: &str) -> u32 {
        let mut state = self.state_mut(backend);
        if state.threshold > MIN_TUNED_THRESHOLD {
            state.threshold -= 1;
            info!(backend, threshold = state.threshold, "failure threshold lowered");
        }
        state.threshold
    }

    pub fn snapshot(&self, backend: &str) -> Option<BreakerSnapshot> {
        self.is_open(backend);
        self.states.get(backend).map(|s| to_snapshot(backend, &s))
    }

    /// Snapshots of every breaker, sorted by backend id.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.sweep_expired();
        let mut all: Vec<BreakerSnapshot> = self
            .states
            .iter()
            .map(|entry| to_snapshot(entry.key(), entry.value()))
            .collect();
        all.sort_by(|a, b| a.backend.cmp(&b.backend));
        all
    }

    /// Close every circuit whose cool-down has elapsed. Returns the ids
    /// that closed.
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let mut closed = Vec::new();
        for mut entry in self.states.iter_mut() {
            if entry.value_mut().expire(self.cooldown, now) {
                closed.push(entry.key().clone());
            }
        }
        for backend in &closed {
            self.emit_closed(backend);
        }
        closed
    }

    fn state_mut(&self, backend: &str) -> dashmap::mapref::one::RefMut<'_, String, BreakerState> {
        self.states
            .entry(backend.to_string())
            .or_insert_with(|| BreakerState::new(self.default_threshold))
    }

    fn emit_closed(&self, backend: &str) {
        info!(backend, "circuit closed after cool-down");
        self.events.emit(&GatewayEvent::CircuitClosed {
            backend: backend.to_string(),
        });
    }
}

fn to_snapshot(backend: &str, state: &BreakerState) -> BreakerSnapshot {
    BreakerSnapshot {
        backend: backend.to_string(),
        failure_count: state.failure_count,
        threshold: state.threshold,
        open: state.is_open(),
        last_failure: state.last_failure,
        total_successes: state.total_successes,
        total_failures: state.total_failures,
    }
}

//! # relaygate-core
//!
//! Routing and resilience engine for the relaygate model gateway.
//!
//! Given a [`GenerationRequest`](relaygate_types::GenerationRequest) and a
//! set of registered backends, the engine decides which backend serves it,
//! executes the call with retries, fallback and circuit breaking, and keeps
//! a continuously updated picture of system health.
//!
//! # Modules
//!
//! - **[`registry`]** -- registered backends and capability inference
//! - **[`scoring`]** -- routing strategies and the normalized score factors
//! - **[`router`]** -- the [`RoutingEngine`] and [`RoutingDecision`]
//! - **[`cache`]** -- time-bounded routing-decision cache
//! - **[`breaker`]** -- per-backend circuit breakers
//! - **[`performance`]** -- latency ring buffers and percentiles
//! - **[`classifier`]** -- error classification and threshold tuning
//! - **[`history`]** -- per-backend fallback outcome history
//! - **[`retry`]** -- backoff policy
//! - **[`executor`]** -- the retry/fallback loop for one-shot calls
//! - **[`stream`]** -- stream recovery with bounded reconnects
//! - **[`health`]** -- the health aggregator and system snapshots
//! - **[`alerts`]** -- threshold alerts and webhook delivery
//! - **[`events`]** -- the [`EventSink`] observer interface
//! - **[`gateway`]** -- the [`Gateway`] facade and its background tasks
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use relaygate_core::Gateway;
//! use relaygate_types::{GatewayConfig, GenerationRequest};
//!
//! let gateway = Gateway::builder(GatewayConfig::default())
//!     .backend(Arc::new(my_backend))
//!     .build()?;
//! gateway.start();
//! let outcome = gateway.generate(&GenerationRequest::new("Hello")).await?;
//! println!("{}", outcome.response.content);
//! ```

pub mod alerts;
pub mod backend;
pub mod breaker;
pub mod cache;
pub mod classifier;
pub mod credentials;
pub mod error;
pub mod events;
pub mod executor;
pub mod gateway;
pub mod health;
pub mod history;
pub mod performance;
pub mod registry;
pub mod retry;
pub mod router;
pub mod scoring;
pub mod stream;

#[cfg(test)]
mod testing;

pub use alerts::{Alert, AlertLevel, AlertManager};
pub use backend::{Backend, DescriptorOnly};
pub use breaker::{BreakerSnapshot, CircuitBreakerBank};
pub use classifier::{ErrorCategory, ErrorClassifier};
pub use credentials::{CredentialError, CredentialProvider, StaticCredentials};
pub use error::{BackendError, GatewayError, Result};
pub use events::{BroadcastSink, EventSink, FanoutSink, GatewayEvent, NoopSink};
pub use executor::{ExecutionOutcome, FallbackExecutor};
pub use gateway::{Gateway, GatewayBuilder};
pub use health::{HealthAggregator, OverallStatus, SystemHealthSnapshot};
pub use registry::CapabilityRegistry;
pub use router::{RoutingDecision, RoutingEngine};
pub use scoring::{CustomScorer, RoutingStrategy, ScoreFactors};
pub use stream::{StreamItem, StreamRecovery, StreamSummary};

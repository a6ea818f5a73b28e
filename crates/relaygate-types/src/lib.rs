//! # relaygate-types
//!
//! Shared type definitions for the relaygate model gateway.
//!
//! This crate sits at the bottom of the dependency graph and carries no
//! runtime behaviour beyond validation and parsing:
//!
//! - **[`capability`]** -- [`Capability`] tags and [`CapabilitySet`]
//! - **[`backend`]** -- [`BackendDescriptor`], [`UserTier`], [`Priority`]
//! - **[`request`]** -- generation requests, responses and stream chunks
//! - **[`health`]** -- health-check results reported by backends
//! - **[`secret`]** -- the opaque [`Credential`] wrapper
//! - **[`config`]** -- the [`GatewayConfig`] schema and file loading

pub mod backend;
pub mod capability;
pub mod config;
pub mod health;
pub mod request;
pub mod secret;

pub use backend::{BackendDescriptor, Priority, UserTier};
pub use capability::{Capability, CapabilitySet};
pub use config::{
    AlertConfig, ConfigError, GatewayConfig, RetryBackoff, StrategyKind, TierBudgets,
};
pub use health::{HealthCheckResult, HealthStatus};
pub use request::{GenerationRequest, GenerationResponse, StreamChunk, Usage};
pub use secret::Credential;

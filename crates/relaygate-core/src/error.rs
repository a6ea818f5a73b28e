//! Error types for relaygate-core.
//!
//! Backends report failures as [`BackendError`]; everything the gateway
//! hands back to callers is a [`GatewayError`], wrapped in [`Result<T>`].

use relaygate_types::{CapabilitySet, ConfigError};
use thiserror::Error;

/// A failure reported by a backend call.
///
/// `retryable` is the backend's own judgement: network blips, timeouts and
/// rate limits are retryable; malformed requests and policy rejections are
/// not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct BackendError {
    /// Short machine-readable code (e.g. `"timeout"`, `"http_503"`).
    pub code: String,
    /// Human-readable description. Used for error classification.
    pub message: String,
    /// Whether another attempt (possibly on another backend) may succeed.
    pub retryable: bool,
}

impl BackendError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }

    /// A transient failure worth retrying.
    pub fn retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, true)
    }

    /// A failure no retry will fix.
    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, false)
    }

    /// The call exceeded its deadline. Always retryable.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new("timeout", message, true)
    }
}

/// Errors surfaced by the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No registered backend declares every required capability.
    #[error("no registered backend supports the required capabilities [{required}]")]
    NoCapableBackend {
        /// Capabilities the request needed.
        required: CapabilitySet,
    },

    /// Capable backends exist but every one of them has an open circuit.
    #[error("all capable backends are unavailable (open circuits: {})", candidates.join(", "))]
    AllBackendsUnavailable {
        /// Ids of the capable backends whose circuits are open.
        candidates: Vec<String>,
    },

    /// A backend with this id is already registered.
    #[error("backend already registered: {0}")]
    DuplicateBackend(String),

    /// A backend id was referenced that is not registered.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// Retries, fallback and the emergency backend were all spent.
    #[error("backend {backend} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        /// Backend that produced the final error.
        backend: String,
        /// Number of backend calls made.
        attempts: u32,
        /// The final backend error.
        #[source]
        source: BackendError,
    },

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The gateway configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl GatewayError {
    /// The final backend error, if this error wraps one.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            GatewayError::Exhausted { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether this is a routing failure (no backend could even be chosen).
    pub fn is_routing_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::NoCapableBackend { .. } | GatewayError::AllBackendsUnavailable { .. }
        )
    }
}

/// A convenience type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

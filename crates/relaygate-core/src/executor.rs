//! The fallback/retry executor.
//!
//! Each attempt asks the router for a fresh decision (breaker and cache
//! state may have moved since the last one), invokes the chosen backend and
//! records the outcome. Retryable failures back off and try again, steered
//! by the static fallback chain; once the budget is spent the emergency
//! backend gets one direct call.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relaygate_types::{Credential, GatewayConfig, GenerationRequest, GenerationResponse};

use crate::backend::Backend;
use crate::breaker::CircuitBreakerBank;
use crate::classifier::{ErrorCategory, ErrorClassifier};
use crate::credentials::CredentialProvider;
use crate::error::{BackendError, GatewayError, Result};
use crate::events::{EventSink, GatewayEvent};
use crate::history::FallbackHistory;
use crate::performance::PerformanceTracker;
use crate::registry::CapabilityRegistry;
use crate::retry::RetryPolicy;
use crate::router::{RoutingDecision, RoutingEngine};

/// Why a backend call did not produce a response.
#[derive(Debug)]
pub(crate) enum Interrupt {
    Cancelled,
    /// The id is not registered. Nothing is recorded against it.
    Unknown(String),
    Failed(BackendError),
}

/// Shared plumbing for one backend attempt: lookup, credentials, and
/// outcome bookkeeping. Used by both the executor and the stream wrapper.
pub struct AttemptContext {
    registry: Arc<CapabilityRegistry>,
    breakers: Arc<CircuitBreakerBank>,
    performance: Arc<PerformanceTracker>,
    classifier: Arc<ErrorClassifier>,
    history: Arc<FallbackHistory>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    events: Arc<dyn EventSink>,
}

impl AttemptContext {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        breakers: Arc<CircuitBreakerBank>,
        performance: Arc<PerformanceTracker>,
        classifier: Arc<ErrorClassifier>,
        history: Arc<FallbackHistory>,
        credentials: Option<Arc<dyn CredentialProvider>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            breakers,
            performance,
            classifier,
            history,
            credentials,
            events,
        }
    }

    pub(crate) fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Look up the backend and fetch its credential.
    pub(crate) async fn resolve(
        &self,
        backend_id: &str,
    ) -> std::result::Result<(Arc<dyn Backend>, Option<Credential>), Interrupt> {
        let backend = self
            .registry
            .backend(backend_id)
            .ok_or_else(|| Interrupt::Unknown(backend_id.to_string()))?;
        let credential = match &self.credentials {
            Some(provider) => Some(
                provider
                    .get_credential(backend_id)
                    .await
                    .map_err(|err| Interrupt::Failed(err.into()))?,
            ),
            None => None,
        };
        Ok((backend, credential))
    }

    async fn call(
        &self,
        backend_id: &str,
        request: &GenerationRequest,
    ) -> std::result::Result<GenerationResponse, Interrupt> {
        let (backend, credential) = self.resolve(backend_id).await?;
        backend
            .execute(request, credential.as_ref())
            .await
            .map_err(Interrupt::Failed)
    }

    /// Invoke `backend_id` once, racing the cancellation token.
    pub(crate) async fn invoke(
        &self,
        backend_id: &str,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<GenerationResponse, Interrupt> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Cancelled),
            result = self.call(backend_id, request) => result,
        }
    }

    pub(crate) fn record_success(&self, backend: &str, latency_ms: u64, attempt: u32) {
        self.breakers.record_success(backend);
        self.performance.record(backend, latency_ms);
        self.history.record(backend, true);
        self.events.emit(&GatewayEvent::ExecutionSucceeded {
            backend: backend.to_string(),
            latency_ms,
            attempt,
        });
    }

    /// Classify the failure first so a lowered threshold applies to this
    /// very failure.
    pub(crate) fn record_failure(
        &self,
        backend: &str,
        latency_ms: u64,
        error: &BackendError,
    ) -> ErrorCategory {
        let category = self.classifier.record(backend, error);
        self.breakers.record_failure(backend);
        self.history.record(backend, false);
        self.events.emit(&GatewayEvent::ExecutionFailed {
            backend: backend.to_string(),
            latency_ms,
            category,
            retryable: error.retryable,
            message: error.message.clone(),
        });
        category
    }
}

/// Sleep for `delay` unless `cancel` fires first.
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// A successful generation and how it was reached.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub response: GenerationResponse,
    /// The decision behind the successful attempt. `None` when the
    /// emergency backend answered.
    pub decision: Option<RoutingDecision>,
    /// Backend calls made, including the successful one.
    pub attempts: u32,
    /// Whether the emergency backend produced the response.
    pub emergency: bool,
}

/// Runs one-shot generations with retry, fallback and emergency rescue.
pub struct FallbackExecutor {
    engine: Arc<RoutingEngine>,
    context: Arc<AttemptContext>,
    policy: RetryPolicy,
    fallback_chain: Vec<String>,
    emergency: Option<String>,
}

impl FallbackExecutor {
    pub fn new(
        engine: Arc<RoutingEngine>,
        context: Arc<AttemptContext>,
        policy: RetryPolicy,
        fallback_chain: Vec<String>,
        emergency: Option<String>,
    ) -> Self {
        Self {
            engine,
            context,
            policy,
            fallback_chain,
            emergency,
        }
    }

    pub fn from_config(
        engine: Arc<RoutingEngine>,
        context: Arc<AttemptContext>,
        config: &GatewayConfig,
    ) -> Self {
        Self::new(
            engine,
            context,
            RetryPolicy::from_config(config),
            config.fallback_chain.clone(),
            config.emergency_fallback.clone(),
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `request`.
    ///
    /// # Errors
    ///
    /// - Routing errors from the first decision surface unchanged.
    /// - A non-retryable backend error stops immediately and is returned
    ///   as [`GatewayError::Exhausted`].
    /// - When retries (and the emergency backend) are spent, the last
    ///   backend error is returned as [`GatewayError::Exhausted`].
    /// - [`GatewayError::UnknownBackend`] if the emergency backend is not
    ///   registered.
    /// - [`GatewayError::Cancelled`] if `cancel` fires.
    pub async fn execute(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let mut working = request.clone();
        let mut chain: VecDeque<String> = self.fallback_chain.iter().cloned().collect();
        let mut last_failure: Option<(String, BackendError)> = None;
        let mut attempts = 0u32;
        let mut attempt = 0u32;

        let (failed_backend, last_error) = loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let decision = match self.engine.decide(&working) {
                Ok(decision) => decision,
                Err(err) => match last_failure.take() {
                    Some(failure) => {
                        warn!(error = %err, attempt, "no backend left to retry on");
                        break failure;
                    }
                    None => return Err(err),
                },
            };

            let backend = decision.selected_backend.clone();
            attempts += 1;
            let started = Instant::now();
            match self.context.invoke(&backend, &working, cancel).await {
                Ok(mut response) => {
                    let latency_ms = elapsed_ms(started);
                    response.latency_ms = latency_ms;
                    self.context.record_success(&backend, latency_ms, attempt);
                    if attempt > 0 {
                        debug!(backend = %backend, attempt, "request succeeded after retry");
                    }
                    return Ok(ExecutionOutcome {
                        response,
                        decision: Some(decision),
                        attempts,
                        emergency: false,
                    });
                }
                Err(Interrupt::Cancelled) => return Err(GatewayError::Cancelled),
                Err(Interrupt::Unknown(id)) => return Err(GatewayError::UnknownBackend(id)),
                Err(Interrupt::Failed(err)) => {
                    self.context
                        .record_failure(&backend, elapsed_ms(started), &err);
                    if !err.retryable {
                        return Err(GatewayError::Exhausted {
                            backend,
                            attempts,
                            source: err,
                        });
                    }
                    if attempt >= self.policy.max_retries {
                        break (backend, err);
                    }

                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        backend = %backend,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after backend failure"
                    );
                    last_failure = Some((backend, err));
                    sleep_or_cancel(delay, cancel).await?;

                    if let Some(next) = chain.pop_front() {
                        working.preferred_backend = Some(next);
                    }
                    working.retry_count += 1;
                    attempt += 1;
                }
            }
        };

        if let Some(emergency) = &self.emergency {
            warn!(
                backend = %emergency,
                attempts,
                last_backend = %failed_backend,
                "retries exhausted, calling emergency backend"
            );
            let started = Instant::now();
            match self.context.invoke(emergency, &working, cancel).await {
                Ok(mut response) => {
                    let latency_ms = elapsed_ms(started);
                    response.latency_ms = latency_ms;
                    self.context.record_success(emergency, latency_ms, attempt + 1);
                    self.emit_emergency(emergency, true);
                    return Ok(ExecutionOutcome {
                        response,
                        decision: None,
                        attempts: attempts + 1,
                        emergency: true,
                    });
                }
                Err(Interrupt::Cancelled) => return Err(GatewayError::Cancelled),
                Err(Interrupt::Unknown(id)) => {
                    warn!(backend = %id, "emergency backend is not registered");
                    return Err(GatewayError::UnknownBackend(id));
                }
                Err(Interrupt::Failed(err)) => {
                    self.context
                        .record_failure(emergency, elapsed_ms(started), &err);
                    self.emit_emergency(emergency, false);
                    warn!(backend = %emergency, error = %err, "emergency backend failed");
                }
            }
        }

        Err(GatewayError::Exhausted {
            backend: failed_backend,
            attempts,
            source: last_error,
        })
    }

    fn emit_emergency(&self, backend: &str, success: bool) {
        self.context.events().emit(&GatewayEvent::EmergencyFallback {
            backend: backend.to_string(),
            success,
        });
    }
}

//! Shared fixtures for the gateway integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use relaygate_core::{Backend, BackendError, Gateway};
use relaygate_types::{
    BackendDescriptor, Capability, Credential, GatewayConfig, GenerationRequest,
    GenerationResponse, HealthCheckResult, HealthStatus, RetryBackoff, StreamChunk,
};

/// In-process backend with scripted behaviour.
pub struct MockBackend {
    descriptor: BackendDescriptor,
    script: Mutex<VecDeque<Result<(), BackendError>>>,
    default: Result<(), BackendError>,
    stream_failures: AtomicU32,
    health: Option<HealthStatus>,
    delay: Duration,
    calls: AtomicU32,
}

impl MockBackend {
    /// Succeeds on every call.
    pub fn healthy(id: &str) -> Self {
        Self::build(id, Ok(()))
    }

    /// Fails every call with a retryable network error.
    pub fn broken(id: &str) -> Self {
        Self::build(
            id,
            Err(BackendError::retryable("503", "upstream connection reset")),
        )
    }

    /// Fails every call with `error`.
    pub fn failing_with(id: &str, error: BackendError) -> Self {
        Self::build(id, Err(error))
    }

    fn build(id: &str, default: Result<(), BackendError>) -> Self {
        Self {
            descriptor: BackendDescriptor::new(id, [Capability::Text, Capability::Streaming]),
            script: Mutex::new(VecDeque::new()),
            default,
            stream_failures: AtomicU32::new(0),
            health: None,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Declare `text` plus `caps`.
    pub fn with_capabilities(mut self, caps: &[Capability]) -> Self {
        let caps = std::iter::once(Capability::Text).chain(caps.iter().copied());
        self.descriptor = BackendDescriptor::new(self.descriptor.id.clone(), caps);
        self
    }

    pub fn with_descriptor(mut self, update: impl FnOnce(BackendDescriptor) -> BackendDescriptor) -> Self {
        self.descriptor = update(self.descriptor);
        self
    }

    /// Fail the first `n` calls with a retryable error, then use the default.
    pub fn failing_first(self, n: usize) -> Self {
        self.script.lock().extend(
            std::iter::repeat_with(|| Err(BackendError::retryable("503", "temporarily overloaded")))
                .take(n),
        );
        self
    }

    /// Drop the first `n` streams after one delta.
    pub fn with_stream_failures(self, n: u32) -> Self {
        self.stream_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_health(mut self, status: HealthStatus) -> Self {
        self.health = Some(status);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        _request: &GenerationRequest,
        _credential: Option<&Credential>,
    ) -> Result<GenerationResponse, BackendError> {
        let outcome = self.next();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        outcome.map(|()| GenerationResponse::text(&self.descriptor.id, format!("hello from {}", self.descriptor.id)))
    }

    async fn stream(
        &self,
        _request: &GenerationRequest,
        _credential: Option<&Credential>,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<(), BackendError> {
        self.next()?;
        let id = &self.descriptor.id;
        let _ = tx.send(StreamChunk::text(id, "hello ")).await;
        let remaining = self.stream_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.stream_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::retryable("reset", "stream connection dropped"));
        }
        let _ = tx.send(StreamChunk::text(id, "world")).await;
        let _ = tx.send(StreamChunk::done(id)).await;
        Ok(())
    }

    fn supports_health_check(&self) -> bool {
        self.health.is_some()
    }

    async fn health_check(&self) -> HealthCheckResult {
        match self.health {
            Some(HealthStatus::Unhealthy) => HealthCheckResult::failed("health check failed"),
            Some(status) => HealthCheckResult::new(status, 5),
            None => HealthCheckResult::unknown(),
        }
    }
}

/// Fixed 100 ms backoff, one retry, default everything else.
pub fn fast_config() -> GatewayConfig {
    GatewayConfig {
        max_retries: 1,
        retry_delay_ms: 100,
        retry_backoff: RetryBackoff::Fixed,
        reconnect_delay_ms: 100,
        ..Default::default()
    }
}

pub fn gateway(config: GatewayConfig, backends: &[Arc<MockBackend>]) -> Gateway {
    let mut builder = Gateway::builder(config);
    for backend in backends {
        builder = builder.backend(backend.clone());
    }
    builder.build().expect("gateway should build")
}

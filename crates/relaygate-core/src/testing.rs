//! Scripted backends shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use relaygate_types::{
    BackendDescriptor, Capability, Credential, GenerationRequest, GenerationResponse,
    HealthCheckResult, StreamChunk,
};

use crate::backend::Backend;
use crate::error::BackendError;

/// One scripted stream: the deltas to send, then an optional failure.
#[derive(Debug, Clone)]
pub(crate) struct StreamPlan {
    pub deltas: Vec<String>,
    pub error: Option<BackendError>,
}

/// A backend whose outcomes are queued up front.
///
/// Once the script runs out, every call returns `default`.
pub(crate) struct ScriptedBackend {
    descriptor: BackendDescriptor,
    script: Mutex<VecDeque<Result<(), BackendError>>>,
    default: Result<(), BackendError>,
    streams: Mutex<VecDeque<StreamPlan>>,
    health: Option<HealthCheckResult>,
    delay: Duration,
    calls: AtomicU32,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn ok(id: &str, caps: &[Capability]) -> Self {
        Self::with_default(id, caps, Ok(()))
    }

    pub fn failing(id: &str, caps: &[Capability], error: BackendError) -> Self {
        Self::with_default(id, caps, Err(error))
    }

    fn with_default(id: &str, caps: &[Capability], default: Result<(), BackendError>) -> Self {
        Self {
            descriptor: BackendDescriptor::new(
                id,
                std::iter::once(Capability::Text).chain(caps.iter().copied()),
            ),
            script: Mutex::new(VecDeque::new()),
            default,
            streams: Mutex::new(VecDeque::new()),
            health: None,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Queue outcomes served before the default.
    pub fn then(self, outcomes: impl IntoIterator<Item = Result<(), BackendError>>) -> Self {
        self.script.lock().extend(outcomes);
        self
    }

    pub fn with_stream(self, plan: StreamPlan) -> Self {
        self.streams.lock().push_back(plan);
        self
    }

    pub fn with_health(mut self, result: HealthCheckResult) -> Self {
        self.health = Some(result);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().clone()
    }

    fn next_outcome(&self, request: &GenerationRequest) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        _credential: Option<&Credential>,
    ) -> Result<GenerationResponse, BackendError> {
        let outcome = self.next_outcome(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        outcome.map(|()| GenerationResponse::text(&self.descriptor.id, format!("from {}", self.descriptor.id)))
    }

    async fn stream(
        &self,
        request: &GenerationRequest,
        _credential: Option<&Credential>,
        tx: mpsc::Sender<StreamChunk>,
    ) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());
        let plan = self.streams.lock().pop_front().unwrap_or(StreamPlan {
            deltas: vec![format!("from {}", self.descriptor.id)],
            error: None,
        });
        for delta in plan.deltas {
            if tx.send(StreamChunk::text(&self.descriptor.id, delta)).await.is_err() {
                return Ok(());
            }
        }
        if let Some(err) = plan.error {
            return Err(err);
        }
        let _ = tx.send(StreamChunk::done(&self.descriptor.id)).await;
        Ok(())
    }

    fn supports_health_check(&self) -> bool {
        self.health.is_some()
    }

    async fn health_check(&self) -> HealthCheckResult {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.health.clone().unwrap_or_else(HealthCheckResult::unknown)
    }
}

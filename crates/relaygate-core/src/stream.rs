//! Stream recovery.
//!
//! [`StreamRecovery`] opens a backend stream and forwards chunks to the
//! consumer one at a time through a capacity-1 hand-off, so a slow consumer
//! applies backpressure all the way to the backend. A retryable stream
//! failure is retried after `reconnect_delay * (n + 1)`, at most
//! `max_reconnects` times per logical call. Each reconnect asks the router
//! again, so it may land on a different backend.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relaygate_types::{GatewayConfig, GenerationRequest, StreamChunk};

use crate::error::{BackendError, GatewayError, Result};
use crate::events::GatewayEvent;
use crate::executor::{AttemptContext, Interrupt, elapsed_ms};
use crate::router::RoutingEngine;

/// What the consumer end of a gateway stream receives.
pub type StreamItem = Result<StreamChunk>;

/// How a stream ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    /// Backend that served the final attempt.
    pub backend: String,
    /// Chunks forwarded to the consumer across all attempts.
    pub chunks: usize,
    pub reconnects: u32,
    /// `false` when the consumer hung up before the stream finished.
    pub completed: bool,
}

enum StreamFailure {
    Cancelled,
    ConsumerGone,
    Unknown(String),
    Backend(BackendError),
}

impl From<Interrupt> for StreamFailure {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => StreamFailure::Cancelled,
            Interrupt::Unknown(id) => StreamFailure::Unknown(id),
            Interrupt::Failed(err) => StreamFailure::Backend(err),
        }
    }
}

/// Streams generations with bounded reconnects.
pub struct StreamRecovery {
    engine: Arc<RoutingEngine>,
    context: Arc<AttemptContext>,
    max_reconnects: u32,
    reconnect_delay: Duration,
}

impl StreamRecovery {
    pub fn new(
        engine: Arc<RoutingEngine>,
        context: Arc<AttemptContext>,
        max_reconnects: u32,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            engine,
            context,
            max_reconnects,
            reconnect_delay,
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
            config.max_reconnects,
            Duration::from_millis(config.reconnect_delay_ms),
        )
    }

    /// Run the stream on a background task and hand back its receiver.
    ///
    /// A terminal error is delivered as the last item.
    pub fn spawn(
        self: &Arc<Self>,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamItem> {
        let (tx, rx) = mpsc::channel(1);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.execute_stream(&request, tx.clone(), &cancel).await {
                warn!(error = %err, "stream terminated with error");
                let _ = tx.send(Err(err)).await;
            }
        });
        rx
    }

    /// Stream `request` into `tx`.
    ///
    /// # Errors
    ///
    /// Routing errors from the initial decision, [`GatewayError::Exhausted`]
    /// when a non-retryable error occurs or the reconnect budget is spent,
    /// and [`GatewayError::Cancelled`]. Errors are returned, not sent.
    pub async fn execute_stream(
        &self,
        request: &GenerationRequest,
        tx: mpsc::Sender<StreamItem>,
        cancel: &CancellationToken,
    ) -> Result<StreamSummary> {
        let mut working = request.clone();
        working.stream = true;
        let mut decision = self.engine.decide(&working)?;
        let mut reconnects = 0u32;
        let mut chunks = 0usize;

        loop {
            let backend = decision.selected_backend.clone();
            let started = Instant::now();
            let failure = match self
                .stream_once(&backend, &working, &tx, cancel, &mut chunks)
                .await
            {
                Ok(()) => {
                    self.context
                        .record_success(&backend, elapsed_ms(started), reconnects);
                    return Ok(StreamSummary {
                        backend,
                        chunks,
                        reconnects,
                        completed: true,
                    });
                }
                Err(StreamFailure::Cancelled) => return Err(GatewayError::Cancelled),
                Err(StreamFailure::ConsumerGone) => {
                    debug!(backend = %backend, chunks, "stream consumer hung up");
                    return Ok(StreamSummary {
                        backend,
                        chunks,
                        reconnects,
                        completed: false,
                    });
                }
                Err(StreamFailure::Unknown(id)) => return Err(GatewayError::UnknownBackend(id)),
                Err(StreamFailure::Backend(err)) => err,
            };

            self.context
                .record_failure(&backend, elapsed_ms(started), &failure);
            if !failure.retryable || reconnects >= self.max_reconnects {
                return Err(GatewayError::Exhausted {
                    backend,
                    attempts: reconnects + 1,
                    source: failure,
                });
            }

            let delay = self.reconnect_delay.saturating_mul(reconnects + 1);
            warn!(
                backend = %backend,
                reconnect = reconnects + 1,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "stream failed, reconnecting"
            );
            self.context.events().emit(&GatewayEvent::StreamReconnect {
                backend: backend.clone(),
                reconnect: reconnects + 1,
                delay_ms: delay.as_millis() as u64,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                _ = tx.closed() => {
                    return Ok(StreamSummary { backend, chunks, reconnects, completed: false });
                }
                _ = tokio::time::sleep(delay) => {}
            }

            reconnects += 1;
            working.retry_count += 1;
            decision = match self.engine.decide(&working) {
                Ok(next) => next,
                Err(err) => {
                    debug!(error = %err, backend = %backend, "re-decision failed, reusing backend");
                    decision
                }
            };
        }
    }

    /// One attempt: open the backend stream and pump chunks until it ends.
    async fn stream_once(
        &self,
        backend_id: &str,
        request: &GenerationRequest,
        tx: &mpsc::Sender<StreamItem>,
        cancel: &CancellationToken,
        forwarded: &mut usize,
    ) -> std::result::Result<(), StreamFailure> {
        let (backend, credential) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamFailure::Cancelled),
            resolved = self.context.resolve(backend_id) => resolved?,
        };

        let (attempt_tx, mut attempt_rx) = mpsc::channel::<StreamChunk>(1);
        let call = backend.stream(request, credential.as_ref(), attempt_tx);
        tokio::pin!(call);
        let mut outcome = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamFailure::Cancelled),
                _ = tx.closed() => return Err(StreamFailure::ConsumerGone),
                chunk = attempt_rx.recv() => match chunk {
                    Some(chunk) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return Err(StreamFailure::ConsumerGone);
                        }
                        *forwarded += 1;
                    }
                    None => break,
                },
                result = &mut call, if outcome.is_none() => outcome = Some(result),
            }
        }

        let result = match outcome {
            Some(result) => result,
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamFailure::Cancelled),
                result = &mut call => result,
            },
        };
        result.map_err(StreamFailure::Backend)
    }
}

#[cfg(test)]
mod tests {
    use relaygate_types::Capability;

    use super::*;
    use crate::breaker::CircuitBreakerBank;
    use crate::cache::DecisionCache;
    use crate::classifier::ErrorClassifier;
    use crate::events::{EventSink, NoopSink};
    use crate::history::FallbackHistory;
    use crate::performance::PerformanceTracker;
    use crate::registry::CapabilityRegistry;
    use crate::router::RoutingSettings;
    use crate::scoring::RoutingStrategy;
    use crate::testing::{ScriptedBackend, StreamPlan};

    const STREAMING: &[Capability] = &[Capability::Streaming];

    fn recovery(backends: Vec<Arc<ScriptedBackend>>) -> Arc<StreamRecovery> {
        let sink: Arc<dyn EventSink> = Arc::new(NoopSink);
        let registry = Arc::new(CapabilityRegistry::new());
        for backend in backends {
            registry.register(backend).unwrap();
        }
        let performance = Arc::new(PerformanceTracker::new());
        let breakers = Arc::new(CircuitBreakerBank::new(
            10,
            Duration::from_secs(60),
            sink.clone(),
        ));
        let engine = Arc::new(RoutingEngine::new(
            registry.clone(),
            performance.clone(),
            breakers.clone(),
            Arc::new(DecisionCache::new(Duration::from_secs(30))),
            RoutingStrategy::Balanced,
            RoutingSettings::default(),
            sink.clone(),
        ));
        let context = Arc::new(AttemptContext::new(
            registry,
            breakers.clone(),
            performance,
            Arc::new(ErrorClassifier::new(breakers, sink.clone())),
            Arc::new(FallbackHistory::default()),
            None,
            sink,
        ));
        Arc::new(StreamRecovery::new(
            engine,
            context,
            3,
            Duration::from_millis(1000),
        ))
    }

    fn plan(deltas: &[&str], error: Option<BackendError>) -> StreamPlan {
        StreamPlan {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            error,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<StreamItem>) -> (Vec<StreamChunk>, Option<GatewayError>) {
        let mut chunks = Vec::new();
        while let Some(item) = rx.recv().await {
            match item {
                Ok(chunk) => chunks.push(chunk),
                Err(err) => return (chunks, Some(err)),
            }
        }
        (chunks, None)
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_chunks_in_order() {
        let a = Arc::new(ScriptedBackend::ok("a", STREAMING).with_stream(plan(&["he", "llo"], None)));
        let rx = recovery(vec![a]).spawn(GenerationRequest::new("hi"), CancellationToken::new());
        let (chunks, err) = drain(rx).await;
        assert!(err.is_none());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], StreamChunk::text("a", "he"));
        assert_eq!(chunks[1], StreamChunk::text("a", "llo"));
        assert!(chunks[2].is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_retryable_failure() {
        let a = Arc::new(
            ScriptedBackend::ok("a", STREAMING)
                .with_stream(plan(&["par"], Some(BackendError::retryable("reset", "socket reset"))))
                .with_stream(plan(&["full"], None)),
        );
        let recovery = recovery(vec![a.clone()]);
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let drained = tokio::spawn(drain(rx));
        let summary = recovery
            .execute_stream(&GenerationRequest::new("hi"), tx, &cancel)
            .await
            .unwrap();
        let (chunks, err) = drained.await.unwrap();

        assert!(err.is_none());
        assert_eq!(summary.reconnects, 1);
        assert!(summary.completed);
        assert_eq!(summary.chunks, 3);
        assert_eq!(chunks[0], StreamChunk::text("a", "par"));
        assert_eq!(chunks[1], StreamChunk::text("a", "full"));
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        assert_eq!(a.last_request().unwrap().retry_count, 1);
        assert!(a.last_request().unwrap().stream);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_budget_is_bounded() {
        let mut backend = ScriptedBackend::ok("a", STREAMING);
        for _ in 0..5 {
            backend = backend.with_stream(plan(&[], Some(BackendError::timeout("stalled"))));
        }
        let a = Arc::new(backend);
        let started = Instant::now();
        let rx = recovery(vec![a.clone()]).spawn(GenerationRequest::new("hi"), CancellationToken::new());
        let (chunks, err) = drain(rx).await;

        assert!(chunks.is_empty());
        assert!(matches!(err, Some(GatewayError::Exhausted { attempts: 4, .. })));
        assert_eq!(a.calls(), 4);
        // 1s + 2s + 3s of reconnect delay.
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_ends_stream() {
        let a = Arc::new(
            ScriptedBackend::ok("a", STREAMING)
                .with_stream(plan(&["x"], Some(BackendError::fatal("blocked", "content blocked")))),
        );
        let rx = recovery(vec![a.clone()]).spawn(GenerationRequest::new("hi"), CancellationToken::new());
        let (chunks, err) = drain(rx).await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(err, Some(GatewayError::Exhausted { attempts: 1, .. })));
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_streaming_backend_is_routing_error() {
        let a = Arc::new(ScriptedBackend::ok("a", &[]));
        let rx = recovery(vec![a]).spawn(GenerationRequest::new("hi"), CancellationToken::new());
        let (_, err) = drain(rx).await;
        assert!(matches!(err, Some(GatewayError::NoCapableBackend { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_hang_up_stops_the_stream() {
        let a = Arc::new(ScriptedBackend::ok("a", STREAMING).with_stream(plan(&["1", "2", "3"], None)));
        let recovery = recovery(vec![a]);
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = {
            let recovery = recovery.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                recovery
                    .execute_stream(&GenerationRequest::new("hi"), tx, &cancel)
                    .await
            })
        };
        assert!(rx.recv().await.unwrap().is_ok());
        drop(rx);
        let summary = task.await.unwrap().unwrap();
        assert!(!summary.completed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_reconnect_wait() {
        let a = Arc::new(
            ScriptedBackend::ok("a", STREAMING)
                .with_stream(plan(&[], Some(BackendError::retryable("x", "network blip")))),
        );
        let cancel = CancellationToken::new();
        let rx = recovery(vec![a]).spawn(GenerationRequest::new("hi"), cancel.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });
        let (_, err) = drain(rx).await;
        assert!(matches!(err, Some(GatewayError::Cancelled)));
    }
}

//! The [`Gateway`] facade.
//!
//! Wires the registry, router, executor, stream wrapper, health aggregator
//! and alert manager around one shared event sink, and owns the background
//! tasks that keep breaker, cache, health and alert state current.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relaygate_types::{
    BackendDescriptor, GatewayConfig, GenerationRequest, HealthCheckResult, HealthStatus,
};

use crate::alerts::{Alert, AlertManager};
use crate::backend::Backend;
use crate::breaker::{BreakerSnapshot, CircuitBreakerBank};
use crate::cache::DecisionCache;
use crate::classifier::{ErrorClassifier, ErrorPattern};
use crate::credentials::CredentialProvider;
use crate::error::Result;
use crate::events::{BroadcastSink, EventSink, FanoutSink, GatewayEvent};
use crate::executor::{AttemptContext, ExecutionOutcome, FallbackExecutor};
use crate::health::{HealthAggregator, HealthInputs, SystemHealthSnapshot};
use crate::history::{FallbackHistory, FallbackHistoryEntry};
use crate::performance::PerformanceTracker;
use crate::registry::CapabilityRegistry;
use crate::router::{RoutingDecision, RoutingEngine, RoutingSettings};
use crate::scoring::{CustomScorer, RoutingStrategy};
use crate::stream::{StreamItem, StreamRecovery};

/// Buffered events per subscriber before slow subscribers start lagging.
pub const EVENT_CAPACITY: usize = 256;

/// Upper bound on one out-of-band health check.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// How often open circuits and stale cache entries are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// How often aged alerts are pruned.
pub const ALERT_PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

// ── Builder ──────────────────────────────────────────────────────────────

/// Assembles a [`Gateway`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    scorer: Option<CustomScorer>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    sinks: Vec<Arc<dyn EventSink>>,
    backends: Vec<Arc<dyn Backend>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            scorer: None,
            credentials: None,
            sinks: Vec::new(),
            backends: Vec::new(),
        }
    }

    /// Scoring function for the `custom` strategy.
    pub fn custom_scorer(mut self, scorer: CustomScorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Extra observer that receives every gateway event.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Validate the configuration, wire the components and register the
    /// queued backends.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Config`](crate::GatewayError::Config) for an invalid
    /// configuration or a `custom` strategy without a scorer, and
    /// [`GatewayError::DuplicateBackend`](crate::GatewayError::DuplicateBackend).
    pub fn build(self) -> Result<Gateway> {
        let config = self.config;
        config.validate()?;
        let strategy = RoutingStrategy::from_kind(config.routing_strategy, self.scorer)?;

        let health = Arc::new(HealthAggregator::new());
        let broadcast = Arc::new(BroadcastSink::new(EVENT_CAPACITY));
        let mut sinks: Vec<Arc<dyn EventSink>> = vec![health.clone(), broadcast.clone()];
        sinks.extend(self.sinks);
        let fanout = FanoutSink::new(sinks);
        let events: Arc<dyn EventSink> = Arc::new(fanout);

        let registry = Arc::new(CapabilityRegistry::new());
        let performance = Arc::new(PerformanceTracker::new());
        let breakers = Arc::new(CircuitBreakerBank::new(
            config.circuit_breaker_threshold,
            Duration::from_secs(config.circuit_breaker_cooldown_secs),
            events.clone(),
        ));
        let classifier = Arc::new(ErrorClassifier::new(breakers.clone(), events.clone()));
        let cache = Arc::new(DecisionCache::new(Duration::from_secs(
            config.decision_cache_ttl_secs,
        )));
        let history = Arc::new(FallbackHistory::default());

        let engine = Arc::new(RoutingEngine::new(
            registry.clone(),
            performance.clone(),
            breakers.clone(),
            cache.clone(),
            strategy,
            RoutingSettings::from_config(&config),
            events.clone(),
        ));
        let context = Arc::new(AttemptContext::new(
            registry.clone(),
            breakers.clone(),
            performance.clone(),
            classifier.clone(),
            history.clone(),
            self.credentials,
            events.clone(),
        ));
        let executor = FallbackExecutor::from_config(engine.clone(), context.clone(), &config);
        let stream = Arc::new(StreamRecovery::from_config(engine.clone(), context, &config));
        let alerts = Arc::new(AlertManager::new(config.alerts.clone(), events.clone()));

        let gateway = Gateway {
            config,
            registry,
            performance,
            breakers,
            classifier,
            cache,
            history,
            engine,
            executor,
            stream,
            health,
            alerts,
            broadcast,
            events,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        };
        for backend in self.backends {
            gateway.register_backend(backend)?;
        }
        gateway.warn_unknown_fallbacks();
        Ok(gateway)
    }
}

// ── Gateway ──────────────────────────────────────────────────────────────

/// Routes, executes and monitors generation requests.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<CapabilityRegistry>,
    performance: Arc<PerformanceTracker>,
    breakers: Arc<CircuitBreakerBank>,
    classifier: Arc<ErrorClassifier>,
    cache: Arc<DecisionCache>,
    history: Arc<FallbackHistory>,
    engine: Arc<RoutingEngine>,
    executor: FallbackExecutor,
    stream: Arc<StreamRecovery>,
    health: Arc<HealthAggregator>,
    alerts: Arc<AlertManager>,
    broadcast: Arc<BroadcastSink>,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Add a backend and create its circuit breaker.
    ///
    /// # Errors
    ///
    /// [`GatewayError::DuplicateBackend`](crate::GatewayError::DuplicateBackend)
    /// if the id is taken.
    pub fn register_backend(&self, backend: Arc<dyn Backend>) -> Result<()> {
        let id = backend.id().to_string();
        self.registry.register(backend)?;
        self.breakers.register(&id);
        info!(backend = %id, "backend registered");
        self.events
            .emit(&GatewayEvent::BackendRegistered { backend: id });
        Ok(())
    }

    /// Registered descriptors in registration order.
    pub fn list_backends(&self) -> Vec<BackendDescriptor> {
        self.registry.descriptors()
    }

    /// Execute a one-shot generation.
    ///
    /// Stops early if the gateway shuts down.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<ExecutionOutcome> {
        self.generate_with_cancel(request, &self.cancel.child_token())
            .await
    }

    pub async fn generate_with_cancel(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        self.executor.execute(request, cancel).await
    }

    /// Stream a generation. A terminal error arrives as the last item.
    pub fn generate_stream(&self, request: GenerationRequest) -> mpsc::Receiver<StreamItem> {
        self.generate_stream_with_cancel(request, self.cancel.child_token())
    }

    pub fn generate_stream_with_cancel(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamItem> {
        self.stream.spawn(request, cancel)
    }

    /// Route `request` without executing it.
    pub fn get_routing_decision(&self, request: &GenerationRequest) -> Result<RoutingDecision> {
        self.engine.decide(request)
    }

    /// Recompute and return the system health snapshot.
    pub fn get_system_health(&self) -> SystemHealthSnapshot {
        recompute_health(
            &self.health,
            &self.registry,
            &self.breakers,
            &self.performance,
            &self.classifier,
        )
    }

    /// Run every backend's health check now and fold the results into the
    /// health snapshot.
    pub async fn health_check_all(&self) -> BTreeMap<String, HealthCheckResult> {
        let results = run_health_checks(&self.registry, &self.events).await;
        self.get_system_health();
        results
    }

    /// Event stream for external observers.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.broadcast.subscribe()
    }

    /// Logged alerts, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.recent()
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    pub fn error_patterns(&self) -> Vec<ErrorPattern> {
        self.classifier.patterns()
    }

    pub fn fallback_history(&self, backend: &str) -> Vec<FallbackHistoryEntry> {
        self.history.entries(backend)
    }

    /// Spawn the background tasks. Calling it again is a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            debug!("gateway already started");
            return;
        }

        let breakers = self.breakers.clone();
        let cache = self.cache.clone();
        tasks.push(spawn_periodic(
            "sweep",
            SWEEP_INTERVAL,
            self.cancel.clone(),
            move || {
                let closed = breakers.sweep_expired();
                let purged = cache.purge_expired();
                if !closed.is_empty() || purged > 0 {
                    debug!(closed = closed.len(), purged, "swept breakers and cache");
                }
                std::future::ready(())
            },
        ));

        let (health, registry, breakers, performance, classifier) = (
            self.health.clone(),
            self.registry.clone(),
            self.breakers.clone(),
            self.performance.clone(),
            self.classifier.clone(),
        );
        tasks.push(spawn_periodic(
            "health-recompute",
            secs(self.config.health_recompute_interval_secs),
            self.cancel.clone(),
            move || {
                recompute_health(&health, &registry, &breakers, &performance, &classifier);
                std::future::ready(())
            },
        ));

        let (health, registry, breakers, performance, classifier, alerts) = (
            self.health.clone(),
            self.registry.clone(),
            self.breakers.clone(),
            self.performance.clone(),
            self.classifier.clone(),
            self.alerts.clone(),
        );
        tasks.push(spawn_periodic(
            "alert-eval",
            secs(self.config.alerts.check_interval_secs),
            self.cancel.clone(),
            move || {
                let snapshot =
                    recompute_health(&health, &registry, &breakers, &performance, &classifier);
                if let Some(alert) = alerts.evaluate(&snapshot) {
                    alerts.dispatch(&alert);
                }
                std::future::ready(())
            },
        ));

        let alerts = self.alerts.clone();
        tasks.push(spawn_periodic(
            "alert-prune",
            ALERT_PRUNE_INTERVAL,
            self.cancel.clone(),
            move || {
                alerts.prune();
                std::future::ready(())
            },
        ));

        let (registry, events) = (self.registry.clone(), self.events.clone());
        tasks.push(spawn_periodic(
            "health-check",
            secs(self.config.health_check_interval_secs),
            self.cancel.clone(),
            move || {
                let registry = registry.clone();
                let events = events.clone();
                async move {
                    run_health_checks(&registry, &events).await;
                }
            },
        ));

        info!(tasks = tasks.len(), "gateway started");
    }

    /// Cancel in-flight calls and background tasks, then wait for the
    /// tasks to finish. Calls made afterwards are cancelled immediately.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        info!("gateway stopped");
    }

    fn warn_unknown_fallbacks(&self) {
        let named = self
            .config
            .fallback_chain
            .iter()
            .chain(self.config.emergency_fallback.iter());
        for id in named {
            if !self.registry.contains(id) {
                warn!(backend = %id, "fallback backend is not registered yet");
            }
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value.max(1))
}

fn recompute_health(
    health: &HealthAggregator,
    registry: &CapabilityRegistry,
    breakers: &CircuitBreakerBank,
    performance: &PerformanceTracker,
    classifier: &ErrorClassifier,
) -> SystemHealthSnapshot {
    health.recompute(HealthInputs {
        registry,
        breakers,
        performance,
        classifier,
    })
}

/// Check every backend concurrently. Backends without a health check
/// report `unknown`.
async fn run_health_checks(
    registry: &CapabilityRegistry,
    events: &Arc<dyn EventSink>,
) -> BTreeMap<String, HealthCheckResult> {
    let mut checks = JoinSet::new();
    for backend in registry.backends() {
        checks.spawn(async move {
            let id = backend.id().to_string();
            if !backend.supports_health_check() {
                return (id, HealthCheckResult::unknown());
            }
            let result = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, backend.health_check())
                .await
                .unwrap_or_else(|_| {
                    HealthCheckResult::failed(format!(
                        "health check timed out after {}s",
                        HEALTH_CHECK_TIMEOUT.as_secs()
                    ))
                });
            (id, result)
        });
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = checks.join_next().await {
        match joined {
            Ok((id, result)) => {
                if result.status == HealthStatus::Unhealthy {
                    warn!(backend = %id, errors = ?result.errors, "backend health check failed");
                }
                events.emit(&GatewayEvent::HealthChecked {
                    backend: id.clone(),
                    result: result.clone(),
                });
                results.insert(id, result);
            }
            Err(err) => warn!(error = %err, "health check task panicked"),
        }
    }
    results
}

/// Run `tick` every `period` until `cancel` fires. The first tick is one
/// full period after start.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;
        debug!(task = name, period_secs = period.as_secs(), "background task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task = name, "background task stopping");
                    return;
                }
                _ = interval.tick() => tick().await,
            }
        }
    })
}

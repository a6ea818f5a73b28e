//! Health aggregation, alerting and event delivery through the public
//! `Gateway` surface.

mod common;

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{MockBackend, fast_config, gateway};
use relaygate_core::{AlertLevel, GatewayEvent, OverallStatus};
use relaygate_types::{AlertConfig, GatewayConfig, GenerationRequest, HealthStatus};

fn fleet(unhealthy: usize) -> Vec<Arc<MockBackend>> {
    (0..10)
        .map(|i| {
            let status = if i < unhealthy {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Healthy
            };
            Arc::new(MockBackend::healthy(&format!("b{i}")).with_health(status))
        })
        .collect()
}

// ── Health escalation ──────────────────────────────────────────────────

#[tokio::test]
async fn three_unhealthy_of_ten_is_degraded() {
    let gw = gateway(fast_config(), &fleet(3));
    gw.health_check_all().await;
    let health = gw.get_system_health();
    assert_eq!(health.overall, OverallStatus::Degraded);
    assert_eq!(health.healthy_backends, 7);
    assert_eq!(health.total_backends, 10);
}

#[tokio::test]
async fn four_unhealthy_of_ten_is_critical() {
    let gw = gateway(fast_config(), &fleet(4));
    gw.health_check_all().await;
    assert_eq!(gw.get_system_health().overall, OverallStatus::Critical);
}

#[tokio::test]
async fn all_healthy_fleet() {
    let gw = gateway(fast_config(), &fleet(0));
    let results = gw.health_check_all().await;
    assert_eq!(results.len(), 10);
    assert!(results.values().all(|r| r.status == HealthStatus::Healthy));
    assert_eq!(gw.get_system_health().overall, OverallStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn failing_traffic_marks_backend_unhealthy() {
    let a = Arc::new(MockBackend::broken("a"));
    let b = Arc::new(MockBackend::healthy("b"));
    let config = GatewayConfig {
        max_retries: 0,
        circuit_breaker_threshold: 50,
        ..fast_config()
    };
    let gw = gateway(config, &[a, b]);

    for _ in 0..4 {
        let _ = gw.generate(&GenerationRequest::new("hi").prefer("a")).await;
        gw.generate(&GenerationRequest::new("hi").prefer("b"))
            .await
            .unwrap();
    }

    let health = gw.get_system_health();
    let a = health.backend("a").unwrap();
    assert_eq!(a.status, HealthStatus::Unhealthy);
    assert_eq!(a.total_failures, 4);
    assert_eq!(health.backend("b").unwrap().total_requests, 4);
    assert_eq!(health.overall, OverallStatus::Critical);
    assert_eq!(health.metrics.total_requests, 8);
    assert_eq!(health.metrics.error_distribution.get("network"), Some(&4));
}

// ── Events ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn subscribers_see_execution_events() {
    let gw = gateway(fast_config(), &[Arc::new(MockBackend::healthy("a"))]);
    let mut events = gw.subscribe();

    gw.generate(&GenerationRequest::new("hi")).await.unwrap();

    match events.recv().await.unwrap() {
        GatewayEvent::ExecutionSucceeded {
            backend, attempt, ..
        } => {
            assert_eq!(backend, "a");
            assert_eq!(attempt, 0);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

// ── Alerts ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn alert_is_posted_to_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/alerts"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let config = GatewayConfig {
        max_retries: 0,
        alerts: AlertConfig {
            error_rate: 0.1,
            check_interval_secs: 1,
            webhooks: vec![format!("{}/alerts", server.uri())],
            ..Default::default()
        },
        ..fast_config()
    };
    let gw = gateway(config, &[Arc::new(MockBackend::broken("a"))]);
    for _ in 0..3 {
        let _ = gw.generate(&GenerationRequest::new("hi")).await;
    }

    gw.start();
    let mut delivered = Vec::new();
    for _ in 0..50 {
        delivered = server.received_requests().await.unwrap_or_default();
        if !delivered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    gw.shutdown().await;

    assert!(!delivered.is_empty(), "no alert reached the webhook");
    let body: serde_json::Value = serde_json::from_slice(&delivered[0].body).unwrap();
    assert_eq!(body["level"], "critical");
    assert!(body["message"].as_str().unwrap().contains("error rate"));
    assert_eq!(body["health_snapshot"]["total_backends"], 1);

    let logged = gw.alerts();
    assert!(!logged.is_empty());
    assert_eq!(logged[0].level, AlertLevel::Critical);
}

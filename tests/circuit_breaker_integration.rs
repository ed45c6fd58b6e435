//! Circuit breaker end-to-end behavior
//!
//! The breaker must open after consecutive transport failures, block
//! deliveries without touching the transport, probe after its timeout,
//! and close again after enough successes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use agentmesh::domain_types::{FailureThreshold, MaxRetries, SuccessThreshold};
use agentmesh::registry::AgentRegistry;
use agentmesh::router::{
    BreakerStatus, CircuitBreakerConfig, MessageRouter, RouterConfig,
};
use agentmesh::events::EventBus;
use agentmesh::types::message::{A2aMessage, A2aMessageType, Recipient};
use serde_json::json;

use common::{RecordingFactory, RecordingTransport, TransportBehavior, agent_id, online_agent};

fn breaker_config(failures: u32, timeout: Duration) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: FailureThreshold::try_new(failures).unwrap(),
        success_threshold: SuccessThreshold::try_new(2).unwrap(),
        timeout,
        monitoring_window: Duration::from_secs(120),
    }
}

struct Fixture {
    registry: Arc<AgentRegistry>,
    router: MessageRouter,
    transport: Arc<RecordingTransport>,
}

fn fixture(behavior: TransportBehavior) -> Fixture {
    let events = EventBus::new();
    let registry = Arc::new(AgentRegistry::new(events.clone()));
    let transport = RecordingTransport::new(behavior);
    let config = RouterConfig::builder()
        .dispatch_tick(Duration::from_millis(1))
        .max_retries(MaxRetries::try_new(0).unwrap())
        .build();
    let router = MessageRouter::new(
        config,
        Arc::clone(&registry),
        RecordingFactory::new(Arc::clone(&transport)),
        events,
    );
    Fixture {
        registry,
        router,
        transport,
    }
}

fn message_to(id: &str) -> A2aMessage {
    A2aMessage::new(
        agent_id("client"),
        Recipient::Agent(agent_id(id)),
        A2aMessageType::TaskRequest,
        json!({}),
    )
}

#[test_log::test(tokio::test)]
async fn circuit_opens_after_threshold_and_blocks_the_transport() {
    let f = fixture(TransportBehavior::FailConnection);
    f.registry
        .register(online_agent("agent-c", "compute", 0.9, 10))
        .unwrap();
    f.router.enable_circuit_breaker(
        &agent_id("agent-c"),
        Some(breaker_config(3, Duration::from_secs(60))),
    );
    f.router.start();

    for _ in 0..3 {
        let response = f.router.route_message(message_to("agent-c")).await;
        assert!(!response.success);
    }
    assert_eq!(f.transport.call_count(), 3);
    assert_eq!(
        f.router.circuit_state(&agent_id("agent-c")).unwrap().status,
        BreakerStatus::Open
    );

    // Fourth attempt: blocked without a transport call
    let response = f.router.route_message(message_to("agent-c")).await;
    assert!(!response.success);
    assert!(
        response
            .error
            .as_deref()
            .unwrap()
            .contains("Circuit breaker is open")
    );
    assert_eq!(f.transport.call_count(), 3);
}

#[test_log::test(tokio::test)]
async fn half_open_recovery_closes_after_two_successes() {
    let f = fixture(TransportBehavior::FailConnection);
    f.registry
        .register(online_agent("agent-r", "compute", 0.9, 10))
        .unwrap();
    f.router.enable_circuit_breaker(
        &agent_id("agent-r"),
        Some(breaker_config(1, Duration::from_millis(150))),
    );
    f.router.start();

    // Open the circuit with a single failure
    let response = f.router.route_message(message_to("agent-r")).await;
    assert!(!response.success);
    assert_eq!(
        f.router.circuit_state(&agent_id("agent-r")).unwrap().status,
        BreakerStatus::Open
    );

    // After the timeout, deliveries probe the destination again
    f.transport.set_behavior(TransportBehavior::Succeed);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let first = f.router.route_message(message_to("agent-r")).await;
    assert!(first.success, "probe should pass: {:?}", first.error);
    let second = f.router.route_message(message_to("agent-r")).await;
    assert!(second.success);

    let state = f.router.circuit_state(&agent_id("agent-r")).unwrap();
    assert_eq!(state.status, BreakerStatus::Closed);
    assert_eq!(state.failures, 0);
}

#[test_log::test(tokio::test)]
async fn half_open_failure_reopens_immediately() {
    let f = fixture(TransportBehavior::FailConnection);
    f.registry
        .register(online_agent("agent-x", "compute", 0.9, 10))
        .unwrap();
    f.router.enable_circuit_breaker(
        &agent_id("agent-x"),
        Some(breaker_config(1, Duration::from_millis(100))),
    );
    f.router.start();

    let _ = f.router.route_message(message_to("agent-x")).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Probe fails: straight back to open
    let probe = f.router.route_message(message_to("agent-x")).await;
    assert!(!probe.success);
    assert_eq!(
        f.router.circuit_state(&agent_id("agent-x")).unwrap().status,
        BreakerStatus::Open
    );
}

#[test_log::test(tokio::test)]
async fn open_circuit_records_no_additional_failures() {
    let f = fixture(TransportBehavior::FailConnection);
    f.registry
        .register(online_agent("agent-c", "compute", 0.9, 10))
        .unwrap();
    f.router.enable_circuit_breaker(
        &agent_id("agent-c"),
        Some(breaker_config(2, Duration::from_secs(60))),
    );
    f.router.start();

    for _ in 0..2 {
        let _ = f.router.route_message(message_to("agent-c")).await;
    }
    let failures_at_open = f
        .router
        .circuit_state(&agent_id("agent-c"))
        .unwrap()
        .failures;

    for _ in 0..3 {
        let _ = f.router.route_message(message_to("agent-c")).await;
    }
    assert_eq!(
        f.router
            .circuit_state(&agent_id("agent-c"))
            .unwrap()
            .failures,
        failures_at_open
    );
}

#[test_log::test(tokio::test)]
async fn reset_returns_the_breaker_to_closed() {
    let f = fixture(TransportBehavior::FailConnection);
    f.registry
        .register(online_agent("agent-c", "compute", 0.9, 10))
        .unwrap();
    f.router.enable_circuit_breaker(
        &agent_id("agent-c"),
        Some(breaker_config(1, Duration::from_secs(60))),
    );
    f.router.start();

    let _ = f.router.route_message(message_to("agent-c")).await;
    assert!(f.router.is_circuit_open(&agent_id("agent-c")));

    f.router.reset_circuit_breaker(&agent_id("agent-c"));
    let state = f.router.circuit_state(&agent_id("agent-c")).unwrap();
    assert_eq!(state.status, BreakerStatus::Closed);
    assert_eq!(state.failures, 0);
}

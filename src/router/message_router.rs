//! The message router
//!
//! Owns the priority queues, the in-flight counter, the circuit-breaker
//! map, and the per-endpoint transport client pool. All other state is
//! read from the registry as snapshots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::domain_types::{AgentId, CapabilityName, EndpointUrl, MessageId};
use crate::error::RoutingError;
use crate::events::{EventBus, FabricEvent};
use crate::registry::{AgentRegistry, CapabilityQuery, Route};
use crate::transport::{Transport, TransportFactory};
use crate::types::agent::AgentStatus;
use crate::types::message::{A2aMessage, A2aMessageType, Message, Recipient};
use crate::types::rpc::{JsonRpcRequest, MessageSendParams};

use super::breaker::{BreakerAdmission, BreakerStatus, BreakerTransition, CircuitBreaker};
use super::config::{CircuitBreakerConfig, RouterConfig};
use super::queue::{PriorityQueues, QueueSizes};
use super::selection;

/// Outcome of routing one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_to: Option<AgentId>,
}

impl RouteResponse {
    /// A successful response carrying optional data
    #[must_use]
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            error: None,
            data,
            delivered_to: None,
        }
    }

    /// A successful delivery to a specific agent
    #[must_use]
    pub fn delivered(agent_id: AgentId, data: Option<Value>) -> Self {
        Self {
            success: true,
            error: None,
            data,
            delivered_to: Some(agent_id),
        }
    }

    /// A failed response with a reason
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
            delivered_to: None,
        }
    }
}

/// Aggregate outcome of a broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub total_agents: usize,
    pub successful: usize,
    pub failed: usize,
    pub responses: Vec<RouteResponse>,
}

/// Breaker population by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerCounts {
    pub total: usize,
    pub open: usize,
    pub half_open: usize,
    pub closed: usize,
}

/// Router statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStats {
    pub active_messages: usize,
    pub queue_sizes: QueueSizes,
    pub routing_table_size: usize,
    pub total_routes: usize,
    pub circuit_breakers: BreakerCounts,
}

/// One queued delivery
struct DispatchEntry {
    message: A2aMessage,
    target: AgentId,
    attempts: u8,
    completion: Option<oneshot::Sender<RouteResponse>>,
}

/// State shared between the router handle and its background loops
struct RouterCore {
    config: RouterConfig,
    registry: Arc<AgentRegistry>,
    factory: Arc<dyn TransportFactory>,
    clients: DashMap<EndpointUrl, Arc<dyn Transport>>,
    breakers: DashMap<AgentId, Arc<CircuitBreaker>>,
    queues: PriorityQueues<DispatchEntry>,
    events: EventBus,
    in_flight: AtomicUsize,
    delivered: AtomicU64,
    failed: AtomicU64,
    is_shutdown: AtomicBool,
}

impl RouterCore {
    fn complete(&self, mut entry: DispatchEntry, response: RouteResponse) {
        if let Some(tx) = entry.completion.take() {
            let _ = tx.send(response);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn record_success(&self, agent_id: &AgentId) {
        if let Some(breaker) = self.breakers.get(agent_id) {
            let transition = breaker.record_success();
            let successes = breaker.state().successes;
            self.events.emit(FabricEvent::CircuitSuccess {
                agent_id: agent_id.clone(),
                successes,
            });
            if transition == Some(BreakerTransition::Closed) {
                info!(agent_id = %agent_id, "circuit closed");
                self.events.emit(FabricEvent::CircuitClosed {
                    agent_id: agent_id.clone(),
                });
            }
        }
    }

    fn record_failure(&self, agent_id: &AgentId) {
        if let Some(breaker) = self.breakers.get(agent_id) {
            let transition = breaker.record_failure();
            let failures = breaker.state().failures;
            self.events.emit(FabricEvent::CircuitFailure {
                agent_id: agent_id.clone(),
                failures,
            });
            if transition == Some(BreakerTransition::Opened) {
                warn!(agent_id = %agent_id, failures, "circuit opened");
                self.events.emit(FabricEvent::CircuitOpened {
                    agent_id: agent_id.clone(),
                    failures,
                });
            }
        }
    }

    /// Converts a fabric message into the end-user form for delivery
    ///
    /// Role is preserved, the message id carries over, the correlation id
    /// becomes the context id, and the payload travels as one data part.
    fn to_user_message(message: &A2aMessage) -> Message {
        Message {
            role: message.role,
            parts: vec![crate::types::message::Part::Data {
                data: message.payload.clone(),
            }],
            message_id: Some(message.id.clone()),
            context_id: message.correlation_id.clone(),
            task_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Delivers one dequeued entry through the transport
    async fn deliver(&self, entry: DispatchEntry) {
        let mut entry = entry;
        let message_id = entry.message.id.clone();
        let target = entry.target.clone();

        if let Some(ttl_ms) = entry.message.ttl_ms {
            let age = Utc::now() - entry.message.timestamp;
            if age > chrono::Duration::milliseconds(i64::try_from(ttl_ms).unwrap_or(i64::MAX)) {
                self.fail_entry(entry, format!("Message expired after {ttl_ms}ms"));
                return;
            }
        }

        let Some(profile) = self.registry.get(&target) else {
            self.fail_entry(entry, format!("Agent not found: {target}"));
            return;
        };
        if profile.status != AgentStatus::Online {
            self.fail_entry(entry, format!("Agent is not online: {target}"));
            return;
        }
        let Some(endpoint) = profile.metadata.endpoint.clone() else {
            self.fail_entry(entry, format!("No endpoint known for agent: {target}"));
            return;
        };

        if let Some(breaker) = self.breakers.get(&target) {
            let was_open = breaker.state().status == BreakerStatus::Open;
            match breaker.check_admission() {
                BreakerAdmission::Block { next_attempt } => {
                    // Isolation, not observation: no failure is recorded
                    // and the transport is never touched.
                    drop(breaker);
                    let err = RoutingError::CircuitOpen {
                        agent_id: target,
                        next_attempt,
                    };
                    self.complete(entry, RouteResponse::fail(err.to_string()));
                    return;
                }
                BreakerAdmission::Probe => {
                    if was_open {
                        self.events.emit(FabricEvent::CircuitHalfOpen {
                            agent_id: target.clone(),
                        });
                    }
                }
                BreakerAdmission::Allow => {}
            }
        }

        let client = self
            .clients
            .entry(endpoint.clone())
            .or_insert_with(|| self.factory.connect(&endpoint))
            .clone();

        let params = MessageSendParams {
            message: Self::to_user_message(&entry.message),
            configuration: None,
            metadata: None,
        };
        let request = JsonRpcRequest::new(
            message_id.as_ref().to_string(),
            "message/send",
            serde_json::to_value(&params).unwrap_or(Value::Null),
        );

        match client.send_message(&endpoint, request).await {
            Ok(envelope) => match envelope.into_result() {
                Ok(result) => {
                    trace!(message_id = %message_id, target = %target, "message delivered");
                    self.record_success(&target);
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    self.events.emit(FabricEvent::MessageSent {
                        message_id,
                        to: target.clone(),
                    });
                    self.complete(entry, RouteResponse::delivered(target, Some(result)));
                }
                Err(rpc_error) => {
                    // An error envelope is a delivery outcome, not a
                    // transport fault; it is not retried.
                    self.record_failure(&target);
                    self.fail_entry(
                        entry,
                        format!("Peer returned error {}: {}", rpc_error.code, rpc_error.message),
                    );
                }
            },
            Err(transport_error) => {
                self.record_failure(&target);
                let retryable = transport_error.is_retryable();
                if retryable && entry.attempts < self.config.max_retries.as_u8() {
                    entry.attempts += 1;
                    debug!(
                        message_id = %message_id,
                        attempt = entry.attempts,
                        "transport failure, re-enqueueing"
                    );
                    let priority = entry.message.priority;
                    if let Err(returned) = self.queues.push(priority, entry) {
                        self.fail_entry(returned, format!("Queue full: {priority}"));
                    }
                    return;
                }
                self.fail_entry(entry, format!("Transport error: {transport_error}"));
            }
        }
    }

    fn fail_entry(&self, entry: DispatchEntry, reason: String) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.events.emit(FabricEvent::MessageFailed {
            message_id: entry.message.id.clone(),
            reason: reason.clone(),
        });
        self.complete(entry, RouteResponse::fail(reason));
    }
}

/// Priority-queued, capability-aware message router
pub struct MessageRouter {
    core: Arc<RouterCore>,
    routing_table: Arc<RwLock<HashMap<CapabilityName, Vec<Route>>>>,
    started: AtomicBool,
    token: CancellationToken,
}

impl MessageRouter {
    /// A router over the given registry and transport factory
    #[must_use]
    pub fn new(
        config: RouterConfig,
        registry: Arc<AgentRegistry>,
        factory: Arc<dyn TransportFactory>,
        events: EventBus,
    ) -> Self {
        let queue_capacity = config.queue_capacity.as_usize();
        Self {
            core: Arc::new(RouterCore {
                config,
                registry,
                factory,
                clients: DashMap::new(),
                breakers: DashMap::new(),
                queues: PriorityQueues::new(queue_capacity),
                events,
                in_flight: AtomicUsize::new(0),
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                is_shutdown: AtomicBool::new(false),
            }),
            routing_table: Arc::new(RwLock::new(HashMap::new())),
            started: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    /// Spawns the dispatch ticker and the routing-table refresher
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let core = Arc::clone(&self.core);
        let token = self.token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(core.config.dispatch_tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // Strictly priority-first, one delivery per cycle
                        if let Some((_, entry)) = core.queues.pop_highest() {
                            core.deliver(entry).await;
                        }
                    }
                }
            }
            debug!("dispatch loop stopped");
        });

        let core = Arc::clone(&self.core);
        let table = Arc::clone(&self.routing_table);
        let token = self.token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(core.config.routing_table_refresh);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let topology = core.registry.get_topology();
                        *table.write().expect("routing table lock poisoned") =
                            topology.message_routes;
                    }
                }
            }
            debug!("routing table refresher stopped");
        });
        info!("message router started");
    }

    /// Routes a raw JSON value, reporting malformed input non-throwingly
    pub async fn route_value(&self, value: Value) -> RouteResponse {
        match serde_json::from_value::<A2aMessage>(value.clone()) {
            Ok(message) => self.route_message(message).await,
            Err(e) => {
                let message_id = value
                    .get("id")
                    .and_then(Value::as_str)
                    .and_then(|s| MessageId::try_new(s.to_string()).ok())
                    .unwrap_or_else(MessageId::generate);
                debug!(error = %e, "rejected malformed message");
                self.core.events.emit(FabricEvent::MessageFailed {
                    message_id,
                    reason: "Invalid message format".to_string(),
                });
                RouteResponse::fail("Invalid message format")
            }
        }
    }

    /// Routes one message according to its type and destination
    pub async fn route_message(&self, message: A2aMessage) -> RouteResponse {
        if self.core.is_shutdown.load(Ordering::SeqCst) {
            return RouteResponse::fail("Router is shut down");
        }
        match message.message_type {
            A2aMessageType::CapabilityRequest => self.handle_capability_request(&message),
            A2aMessageType::WorkflowStart => {
                RouteResponse::ok(Some(json!({ "status": "workflow_queued" })))
            }
            A2aMessageType::AgentQuery => self.handle_agent_query(&message),
            A2aMessageType::HealthCheck if message.to == Recipient::Broadcast => {
                self.handle_router_health()
            }
            _ => match message.to.clone() {
                Recipient::Broadcast => {
                    let report = self.broadcast_message(message).await;
                    let success = report.failed == 0;
                    let data = serde_json::to_value(&report).ok();
                    RouteResponse {
                        success,
                        error: (!success).then(|| {
                            format!("{} of {} deliveries failed", report.failed, report.total_agents)
                        }),
                        data,
                        delivered_to: None,
                    }
                }
                Recipient::Auto => self.route_auto(message).await,
                Recipient::Agent(target) => self.route_direct(message, target).await,
            },
        }
    }

    /// Capability-directed routing: resolve, select, delegate
    async fn route_auto(&self, message: A2aMessage) -> RouteResponse {
        let Some(capability) = Self::required_capability(&message.payload) else {
            return self.admission_failure(&message, "No capability specified for auto routing");
        };
        let candidates = self.core.registry.find_by_capability(&capability);
        let Some(chosen) =
            selection::select(self.core.config.selection_policy, &capability, &candidates)
        else {
            let err = RoutingError::CapabilityNotFound { capability };
            return self.admission_failure(&message, err.to_string());
        };
        let target = chosen.agent_id.clone();
        trace!(capability = %capability, target = %target, "auto-routing resolved");
        self.enqueue(message, target).await
    }

    /// Direct routing to a named agent
    async fn route_direct(&self, message: A2aMessage, target: AgentId) -> RouteResponse {
        let Some(profile) = self.core.registry.get(&target) else {
            return self.admission_failure(&message, format!("Agent not found: {target}"));
        };
        if profile.status != AgentStatus::Online {
            let err = RoutingError::AgentOffline { agent_id: target };
            return self.admission_failure(&message, err.to_string());
        }
        self.enqueue(message, target).await
    }

    /// Admits a message into its priority queue and awaits delivery
    async fn enqueue(&self, message: A2aMessage, target: AgentId) -> RouteResponse {
        let limit = self.core.config.max_concurrent_tasks;
        if self.core.in_flight.load(Ordering::SeqCst) >= limit {
            let err = RoutingError::TooManyInFlight { limit };
            return self.admission_failure(&message, err.to_string());
        }

        let priority = message.priority;
        let (tx, rx) = oneshot::channel();
        let entry = DispatchEntry {
            message,
            target,
            attempts: 0,
            completion: Some(tx),
        };
        self.core.in_flight.fetch_add(1, Ordering::SeqCst);
        if let Err(returned) = self.core.queues.push(priority, entry) {
            self.core.in_flight.fetch_sub(1, Ordering::SeqCst);
            let err = RoutingError::QueueFull { priority };
            return self.admission_failure(&returned.message, err.to_string());
        }
        match rx.await {
            Ok(response) => response,
            Err(_) => RouteResponse::fail("Router is shut down"),
        }
    }

    fn admission_failure(&self, message: &A2aMessage, reason: impl Into<String>) -> RouteResponse {
        let reason = reason.into();
        self.core.events.emit(FabricEvent::MessageFailed {
            message_id: message.id.clone(),
            reason: reason.clone(),
        });
        RouteResponse::fail(reason)
    }

    /// Extracts the capability name an auto-routed task requires
    fn required_capability(payload: &Value) -> Option<CapabilityName> {
        payload
            .get("requiredCapability")
            .or_else(|| payload.get("capability"))
            .and_then(Value::as_str)
            .and_then(|s| CapabilityName::try_new(s.to_string()).ok())
    }

    fn handle_capability_request(&self, message: &A2aMessage) -> RouteResponse {
        let query: CapabilityQuery = match serde_json::from_value(message.payload.clone()) {
            Ok(query) => query,
            Err(e) => return RouteResponse::fail(format!("Invalid capability query: {e}")),
        };
        let matches = self.core.registry.query_capabilities(&query);
        RouteResponse::ok(serde_json::to_value(matches).ok())
    }

    fn handle_agent_query(&self, message: &A2aMessage) -> RouteResponse {
        let payload = &message.payload;
        let mut agents = self.core.registry.list();
        if let Some(agent_type) = payload.get("type").and_then(Value::as_str) {
            agents.retain(|p| p.agent_type == agent_type);
        }
        if let Some(status) = payload
            .get("status")
            .and_then(|v| serde_json::from_value::<AgentStatus>(v.clone()).ok())
        {
            agents.retain(|p| p.status == status);
        }
        if let Some(capability) = payload
            .get("capability")
            .and_then(Value::as_str)
            .and_then(|s| CapabilityName::try_new(s.to_string()).ok())
        {
            agents.retain(|p| p.capability(&capability).is_some());
        }
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        RouteResponse::ok(serde_json::to_value(agents).ok())
    }

    fn handle_router_health(&self) -> RouteResponse {
        let stats = self.get_routing_stats();
        RouteResponse::ok(Some(json!({
            "status": "healthy",
            "routingStats": stats,
        })))
    }

    /// Routes a copy of the message to every online agent except the sender
    ///
    /// Individual failures do not abort the broadcast.
    pub async fn broadcast_message(&self, message: A2aMessage) -> BroadcastReport {
        let targets: Vec<AgentId> = self
            .core
            .registry
            .find_by_status(AgentStatus::Online)
            .into_iter()
            .map(|p| p.agent_id)
            .filter(|id| *id != message.from)
            .collect();

        let mut deliveries = Vec::with_capacity(targets.len());
        for target in &targets {
            let mut copy = message.clone();
            copy.id = MessageId::try_new(format!("{}-{}", message.id, target))
                .unwrap_or_else(|_| MessageId::generate());
            copy.to = Recipient::Agent(target.clone());
            deliveries.push(self.enqueue(copy, target.clone()));
        }
        let responses = futures::future::join_all(deliveries).await;

        let successful = responses.iter().filter(|r| r.success).count();
        BroadcastReport {
            total_agents: targets.len(),
            successful,
            failed: responses.len() - successful,
            responses,
        }
    }

    /// Enables a circuit breaker for an agent
    ///
    /// Breakers are opt-in; an existing breaker keeps its state.
    pub fn enable_circuit_breaker(&self, agent_id: &AgentId, config: Option<CircuitBreakerConfig>) {
        let config = config.unwrap_or(self.core.config.circuit_breaker);
        self.core
            .breakers
            .entry(agent_id.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(config)));
        self.core.events.emit(FabricEvent::CircuitEnabled {
            agent_id: agent_id.clone(),
        });
    }

    /// Whether an agent's circuit currently blocks deliveries
    #[must_use]
    pub fn is_circuit_open(&self, agent_id: &AgentId) -> bool {
        self.core
            .breakers
            .get(agent_id)
            .is_some_and(|b| b.is_open())
    }

    /// Snapshot of an agent's breaker, if one is enabled
    #[must_use]
    pub fn circuit_state(&self, agent_id: &AgentId) -> Option<super::breaker::CircuitBreakerState> {
        self.core.breakers.get(agent_id).map(|b| b.state())
    }

    /// Resets an agent's breaker to closed
    pub fn reset_circuit_breaker(&self, agent_id: &AgentId) {
        if let Some(breaker) = self.core.breakers.get(agent_id) {
            breaker.reset();
            self.core.events.emit(FabricEvent::CircuitReset {
                agent_id: agent_id.clone(),
            });
        }
    }

    /// Current router statistics
    #[must_use]
    pub fn get_routing_stats(&self) -> RoutingStats {
        let table = self.routing_table.read().expect("routing table lock poisoned");
        let mut counts = BreakerCounts {
            total: self.core.breakers.len(),
            ..BreakerCounts::default()
        };
        for breaker in &self.core.breakers {
            match breaker.state().status {
                BreakerStatus::Open => counts.open += 1,
                BreakerStatus::HalfOpen => counts.half_open += 1,
                BreakerStatus::Closed => counts.closed += 1,
            }
        }
        RoutingStats {
            active_messages: self.core.in_flight.load(Ordering::SeqCst),
            queue_sizes: self.core.queues.sizes(),
            routing_table_size: table.len(),
            total_routes: table.values().map(Vec::len).sum(),
            circuit_breakers: counts,
        }
    }

    /// Messages delivered since startup
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.core.delivered.load(Ordering::Relaxed)
    }

    /// Messages that failed since startup
    #[must_use]
    pub fn failed_count(&self) -> u64 {
        self.core.failed.load(Ordering::Relaxed)
    }

    /// Stops background loops, clears queues and breakers, closes clients
    ///
    /// Pending deliveries are rejected with a shutdown error. Idempotent.
    pub async fn shutdown(&self) {
        if self.core.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.token.cancel();
        for entry in self.core.queues.drain() {
            self.core
                .complete(entry, RouteResponse::fail("Router is shut down"));
        }
        let endpoints: Vec<EndpointUrl> = self
            .core
            .clients
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for endpoint in endpoints {
            if let Some((_, client)) = self.core.clients.remove(&endpoint) {
                client.close().await;
            }
        }
        self.core.breakers.clear();
        self.core.events.emit(FabricEvent::Shutdown { component: "router" });
        info!("message router shut down");
    }
}

//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use agentmesh::domain_types::{
    AgentId, CapabilityName, CostScore, EndpointUrl, LoadPercent, Reliability,
};
use agentmesh::error::TransportError;
use agentmesh::transport::{EventStream, Transport, TransportFactory};
use agentmesh::types::agent::{AgentProfile, Capability, CapabilityCategory};
use agentmesh::types::rpc::{JsonRpcRequest, JsonRpcResponse};

/// What the recording transport should do with the next calls
#[derive(Debug, Clone)]
pub enum TransportBehavior {
    /// Respond successfully with an empty result
    Succeed,
    /// Fail with a connection error
    FailConnection,
    /// Fail the first `n` calls, then succeed
    FailFirst(usize),
}

/// Transport double that records every unary call
pub struct RecordingTransport {
    pub behavior: Mutex<TransportBehavior>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<(String, JsonRpcRequest)>>,
}

impl RecordingTransport {
    pub fn new(behavior: TransportBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_behavior(&self, behavior: TransportBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Agent ids that received deliveries, in call order
    pub fn delivered_endpoints(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_message(
        &self,
        endpoint: &EndpointUrl,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.to_string(), request.clone()));

        let behavior = self.behavior.lock().unwrap().clone();
        let fail = match behavior {
            TransportBehavior::Succeed => false,
            TransportBehavior::FailConnection => true,
            TransportBehavior::FailFirst(n) => call < n,
        };
        if fail {
            Err(TransportError::Connection("connection refused".to_string()))
        } else {
            Ok(JsonRpcResponse::success(
                request.id,
                serde_json::json!({ "delivered": true }),
            ))
        }
    }

    async fn send_message_stream(
        &self,
        _endpoint: &EndpointUrl,
        _request: JsonRpcRequest,
    ) -> Result<EventStream, TransportError> {
        Err(TransportError::Connection(
            "streaming not supported by the test double".to_string(),
        ))
    }

    async fn close(&self) {}
}

/// Factory handing out one shared recording transport
pub struct RecordingFactory {
    pub transport: Arc<RecordingTransport>,
}

impl RecordingFactory {
    pub fn new(transport: Arc<RecordingTransport>) -> Arc<Self> {
        Arc::new(Self { transport })
    }
}

impl TransportFactory for RecordingFactory {
    fn connect(&self, _endpoint: &EndpointUrl) -> Arc<dyn Transport> {
        Arc::clone(&self.transport) as Arc<dyn Transport>
    }
}

pub fn agent_id(id: &str) -> AgentId {
    AgentId::try_new(id.to_string()).unwrap()
}

pub fn capability_name(name: &str) -> CapabilityName {
    CapabilityName::try_new(name.to_string()).unwrap()
}

pub fn capability(name: &str, reliability: f64, cost: f64) -> Capability {
    Capability {
        id: format!("cap-{name}"),
        name: capability_name(name),
        description: format!("{name} capability"),
        category: CapabilityCategory::Analysis,
        cost: CostScore::try_new(cost).unwrap(),
        reliability: Reliability::try_new(reliability).unwrap(),
        version: "1.0".to_string(),
        tags: vec![],
        input_schema: None,
        output_schema: None,
    }
}

/// Online profile with an endpoint, one capability, and a load figure
pub fn online_agent(id: &str, cap: &str, reliability: f64, load: u8) -> AgentProfile {
    let mut profile = AgentProfile::new(
        agent_id(id),
        "worker",
        vec![capability(cap, reliability, 10.0)],
    );
    profile.metadata.endpoint =
        Some(EndpointUrl::try_new(format!("http://{id}.local/jsonrpc")).unwrap());
    profile.metadata.load = LoadPercent::try_new(load).unwrap();
    profile
}

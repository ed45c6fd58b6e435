//! # agentmesh - Agent-to-Agent Communication Fabric
//!
//! agentmesh is a distributed runtime that lets autonomous software
//! agents advertise capabilities, discover peers, and exchange structured
//! messages and long-running tasks over JSON-RPC with optional streaming.
//!
//! ## Core Components
//!
//! - **Registry**: in-memory capability-indexed catalog with health,
//!   metadata, and lifecycle cleanup
//! - **Router**: priority-queued, capability-aware routing with pluggable
//!   selection policies and per-agent circuit breakers
//! - **Task Manager**: a state machine for asynchronous units of work
//!   with streaming status and artifact updates
//! - **Discovery**: convergence of a central directory and a peer
//!   announcement channel into one membership view
//! - **Transport**: the JSON-RPC wire boundary, unary and streamed
//!
//! ## Architecture
//!
//! Each component is single-writer over its own state; components
//! communicate through snapshot getters and a typed event bus rather
//! than back-references.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentmesh::events::EventBus;
//! use agentmesh::registry::AgentRegistry;
//! use agentmesh::router::{MessageRouter, RouterConfig};
//! use agentmesh::transport::HttpTransportFactory;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let events = EventBus::new();
//! let registry = Arc::new(AgentRegistry::new(events.clone()));
//! let factory = Arc::new(HttpTransportFactory::new(std::time::Duration::from_secs(30)));
//! let router = MessageRouter::new(RouterConfig::default(), registry, factory, events);
//! router.start();
//! # }
//! ```

pub mod config;
pub mod discovery;
pub mod domain_types;
pub mod error;
pub mod events;
pub mod registry;
pub mod router;
pub mod server;
pub mod tasks;
pub mod transport;
pub mod types;

pub use crate::config::FabricConfig;
pub use crate::domain_types::{
    AgentId, ArtifactId, CapabilityName, ContextId, EndpointUrl, MessageId, TaskId,
};
pub use crate::error::{A2aError, RegistryError, RoutingError, TaskError, TransportError};
pub use crate::events::{EventBus, FabricEvent};
pub use crate::registry::AgentRegistry;
pub use crate::router::{MessageRouter, RouterConfig, SelectionPolicy};
pub use crate::tasks::TaskManager;
pub use crate::types::agent::{AgentCard, AgentProfile, AgentStatus, Capability};
pub use crate::types::message::{A2aMessage, A2aMessageType, Message, MessagePriority, Recipient};
pub use crate::types::task::{Task, TaskState, TaskStatus};

//! Canonical protocol entities
//!
//! Wire-facing data types shared by the registry, router, task manager,
//! and the JSON-RPC surface, with validation helpers.

pub mod agent;
pub mod message;
pub mod rpc;
pub mod task;

pub use agent::{
    AgentCard, AgentFeatures, AgentHealth, AgentMetadata, AgentProfile, AgentSkill, AgentStatus,
    Capability, CapabilityCategory, HealthThresholds, PerformanceMetrics, validate_profile,
};
pub use message::{
    A2aMessage, A2aMessageType, FileContent, Message, MessagePriority, Part, Recipient, Role,
    validate_user_message,
};
pub use rpc::{
    JsonRpcError, JsonRpcId, JsonRpcRequest, JsonRpcResponse, MessageSendConfiguration,
    MessageSendParams, SSE_DONE, StreamEvent, TaskIdParams, TaskQueryParams, encode_sse_data,
    encode_sse_event,
};
pub use task::{
    Artifact, PushNotificationConfig, Task, TaskArtifactUpdateEvent, TaskDefinition,
    TaskPushNotificationConfig, TaskResult, TaskState, TaskStatus, TaskStatusUpdateEvent,
};

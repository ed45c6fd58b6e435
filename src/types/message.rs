//! Fabric messages and end-user message parts

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::domain_types::{AgentId, ContextId, MessageId, TaskId};
use crate::error::A2aError;

/// Originator role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// Delivery priority, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Urgent,
    High,
    Normal,
    Low,
}

impl MessagePriority {
    /// All priorities in strict dequeue order
    pub const ALL: [Self; 4] = [Self::Urgent, Self::High, Self::Normal, Self::Low];

    /// Queue index, `0` being the most urgent
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

impl std::fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

/// Destination of a fabric message
///
/// Serialized as a bare string: an agent id, the literal `broadcast`, or
/// the literal `auto` for capability-directed routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    Agent(AgentId),
    Broadcast,
    Auto,
}

impl Recipient {
    /// The addressed agent, when directly addressed
    #[must_use]
    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            Self::Agent(id) => Some(id),
            _ => None,
        }
    }
}

impl std::fmt::Display for Recipient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "{id}"),
            Self::Broadcast => f.write_str("broadcast"),
            Self::Auto => f.write_str("auto"),
        }
    }
}

impl Serialize for Recipient {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "broadcast" => Ok(Self::Broadcast),
            "auto" => Ok(Self::Auto),
            _ => AgentId::try_new(raw)
                .map(Self::Agent)
                .map_err(|e| D::Error::custom(format!("invalid recipient: {e}"))),
        }
    }
}

/// The enumerated set of fabric message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum A2aMessageType {
    TaskRequest,
    TaskDelegate,
    TaskStatus,
    CapabilityRequest,
    CapabilityResponse,
    AgentQuery,
    HealthCheck,
    NetworkBroadcast,
    WorkflowStart,
    WorkflowStep,
    WorkflowComplete,
    StatusUpdate,
    ErrorReport,
    AgentOnline,
    AgentOffline,
}

impl std::fmt::Display for A2aMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TaskRequest => "task-request",
            Self::TaskDelegate => "task-delegate",
            Self::TaskStatus => "task-status",
            Self::CapabilityRequest => "capability-request",
            Self::CapabilityResponse => "capability-response",
            Self::AgentQuery => "agent-query",
            Self::HealthCheck => "health-check",
            Self::NetworkBroadcast => "network-broadcast",
            Self::WorkflowStart => "workflow-start",
            Self::WorkflowStep => "workflow-step",
            Self::WorkflowComplete => "workflow-complete",
            Self::StatusUpdate => "status-update",
            Self::ErrorReport => "error-report",
            Self::AgentOnline => "agent-online",
            Self::AgentOffline => "agent-offline",
        };
        f.write_str(s)
    }
}

/// A message admitted into the fabric
///
/// Immutable once admitted by the router; retries re-enqueue the same
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2aMessage {
    pub id: MessageId,
    pub role: Role,
    pub from: AgentId,
    pub to: Recipient,
    #[serde(rename = "type")]
    pub message_type: A2aMessageType,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_priority")]
    pub priority: MessagePriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<ContextId>,
    /// Time-to-live in milliseconds
    #[serde(default, rename = "ttl", skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

fn default_priority() -> MessagePriority {
    MessagePriority::Normal
}

impl A2aMessage {
    /// Builds a message with generated id and current timestamp
    #[must_use]
    pub fn new(from: AgentId, to: Recipient, message_type: A2aMessageType, payload: Value) -> Self {
        Self {
            id: MessageId::generate(),
            role: Role::Agent,
            from,
            to,
            message_type,
            payload,
            timestamp: Utc::now(),
            priority: MessagePriority::Normal,
            correlation_id: None,
            ttl_ms: None,
            metadata: HashMap::new(),
        }
    }

    /// Same message at a different priority
    #[must_use]
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Same message with a correlation id
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: ContextId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// File payload of a file part, either inline bytes or a reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    /// Base64-encoded content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One ordered part of an end-user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    File { file: FileContent },
    Data { data: Value },
}

/// End-user message: a role plus ordered parts
///
/// Used as the payload inside task lifecycle updates and as the unary
/// `message/send` parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ContextId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Message {
    /// A single-part agent text message
    #[must_use]
    pub fn agent_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            parts: vec![Part::Text { text: text.into() }],
            message_id: Some(MessageId::generate()),
            context_id: None,
            task_id: None,
            metadata: HashMap::new(),
        }
    }

    /// A single-part user text message
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            ..Self::agent_text(text)
        }
    }

    /// A single data part wrapping an opaque payload
    #[must_use]
    pub fn data(role: Role, data: Value) -> Self {
        Self {
            role,
            parts: vec![Part::Data { data }],
            message_id: Some(MessageId::generate()),
            context_id: None,
            task_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Concatenated text of all text parts
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Checks end-user message well-formedness
///
/// A message needs at least one part, and file parts must carry either
/// inline bytes or a uri.
pub fn validate_user_message(message: &Message) -> Result<(), A2aError> {
    if message.parts.is_empty() {
        return Err(A2aError::InvalidParams(
            "message must contain at least one part".to_string(),
        ));
    }
    for part in &message.parts {
        let Part::File { file } = part else {
            continue;
        };
        if file.bytes.is_none() && file.uri.is_none() {
            return Err(A2aError::InvalidParams(
                "file part must carry bytes or a uri".to_string(),
            ));
        }
    }
    Ok(())
}

//! Error types for the fabric
//!
//! Protocol-visible failures are one sum type, [`A2aError`], carrying the
//! numeric code and string kind that cross the JSON-RPC boundary.
//! Subsystems keep their own operational error enums and convert at the
//! protocol surface.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain_types::{AgentId, CapabilityName, TaskId};
use crate::types::message::MessagePriority;

/// Protocol error with a normative numeric code
#[derive(Debug, Clone, Error, PartialEq)]
pub enum A2aError {
    #[error("Invalid JSON payload")]
    JsonParse,

    #[error("Request payload validation error: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task cannot be canceled: {0}")]
    TaskNotCancelable(TaskId),

    #[error("Push Notification is not supported")]
    PushNotificationNotSupported,

    #[error("This operation is not supported: {0}")]
    UnsupportedOperation(String),

    #[error("Incompatible content types: {0}")]
    ContentTypeNotSupported(String),

    #[error("Invalid agent response: {0}")]
    InvalidAgentResponse(String),

    #[error("Authenticated extended card is not configured")]
    AuthenticatedExtendedCardNotConfigured,

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),
}

impl A2aError {
    /// Numeric JSON-RPC error code
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::JsonParse => -1000,
            Self::InvalidRequest(_) => -1001,
            Self::MethodNotFound(_) => -1002,
            Self::InvalidParams(_) => -1003,
            Self::Internal(_) => -1004,
            Self::TaskNotFound(_) => -1005,
            Self::TaskNotCancelable(_) => -1006,
            Self::PushNotificationNotSupported => -1007,
            Self::UnsupportedOperation(_) => -1008,
            Self::ContentTypeNotSupported(_) => -1009,
            Self::InvalidAgentResponse(_) => -1010,
            Self::AuthenticatedExtendedCardNotConfigured => -1011,
            Self::AuthorizationFailed(_) => -32001,
        }
    }

    /// Stable string kind for logs and error envelopes
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JsonParse => "json_parse",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MethodNotFound(_) => "method_not_found",
            Self::InvalidParams(_) => "invalid_params",
            Self::Internal(_) => "internal",
            Self::TaskNotFound(_) => "task_not_found",
            Self::TaskNotCancelable(_) => "task_not_cancelable",
            Self::PushNotificationNotSupported => "push_notification_not_supported",
            Self::UnsupportedOperation(_) => "unsupported_operation",
            Self::ContentTypeNotSupported(_) => "content_type_not_supported",
            Self::InvalidAgentResponse(_) => "invalid_agent_response",
            Self::AuthenticatedExtendedCardNotConfigured => "extended_card_not_configured",
            Self::AuthorizationFailed(_) => "authorization_failed",
        }
    }
}

/// Errors raised by registry mutators and queries
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: AgentId },

    #[error("Agent already registered: {agent_id}")]
    AlreadyRegistered { agent_id: AgentId },

    #[error("Invalid profile: {reason}")]
    InvalidProfile { reason: String },
}

/// Errors raised while routing a message
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Invalid message format")]
    InvalidMessage { reason: String },

    #[error("No agents available for capability: {capability}")]
    CapabilityNotFound { capability: CapabilityName },

    #[error("Agent is not online: {agent_id}")]
    AgentOffline { agent_id: AgentId },

    #[error("No endpoint known for agent: {agent_id}")]
    NoEndpoint { agent_id: AgentId },

    #[error("Queue full: {priority}")]
    QueueFull { priority: MessagePriority },

    #[error("Circuit breaker is open for {agent_id}, next attempt at {next_attempt}")]
    CircuitOpen {
        agent_id: AgentId,
        next_attempt: DateTime<Utc>,
    },

    #[error("Too many in-flight messages (limit {limit})")]
    TooManyInFlight { limit: usize },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Router is shut down")]
    Shutdown,
}

/// Errors raised by the task lifecycle
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    #[error("Task not found: {task_id}")]
    NotFound { task_id: TaskId },

    #[error("Task is not cancelable: {task_id}")]
    NotCancelable { task_id: TaskId },

    #[error("Illegal task state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Task execution failed: {reason}")]
    ExecutionFailed { reason: String },
}

impl From<TaskError> for A2aError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound { task_id } => Self::TaskNotFound(task_id),
            TaskError::NotCancelable { task_id } => Self::TaskNotCancelable(task_id),
            TaskError::InvalidTransition { from, to } => {
                Self::Internal(format!("illegal task state transition: {from} -> {to}"))
            }
            TaskError::ExecutionFailed { reason } => Self::Internal(reason),
        }
    }
}

/// Errors surfaced by the transport adapter
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Server returned HTTP {status}")]
    Http { status: u16 },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Event stream ended unexpectedly")]
    StreamClosed,
}

impl TransportError {
    /// Whether the failure is transient and worth retrying
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout { .. } | Self::StreamClosed => true,
            Self::Http { status } => *status >= 500,
            Self::Serialization { .. } | Self::Rpc { .. } => false,
        }
    }
}

/// Errors raised by the discovery subsystem
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Central directory unreachable: {0}")]
    CentralUnavailable(String),

    #[error("Peer channel unavailable: {0}")]
    PeerUnavailable(String),

    #[error("Discovery request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn protocol_codes_are_normative() {
        assert_eq!(A2aError::JsonParse.code(), -1000);
        assert_eq!(A2aError::InvalidRequest(String::new()).code(), -1001);
        assert_eq!(A2aError::MethodNotFound(String::new()).code(), -1002);
        assert_eq!(A2aError::InvalidParams(String::new()).code(), -1003);
        assert_eq!(A2aError::Internal(String::new()).code(), -1004);
        assert_eq!(
            A2aError::TaskNotFound(TaskId::try_new("t").unwrap()).code(),
            -1005
        );
        assert_eq!(
            A2aError::TaskNotCancelable(TaskId::try_new("t").unwrap()).code(),
            -1006
        );
        assert_eq!(A2aError::PushNotificationNotSupported.code(), -1007);
        assert_eq!(A2aError::UnsupportedOperation(String::new()).code(), -1008);
        assert_eq!(A2aError::ContentTypeNotSupported(String::new()).code(), -1009);
        assert_eq!(A2aError::InvalidAgentResponse(String::new()).code(), -1010);
        assert_eq!(A2aError::AuthenticatedExtendedCardNotConfigured.code(), -1011);
        assert_eq!(A2aError::AuthorizationFailed(String::new()).code(), -32001);
    }

    #[test_log::test]
    fn task_errors_map_to_protocol_codes() {
        let task_id = TaskId::try_new("task-1".to_string()).unwrap();
        let err: A2aError = TaskError::NotFound {
            task_id: task_id.clone(),
        }
        .into();
        assert_eq!(err.code(), -1005);

        let err: A2aError = TaskError::NotCancelable { task_id }.into();
        assert_eq!(err.code(), -1006);
    }

    #[test_log::test]
    fn transient_transport_errors_are_retryable() {
        assert!(TransportError::Connection("refused".into()).is_retryable());
        assert!(TransportError::Http { status: 503 }.is_retryable());
        assert!(!TransportError::Http { status: 404 }.is_retryable());
        assert!(
            !TransportError::Rpc {
                code: -1004,
                message: "boom".into()
            }
            .is_retryable()
        );
    }
}

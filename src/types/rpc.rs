//! JSON-RPC envelopes and streaming payloads
//!
//! The wire format consumed and produced by the transport adapter and the
//! server adapter. Requests accept both `params` and `parameters`;
//! responses carry exactly one of `result` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain_types::TaskId;
use crate::error::A2aError;
use crate::types::message::Message;
use crate::types::task::{
    PushNotificationConfig, Task, TaskArtifactUpdateEvent, TaskStatusUpdateEvent,
};

/// JSON-RPC protocol version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Sentinel line terminating an event stream
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// Request/response correlation id, string or number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A JSON-RPC request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Alternative spelling accepted on the server side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl JsonRpcRequest {
    /// A request with generated parameters and a string id
    #[must_use]
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(JsonRpcId::String(id.into())),
            method: method.into(),
            params: Some(params),
            parameters: None,
        }
    }

    /// The parameter object, whichever spelling was used
    #[must_use]
    pub fn parameter_value(&self) -> Option<&Value> {
        self.params.as_ref().or(self.parameters.as_ref())
    }

    /// Checks envelope shape: version, id presence, non-empty method
    pub fn validate(&self) -> Result<(), A2aError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(A2aError::InvalidRequest(format!(
                "unsupported jsonrpc version: {}",
                self.jsonrpc
            )));
        }
        if self.id.is_none() {
            return Err(A2aError::InvalidRequest(
                "request is missing an id".to_string(),
            ));
        }
        if self.method.trim().is_empty() {
            return Err(A2aError::InvalidRequest("method is empty".to_string()));
        }
        Ok(())
    }
}

/// A JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&A2aError> for JsonRpcError {
    fn from(err: &A2aError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: Some(Value::String(err.kind().to_string())),
        }
    }
}

/// A JSON-RPC response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JsonRpcId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A success response
    #[must_use]
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response
    #[must_use]
    pub fn failure(id: Option<JsonRpcId>, error: &A2aError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError::from(error)),
        }
    }

    /// Interprets the envelope as a result-sum
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (_, Some(error)) => Err(error),
            (None, None) => Err(JsonRpcError {
                code: A2aError::InvalidAgentResponse(String::new()).code(),
                message: "response carries neither result nor error".to_string(),
                data: None,
            }),
        }
    }
}

/// Parameters of `message/send` and `message/stream`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendParams {
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<MessageSendConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Per-send configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_output_modes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_notification_config: Option<PushNotificationConfig>,
    /// Whether the unary call should wait for a terminal state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
}

/// Parameters of `tasks/get`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueryParams {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_length: Option<usize>,
}

/// Parameters of `tasks/cancel`, `tasks/resubscribe`, and push-config ops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    pub id: TaskId,
}

/// One streamed payload: a message, a task snapshot, or a task update
///
/// The `kind` tag distinguishes the variants on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StreamEvent {
    #[serde(rename = "message")]
    Message(Message),
    #[serde(rename = "task")]
    Task(Task),
    #[serde(rename = "status-update")]
    StatusUpdate(TaskStatusUpdateEvent),
    #[serde(rename = "artifact-update")]
    ArtifactUpdate(TaskArtifactUpdateEvent),
}

impl StreamEvent {
    /// Whether this event terminates its task's stream
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::StatusUpdate(update) if update.is_final)
    }
}

/// Encodes one streamed payload as a text event-stream frame
pub fn encode_sse_event(event: &StreamEvent) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {json}\n\n"))
}

/// Encodes an arbitrary JSON payload as a text event-stream frame
pub fn encode_sse_data(payload: &Value) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(payload)?;
    Ok(format!("data: {json}\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::Role;

    #[test_log::test]
    fn request_accepts_both_parameter_spellings() {
        let with_params: JsonRpcRequest = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tasks/get",
            "params": {"id": "t-1"}
        }))
        .unwrap();
        assert!(with_params.parameter_value().is_some());

        let with_parameters: JsonRpcRequest = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": "a",
            "method": "tasks/get",
            "parameters": {"id": "t-1"}
        }))
        .unwrap();
        assert!(with_parameters.parameter_value().is_some());
    }

    #[test_log::test]
    fn envelope_validation() {
        let mut request = JsonRpcRequest::new("1", "message/send", Value::Null);
        assert!(request.validate().is_ok());

        request.jsonrpc = "1.0".to_string();
        assert!(request.validate().is_err());

        let mut request = JsonRpcRequest::new("1", "message/send", Value::Null);
        request.id = None;
        assert!(request.validate().is_err());

        let request = JsonRpcRequest::new("1", "  ", Value::Null);
        assert!(request.validate().is_err());
    }

    #[test_log::test]
    fn response_is_result_or_error() {
        let ok = JsonRpcResponse::success(Some(JsonRpcId::Number(1)), serde_json::json!({"x": 1}));
        assert!(ok.into_result().is_ok());

        let err = JsonRpcResponse::failure(
            Some(JsonRpcId::Number(2)),
            &A2aError::MethodNotFound("nope".to_string()),
        );
        let rpc_error = err.into_result().unwrap_err();
        assert_eq!(rpc_error.code, -1002);

        let empty = JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            result: None,
            error: None,
        };
        assert_eq!(empty.into_result().unwrap_err().code, -1010);
    }

    #[test_log::test]
    fn stream_event_kind_tagging() {
        let event = StreamEvent::Message(Message {
            role: Role::Agent,
            parts: vec![],
            message_id: None,
            context_id: None,
            task_id: None,
            metadata: std::collections::HashMap::new(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "message");
    }

    #[test_log::test]
    fn sse_framing() {
        let event = StreamEvent::Message(Message::agent_text("hi"));
        let frame = encode_sse_event(&event).unwrap();
        assert!(frame.starts_with("data: "));
        assert!(frame.ends_with("\n\n"));
        assert_eq!(SSE_DONE, "data: [DONE]\n\n");
    }
}

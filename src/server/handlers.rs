//! JSON-RPC method dispatch
//!
//! Every method returns a well-formed result or a well-formed error;
//! streaming methods respond with a text event stream terminated by the
//! `[DONE]` sentinel.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

use crate::domain_types::{AgentId, TaskId};
use crate::error::A2aError;
use crate::tasks::TaskManager;
use crate::types::message::{
    A2aMessage, A2aMessageType, MessagePriority, Part, Recipient, Role, validate_user_message,
};
use crate::types::rpc::{
    JsonRpcId, JsonRpcRequest, JsonRpcResponse, MessageSendParams, StreamEvent, TaskIdParams,
    TaskQueryParams,
};
use crate::types::task::{Task, TaskPushNotificationConfig};

use super::ServerState;

/// Upper bound on how long a blocking send waits for a terminal state
const BLOCKING_WAIT_LIMIT: Duration = Duration::from_secs(30);

/// Poll interval while waiting on task events
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Serves `POST /jsonrpc`
pub async fn jsonrpc_handler(
    State(state): State<Arc<ServerState>>,
    body: bytes::Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return failure(None, &A2aError::JsonParse),
    };
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => return failure(None, &A2aError::InvalidRequest(e.to_string())),
    };
    if let Err(e) = request.validate() {
        return failure(request.id, &e);
    }
    let id = request.id.clone();
    debug!(method = %request.method, "jsonrpc request");

    match request.method.as_str() {
        "message/send" => respond(id.clone(), message_send(&state, &request).await),
        "message/stream" => message_stream(state, request).await,
        "tasks/get" => respond(id.clone(), tasks_get(&state, &request)),
        "tasks/cancel" => respond(id.clone(), tasks_cancel(&state, &request)),
        "tasks/resubscribe" => tasks_resubscribe(state, request),
        "tasks/pushNotificationConfig/set" => respond(id.clone(), push_config_set(&state, &request)),
        "tasks/pushNotificationConfig/get" => respond(id.clone(), push_config_get(&state, &request)),
        "tasks/pushNotificationConfig/list" => {
            respond(id.clone(), push_config_list(&state, &request))
        }
        "tasks/pushNotificationConfig/delete" => {
            respond(id.clone(), push_config_delete(&state, &request))
        }
        "agent/getAuthenticatedExtendedCard" => respond(
            id.clone(),
            state
                .extended_card
                .as_ref()
                .map(|card| serde_json::to_value(card).unwrap_or(Value::Null))
                .ok_or(A2aError::AuthenticatedExtendedCardNotConfigured),
        ),
        other => respond(id, Err(A2aError::MethodNotFound(other.to_string()))),
    }
}

fn respond(id: Option<JsonRpcId>, result: Result<Value, A2aError>) -> Response {
    match result {
        Ok(value) => Json(JsonRpcResponse::success(id, value)).into_response(),
        Err(e) => failure(id, &e),
    }
}

fn failure(id: Option<JsonRpcId>, error: &A2aError) -> Response {
    Json(JsonRpcResponse::failure(id, error)).into_response()
}

/// Extracts typed parameters from either spelling
fn params<T: DeserializeOwned>(request: &JsonRpcRequest) -> Result<T, A2aError> {
    let value = request
        .parameter_value()
        .cloned()
        .ok_or_else(|| A2aError::InvalidParams("missing parameters".to_string()))?;
    serde_json::from_value(value).map_err(|e| A2aError::InvalidParams(e.to_string()))
}

fn metadata_map(metadata: Option<Value>) -> std::collections::HashMap<String, Value> {
    match metadata {
        Some(Value::Object(map)) => map.into_iter().collect(),
        _ => std::collections::HashMap::new(),
    }
}

/// Builds a fabric message when the metadata addresses another agent
///
/// A `to` key in the message metadata turns the send into a routed
/// delivery instead of local execution.
fn fabric_message(send: &MessageSendParams) -> Option<A2aMessage> {
    let to_raw = send.message.metadata.get("to").and_then(Value::as_str)?;
    let to = match to_raw {
        "broadcast" => Recipient::Broadcast,
        "auto" => Recipient::Auto,
        other => Recipient::Agent(AgentId::try_new(other.to_string()).ok()?),
    };
    let from = send
        .message
        .metadata
        .get("from")
        .and_then(Value::as_str)
        .and_then(|s| AgentId::try_new(s.to_string()).ok())
        .unwrap_or_else(|| AgentId::try_new("client".to_string()).expect("non-empty"));
    let message_type = send
        .message
        .metadata
        .get("type")
        .and_then(|v| serde_json::from_value::<A2aMessageType>(v.clone()).ok())
        .unwrap_or(A2aMessageType::TaskRequest);
    let priority = send
        .message
        .metadata
        .get("priority")
        .and_then(|v| serde_json::from_value::<MessagePriority>(v.clone()).ok())
        .unwrap_or(MessagePriority::Normal);
    let payload = send
        .message
        .parts
        .iter()
        .find_map(|part| match part {
            Part::Data { data } => Some(data.clone()),
            _ => None,
        })
        .unwrap_or_else(|| Value::String(send.message.text()));

    let mut message = A2aMessage::new(from, to, message_type, payload).with_priority(priority);
    if let Some(id) = send.message.message_id.clone() {
        message.id = id;
    }
    message.role = send.message.role;
    message.correlation_id = send.message.context_id.clone();
    Some(message)
}

async fn message_send(state: &ServerState, request: &JsonRpcRequest) -> Result<Value, A2aError> {
    let send: MessageSendParams = params(request)?;
    validate_user_message(&send.message)?;
    let metadata = metadata_map(send.metadata.clone());

    // Addressed messages go through the router; the rest are local work
    if let Some(fabric) = fabric_message(&send) {
        let context_id = send.message.context_id.clone();
        let outcome = state.router.route_message(fabric).await;
        let mut reply = crate::types::message::Message::data(
            Role::Agent,
            serde_json::to_value(&outcome).map_err(|e| A2aError::Internal(e.to_string()))?,
        );
        reply.context_id = context_id;
        return serde_json::to_value(StreamEvent::Message(reply))
            .map_err(|e| A2aError::Internal(e.to_string()));
    }

    let event = state
        .tasks
        .handle_message(
            Arc::clone(&state.executor),
            send.message,
            None,
            metadata,
            None,
        )
        .await
        .map_err(A2aError::from)?;

    match event {
        StreamEvent::Task(mut task) => {
            let configuration = send.configuration.unwrap_or_default();
            if let Some(push) = configuration.push_notification_config {
                state
                    .tasks
                    .set_push_config(TaskPushNotificationConfig {
                        task_id: task.id.clone(),
                        push_notification_config: push,
                    })
                    .map_err(A2aError::from)?;
            }
            // Unary sends block until a terminal state unless told not to
            if configuration.blocking.unwrap_or(true) {
                task = wait_for_terminal(&state.tasks, &task.id).await?;
            }
            if let Some(limit) = configuration.history_length {
                task.truncate_history(limit);
            }
            serde_json::to_value(StreamEvent::Task(task))
                .map_err(|e| A2aError::Internal(e.to_string()))
        }
        message_event @ StreamEvent::Message(_) => {
            serde_json::to_value(message_event).map_err(|e| A2aError::Internal(e.to_string()))
        }
        other => Err(A2aError::InvalidAgentResponse(format!(
            "unexpected handler event: {other:?}"
        ))),
    }
}

/// Waits for the task to reach a terminal state, bounded in time
async fn wait_for_terminal(tasks: &TaskManager, task_id: &TaskId) -> Result<Task, A2aError> {
    let mut receiver = tasks.subscribe(task_id).map_err(A2aError::from)?;
    let deadline = Instant::now() + BLOCKING_WAIT_LIMIT;
    loop {
        let task = tasks.get_task(task_id, None).map_err(A2aError::from)?;
        if task.state().is_terminal() || Instant::now() >= deadline {
            return Ok(task);
        }
        let _ = tokio::time::timeout(EVENT_POLL_INTERVAL, receiver.recv()).await;
    }
}

async fn message_stream(state: Arc<ServerState>, request: JsonRpcRequest) -> Response {
    let id = request.id.clone();
    let send: MessageSendParams = match params(&request) {
        Ok(send) => send,
        Err(e) => return failure(id, &e),
    };
    if let Err(e) = validate_user_message(&send.message) {
        return failure(id, &e);
    }
    let metadata = metadata_map(send.metadata.clone());

    let event = match state
        .tasks
        .handle_message(
            Arc::clone(&state.executor),
            send.message,
            None,
            metadata,
            None,
        )
        .await
    {
        Ok(event) => event,
        Err(e) => return failure(id, &A2aError::from(e)),
    };

    match event {
        StreamEvent::Task(task) => {
            let receiver = match state.tasks.subscribe(&task.id) {
                Ok(receiver) => receiver,
                Err(e) => return failure(id, &A2aError::from(e)),
            };
            event_stream_response(state, id, task, receiver, true)
        }
        message_event @ StreamEvent::Message(_) => {
            let frames = stream::iter(vec![frame(&id, &message_event), done_frame()]);
            Sse::new(frames).into_response()
        }
        other => failure(
            id,
            &A2aError::InvalidAgentResponse(format!("unexpected handler event: {other:?}")),
        ),
    }
}

fn tasks_resubscribe(state: Arc<ServerState>, request: JsonRpcRequest) -> Response {
    let id = request.id.clone();
    let query: TaskIdParams = match params(&request) {
        Ok(query) => query,
        Err(e) => return failure(id, &e),
    };
    let task = match state.tasks.get_task(&query.id, None) {
        Ok(task) => task,
        Err(e) => return failure(id, &A2aError::from(e)),
    };
    let receiver = match state.tasks.subscribe(&task.id) {
        Ok(receiver) => receiver,
        Err(e) => return failure(id, &A2aError::from(e)),
    };
    let follow = !task.state().is_terminal();
    event_stream_response(state, id, task, receiver, follow)
}

/// Builds the SSE response: a task snapshot, then live events, then the
/// terminating sentinel
fn event_stream_response(
    state: Arc<ServerState>,
    id: Option<JsonRpcId>,
    task: Task,
    receiver: broadcast::Receiver<StreamEvent>,
    follow: bool,
) -> Response {
    let task_id = task.id.clone();
    let initial = stream::once({
        let id = id.clone();
        async move { frame(&id, &StreamEvent::Task(task)) }
    });

    let live = if follow {
        live_events(state, id.clone(), task_id, receiver).boxed()
    } else {
        stream::empty().boxed()
    };

    let frames = initial.chain(live).chain(stream::once(async { done_frame() }));
    Sse::new(frames).into_response()
}

/// Forwards task events until the final one
fn live_events(
    state: Arc<ServerState>,
    id: Option<JsonRpcId>,
    task_id: TaskId,
    receiver: broadcast::Receiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    struct LiveState {
        state: Arc<ServerState>,
        id: Option<JsonRpcId>,
        task_id: TaskId,
        receiver: broadcast::Receiver<StreamEvent>,
        done: bool,
    }

    stream::unfold(
        LiveState {
            state,
            id,
            task_id,
            receiver,
            done: false,
        },
        |mut live| async move {
            if live.done {
                return None;
            }
            loop {
                match tokio::time::timeout(EVENT_POLL_INTERVAL, live.receiver.recv()).await {
                    Ok(Ok(event)) => {
                        live.done = event.is_final();
                        let frame = frame(&live.id, &event);
                        return Some((frame, live));
                    }
                    Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                    Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
                    Err(_) => {
                        // No event inside the poll window; stop once the
                        // task's stream has been sealed.
                        if live.state.tasks.is_stream_sealed(&live.task_id) {
                            return None;
                        }
                    }
                }
            }
        },
    )
}

/// Wraps one event in a JSON-RPC success envelope as an SSE frame
fn frame(id: &Option<JsonRpcId>, event: &StreamEvent) -> Result<Event, Infallible> {
    let payload = serde_json::to_value(event).unwrap_or(Value::Null);
    let envelope = JsonRpcResponse::success(id.clone(), payload);
    let data = serde_json::to_string(&envelope).unwrap_or_default();
    Ok(Event::default().data(data))
}

fn done_frame() -> Result<Event, Infallible> {
    Ok(Event::default().data("[DONE]"))
}

fn tasks_get(state: &ServerState, request: &JsonRpcRequest) -> Result<Value, A2aError> {
    let query: TaskQueryParams = params(request)?;
    let task = state
        .tasks
        .get_task(&query.id, query.history_length)
        .map_err(A2aError::from)?;
    serde_json::to_value(StreamEvent::Task(task)).map_err(|e| A2aError::Internal(e.to_string()))
}

fn tasks_cancel(state: &ServerState, request: &JsonRpcRequest) -> Result<Value, A2aError> {
    let query: TaskIdParams = params(request)?;
    let task = state.tasks.cancel_task(&query.id).map_err(A2aError::from)?;
    serde_json::to_value(StreamEvent::Task(task)).map_err(|e| A2aError::Internal(e.to_string()))
}

fn push_config_set(state: &ServerState, request: &JsonRpcRequest) -> Result<Value, A2aError> {
    let config: TaskPushNotificationConfig = params(request)?;
    let stored = state.tasks.set_push_config(config).map_err(A2aError::from)?;
    serde_json::to_value(stored).map_err(|e| A2aError::Internal(e.to_string()))
}

fn push_config_get(state: &ServerState, request: &JsonRpcRequest) -> Result<Value, A2aError> {
    let query: TaskIdParams = params(request)?;
    let config = state
        .tasks
        .get_push_config(&query.id)
        .map_err(A2aError::from)?;
    serde_json::to_value(config).map_err(|e| A2aError::Internal(e.to_string()))
}

fn push_config_list(state: &ServerState, request: &JsonRpcRequest) -> Result<Value, A2aError> {
    let query: TaskIdParams = params(request)?;
    let configs = state
        .tasks
        .list_push_configs(&query.id)
        .map_err(A2aError::from)?;
    serde_json::to_value(configs).map_err(|e| A2aError::Internal(e.to_string()))
}

fn push_config_delete(state: &ServerState, request: &JsonRpcRequest) -> Result<Value, A2aError> {
    let query: TaskIdParams = params(request)?;
    state
        .tasks
        .delete_push_configs(&query.id)
        .map_err(A2aError::from)?;
    Ok(Value::Null)
}

//! HTTP JSON-RPC transport
//!
//! Unary calls POST the envelope to the peer's endpoint URL. Streamed
//! calls read a text event stream of `data: <json>` frames terminated by
//! `data: [DONE]`; each payload is either a raw event or a JSON-RPC
//! success wrapper containing one.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::{debug, trace};

use crate::domain_types::EndpointUrl;
use crate::error::TransportError;
use crate::types::rpc::{JsonRpcRequest, JsonRpcResponse, StreamEvent};

use super::{EventStream, Transport, TransportFactory};

/// Sentinel payload terminating an event stream
const DONE_PAYLOAD: &str = "[DONE]";

/// JSON-RPC over HTTP with SSE streaming
pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    /// A transport sharing the given HTTP client
    #[must_use]
    pub fn new(client: reqwest::Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }
}

fn map_reqwest_error(err: &reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        TransportError::Connection(err.to_string())
    }
}

/// One complete frame extracted from the SSE buffer
#[derive(Debug, PartialEq)]
pub(crate) enum SseFrame {
    Event(Value),
    Done,
}

/// Extracts the next complete frame from the buffer, if any
///
/// Frames are separated by a blank line; every payload line is prefixed
/// with `data: `. Multi-line payloads are concatenated.
pub(crate) fn next_frame(buffer: &mut String) -> Option<Result<SseFrame, TransportError>> {
    let boundary = buffer.find("\n\n")?;
    let frame: String = buffer.drain(..boundary + 2).collect();
    let payload: String = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect::<Vec<_>>()
        .join("\n");
    if payload.is_empty() {
        // Comment or keep-alive frame; skip to the next one
        return next_frame(buffer);
    }
    if payload == DONE_PAYLOAD {
        return Some(Ok(SseFrame::Done));
    }
    Some(
        serde_json::from_str::<Value>(&payload)
            .map(SseFrame::Event)
            .map_err(TransportError::from),
    )
}

/// Unwraps an optional JSON-RPC success wrapper and decodes the event
pub(crate) fn decode_stream_payload(payload: Value) -> Result<StreamEvent, TransportError> {
    let is_wrapper = payload
        .as_object()
        .is_some_and(|object| object.contains_key("jsonrpc"));
    let inner = if is_wrapper {
        let envelope: JsonRpcResponse = serde_json::from_value(payload)?;
        envelope.into_result().map_err(|e| TransportError::Rpc {
            code: e.code,
            message: e.message,
        })?
    } else {
        payload
    };
    Ok(serde_json::from_value(inner)?)
}

struct StreamState {
    bytes: Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    buffer: String,
    finished: bool,
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_message(
        &self,
        endpoint: &EndpointUrl,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, TransportError> {
        trace!(endpoint = %endpoint, method = %request.method, "sending unary request");
        let response = self
            .client
            .post(endpoint.as_ref())
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
            });
        }
        let envelope: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(envelope)
    }

    async fn send_message_stream(
        &self,
        endpoint: &EndpointUrl,
        request: JsonRpcRequest,
    ) -> Result<EventStream, TransportError> {
        debug!(endpoint = %endpoint, method = %request.method, "opening event stream");
        let response = self
            .client
            .post(endpoint.as_ref())
            .header(ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
            });
        }

        let state = StreamState {
            bytes: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            finished: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            loop {
                match next_frame(&mut state.buffer) {
                    Some(Ok(SseFrame::Done)) => {
                        return None;
                    }
                    Some(Ok(SseFrame::Event(payload))) => {
                        return Some((decode_stream_payload(payload), state));
                    }
                    Some(Err(e)) => return Some((Err(e), state)),
                    None => {}
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(TransportError::Connection(e.to_string())), state));
                    }
                    None => {
                        state.finished = true;
                        // Connection closed without the sentinel
                        if state.buffer.trim().is_empty() {
                            return None;
                        }
                        return Some((Err(TransportError::StreamClosed), state));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) {
        // Connections are pooled inside reqwest and released on drop
    }
}

/// Builds [`HttpTransport`] clients sharing one HTTP connection pool
pub struct HttpTransportFactory {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransportFactory {
    /// A factory with the given per-request timeout
    #[must_use]
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            request_timeout,
        }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn connect(&self, _endpoint: &EndpointUrl) -> Arc<dyn Transport> {
        Arc::new(HttpTransport::new(
            self.client.clone(),
            self.request_timeout,
        ))
    }
}

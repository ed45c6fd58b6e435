//! Transport adapter boundary
//!
//! The router and task manager consume this contract and nothing else:
//! unary JSON-RPC, a server-streamed variant, and a release hook. The
//! concrete wire format lives behind it.

pub mod http;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::domain_types::EndpointUrl;
use crate::error::TransportError;
use crate::types::rpc::{JsonRpcRequest, JsonRpcResponse, StreamEvent};

pub use http::{HttpTransport, HttpTransportFactory};

/// A lazy, finite, non-restartable sequence of streamed events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, TransportError>> + Send>>;

/// One connection to a peer endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a unary JSON-RPC request and awaits the response envelope
    async fn send_message(
        &self,
        endpoint: &EndpointUrl,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Sends a request whose response is a server-streamed event sequence
    ///
    /// The stream ends at the terminating sentinel or when the peer
    /// closes the connection.
    async fn send_message_stream(
        &self,
        endpoint: &EndpointUrl,
        request: JsonRpcRequest,
    ) -> Result<EventStream, TransportError>;

    /// Releases underlying resources; safe to call repeatedly
    async fn close(&self);
}

/// Creates transport clients for the router's per-endpoint pool
pub trait TransportFactory: Send + Sync {
    /// A client for the given endpoint
    fn connect(&self, endpoint: &EndpointUrl) -> Arc<dyn Transport>;
}

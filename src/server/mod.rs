//! JSON-RPC server adapter
//!
//! A replaceable axum surface over the core: `POST /jsonrpc` services the
//! protocol methods, the agent card is served at the well-known path, and
//! `/health` and `/metrics` expose operational state. The core stays
//! functional with this adapter stubbed out.

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::error::TaskError;
use crate::registry::AgentRegistry;
use crate::router::MessageRouter;
use crate::tasks::{ExecutionEventBus, RequestContext, TaskExecutor, TaskManager};
use crate::types::agent::AgentCard;

pub use handlers::jsonrpc_handler;

/// Shared state behind the HTTP surface
pub struct ServerState {
    pub router: Arc<MessageRouter>,
    pub tasks: TaskManager,
    pub registry: Arc<AgentRegistry>,
    pub executor: Arc<dyn TaskExecutor>,
    pub card: AgentCard,
    pub extended_card: Option<AgentCard>,
    pub started_at: Instant,
}

/// Default executor: echoes the inbound payload back as the result
///
/// Stands in until a real agent wires its own executor into the server.
pub struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    fn id(&self) -> &str {
        "echo"
    }

    async fn execute(
        &self,
        ctx: RequestContext,
        _bus: ExecutionEventBus,
    ) -> Result<Value, TaskError> {
        if ctx.is_cancelled() {
            return Err(TaskError::ExecutionFailed {
                reason: "cancelled before execution".to_string(),
            });
        }
        Ok(json!({ "echo": ctx.message.parts }))
    }
}

/// Builds the axum router with all operational routes
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/.well-known/ai-agent", get(agent_card_handler))
        .route("/jsonrpc", post(handlers::jsonrpc_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn agent_card_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> Json<AgentCard> {
    Json(state.card.clone())
}

async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "agents": state.registry.len(),
        "tasks": state.tasks.task_count(),
    }))
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> Json<Value> {
    let routing = state.router.get_routing_stats();
    Json(json!({
        "messagesDelivered": state.router.delivered_count(),
        "messagesFailed": state.router.failed_count(),
        "routing": routing,
        "agents": state.registry.len(),
        "tasks": state.tasks.task_count(),
    }))
}

/// Binds a listener on the configured address
///
/// # Errors
///
/// Returns an error when the address cannot be bound.
pub async fn bind(host: [u8; 4], port: u16) -> std::io::Result<(TcpListener, SocketAddr)> {
    let addr = SocketAddr::from((host, port));
    let listener = TcpListener::bind(addr).await?;
    let actual = listener.local_addr()?;
    Ok((listener, actual))
}

/// Serves the application until the process ends
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(listener, router)
        .await
        .map_err(std::io::Error::other)
}

/// Serves the application until the shutdown token fires
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    router: Router,
    shutdown: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(std::io::Error::other)
}

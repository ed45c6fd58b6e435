//! agentmesh server binary
//!
//! Starts one fabric node: registry, router, task manager, discovery,
//! and the JSON-RPC surface.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use agentmesh::config::FabricConfig;
use agentmesh::discovery::{Discovery, DiscoveryConfig, DiscoveryMode, SystemEnv};
use agentmesh::events::EventBus;
use agentmesh::registry::AgentRegistry;
use agentmesh::router::MessageRouter;
use agentmesh::server::{self, EchoExecutor, ServerState};
use agentmesh::tasks::TaskManager;
use agentmesh::transport::HttpTransportFactory;
use agentmesh::types::agent::AgentCard;

#[derive(Parser, Debug)]
#[command(name = "agentmesh", about = "Agent-to-agent communication fabric node")]
struct Args {
    /// Port for the JSON-RPC surface
    #[arg(long, default_value_t = 7420)]
    port: u16,

    /// Central directory base URL
    #[arg(long)]
    registry_url: Option<String>,

    /// Discovery mode: central, p2p, hybrid, or lazy
    #[arg(long, default_value = "hybrid")]
    discovery: String,

    /// Name this node advertises on its agent card
    #[arg(long, default_value = "agentmesh-node")]
    name: String,
}

fn parse_mode(raw: &str) -> DiscoveryMode {
    match raw {
        "central" => DiscoveryMode::Central,
        "p2p" => DiscoveryMode::P2p,
        "lazy" => DiscoveryMode::Lazy,
        _ => DiscoveryMode::Hybrid,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agentmesh=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = FabricConfig {
        port: args.port,
        node_name: args.name.clone(),
        discovery: DiscoveryConfig {
            mode: parse_mode(&args.discovery),
            central_url: args.registry_url.clone(),
            ..DiscoveryConfig::default()
        },
        ..FabricConfig::default()
    };

    info!(port = config.port, "starting agentmesh node");

    let events = EventBus::new();
    let registry = Arc::new(AgentRegistry::new(events.clone()));
    Arc::clone(&registry).start_cleanup();

    let factory = Arc::new(HttpTransportFactory::new(config.router.request_timeout));
    let router = Arc::new(MessageRouter::new(
        config.router.clone(),
        Arc::clone(&registry),
        factory,
        events.clone(),
    ));
    router.start();

    let tasks = TaskManager::new(events.clone());

    let discovery = Arc::new(Discovery::new(
        config.discovery.clone(),
        &SystemEnv,
        None,
        events.clone(),
    ));
    discovery.initialize().await;
    info!(mode = %discovery.mode(), "discovery ready");

    let (listener, addr) = server::bind(config.host, config.port).await?;
    let card = AgentCard {
        protocol_version: "0.3.0".to_string(),
        name: config.node_name.clone(),
        description: Some("agentmesh fabric node".to_string()),
        url: format!("http://{addr}/jsonrpc"),
        preferred_transport: "JSONRPC".to_string(),
        additional_interfaces: vec![],
        skills: vec![],
        capabilities: vec![],
        system_features: None,
        security_schemes: None,
        supports_authenticated_extended_card: Some(false),
        signature: None,
    };

    let state = Arc::new(ServerState {
        router: Arc::clone(&router),
        tasks: tasks.clone(),
        registry: Arc::clone(&registry),
        executor: Arc::new(EchoExecutor),
        card,
        extended_card: None,
        started_at: Instant::now(),
    });
    let app = server::create_router(state);

    info!(%addr, "jsonrpc surface listening");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    server::serve_with_graceful_shutdown(listener, app, shutdown).await?;

    router.shutdown().await;
    tasks.shutdown();
    discovery.shutdown().await;
    registry.shutdown();
    info!("agentmesh node stopped");
    Ok(())
}

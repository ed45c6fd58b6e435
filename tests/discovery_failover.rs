//! Hybrid discovery failover
//!
//! Initialization must never fail: unreachable backends are bypassed and
//! the resolved mode degrades, down to `none` when nothing works.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agentmesh::discovery::{
    Discovery, DiscoveryConfig, DiscoveryMode, LoopbackNetwork, PeerChannel, StaticEnv,
};
use agentmesh::events::{EventBus, FabricEvent};
use agentmesh::discovery::peer::{PeerAnnouncement, UnreachableChannel};

use common::online_agent;

fn unreachable_central() -> Option<String> {
    // Reserved TEST-NET address: nothing listens there
    Some("http://192.0.2.1:1".to_string())
}

fn config(mode: DiscoveryMode, central_url: Option<String>) -> DiscoveryConfig {
    DiscoveryConfig {
        mode,
        central_url,
        init_timeout: Duration::from_millis(300),
        heartbeat_interval: Duration::from_secs(30),
    }
}

#[test_log::test(tokio::test)]
async fn hybrid_with_dead_central_falls_back_to_p2p() {
    let network = LoopbackNetwork::new();
    let peer: Arc<dyn PeerChannel> = Arc::new(network.channel());
    let discovery = Arc::new(Discovery::new(
        config(DiscoveryMode::Hybrid, unreachable_central()),
        &StaticEnv::default(),
        Some(peer),
        EventBus::new(),
    ));

    discovery.initialize().await;
    assert_eq!(discovery.mode(), DiscoveryMode::P2p);

    let agents = discovery.discover_agents().await;
    assert!(agents.is_empty());
}

#[test_log::test(tokio::test)]
async fn hybrid_with_every_backend_dead_degrades_to_none() {
    let peer: Arc<dyn PeerChannel> = Arc::new(UnreachableChannel);
    let discovery = Arc::new(Discovery::new(
        config(DiscoveryMode::Hybrid, unreachable_central()),
        &StaticEnv::default(),
        Some(peer),
        EventBus::new(),
    ));

    discovery.initialize().await;
    assert_eq!(discovery.mode(), DiscoveryMode::None);
    assert!(discovery.discover_agents().await.is_empty());
}

#[test_log::test(tokio::test)]
async fn lazy_mode_skips_all_network_activity() {
    let discovery = Arc::new(Discovery::new(
        config(DiscoveryMode::Lazy, unreachable_central()),
        &StaticEnv::default(),
        None,
        EventBus::new(),
    ));
    discovery.initialize().await;
    assert_eq!(discovery.mode(), DiscoveryMode::Lazy);
    assert!(discovery.discover_agents().await.is_empty());
}

#[test_log::test(tokio::test)]
async fn central_url_can_come_from_the_environment_provider() {
    let env = StaticEnv(HashMap::from([(
        "AGENTMESH_REGISTRY_URL".to_string(),
        "http://192.0.2.1:1".to_string(),
    )]));
    let discovery = Arc::new(Discovery::new(
        config(DiscoveryMode::Central, None),
        &env,
        None,
        EventBus::new(),
    ));
    discovery.initialize().await;
    // The URL resolved (so the probe ran) but the directory is dead
    assert_eq!(discovery.mode(), DiscoveryMode::None);
}

#[test_log::test(tokio::test)]
async fn peer_announcements_surface_as_discovered_events() {
    let network = LoopbackNetwork::new();
    let peer: Arc<dyn PeerChannel> = Arc::new(network.channel());
    let events = EventBus::new();
    let mut rx = events.subscribe();

    let discovery = Arc::new(Discovery::new(
        config(DiscoveryMode::P2p, None),
        &StaticEnv::default(),
        Some(peer),
        events,
    ));
    discovery.initialize().await;
    assert_eq!(discovery.mode(), DiscoveryMode::P2p);

    let announcer = network.channel();
    announcer
        .announce(PeerAnnouncement::from_profile(&online_agent(
            "agent-9", "compute", 0.9, 10,
        )))
        .await
        .unwrap();

    // The pump forwards the announcement as a discovered profile
    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(FabricEvent::AgentDiscovered { profile }) => return *profile,
                Ok(_) => {}
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("no discovery event arrived");
    assert_eq!(event.agent_id.as_ref(), "agent-9");
    assert_eq!(discovery.cached_peers().len(), 1);

    // Losing the peer clears only discovery's cache
    announcer.withdraw(&event.agent_id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(FabricEvent::AgentLost { .. }) = rx.recv().await {
                return;
            }
        }
    })
    .await
    .expect("no lost event arrived");
    for _ in 0..100 {
        if discovery.cached_peers().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(discovery.cached_peers().is_empty());
}

#[test_log::test(tokio::test)]
async fn p2p_browse_feeds_the_merged_view() {
    let network = LoopbackNetwork::new();
    let peer: Arc<dyn PeerChannel> = Arc::new(network.channel());
    let discovery = Arc::new(Discovery::new(
        config(DiscoveryMode::P2p, None),
        &StaticEnv::default(),
        Some(peer),
        EventBus::new(),
    ));
    discovery.initialize().await;

    let announcer = network.channel();
    for id in ["agent-1", "agent-2"] {
        announcer
            .announce(PeerAnnouncement::from_profile(&online_agent(
                id, "compute", 0.9, 10,
            )))
            .await
            .unwrap();
    }

    let agents = discovery.discover_agents().await;
    assert_eq!(agents.len(), 2);
    assert_eq!(agents[0].agent_id.as_ref(), "agent-1");
    assert_eq!(agents[1].agent_id.as_ref(), "agent-2");
}

#[test_log::test(tokio::test)]
async fn shutdown_is_idempotent() {
    let discovery = Arc::new(Discovery::new(
        config(DiscoveryMode::Lazy, None),
        &StaticEnv::default(),
        None,
        EventBus::new(),
    ));
    discovery.initialize().await;
    discovery.shutdown().await;
    discovery.shutdown().await;
}

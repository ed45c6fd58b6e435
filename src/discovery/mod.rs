//! Hybrid discovery
//!
//! Converges a central directory and a peer announcement channel into a
//! single membership view. Each backend is attempted with a short
//! timeout at initialization; failing backends are logged and bypassed,
//! and initialization never fails. In hybrid mode, central entries win
//! on duplicate ids.

pub mod central;
pub mod peer;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain_types::AgentId;
use crate::error::DiscoveryError;
use crate::events::{EventBus, FabricEvent};
use crate::types::agent::{AgentProfile, AgentStatus};

pub use central::CentralDirectoryClient;
pub use peer::{LoopbackChannel, LoopbackNetwork, PeerAnnouncement, PeerChannel, PeerEvent};

/// Environment variable naming the central directory
const REGISTRY_URL_VAR: &str = "AGENTMESH_REGISTRY_URL";

/// How often the heartbeat refreshes central status
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Per-backend initialization timeout
const INIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Where membership information comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    Central,
    P2p,
    #[default]
    Hybrid,
    /// No network activity at all; useful for offline tests
    Lazy,
    /// Every backend failed; direct addressing only
    None,
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Central => "central",
            Self::P2p => "p2p",
            Self::Hybrid => "hybrid",
            Self::Lazy => "lazy",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// Reads environment configuration without touching process globals
///
/// Injected so discovery never reads `std::env` directly.
pub trait EnvProvider: Send + Sync {
    /// Value of one environment variable
    fn var(&self, key: &str) -> Option<String>;
}

/// Process environment provider used by the binary
pub struct SystemEnv;

impl EnvProvider for SystemEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed-map provider for tests
#[derive(Default)]
pub struct StaticEnv(pub HashMap<String, String>);

impl EnvProvider for StaticEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Requested mode; the resolved mode may degrade at initialization
    pub mode: DiscoveryMode,
    /// Central directory base URL; falls back to the env provider
    pub central_url: Option<String>,
    pub init_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Hybrid,
            central_url: None,
            init_timeout: INIT_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

/// Converged membership view over central and peer backends
pub struct Discovery {
    config: DiscoveryConfig,
    mode: RwLock<DiscoveryMode>,
    central: Option<Arc<CentralDirectoryClient>>,
    peer: Option<Arc<dyn PeerChannel>>,
    /// Discovery's own cache of peer-observed profiles
    cache: Arc<DashMap<AgentId, AgentProfile>>,
    local_agent: Arc<RwLock<Option<AgentId>>>,
    events: EventBus,
    token: CancellationToken,
}

impl Discovery {
    /// Builds discovery without touching the network
    #[must_use]
    pub fn new(
        config: DiscoveryConfig,
        env: &dyn EnvProvider,
        peer: Option<Arc<dyn PeerChannel>>,
        events: EventBus,
    ) -> Self {
        let central_url = config
            .central_url
            .clone()
            .or_else(|| env.var(REGISTRY_URL_VAR));
        let central = central_url
            .map(|url| Arc::new(CentralDirectoryClient::new(url, config.init_timeout)));
        Self {
            config,
            mode: RwLock::new(DiscoveryMode::None),
            central,
            peer,
            cache: Arc::new(DashMap::new()),
            local_agent: Arc::new(RwLock::new(None)),
            events,
            token: CancellationToken::new(),
        }
    }

    fn set_mode(&self, mode: DiscoveryMode) {
        *self.mode.write().expect("discovery mode lock poisoned") = mode;
    }

    /// The mode discovery resolved to at initialization
    #[must_use]
    pub fn mode(&self) -> DiscoveryMode {
        *self.mode.read().expect("discovery mode lock poisoned")
    }

    /// Attempts the configured backends and resolves the operating mode
    ///
    /// Never fails: backends that cannot be reached within the timeout
    /// are logged and bypassed. With no working backend the mode becomes
    /// `none` and the fabric operates in direct-addressing mode.
    pub async fn initialize(&self) {
        let requested = self.config.mode;
        if requested == DiscoveryMode::Lazy {
            self.set_mode(DiscoveryMode::Lazy);
            info!("discovery initialized lazily, no network activity");
            return;
        }

        let try_central = matches!(requested, DiscoveryMode::Central | DiscoveryMode::Hybrid);
        let try_peer = matches!(requested, DiscoveryMode::P2p | DiscoveryMode::Hybrid);

        let central_ok = if try_central {
            match self.central.as_ref() {
                Some(client) => {
                    match tokio::time::timeout(self.config.init_timeout, client.ping()).await {
                        Ok(Ok(())) => {
                            self.events.emit(FabricEvent::RegistryConnected { at: Utc::now() });
                            true
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, "central directory unreachable, bypassing");
                            false
                        }
                        Err(_) => {
                            warn!("central directory probe timed out, bypassing");
                            false
                        }
                    }
                }
                None => {
                    warn!("central discovery requested but no directory URL configured");
                    false
                }
            }
        } else {
            false
        };

        let peer_ok = if try_peer {
            match self.peer.as_ref() {
                Some(channel) => {
                    match tokio::time::timeout(self.config.init_timeout, channel.open()).await {
                        Ok(Ok(())) => true,
                        Ok(Err(e)) => {
                            warn!(error = %e, "peer channel unavailable, bypassing");
                            false
                        }
                        Err(_) => {
                            warn!("peer channel open timed out, bypassing");
                            false
                        }
                    }
                }
                None => false,
            }
        } else {
            false
        };

        let resolved = match (central_ok, peer_ok) {
            (true, true) => DiscoveryMode::Hybrid,
            (true, false) => DiscoveryMode::Central,
            (false, true) => DiscoveryMode::P2p,
            (false, false) => DiscoveryMode::None,
        };
        self.set_mode(resolved);
        info!(requested = %requested, resolved = %resolved, "discovery initialized");

        if peer_ok {
            self.spawn_peer_pump();
        }
        if central_ok {
            self.spawn_heartbeat();
        }
    }

    /// Forwards peer membership changes into the fabric event bus
    fn spawn_peer_pump(&self) {
        let Some(channel) = self.peer.as_ref() else {
            return;
        };
        let mut receiver = channel.subscribe();
        let cache = Arc::clone(&self.cache);
        let events = self.events.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    event = receiver.recv() => match event {
                        Ok(PeerEvent::Appeared(announcement)) => {
                            let profile = announcement.into_profile();
                            cache.insert(profile.agent_id.clone(), profile.clone());
                            events.emit(FabricEvent::AgentDiscovered {
                                profile: Box::new(profile),
                            });
                        }
                        Ok(PeerEvent::Lost(agent_id)) => {
                            // Only discovery's cache forgets the peer; the
                            // registry removes it on unregister or cleanup.
                            cache.remove(&agent_id);
                            events.emit(FabricEvent::AgentLost { agent_id });
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "peer event subscriber lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!("peer event pump stopped");
        });
    }

    /// Refreshes central status for the local agent every interval
    fn spawn_heartbeat(&self) {
        let Some(client) = self.central.clone() else {
            return;
        };
        let local_agent = Arc::clone(&self.local_agent);
        let token = self.token.clone();
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let local = local_agent
                            .read()
                            .expect("local agent lock poisoned")
                            .clone();
                        if let Some(agent_id) = local {
                            if let Err(e) =
                                client.update_status(&agent_id, AgentStatus::Online).await
                            {
                                warn!(error = %e, "heartbeat failed");
                            }
                        }
                    }
                }
            }
            debug!("heartbeat loop stopped");
        });
    }

    /// The merged membership set
    ///
    /// Central entries take precedence over peer announcements with the
    /// same agent id. Lazy and none modes return only the local cache.
    pub async fn discover_agents(&self) -> Vec<AgentProfile> {
        let mode = self.mode();
        let mut merged: HashMap<AgentId, AgentProfile> = HashMap::new();

        if matches!(mode, DiscoveryMode::P2p | DiscoveryMode::Hybrid) {
            if let Some(channel) = self.peer.as_ref() {
                match channel.browse().await {
                    Ok(announcements) => {
                        for announcement in announcements {
                            let profile = announcement.into_profile();
                            self.cache
                                .insert(profile.agent_id.clone(), profile.clone());
                            merged.insert(profile.agent_id.clone(), profile);
                        }
                    }
                    Err(e) => warn!(error = %e, "peer browse failed"),
                }
            }
        }

        if matches!(mode, DiscoveryMode::Central | DiscoveryMode::Hybrid) {
            if let Some(client) = self.central.as_ref() {
                match client.discover().await {
                    Ok(profiles) => {
                        for profile in profiles {
                            merged.insert(profile.agent_id.clone(), profile);
                        }
                    }
                    Err(e) => warn!(error = %e, "central discover failed"),
                }
            }
        }

        if merged.is_empty() && matches!(mode, DiscoveryMode::Lazy | DiscoveryMode::None) {
            return self.cache.iter().map(|e| e.value().clone()).collect();
        }

        let mut agents: Vec<AgentProfile> = merged.into_values().collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Posts a profile to the central directory and starts heartbeating it
    pub async fn register_with_central(
        &self,
        profile: &AgentProfile,
    ) -> Result<(), DiscoveryError> {
        let Some(client) = self.central.as_ref() else {
            return Err(DiscoveryError::CentralUnavailable(
                "no central directory configured".to_string(),
            ));
        };
        client.register(profile).await?;
        *self.local_agent.write().expect("local agent lock poisoned") =
            Some(profile.agent_id.clone());
        Ok(())
    }

    /// Announces a profile on the peer channel
    pub async fn announce(&self, profile: &AgentProfile) -> Result<(), DiscoveryError> {
        let Some(channel) = self.peer.as_ref() else {
            return Err(DiscoveryError::PeerUnavailable(
                "no peer channel configured".to_string(),
            ));
        };
        channel.announce(PeerAnnouncement::from_profile(profile)).await
    }

    /// Issues one status heartbeat for an agent
    pub async fn send_heartbeat(&self, agent_id: &AgentId) -> Result<(), DiscoveryError> {
        let Some(client) = self.central.as_ref() else {
            return Err(DiscoveryError::CentralUnavailable(
                "no central directory configured".to_string(),
            ));
        };
        client.update_status(agent_id, AgentStatus::Online).await
    }

    /// Profiles currently cached from peer announcements
    #[must_use]
    pub fn cached_peers(&self) -> Vec<AgentProfile> {
        self.cache.iter().map(|e| e.value().clone()).collect()
    }

    /// Stops background loops and closes the peer channel; idempotent
    pub async fn shutdown(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        if let Some(channel) = self.peer.as_ref() {
            channel.close().await;
        }
        self.events.emit(FabricEvent::Shutdown {
            component: "discovery",
        });
        info!("discovery shut down");
    }
}

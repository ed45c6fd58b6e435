//! Peer announcement channel
//!
//! The concrete announcement medium (multicast, gossip, service
//! discovery) is an implementation choice behind [`PeerChannel`]. The
//! crate ships an in-process loopback network used by tests and offline
//! configurations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain_types::{AgentId, EndpointUrl};
use crate::error::DiscoveryError;
use crate::types::agent::{AgentProfile, Capability};

/// What an agent announces about itself on the peer channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAnnouncement {
    pub agent_id: AgentId,
    pub agent_type: String,
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointUrl>,
    pub announced_at: DateTime<Utc>,
}

impl PeerAnnouncement {
    /// Builds an announcement from a local profile
    #[must_use]
    pub fn from_profile(profile: &AgentProfile) -> Self {
        Self {
            agent_id: profile.agent_id.clone(),
            agent_type: profile.agent_type.clone(),
            capabilities: profile.capabilities.clone(),
            endpoint: profile.metadata.endpoint.clone(),
            announced_at: Utc::now(),
        }
    }

    /// Derives a registry profile from the announcement metadata
    #[must_use]
    pub fn into_profile(self) -> AgentProfile {
        let mut profile =
            AgentProfile::new(self.agent_id, self.agent_type, self.capabilities);
        profile.metadata.endpoint = self.endpoint;
        profile.last_seen = Utc::now();
        profile
    }
}

/// Peer membership change observed on the channel
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Appeared(PeerAnnouncement),
    Lost(AgentId),
}

/// Transport-agnostic announcement and browse contract
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Opens the channel; called once during discovery initialization
    async fn open(&self) -> Result<(), DiscoveryError>;

    /// Publishes an announcement to peers
    async fn announce(&self, announcement: PeerAnnouncement) -> Result<(), DiscoveryError>;

    /// Withdraws this agent's announcement
    async fn withdraw(&self, agent_id: &AgentId) -> Result<(), DiscoveryError>;

    /// Returns every announcement currently visible
    async fn browse(&self) -> Result<Vec<PeerAnnouncement>, DiscoveryError>;

    /// Subscribes to membership changes
    fn subscribe(&self) -> broadcast::Receiver<PeerEvent>;

    /// Releases channel resources; safe to call repeatedly
    async fn close(&self);
}

#[derive(Default)]
struct LoopbackState {
    peers: HashMap<AgentId, PeerAnnouncement>,
}

struct LoopbackInner {
    state: Mutex<LoopbackState>,
    events: broadcast::Sender<PeerEvent>,
}

/// Shared in-process announcement medium
///
/// Every channel attached to the same network observes the same
/// announcements. Stands in for a multicast group in tests and offline
/// setups.
#[derive(Clone)]
pub struct LoopbackNetwork {
    inner: Arc<LoopbackInner>,
}

impl LoopbackNetwork {
    /// An empty network
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(LoopbackInner {
                state: Mutex::new(LoopbackState::default()),
                events,
            }),
        }
    }

    /// Attaches a channel to this network
    #[must_use]
    pub fn channel(&self) -> LoopbackChannel {
        LoopbackChannel {
            network: self.clone(),
        }
    }
}

impl Default for LoopbackNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint's view of a [`LoopbackNetwork`]
pub struct LoopbackChannel {
    network: LoopbackNetwork,
}

#[async_trait]
impl PeerChannel for LoopbackChannel {
    async fn open(&self) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn announce(&self, announcement: PeerAnnouncement) -> Result<(), DiscoveryError> {
        let inner = &self.network.inner;
        let mut state = inner.state.lock().expect("loopback lock poisoned");
        state
            .peers
            .insert(announcement.agent_id.clone(), announcement.clone());
        drop(state);
        let _ = inner.events.send(PeerEvent::Appeared(announcement));
        Ok(())
    }

    async fn withdraw(&self, agent_id: &AgentId) -> Result<(), DiscoveryError> {
        let inner = &self.network.inner;
        let mut state = inner.state.lock().expect("loopback lock poisoned");
        let removed = state.peers.remove(agent_id).is_some();
        drop(state);
        if removed {
            let _ = inner.events.send(PeerEvent::Lost(agent_id.clone()));
        }
        Ok(())
    }

    async fn browse(&self) -> Result<Vec<PeerAnnouncement>, DiscoveryError> {
        let state = self
            .network
            .inner
            .state
            .lock()
            .expect("loopback lock poisoned");
        Ok(state.peers.values().cloned().collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.network.inner.events.subscribe()
    }

    async fn close(&self) {}
}

/// A channel that always fails to open
///
/// Used in tests exercising initialization fallback.
pub struct UnreachableChannel;

#[async_trait]
impl PeerChannel for UnreachableChannel {
    async fn open(&self) -> Result<(), DiscoveryError> {
        Err(DiscoveryError::PeerUnavailable(
            "channel is unreachable".to_string(),
        ))
    }

    async fn announce(&self, _announcement: PeerAnnouncement) -> Result<(), DiscoveryError> {
        Err(DiscoveryError::PeerUnavailable(
            "channel is unreachable".to_string(),
        ))
    }

    async fn withdraw(&self, _agent_id: &AgentId) -> Result<(), DiscoveryError> {
        Err(DiscoveryError::PeerUnavailable(
            "channel is unreachable".to_string(),
        ))
    }

    async fn browse(&self) -> Result<Vec<PeerAnnouncement>, DiscoveryError> {
        Err(DiscoveryError::PeerUnavailable(
            "channel is unreachable".to_string(),
        ))
    }

    fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        let (sender, receiver) = broadcast::channel(1);
        drop(sender);
        receiver
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::CapabilityName;
    use crate::types::agent::CapabilityCategory;

    fn announcement(id: &str) -> PeerAnnouncement {
        PeerAnnouncement {
            agent_id: AgentId::try_new(id.to_string()).unwrap(),
            agent_type: "worker".to_string(),
            capabilities: vec![Capability {
                id: "cap-1".to_string(),
                name: CapabilityName::try_new("compute".to_string()).unwrap(),
                description: String::new(),
                category: CapabilityCategory::Analysis,
                cost: crate::domain_types::CostScore::default(),
                reliability: crate::domain_types::Reliability::default(),
                version: "1.0".to_string(),
                tags: vec![],
                input_schema: None,
                output_schema: None,
            }],
            endpoint: Some(EndpointUrl::try_new("http://localhost:9000".to_string()).unwrap()),
            announced_at: Utc::now(),
        }
    }

    #[test_log::test(tokio::test)]
    async fn loopback_channels_share_announcements() {
        let network = LoopbackNetwork::new();
        let a = network.channel();
        let b = network.channel();

        a.announce(announcement("agent-1")).await.unwrap();
        let visible = b.browse().await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].agent_id.as_ref(), "agent-1");
    }

    #[test_log::test(tokio::test)]
    async fn withdraw_emits_lost() {
        let network = LoopbackNetwork::new();
        let channel = network.channel();
        let mut events = channel.subscribe();

        channel.announce(announcement("agent-1")).await.unwrap();
        channel
            .withdraw(&AgentId::try_new("agent-1".to_string()).unwrap())
            .await
            .unwrap();

        assert!(matches!(events.recv().await.unwrap(), PeerEvent::Appeared(_)));
        assert!(matches!(events.recv().await.unwrap(), PeerEvent::Lost(_)));
        assert!(channel.browse().await.unwrap().is_empty());
    }

    #[test_log::test]
    fn announcement_profile_roundtrip() {
        let profile = announcement("agent-1").into_profile();
        assert_eq!(profile.agent_id.as_ref(), "agent-1");
        assert_eq!(profile.capabilities.len(), 1);
        assert!(profile.metadata.endpoint.is_some());
    }
}

//! Typed fabric event bus
//!
//! Registry, Router, and Discovery communicate through broadcast events
//! instead of holding references to each other. Subscribers that fall
//! behind lose the oldest events; the bus is a signal channel, not a
//! durable log.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::domain_types::{AgentId, MessageId};
use crate::types::agent::AgentProfile;

/// Default capacity of the broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything observable that happens inside the fabric
#[derive(Debug, Clone)]
pub enum FabricEvent {
    /// An agent was registered with the registry
    AgentRegistered { agent_id: AgentId },
    /// An agent was removed from the registry
    AgentUnregistered { agent_id: AgentId },
    /// The registry's membership or capability view changed
    TopologyChanged,
    /// A message was delivered to its destination
    MessageSent { message_id: MessageId, to: AgentId },
    /// A message could not be delivered
    MessageFailed { message_id: MessageId, reason: String },
    /// A circuit breaker was enabled for an agent
    CircuitEnabled { agent_id: AgentId },
    /// A circuit breaker tripped open
    CircuitOpened { agent_id: AgentId, failures: u32 },
    /// A circuit breaker moved to half-open probing
    CircuitHalfOpen { agent_id: AgentId },
    /// A circuit breaker closed after recovery
    CircuitClosed { agent_id: AgentId },
    /// A failure was recorded against a breaker
    CircuitFailure { agent_id: AgentId, failures: u32 },
    /// A success was recorded against a breaker
    CircuitSuccess { agent_id: AgentId, successes: u32 },
    /// A breaker's counters were reset
    CircuitReset { agent_id: AgentId },
    /// Discovery observed a new peer
    AgentDiscovered { profile: Box<AgentProfile> },
    /// Discovery lost sight of a peer
    AgentLost { agent_id: AgentId },
    /// Discovery connected to the central directory
    RegistryConnected { at: DateTime<Utc> },
    /// A component began shutting down
    Shutdown { component: &'static str },
}

/// Clonable handle for emitting and subscribing to fabric events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FabricEvent>,
}

impl EventBus {
    /// A bus with the default capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// A bus with an explicit capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emits an event; silently drops it when nobody is listening
    pub fn emit(&self, event: FabricEvent) {
        let _ = self.sender.send(event);
    }

    /// Opens a new subscription positioned at the current tail
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FabricEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn events_reach_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let agent_id = AgentId::try_new("agent-1".to_string()).unwrap();
        bus.emit(FabricEvent::AgentRegistered {
            agent_id: agent_id.clone(),
        });

        match rx.recv().await.unwrap() {
            FabricEvent::AgentRegistered { agent_id: got } => assert_eq!(got, agent_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(FabricEvent::TopologyChanged);
        assert_eq!(bus.subscriber_count(), 0);
    }
}

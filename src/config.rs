//! Fabric configuration
//!
//! One construction-time context instead of ambient process state. The
//! binary populates it from CLI flags; embedders build it directly.

use crate::discovery::{DiscoveryConfig, DiscoveryMode};
use crate::router::RouterConfig;

/// Complete configuration for one fabric node
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// Address the JSON-RPC server binds to
    pub host: [u8; 4],
    pub port: u16,
    /// Name this node advertises on its agent card
    pub node_name: String,
    pub router: RouterConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            host: [127, 0, 0, 1],
            port: 7420,
            node_name: "agentmesh-node".to_string(),
            router: RouterConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl FabricConfig {
    /// Configuration for offline runs: lazy discovery, small queues
    #[must_use]
    pub fn offline() -> Self {
        Self {
            router: RouterConfig::development(),
            discovery: DiscoveryConfig {
                mode: DiscoveryMode::Lazy,
                ..DiscoveryConfig::default()
            },
            ..Self::default()
        }
    }
}

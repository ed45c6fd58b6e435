//! Agent profiles, capabilities, and health
//!
//! The registry is the sole owner of [`AgentProfile`] and [`AgentHealth`]
//! records; everything else reads them as snapshots.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain_types::{AgentId, CapabilityName, CostScore, EndpointUrl, LoadPercent, Reliability};
use crate::error::A2aError;

/// Lifecycle status of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
    Degraded,
    Maintenance,
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Busy => "busy",
            Self::Degraded => "degraded",
            Self::Maintenance => "maintenance",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Category a capability belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityCategory {
    Analysis,
    Action,
    Monitoring,
    Creative,
    Coordination,
    Security,
    Communication,
}

impl std::fmt::Display for CapabilityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Analysis => "analysis",
            Self::Action => "action",
            Self::Monitoring => "monitoring",
            Self::Creative => "creative",
            Self::Coordination => "coordination",
            Self::Security => "security",
            Self::Communication => "communication",
        };
        f.write_str(s)
    }
}

/// A named, categorized ability with a cost/reliability profile
///
/// Capabilities are the routing primitive: the router resolves
/// `auto`-addressed messages against the registry's capability index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub id: String,
    pub name: CapabilityName,
    #[serde(default)]
    pub description: String,
    pub category: CapabilityCategory,
    #[serde(default)]
    pub cost: CostScore,
    #[serde(default)]
    pub reliability: Reliability,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Rolling performance counters for an agent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Average response time in milliseconds
    pub avg_response_time: f64,
    /// Fraction of requests that succeeded, `0..=1`
    pub success_rate: f64,
    pub total_requests: u64,
}

/// Feature flags an agent advertises
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentFeatures {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub push_notifications: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

/// Operational metadata attached to a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointUrl>,
    #[serde(default)]
    pub load: LoadPercent,
    /// Seconds since the agent process started
    #[serde(default)]
    pub uptime_secs: u64,
    pub registered_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceMetrics>,
    /// Free-form key/value bag managed through the registry's metadata ops
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

impl AgentMetadata {
    /// Fresh metadata stamped with the current time
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: String::new(),
            endpoint: None,
            load: LoadPercent::default(),
            uptime_secs: 0,
            registered_at: now,
            last_updated: now,
            performance: None,
            extra: HashMap::new(),
        }
    }
}

impl Default for AgentMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// The registry's stored record for an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub agent_id: AgentId,
    pub agent_type: String,
    pub status: AgentStatus,
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub features: AgentFeatures,
    #[serde(default)]
    pub metadata: AgentMetadata,
    pub last_seen: DateTime<Utc>,
}

impl AgentProfile {
    /// Creates a profile with the given id, type, and capabilities
    #[must_use]
    pub fn new(agent_id: AgentId, agent_type: impl Into<String>, capabilities: Vec<Capability>) -> Self {
        Self {
            agent_id,
            agent_type: agent_type.into(),
            status: AgentStatus::Online,
            capabilities,
            features: AgentFeatures::default(),
            metadata: AgentMetadata::new(),
            last_seen: Utc::now(),
        }
    }

    /// Whether the agent is accepting routed messages
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status == AgentStatus::Online
    }

    /// Capability lookup by name
    #[must_use]
    pub fn capability(&self, name: &CapabilityName) -> Option<&Capability> {
        self.capabilities.iter().find(|c| &c.name == name)
    }

    /// Merges fields from a re-registration into this profile
    ///
    /// Used for upserts: the newer profile wins on type, status,
    /// capabilities, and features; metadata keys are merged with the new
    /// profile taking precedence. `last_seen` and `last_updated` are
    /// refreshed.
    pub fn merge_from(&mut self, newer: AgentProfile) {
        let AgentProfile {
            agent_type,
            status,
            capabilities,
            features,
            metadata: mut merged,
            ..
        } = newer;
        self.agent_type = agent_type;
        self.status = status;
        self.capabilities = capabilities;
        self.features = features;
        let mut extra = std::mem::take(&mut self.metadata.extra);
        extra.extend(std::mem::take(&mut merged.extra));
        merged.extra = extra;
        merged.registered_at = self.metadata.registered_at;
        merged.last_updated = Utc::now();
        self.metadata = merged;
        self.last_seen = Utc::now();
    }
}

/// Point-in-time health sample for an agent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentHealth {
    /// CPU utilization percentage
    pub cpu: f64,
    /// Memory utilization percentage
    pub memory: f64,
    pub response_time_ms: f64,
    /// Fraction of requests that errored, `0..=1`
    pub error_rate: f64,
}

/// Thresholds for flagging agents as unhealthy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthThresholds {
    pub max_cpu: f64,
    pub max_memory: f64,
    pub max_response_time_ms: f64,
    pub max_error_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_cpu: 90.0,
            max_memory: 90.0,
            max_response_time_ms: 5000.0,
            max_error_rate: 0.2,
        }
    }
}

impl HealthThresholds {
    /// Whether a health sample exceeds any threshold
    #[must_use]
    pub fn exceeded_by(&self, health: &AgentHealth) -> bool {
        health.cpu > self.max_cpu
            || health.memory > self.max_memory
            || health.response_time_ms > self.max_response_time_ms
            || health.error_rate > self.max_error_rate
    }
}

/// A skill entry on an agent card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// The self-describing manifest served at `/.well-known/ai-agent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub protocol_version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
    pub preferred_transport: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_interfaces: Vec<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_features: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_schemes: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_authenticated_extended_card: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<Value>>,
}

/// Checks profile well-formedness before registration
///
/// Rejects empty agent types, empty capability lists, and duplicate
/// capability names within one agent.
pub fn validate_profile(profile: &AgentProfile) -> Result<(), A2aError> {
    if profile.agent_type.trim().is_empty() {
        return Err(A2aError::InvalidRequest(format!(
            "agent {} has an empty agent type",
            profile.agent_id
        )));
    }
    if profile.capabilities.is_empty() {
        return Err(A2aError::InvalidRequest(format!(
            "agent {} declares no capabilities",
            profile.agent_id
        )));
    }
    let mut seen: HashSet<&CapabilityName> = HashSet::new();
    for capability in &profile.capabilities {
        if !seen.insert(&capability.name) {
            return Err(A2aError::InvalidRequest(format!(
                "agent {} declares capability {} more than once",
                profile.agent_id, capability.name
            )));
        }
    }
    Ok(())
}

//! Capability-indexed agent catalog
//!
//! The registry exclusively owns agent profiles, health samples, and the
//! topology projection. Four indices are kept consistent under a single
//! lock: `agent id -> profile`, `agent id -> capability map`,
//! `capability name -> agent set`, and `category -> agent set`. No
//! mutator partially succeeds across indices.

pub mod query;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain_types::{AgentId, CapabilityName};
use crate::error::RegistryError;
use crate::events::{EventBus, FabricEvent};
use crate::types::agent::{
    AgentHealth, AgentProfile, AgentStatus, Capability, CapabilityCategory, HealthThresholds,
    validate_profile,
};

pub use query::{CapabilityMatch, CapabilityQuery};

/// Interval of the periodic cleanup sweep
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Offline agents unseen for longer than this are removed by the sweep
const OFFLINE_CUTOFF: Duration = Duration::from_secs(300);

/// Response time assumed for agents without performance metrics
const DEFAULT_RESPONSE_TIME_MS: f64 = 1000.0;

/// A derived record scoring an agent for one capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub agent_id: AgentId,
    pub capability: CapabilityName,
    pub cost: f64,
    pub reliability: f64,
    pub response_time_ms: f64,
    pub load: u8,
}

/// Snapshot of the registry's membership and route view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkTopology {
    pub agents: Vec<AgentProfile>,
    /// Total number of capability route endpoints
    pub connections: usize,
    pub message_routes: HashMap<CapabilityName, Vec<Route>>,
    pub last_updated: DateTime<Utc>,
}

/// Outcome of a bulk registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkRegistrationReport {
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    profiles: HashMap<AgentId, AgentProfile>,
    agent_capabilities: HashMap<AgentId, HashMap<CapabilityName, Capability>>,
    capability_index: HashMap<CapabilityName, HashSet<AgentId>>,
    category_index: HashMap<CapabilityCategory, HashSet<AgentId>>,
}

impl RegistryInner {
    /// Inserts a profile into all four indices. Caller has checked for
    /// duplicates and validity.
    fn insert(&mut self, profile: AgentProfile) {
        let agent_id = profile.agent_id.clone();
        let mut capability_map = HashMap::new();
        for capability in &profile.capabilities {
            self.capability_index
                .entry(capability.name.clone())
                .or_default()
                .insert(agent_id.clone());
            self.category_index
                .entry(capability.category)
                .or_default()
                .insert(agent_id.clone());
            capability_map.insert(capability.name.clone(), capability.clone());
        }
        self.agent_capabilities.insert(agent_id.clone(), capability_map);
        self.profiles.insert(agent_id, profile);
    }

    /// Removes a profile from all four indices; no-op for unknown ids
    fn remove(&mut self, agent_id: &AgentId) -> Option<AgentProfile> {
        let profile = self.profiles.remove(agent_id)?;
        self.agent_capabilities.remove(agent_id);
        for capability in &profile.capabilities {
            if let Some(agents) = self.capability_index.get_mut(&capability.name) {
                agents.remove(agent_id);
                if agents.is_empty() {
                    self.capability_index.remove(&capability.name);
                }
            }
            if let Some(agents) = self.category_index.get_mut(&capability.category) {
                agents.remove(agent_id);
                if agents.is_empty() {
                    self.category_index.remove(&capability.category);
                }
            }
        }
        Some(profile)
    }

    /// Replaces an agent's capability set, rebuilding secondary indices
    fn replace_capabilities(&mut self, agent_id: &AgentId, capabilities: Vec<Capability>) {
        if let Some(mut profile) = self.remove(agent_id) {
            profile.capabilities = capabilities;
            profile.metadata.last_updated = Utc::now();
            self.insert(profile);
        }
    }
}

/// In-memory capability-indexed catalog with health and lifecycle cleanup
pub struct AgentRegistry {
    inner: RwLock<RegistryInner>,
    health: DashMap<AgentId, AgentHealth>,
    events: EventBus,
    cleanup_token: CancellationToken,
}

impl AgentRegistry {
    /// A registry emitting onto the given event bus
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            health: DashMap::new(),
            events,
            cleanup_token: CancellationToken::new(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().expect("registry lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().expect("registry lock poisoned")
    }

    /// Registers a new agent; duplicate ids are rejected
    ///
    /// Emits `AgentRegistered` and `TopologyChanged` on success.
    pub fn register(&self, profile: AgentProfile) -> Result<(), RegistryError> {
        validate_profile(&profile).map_err(|e| RegistryError::InvalidProfile {
            reason: e.to_string(),
        })?;
        let agent_id = profile.agent_id.clone();
        let mut inner = self.write();
        if inner.profiles.contains_key(&agent_id) {
            return Err(RegistryError::AlreadyRegistered { agent_id });
        }
        inner.insert(profile);
        self.events.emit(FabricEvent::AgentRegistered {
            agent_id: agent_id.clone(),
        });
        self.events.emit(FabricEvent::TopologyChanged);
        drop(inner);
        debug!(agent_id = %agent_id, "agent registered");
        Ok(())
    }

    /// Registers or merges: a second registration with the same id merges
    /// profile fields and refreshes `last_seen`
    pub fn upsert(&self, profile: AgentProfile) -> Result<(), RegistryError> {
        validate_profile(&profile).map_err(|e| RegistryError::InvalidProfile {
            reason: e.to_string(),
        })?;
        let agent_id = profile.agent_id.clone();
        let mut inner = self.write();
        if let Some(mut existing) = inner.remove(&agent_id) {
            existing.merge_from(profile);
            inner.insert(existing);
        } else {
            inner.insert(profile);
            self.events.emit(FabricEvent::AgentRegistered {
                agent_id: agent_id.clone(),
            });
        }
        self.events.emit(FabricEvent::TopologyChanged);
        drop(inner);
        debug!(agent_id = %agent_id, "agent upserted");
        Ok(())
    }

    /// Removes an agent from all indices; safe to repeat
    pub fn unregister(&self, agent_id: &AgentId) -> bool {
        let mut inner = self.write();
        let removed = inner.remove(agent_id).is_some();
        if removed {
            self.events.emit(FabricEvent::AgentUnregistered {
                agent_id: agent_id.clone(),
            });
            self.events.emit(FabricEvent::TopologyChanged);
        }
        drop(inner);
        if removed {
            self.health.remove(agent_id);
            debug!(agent_id = %agent_id, "agent unregistered");
        }
        removed
    }

    /// Registers many profiles, reporting per-entry failures
    ///
    /// Fires a single `TopologyChanged` at the end regardless of how many
    /// entries succeeded.
    pub fn bulk_register(&self, profiles: Vec<AgentProfile>) -> BulkRegistrationReport {
        let mut report = BulkRegistrationReport::default();
        let mut inner = self.write();
        for profile in profiles {
            let agent_id = profile.agent_id.clone();
            if let Err(e) = validate_profile(&profile) {
                report.failed += 1;
                report.errors.push(format!("{agent_id}: {e}"));
                continue;
            }
            if inner.profiles.contains_key(&agent_id) {
                report.failed += 1;
                report.errors.push(format!("{agent_id}: already registered"));
                continue;
            }
            inner.insert(profile);
            self.events.emit(FabricEvent::AgentRegistered { agent_id });
            report.successful += 1;
        }
        self.events.emit(FabricEvent::TopologyChanged);
        drop(inner);
        info!(
            successful = report.successful,
            failed = report.failed,
            "bulk registration finished"
        );
        report
    }

    /// Updates an agent's lifecycle status
    pub fn update_status(
        &self,
        agent_id: &AgentId,
        status: AgentStatus,
    ) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let profile = inner
            .profiles
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound {
                agent_id: agent_id.clone(),
            })?;
        profile.status = status;
        profile.metadata.last_updated = Utc::now();
        Ok(())
    }

    /// Replaces an agent's capability set, reindexing atomically
    pub fn update_capabilities(
        &self,
        agent_id: &AgentId,
        capabilities: Vec<Capability>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.write();
        if !inner.profiles.contains_key(agent_id) {
            return Err(RegistryError::AgentNotFound {
                agent_id: agent_id.clone(),
            });
        }
        inner.replace_capabilities(agent_id, capabilities);
        self.events.emit(FabricEvent::TopologyChanged);
        Ok(())
    }

    /// Refreshes an agent's liveness timestamp
    pub fn update_last_seen(&self, agent_id: &AgentId) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let profile = inner
            .profiles
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound {
                agent_id: agent_id.clone(),
            })?;
        profile.last_seen = Utc::now();
        Ok(())
    }

    /// Stores a health sample for an agent
    pub fn update_health(
        &self,
        agent_id: &AgentId,
        health: AgentHealth,
    ) -> Result<(), RegistryError> {
        if !self.read().profiles.contains_key(agent_id) {
            return Err(RegistryError::AgentNotFound {
                agent_id: agent_id.clone(),
            });
        }
        self.health.insert(agent_id.clone(), health);
        Ok(())
    }

    /// Latest health sample for an agent, if any
    #[must_use]
    pub fn health(&self, agent_id: &AgentId) -> Option<AgentHealth> {
        self.health.get(agent_id).map(|h| *h)
    }

    /// Sets one metadata key on an agent
    pub fn set_metadata(
        &self,
        agent_id: &AgentId,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let profile = inner
            .profiles
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound {
                agent_id: agent_id.clone(),
            })?;
        profile.metadata.extra.insert(key.into(), value);
        profile.metadata.last_updated = Utc::now();
        Ok(())
    }

    /// Merges a metadata map into an agent's bag, new keys winning
    pub fn merge_metadata(
        &self,
        agent_id: &AgentId,
        entries: HashMap<String, Value>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let profile = inner
            .profiles
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound {
                agent_id: agent_id.clone(),
            })?;
        profile.metadata.extra.extend(entries);
        profile.metadata.last_updated = Utc::now();
        Ok(())
    }

    /// Deletes one metadata key from an agent
    pub fn delete_metadata(&self, agent_id: &AgentId, key: &str) -> Result<(), RegistryError> {
        let mut inner = self.write();
        let profile = inner
            .profiles
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound {
                agent_id: agent_id.clone(),
            })?;
        profile.metadata.extra.remove(key);
        profile.metadata.last_updated = Utc::now();
        Ok(())
    }

    /// Profile snapshot for one agent
    #[must_use]
    pub fn get(&self, agent_id: &AgentId) -> Option<AgentProfile> {
        self.read().profiles.get(agent_id).cloned()
    }

    /// Whether an agent is registered
    #[must_use]
    pub fn contains(&self, agent_id: &AgentId) -> bool {
        self.read().profiles.contains_key(agent_id)
    }

    /// Snapshot of every registered profile
    #[must_use]
    pub fn list(&self) -> Vec<AgentProfile> {
        self.read().profiles.values().cloned().collect()
    }

    /// Number of registered agents
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().profiles.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().profiles.is_empty()
    }

    /// All online agents indexed under the given capability name
    #[must_use]
    pub fn find_by_capability(&self, name: &CapabilityName) -> Vec<AgentProfile> {
        let inner = self.read();
        let Some(agent_ids) = inner.capability_index.get(name) else {
            return Vec::new();
        };
        let mut agents: Vec<AgentProfile> = agent_ids
            .iter()
            .filter_map(|id| inner.profiles.get(id))
            .filter(|p| p.is_online())
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Online agents possessing every one of the requested capabilities
    #[must_use]
    pub fn find_by_capabilities(&self, names: &[CapabilityName]) -> Vec<AgentProfile> {
        let inner = self.read();
        let Some((first, rest)) = names.split_first() else {
            return Vec::new();
        };
        let Some(seed) = inner.capability_index.get(first) else {
            return Vec::new();
        };
        let mut intersection: HashSet<&AgentId> = seed.iter().collect();
        for name in rest {
            let Some(agents) = inner.capability_index.get(name) else {
                return Vec::new();
            };
            intersection.retain(|id| agents.contains(*id));
            if intersection.is_empty() {
                return Vec::new();
            }
        }
        let mut agents: Vec<AgentProfile> = intersection
            .into_iter()
            .filter_map(|id| inner.profiles.get(id))
            .filter(|p| p.is_online())
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Agents with at least one capability in the given category
    #[must_use]
    pub fn find_by_category(&self, category: CapabilityCategory) -> Vec<AgentProfile> {
        let inner = self.read();
        inner
            .category_index
            .get(&category)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.profiles.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Agents of a given free-form type
    #[must_use]
    pub fn find_by_type(&self, agent_type: &str) -> Vec<AgentProfile> {
        self.read()
            .profiles
            .values()
            .filter(|p| p.agent_type == agent_type)
            .cloned()
            .collect()
    }

    /// Agents in a given lifecycle status
    #[must_use]
    pub fn find_by_status(&self, status: AgentStatus) -> Vec<AgentProfile> {
        self.read()
            .profiles
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect()
    }

    /// Fuzzy capability search over online agents
    #[must_use]
    pub fn query_capabilities(&self, query: &CapabilityQuery) -> Vec<CapabilityMatch> {
        let inner = self.read();
        query::run(query, inner.profiles.values())
    }

    /// Agents whose latest health sample exceeds any threshold
    #[must_use]
    pub fn get_unhealthy_agents(&self, thresholds: &HealthThresholds) -> Vec<(AgentId, AgentHealth)> {
        self.health
            .iter()
            .filter(|entry| thresholds.exceeded_by(entry.value()))
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Degrades an agent whose health crosses the fixed limits
    ///
    /// cpu > 90, memory > 90, response time > 5000ms, or error rate > 0.2
    /// transitions the agent to `degraded`. Returns the resulting status.
    pub fn check_health_and_update_status(
        &self,
        agent_id: &AgentId,
    ) -> Result<AgentStatus, RegistryError> {
        let health = self.health.get(agent_id).map(|h| *h);
        let mut inner = self.write();
        let profile = inner
            .profiles
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::AgentNotFound {
                agent_id: agent_id.clone(),
            })?;
        if health.is_some_and(|h| HealthThresholds::default().exceeded_by(&h)) {
            profile.status = AgentStatus::Degraded;
            profile.metadata.last_updated = Utc::now();
            warn!(agent_id = %agent_id, "agent degraded by health check");
        }
        Ok(profile.status)
    }

    /// Agents unseen for longer than the threshold
    #[must_use]
    pub fn get_inactive_agents(&self, threshold: Duration) -> Vec<AgentId> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::zero());
        self.read()
            .profiles
            .values()
            .filter(|p| p.last_seen < cutoff)
            .map(|p| p.agent_id.clone())
            .collect()
    }

    /// Removes agents unseen for longer than the threshold
    pub fn cleanup_inactive(&self, threshold: Duration) -> usize {
        let stale = self.get_inactive_agents(threshold);
        let mut removed = 0;
        for agent_id in stale {
            if self.unregister(&agent_id) {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "cleaned up inactive agents");
        }
        removed
    }

    /// Removes offline agents unseen past the cutoff; used by the sweep
    fn cleanup_offline(&self, cutoff: Duration) -> usize {
        let boundary =
            Utc::now() - chrono::Duration::from_std(cutoff).unwrap_or(chrono::Duration::zero());
        let stale: Vec<AgentId> = self
            .read()
            .profiles
            .values()
            .filter(|p| p.status == AgentStatus::Offline && p.last_seen < boundary)
            .map(|p| p.agent_id.clone())
            .collect();
        let mut removed = 0;
        for agent_id in stale {
            if self.unregister(&agent_id) {
                removed += 1;
            }
        }
        removed
    }

    /// Instantaneous membership and per-capability route view
    #[must_use]
    pub fn get_topology(&self) -> NetworkTopology {
        let inner = self.read();
        let mut message_routes: HashMap<CapabilityName, Vec<Route>> = HashMap::new();
        let mut connections = 0;
        for (name, agent_ids) in &inner.capability_index {
            let mut routes = Vec::with_capacity(agent_ids.len());
            for agent_id in agent_ids {
                let Some(profile) = inner.profiles.get(agent_id) else {
                    continue;
                };
                let Some(capability) = profile.capability(name) else {
                    continue;
                };
                routes.push(Route {
                    agent_id: agent_id.clone(),
                    capability: name.clone(),
                    cost: capability.cost.as_f64(),
                    reliability: capability.reliability.as_f64(),
                    response_time_ms: profile
                        .metadata
                        .performance
                        .map_or(DEFAULT_RESPONSE_TIME_MS, |p| p.avg_response_time),
                    load: profile.metadata.load.as_u8(),
                });
            }
            routes.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
            connections += routes.len();
            message_routes.insert(name.clone(), routes);
        }
        NetworkTopology {
            agents: inner.profiles.values().cloned().collect(),
            connections,
            message_routes,
            last_updated: Utc::now(),
        }
    }

    /// Spawns the periodic cleanup sweep
    ///
    /// Every 60 seconds, offline agents unseen for five minutes are
    /// removed. The loop stops when [`AgentRegistry::shutdown`] is called.
    pub fn start_cleanup(self: Arc<Self>) {
        let token = self.cleanup_token.clone();
        let registry = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = registry.cleanup_offline(OFFLINE_CUTOFF);
                        if removed > 0 {
                            debug!(removed, "cleanup sweep removed offline agents");
                        }
                    }
                }
            }
            debug!("registry cleanup loop stopped");
        });
    }

    /// Stops the cleanup sweep; safe to call repeatedly
    pub fn shutdown(&self) {
        self.cleanup_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{CostScore, Reliability};

    fn capability(name: &str, category: CapabilityCategory) -> Capability {
        Capability {
            id: format!("cap-{name}"),
            name: CapabilityName::try_new(name.to_string()).unwrap(),
            description: format!("{name} capability"),
            category,
            cost: CostScore::try_new(10.0).unwrap(),
            reliability: Reliability::try_new(0.9).unwrap(),
            version: "1.0".to_string(),
            tags: vec![],
            input_schema: None,
            output_schema: None,
        }
    }

    fn profile(id: &str, caps: &[&str]) -> AgentProfile {
        AgentProfile::new(
            AgentId::try_new(id.to_string()).unwrap(),
            "worker",
            caps.iter()
                .map(|c| capability(c, CapabilityCategory::Analysis))
                .collect(),
        )
    }

    fn agent_id(id: &str) -> AgentId {
        AgentId::try_new(id.to_string()).unwrap()
    }

    fn registry() -> AgentRegistry {
        AgentRegistry::new(EventBus::new())
    }

    #[test_log::test]
    fn register_and_lookup() {
        let reg = registry();
        reg.register(profile("agent-1", &["compute"])).unwrap();
        assert!(reg.contains(&agent_id("agent-1")));
        assert_eq!(reg.len(), 1);
        let found = reg.find_by_capability(&CapabilityName::try_new("compute").unwrap());
        assert_eq!(found.len(), 1);
    }

    #[test_log::test]
    fn duplicate_registration_is_rejected() {
        let reg = registry();
        reg.register(profile("agent-1", &["compute"])).unwrap();
        let err = reg.register(profile("agent-1", &["compute"])).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
    }

    #[test_log::test]
    fn upsert_merges_and_refreshes() {
        let reg = registry();
        reg.register(profile("agent-1", &["compute"])).unwrap();
        reg.upsert(profile("agent-1", &["compute", "storage"])).unwrap();
        let stored = reg.get(&agent_id("agent-1")).unwrap();
        assert_eq!(stored.capabilities.len(), 2);
        let found = reg.find_by_capability(&CapabilityName::try_new("storage").unwrap());
        assert_eq!(found.len(), 1);
    }

    #[test_log::test]
    fn unregister_is_idempotent_and_cleans_indices() {
        let reg = registry();
        reg.register(profile("agent-1", &["compute"])).unwrap();
        assert!(reg.unregister(&agent_id("agent-1")));
        assert!(!reg.unregister(&agent_id("agent-1")));
        assert!(
            reg.find_by_capability(&CapabilityName::try_new("compute").unwrap())
                .is_empty()
        );
        assert!(reg.find_by_category(CapabilityCategory::Analysis).is_empty());
    }

    #[test_log::test]
    fn bulk_register_reports_partial_failure() {
        let reg = registry();
        let mut invalid = profile("agent-2", &[]);
        invalid.capabilities.clear();
        let report = reg.bulk_register(vec![
            profile("agent-1", &["compute"]),
            invalid,
            profile("agent-3", &["storage"]),
        ]);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[test_log::test]
    fn bulk_register_fires_one_topology_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let reg = AgentRegistry::new(bus);
        reg.bulk_register(vec![profile("agent-1", &["a"]), profile("agent-2", &["b"])]);

        let mut topology_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, FabricEvent::TopologyChanged) {
                topology_events += 1;
            }
        }
        assert_eq!(topology_events, 1);
    }

    #[test_log::test]
    fn find_by_capabilities_intersects() {
        let reg = registry();
        reg.register(profile("agent-1", &["a", "b"])).unwrap();
        reg.register(profile("agent-2", &["a"])).unwrap();
        let names = vec![
            CapabilityName::try_new("a".to_string()).unwrap(),
            CapabilityName::try_new("b".to_string()).unwrap(),
        ];
        let both = reg.find_by_capabilities(&names);
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].agent_id, agent_id("agent-1"));
    }

    #[test_log::test]
    fn offline_agents_are_not_routable() {
        let reg = registry();
        reg.register(profile("agent-1", &["compute"])).unwrap();
        reg.update_status(&agent_id("agent-1"), AgentStatus::Offline)
            .unwrap();
        assert!(
            reg.find_by_capability(&CapabilityName::try_new("compute").unwrap())
                .is_empty()
        );
    }

    #[test_log::test]
    fn mutators_fail_for_unknown_agents() {
        let reg = registry();
        let ghost = agent_id("ghost");
        assert!(matches!(
            reg.update_status(&ghost, AgentStatus::Busy),
            Err(RegistryError::AgentNotFound { .. })
        ));
        assert!(matches!(
            reg.update_last_seen(&ghost),
            Err(RegistryError::AgentNotFound { .. })
        ));
        assert!(matches!(
            reg.update_health(&ghost, AgentHealth::default()),
            Err(RegistryError::AgentNotFound { .. })
        ));
        assert!(matches!(
            reg.set_metadata(&ghost, "k", Value::Null),
            Err(RegistryError::AgentNotFound { .. })
        ));
    }

    #[test_log::test]
    fn health_check_degrades_overloaded_agents() {
        let reg = registry();
        reg.register(profile("agent-1", &["compute"])).unwrap();
        let id = agent_id("agent-1");
        reg.update_health(
            &id,
            AgentHealth {
                cpu: 95.0,
                memory: 10.0,
                response_time_ms: 100.0,
                error_rate: 0.0,
            },
        )
        .unwrap();
        let status = reg.check_health_and_update_status(&id).unwrap();
        assert_eq!(status, AgentStatus::Degraded);
    }

    #[test_log::test]
    fn topology_defaults_response_time() {
        let reg = registry();
        reg.register(profile("agent-1", &["compute"])).unwrap();
        let topology = reg.get_topology();
        assert_eq!(topology.agents.len(), 1);
        assert_eq!(topology.connections, 1);
        let routes = topology
            .message_routes
            .get(&CapabilityName::try_new("compute").unwrap())
            .unwrap();
        assert!((routes[0].response_time_ms - 1000.0).abs() < f64::EPSILON);
    }

    #[test_log::test]
    fn capability_index_consistent_after_update() {
        let reg = registry();
        reg.register(profile("agent-1", &["a"])).unwrap();
        reg.update_capabilities(
            &agent_id("agent-1"),
            vec![capability("b", CapabilityCategory::Action)],
        )
        .unwrap();
        assert!(
            reg.find_by_capability(&CapabilityName::try_new("a").unwrap())
                .is_empty()
        );
        assert_eq!(
            reg.find_by_capability(&CapabilityName::try_new("b").unwrap())
                .len(),
            1
        );
        assert_eq!(reg.find_by_category(CapabilityCategory::Action).len(), 1);
        assert!(reg.find_by_category(CapabilityCategory::Analysis).is_empty());
    }

    #[test_log::test]
    fn metadata_ops_roundtrip() {
        let reg = registry();
        reg.register(profile("agent-1", &["compute"])).unwrap();
        let id = agent_id("agent-1");
        reg.set_metadata(&id, "zone", serde_json::json!("us-east")).unwrap();
        reg.merge_metadata(
            &id,
            HashMap::from([("rack".to_string(), serde_json::json!("r7"))]),
        )
        .unwrap();
        let stored = reg.get(&id).unwrap();
        assert_eq!(stored.metadata.extra.len(), 2);
        reg.delete_metadata(&id, "zone").unwrap();
        assert_eq!(reg.get(&id).unwrap().metadata.extra.len(), 1);
    }

    #[test_log::test]
    fn inactive_cleanup_removes_stale_agents() {
        let reg = registry();
        reg.register(profile("agent-1", &["compute"])).unwrap();
        {
            let mut inner = reg.write();
            let p = inner.profiles.get_mut(&agent_id("agent-1")).unwrap();
            p.last_seen = Utc::now() - chrono::Duration::minutes(10);
        }
        assert_eq!(reg.get_inactive_agents(Duration::from_secs(300)).len(), 1);
        assert_eq!(reg.cleanup_inactive(Duration::from_secs(300)), 1);
        assert!(reg.is_empty());
    }

    #[test_log::test]
    fn offline_sweep_only_removes_offline() {
        let reg = registry();
        reg.register(profile("agent-1", &["compute"])).unwrap();
        reg.register(profile("agent-2", &["compute"])).unwrap();
        reg.update_status(&agent_id("agent-1"), AgentStatus::Offline)
            .unwrap();
        {
            let mut inner = reg.write();
            for p in inner.profiles.values_mut() {
                p.last_seen = Utc::now() - chrono::Duration::minutes(10);
            }
        }
        assert_eq!(reg.cleanup_offline(Duration::from_secs(300)), 1);
        assert!(reg.contains(&agent_id("agent-2")));
    }
}

//! Agent selection policies
//!
//! Given the online agents capable of a task, pick one. All policies
//! break ties by lexicographic agent id; candidates are sorted before
//! selection so results are deterministic.

use crate::domain_types::CapabilityName;
use crate::types::agent::AgentProfile;

use super::config::SelectionPolicy;

/// Weighted score of one agent for one capability
///
/// `0.4·reliability + 0.3·(1 − load/100) + 0.2·success_rate +
/// 0.1·(1 − cost/100)`. Agents without performance metrics score zero on
/// the success-rate term.
#[must_use]
pub fn best_match_score(profile: &AgentProfile, capability: &CapabilityName) -> f64 {
    let Some(cap) = profile.capability(capability) else {
        return 0.0;
    };
    let reliability = cap.reliability.as_f64();
    let load_headroom = 1.0 - profile.metadata.load.as_fraction();
    let success_rate = profile
        .metadata
        .performance
        .map_or(0.0, |p| p.success_rate.clamp(0.0, 1.0));
    let cost_headroom = 1.0 - cap.cost.as_fraction();
    0.4 * reliability + 0.3 * load_headroom + 0.2 * success_rate + 0.1 * cost_headroom
}

/// Character-sum of a capability name, used by round-robin
fn char_sum(capability: &CapabilityName) -> usize {
    capability.as_ref().chars().map(|c| c as usize).sum()
}

/// Applies the policy to the candidate set
///
/// Candidates are expected to be online and capable; the caller resolves
/// them from the registry. Returns `None` for an empty candidate set.
#[must_use]
pub fn select<'a>(
    policy: SelectionPolicy,
    capability: &CapabilityName,
    candidates: &'a [AgentProfile],
) -> Option<&'a AgentProfile> {
    if candidates.is_empty() {
        return None;
    }
    let mut ordered: Vec<&AgentProfile> = candidates.iter().collect();
    ordered.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

    match policy {
        SelectionPolicy::BestMatch => ordered.into_iter().reduce(|best, candidate| {
            // Strictly greater wins; equal scores keep the lower agent id
            if best_match_score(candidate, capability) > best_match_score(best, capability) {
                candidate
            } else {
                best
            }
        }),
        SelectionPolicy::RoundRobin => {
            let index = char_sum(capability) % ordered.len();
            Some(ordered[index])
        }
        SelectionPolicy::LeastLoaded => ordered.into_iter().reduce(|best, candidate| {
            if candidate.metadata.load < best.metadata.load {
                candidate
            } else {
                best
            }
        }),
    }
}

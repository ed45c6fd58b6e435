//! Fuzzy capability search
//!
//! Scores every capability of every online agent against a query.
//! Substring matches on name and description contribute 50 points, each
//! matching tag 10, and the agent's success rate up to 20. Category,
//! minimum reliability, and maximum cost are hard filters. Scores are
//! normalized to `[0, 1]`.

use serde::{Deserialize, Serialize};

use crate::domain_types::AgentId;
use crate::types::agent::{AgentProfile, Capability, CapabilityCategory};

const TEXT_POINTS: f64 = 50.0;
const TAG_POINTS: f64 = 10.0;
const SUCCESS_RATE_POINTS: f64 = 20.0;

/// A capability search request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityQuery {
    /// Free-text fragment matched against capability name and description
    #[serde(default)]
    pub query: String,
    /// Hard filter on category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CapabilityCategory>,
    /// Hard filter: capabilities below this reliability are excluded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_reliability: Option<f64>,
    /// Hard filter: capabilities above this cost are excluded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    /// Tags that add to the score when present on a capability
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// One scored search result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityMatch {
    pub agent_id: AgentId,
    pub capability: Capability,
    /// Normalized score in `[0, 1]`
    pub score: f64,
    /// Human-readable explanation of the score
    pub reason: String,
}

/// Runs a query against a snapshot of profiles
pub(crate) fn run<'a>(
    query: &CapabilityQuery,
    profiles: impl Iterator<Item = &'a AgentProfile>,
) -> Vec<CapabilityMatch> {
    let needle = query.query.to_lowercase();
    let max_score = TEXT_POINTS + TAG_POINTS * query.tags.len() as f64 + SUCCESS_RATE_POINTS;

    let mut matches = Vec::new();
    for profile in profiles.filter(|p| p.is_online()) {
        let success_rate = profile
            .metadata
            .performance
            .map_or(0.0, |p| p.success_rate.clamp(0.0, 1.0));
        for capability in &profile.capabilities {
            if query
                .category
                .is_some_and(|category| capability.category != category)
            {
                continue;
            }
            if query
                .min_reliability
                .is_some_and(|min| capability.reliability.as_f64() < min)
            {
                continue;
            }
            if query
                .max_cost
                .is_some_and(|max| capability.cost.as_f64() > max)
            {
                continue;
            }

            let mut raw = 0.0;
            let mut reasons = Vec::new();

            if !needle.is_empty() {
                let name = capability.name.as_ref().to_lowercase();
                let description = capability.description.to_lowercase();
                if name.contains(&needle) || description.contains(&needle) {
                    raw += TEXT_POINTS;
                    reasons.push(format!("matches '{}'", query.query));
                }
            }

            let matching_tags: Vec<&String> = query
                .tags
                .iter()
                .filter(|t| capability.tags.iter().any(|have| have == *t))
                .collect();
            if !matching_tags.is_empty() {
                raw += TAG_POINTS * matching_tags.len() as f64;
                reasons.push(format!("{} matching tags", matching_tags.len()));
            }

            if success_rate > 0.0 {
                raw += SUCCESS_RATE_POINTS * success_rate;
                reasons.push(format!("success rate {:.0}%", success_rate * 100.0));
            }

            if raw <= 0.0 {
                continue;
            }

            let reason = if reasons.is_empty() {
                "matched".to_string()
            } else {
                reasons.join(", ")
            };
            matches.push(CapabilityMatch {
                agent_id: profile.agent_id.clone(),
                capability: capability.clone(),
                score: raw / max_score,
                reason,
            });
        }
    }

    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.agent_id.cmp(&b.agent_id))
    });
    if let Some(limit) = query.limit {
        matches.truncate(limit);
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_types::{CapabilityName, CostScore, Reliability};
    use crate::types::agent::PerformanceMetrics;

    fn capability(name: &str, description: &str, tags: &[&str]) -> Capability {
        Capability {
            id: format!("cap-{name}"),
            name: CapabilityName::try_new(name.to_string()).unwrap(),
            description: description.to_string(),
            category: CapabilityCategory::Analysis,
            cost: CostScore::try_new(20.0).unwrap(),
            reliability: Reliability::try_new(0.9).unwrap(),
            version: "1.0".to_string(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            input_schema: None,
            output_schema: None,
        }
    }

    fn profile(id: &str, capabilities: Vec<Capability>) -> AgentProfile {
        AgentProfile::new(AgentId::try_new(id.to_string()).unwrap(), "worker", capabilities)
    }

    #[test_log::test]
    fn substring_match_scores() {
        let profiles = vec![profile(
            "agent-1",
            vec![capability("image-analysis", "analyzes images", &[])],
        )];
        let query = CapabilityQuery {
            query: "image".to_string(),
            ..CapabilityQuery::default()
        };
        let matches = run(&query, profiles.iter());
        assert_eq!(matches.len(), 1);
        assert!(matches[0].score > 0.0);
        assert!(matches[0].reason.contains("image"));
    }

    #[test_log::test]
    fn tags_and_success_rate_raise_score() {
        let mut tagged = profile(
            "agent-1",
            vec![capability("compute", "number crunching", &["gpu", "fast"])],
        );
        tagged.metadata.performance = Some(PerformanceMetrics {
            avg_response_time: 100.0,
            success_rate: 1.0,
            total_requests: 10,
        });
        let plain = profile("agent-2", vec![capability("compute", "number crunching", &[])]);
        let profiles = vec![tagged, plain];

        let query = CapabilityQuery {
            query: "compute".to_string(),
            tags: vec!["gpu".to_string()],
            ..CapabilityQuery::default()
        };
        let matches = run(&query, profiles.iter());
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].agent_id.as_ref(), "agent-1");
        assert!(matches[0].score > matches[1].score);
    }

    #[test_log::test]
    fn hard_filters_exclude() {
        let profiles = vec![profile(
            "agent-1",
            vec![capability("compute", "crunch", &[])],
        )];
        let query = CapabilityQuery {
            query: "compute".to_string(),
            min_reliability: Some(0.95),
            ..CapabilityQuery::default()
        };
        assert!(run(&query, profiles.iter()).is_empty());

        let query = CapabilityQuery {
            query: "compute".to_string(),
            max_cost: Some(10.0),
            ..CapabilityQuery::default()
        };
        assert!(run(&query, profiles.iter()).is_empty());

        let query = CapabilityQuery {
            query: "compute".to_string(),
            category: Some(CapabilityCategory::Security),
            ..CapabilityQuery::default()
        };
        assert!(run(&query, profiles.iter()).is_empty());
    }

    #[test_log::test]
    fn scores_are_normalized() {
        let mut p = profile(
            "agent-1",
            vec![capability("compute", "crunch", &["gpu"])],
        );
        p.metadata.performance = Some(PerformanceMetrics {
            avg_response_time: 10.0,
            success_rate: 1.0,
            total_requests: 5,
        });
        let profiles = vec![p];
        let query = CapabilityQuery {
            query: "compute".to_string(),
            tags: vec!["gpu".to_string()],
            ..CapabilityQuery::default()
        };
        let matches = run(&query, profiles.iter());
        assert!((matches[0].score - 1.0).abs() < 1e-9);
    }

    #[test_log::test]
    fn offline_agents_are_skipped() {
        let mut p = profile("agent-1", vec![capability("compute", "crunch", &[])]);
        p.status = crate::types::agent::AgentStatus::Offline;
        let profiles = vec![p];
        let query = CapabilityQuery {
            query: "compute".to_string(),
            ..CapabilityQuery::default()
        };
        assert!(run(&query, profiles.iter()).is_empty());
    }

    #[test_log::test]
    fn limit_truncates() {
        let profiles: Vec<AgentProfile> = (0..5)
            .map(|i| {
                profile(
                    &format!("agent-{i}"),
                    vec![capability("compute", "crunch", &[])],
                )
            })
            .collect();
        let query = CapabilityQuery {
            query: "compute".to_string(),
            limit: Some(2),
            ..CapabilityQuery::default()
        };
        assert_eq!(run(&query, profiles.iter()).len(), 2);
    }
}

//! Router configuration
//!
//! Presets for development and production plus a builder for custom
//! setups.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain_types::{ChannelCapacity, FailureThreshold, MaxRetries, SuccessThreshold};

/// How the router chooses among capable agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Weighted score over reliability, load, success rate, and cost
    #[default]
    BestMatch,
    /// Deterministic index from the capability name's character sum.
    /// Stateless; balanced across capabilities rather than messages.
    RoundRobin,
    /// Online agent with the minimum advertised load
    LeastLoaded,
}

/// Circuit breaker tuning for one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit open
    pub failure_threshold: FailureThreshold,
    /// Half-open successes required to close the circuit
    pub success_threshold: SuccessThreshold,
    /// How long an open circuit blocks before probing
    pub timeout: Duration,
    /// Failures older than this window are forgotten
    pub monitoring_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: FailureThreshold::default(),
            success_threshold: SuccessThreshold::default(),
            timeout: Duration::from_secs(60),
            monitoring_window: Duration::from_secs(120),
        }
    }
}

/// Complete router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Bound applied to each of the four priority queues
    pub queue_capacity: ChannelCapacity,
    /// Period of the single-consumer dispatch loop
    pub dispatch_tick: Duration,
    /// Transport retries allowed per queued message
    pub max_retries: MaxRetries,
    /// Admission refuses in-flight work beyond this
    pub max_concurrent_tasks: usize,
    pub selection_policy: SelectionPolicy,
    /// Defaults applied when a breaker is enabled without overrides
    pub circuit_breaker: CircuitBreakerConfig,
    /// Period of the routing-table refresh loop
    pub routing_table_refresh: Duration,
    /// Per-request transport timeout
    pub request_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: ChannelCapacity::default(),
            dispatch_tick: Duration::from_millis(10),
            max_retries: MaxRetries::default(),
            max_concurrent_tasks: 100,
            selection_policy: SelectionPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            routing_table_refresh: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RouterConfig {
    /// Smaller queues and faster feedback for debugging
    #[must_use]
    pub fn development() -> Self {
        Self {
            queue_capacity: ChannelCapacity::try_new(100).expect("within bounds"),
            max_concurrent_tasks: 16,
            ..Self::default()
        }
    }

    /// Larger queues and a wider concurrency cap
    #[must_use]
    pub fn production() -> Self {
        Self {
            queue_capacity: ChannelCapacity::try_new(10_000).expect("within bounds"),
            max_concurrent_tasks: 1000,
            ..Self::default()
        }
    }

    /// Starts building a custom configuration
    #[must_use]
    pub fn builder() -> RouterConfigBuilder {
        RouterConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RouterConfig`]
#[derive(Debug, Clone)]
pub struct RouterConfigBuilder {
    config: RouterConfig,
}

impl RouterConfigBuilder {
    #[must_use]
    pub fn queue_capacity(mut self, capacity: ChannelCapacity) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn dispatch_tick(mut self, tick: Duration) -> Self {
        self.config.dispatch_tick = tick;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, retries: MaxRetries) -> Self {
        self.config.max_retries = retries;
        self
    }

    #[must_use]
    pub fn max_concurrent_tasks(mut self, limit: usize) -> Self {
        self.config.max_concurrent_tasks = limit;
        self
    }

    #[must_use]
    pub fn selection_policy(mut self, policy: SelectionPolicy) -> Self {
        self.config.selection_policy = policy;
        self
    }

    #[must_use]
    pub fn circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = breaker;
        self
    }

    #[must_use]
    pub fn routing_table_refresh(mut self, period: Duration) -> Self {
        self.config.routing_table_refresh = period;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn build(self) -> RouterConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn defaults_match_contract() {
        let config = RouterConfig::default();
        assert_eq!(config.queue_capacity.as_usize(), 1000);
        assert_eq!(config.dispatch_tick, Duration::from_millis(10));
        assert_eq!(config.max_retries.as_u8(), 3);
        assert_eq!(config.circuit_breaker.failure_threshold.as_u32(), 5);
        assert_eq!(config.circuit_breaker.success_threshold.as_u32(), 2);
        assert_eq!(config.circuit_breaker.timeout, Duration::from_secs(60));
        assert_eq!(
            config.circuit_breaker.monitoring_window,
            Duration::from_secs(120)
        );
        assert_eq!(config.selection_policy, SelectionPolicy::BestMatch);
    }

    #[test_log::test]
    fn builder_overrides() {
        let config = RouterConfig::builder()
            .queue_capacity(ChannelCapacity::try_new(5).unwrap())
            .max_concurrent_tasks(2)
            .selection_policy(SelectionPolicy::LeastLoaded)
            .build();
        assert_eq!(config.queue_capacity.as_usize(), 5);
        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.selection_policy, SelectionPolicy::LeastLoaded);
    }

    #[test_log::test]
    fn presets_scale_queues() {
        assert!(
            RouterConfig::production().queue_capacity.as_usize()
                > RouterConfig::development().queue_capacity.as_usize()
        );
    }
}

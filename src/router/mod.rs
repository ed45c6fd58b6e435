//! Priority-queued, capability-aware message router
//!
//! Admission validates and classifies messages; four bounded FIFO queues
//! feed a single-consumer dispatch loop that delivers strictly
//! priority-first through pooled transport clients, guarded by per-agent
//! circuit breakers.

pub mod breaker;
pub mod config;
mod message_router;
pub mod queue;
pub mod selection;

pub use breaker::{
    BreakerAdmission, BreakerStatus, BreakerTransition, CircuitBreaker, CircuitBreakerState,
};
pub use config::{CircuitBreakerConfig, RouterConfig, RouterConfigBuilder, SelectionPolicy};
pub use message_router::{
    BreakerCounts, BroadcastReport, MessageRouter, RouteResponse, RoutingStats,
};
pub use queue::{PriorityQueues, QueueSizes};

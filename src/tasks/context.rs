//! Executor contract
//!
//! An executor receives a [`RequestContext`] describing the work and an
//! event bus for progress reporting. Whether a message becomes a task is
//! decided by [`should_create_task`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain_types::{AgentId, ContextId, TaskId};
use crate::error::TaskError;
use crate::types::agent::{Capability, CapabilityCategory};
use crate::types::message::Message;
use crate::types::task::Task;

use super::ExecutionEventBus;

/// Everything an executor needs to process one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub task_id: TaskId,
    pub context_id: ContextId,
    pub message: Message,
    pub capability: Option<Capability>,
    pub metadata: HashMap<String, Value>,
    pub existing_task: Option<Task>,
    pub agent_id: Option<AgentId>,
    /// Cooperative abort signal; check at logical boundaries
    pub cancellation: CancellationToken,
}

impl RequestContext {
    /// Whether the task has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Executes accepted work, reporting progress through the event bus
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Stable identifier used for per-executor metrics
    fn id(&self) -> &str;

    /// Processes one request
    ///
    /// The returned value becomes the task result on success. Executors
    /// must check `ctx.cancellation` at logical boundaries and stop
    /// promptly when it fires.
    async fn execute(&self, ctx: RequestContext, bus: ExecutionEventBus)
    -> Result<Value, TaskError>;
}

/// Default task-creation policy
///
/// A task is created when the capability is expensive (cost > 50) or in
/// the `action` category, or when the request metadata asks for
/// streaming or task creation explicitly.
#[must_use]
pub fn should_create_task(
    capability: Option<&Capability>,
    metadata: &HashMap<String, Value>,
) -> bool {
    if let Some(capability) = capability {
        if capability.cost.as_f64() > 50.0 || capability.category == CapabilityCategory::Action {
            return true;
        }
    }
    let requested = |key: &str| metadata.get(key).and_then(Value::as_bool).unwrap_or(false);
    requested("streaming") || requested("createTask")
}

/// Per-executor counters with incremental averages
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cancelled_executions: u64,
    pub average_execution_time_ms: f64,
    pub last_execution_time_ms: f64,
}

/// Outcome classification for metric recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Failure,
    Cancelled,
}

impl ExecutorMetrics {
    /// Records one execution using an incremental mean
    pub fn record(&mut self, outcome: ExecutionOutcome, elapsed_ms: f64) {
        self.total_executions += 1;
        match outcome {
            ExecutionOutcome::Success => self.successful_executions += 1,
            ExecutionOutcome::Failure => self.failed_executions += 1,
            ExecutionOutcome::Cancelled => self.cancelled_executions += 1,
        }
        self.last_execution_time_ms = elapsed_ms;
        #[allow(clippy::cast_precision_loss)]
        let n = self.total_executions as f64;
        self.average_execution_time_ms += (elapsed_ms - self.average_execution_time_ms) / n;
    }
}

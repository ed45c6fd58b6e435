//! Task lifecycle management
//!
//! Owns task records, their event channels, cancellation signals, and
//! per-executor metrics. Executors report progress through an
//! [`ExecutionEventBus`]; every record mutation and its event are applied
//! together so subscribers observe the same causal order as emission.

pub mod context;
pub mod events;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain_types::{AgentId, ContextId, TaskId};
use crate::error::TaskError;
use crate::events::{EventBus, FabricEvent};
use crate::types::agent::Capability;
use crate::types::message::Message;
use crate::types::rpc::StreamEvent;
use crate::types::task::{
    Task, TaskArtifactUpdateEvent, TaskDefinition, TaskPushNotificationConfig, TaskResult,
    TaskState, TaskStatus, TaskStatusUpdateEvent,
};

pub use context::{
    ExecutionOutcome, ExecutorMetrics, RequestContext, TaskExecutor, should_create_task,
};
pub use events::TaskChannel;

/// Message returned when a task is cancelled
const CANCELLED_MESSAGE: &str = "Task was cancelled";

struct RunningTask {
    cancellation: CancellationToken,
    timeout: Option<tokio::task::JoinHandle<()>>,
}

impl RunningTask {
    /// Fires the abort signal and clears any pending timeout
    fn stop(self) {
        self.cancellation.cancel();
        if let Some(timeout) = self.timeout {
            timeout.abort();
        }
    }
}

struct TasksInner {
    tasks: DashMap<TaskId, Task>,
    channels: DashMap<TaskId, Arc<TaskChannel>>,
    running: DashMap<TaskId, RunningTask>,
    push_configs: DashMap<TaskId, Vec<TaskPushNotificationConfig>>,
    metrics: DashMap<String, ExecutorMetrics>,
    events: EventBus,
    is_shutdown: AtomicBool,
}

impl TasksInner {
    /// Applies a status transition and publishes the resulting event
    ///
    /// The record mutation and the event publication happen while the
    /// task entry is held, which serializes them with other mutations.
    fn transition(
        &self,
        task_id: &TaskId,
        next: TaskState,
        message: Option<Message>,
        is_final: bool,
        metadata: HashMap<String, Value>,
    ) -> Result<(), TaskError> {
        let mut entry = self.tasks.get_mut(task_id).ok_or_else(|| TaskError::NotFound {
            task_id: task_id.clone(),
        })?;
        let current = entry.status.state;
        if !current.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        entry.status = TaskStatus {
            state: next,
            message,
            timestamp: Utc::now(),
        };
        entry.updated_at = Utc::now();
        let event = StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: task_id.clone(),
            context_id: entry.context_id.clone(),
            status: entry.status.clone(),
            is_final,
            metadata,
        });
        if let Some(channel) = self.channels.get(task_id) {
            channel.publish(event);
        }
        Ok(())
    }

    /// Merges an artifact update into the record and publishes it
    fn apply_artifact(
        &self,
        task_id: &TaskId,
        update: TaskArtifactUpdateEvent,
    ) -> Result<(), TaskError> {
        let mut entry = self.tasks.get_mut(task_id).ok_or_else(|| TaskError::NotFound {
            task_id: task_id.clone(),
        })?;
        let artifacts = entry.artifacts.get_or_insert_with(Vec::new);
        if let Some(existing) = artifacts
            .iter_mut()
            .find(|a| a.artifact_id == update.artifact.artifact_id)
        {
            if update.append {
                existing.parts.extend(update.artifact.parts.clone());
            } else {
                *existing = update.artifact.clone();
            }
        } else {
            artifacts.push(update.artifact.clone());
        }
        entry.updated_at = Utc::now();
        if let Some(channel) = self.channels.get(task_id) {
            channel.publish(StreamEvent::ArtifactUpdate(update));
        }
        Ok(())
    }

    /// Routes one executor-published event to the right applier
    fn apply_stream_event(&self, task_id: &TaskId, event: StreamEvent) -> Result<(), TaskError> {
        match event {
            StreamEvent::StatusUpdate(update) => self.transition(
                task_id,
                update.status.state,
                update.status.message,
                update.is_final,
                update.metadata,
            ),
            StreamEvent::ArtifactUpdate(update) => self.apply_artifact(task_id, update),
            passthrough @ (StreamEvent::Message(_) | StreamEvent::Task(_)) => {
                if let Some(channel) = self.channels.get(task_id) {
                    channel.publish(passthrough);
                }
                Ok(())
            }
        }
    }

    /// Marks a task completed with its result value
    fn complete_task(&self, task_id: &TaskId, value: Value, elapsed_ms: u64) {
        if let Some(mut entry) = self.tasks.get_mut(task_id) {
            if entry.status.state.is_terminal() {
                return;
            }
            entry.results = Some(TaskResult {
                task_id: task_id.clone(),
                success: true,
                result: Some(value),
                error: None,
                executed_by: entry.executed_by.clone(),
                execution_time_ms: elapsed_ms,
                timestamp: Utc::now(),
                artifacts: entry.artifacts.clone(),
            });
        }
        if let Err(e) = self.transition(task_id, TaskState::Completed, None, true, HashMap::new()) {
            debug!(task_id = %task_id, error = %e, "completion transition skipped");
        }
    }

    /// Marks a task failed, preserving the error in the event metadata
    fn fail_task(&self, task_id: &TaskId, error: String, elapsed_ms: u64) {
        if let Some(mut entry) = self.tasks.get_mut(task_id) {
            if entry.status.state.is_terminal() {
                return;
            }
            entry.results = Some(TaskResult {
                task_id: task_id.clone(),
                success: false,
                result: None,
                error: Some(error.clone()),
                executed_by: entry.executed_by.clone(),
                execution_time_ms: elapsed_ms,
                timestamp: Utc::now(),
                artifacts: entry.artifacts.clone(),
            });
        }
        let metadata = HashMap::from([("error".to_string(), Value::String(error.clone()))]);
        if let Err(e) = self.transition(
            task_id,
            TaskState::Failed,
            Some(Message::agent_text(error)),
            true,
            metadata,
        ) {
            debug!(task_id = %task_id, error = %e, "failure transition skipped");
        }
    }

    fn record_metrics(&self, executor_id: &str, outcome: ExecutionOutcome, elapsed_ms: f64) {
        self.metrics
            .entry(executor_id.to_string())
            .or_default()
            .record(outcome, elapsed_ms);
    }
}

/// Bus handed to executors for progress reporting
#[derive(Clone)]
pub struct ExecutionEventBus {
    inner: Arc<TasksInner>,
    task_id: TaskId,
    /// Detached buses (inline executions without a task) drop everything
    detached: bool,
}

impl ExecutionEventBus {
    /// Publishes a status or artifact update for the owning task
    pub fn publish(&self, event: StreamEvent) {
        if self.detached {
            return;
        }
        if let Err(e) = self.inner.apply_stream_event(&self.task_id, event) {
            warn!(task_id = %self.task_id, error = %e, "executor event rejected");
        }
    }

    /// Signals that the executor will publish no further events
    pub fn finished(&self) {
        if self.detached {
            return;
        }
        if let Some(channel) = self.inner.channels.get(&self.task_id) {
            channel.seal();
        }
    }

    /// Reports an executor error, failing the task
    pub fn error(&self, error: &TaskError) {
        if self.detached {
            return;
        }
        self.inner.fail_task(&self.task_id, error.to_string(), 0);
    }
}

/// State machine owner for asynchronous units of work
pub struct TaskManager {
    inner: Arc<TasksInner>,
}

impl TaskManager {
    /// A manager emitting onto the given fabric event bus
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: Arc::new(TasksInner {
                tasks: DashMap::new(),
                channels: DashMap::new(),
                running: DashMap::new(),
                push_configs: DashMap::new(),
                metrics: DashMap::new(),
                events,
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a task in `submitted` state and publishes its first event
    pub fn create_task(&self, definition: TaskDefinition) -> Task {
        let task_id = TaskId::generate();
        let context_id = definition.context_id.unwrap_or_else(ContextId::generate);
        let mut task = Task::submitted(task_id.clone(), context_id.clone());
        task.metadata = definition.metadata;
        task.executed_by = definition.executed_by;
        if let Some(message) = definition.message {
            task.history = Some(vec![message]);
        }

        let channel = Arc::new(TaskChannel::new());
        self.inner.channels.insert(task_id.clone(), Arc::clone(&channel));
        self.inner.tasks.insert(task_id.clone(), task.clone());
        channel.publish(StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id,
            context_id,
            status: task.status.clone(),
            is_final: false,
            metadata: HashMap::new(),
        }));
        debug!(task_id = %task.id, "task created");
        task
    }

    /// Task snapshot, optionally truncating history
    pub fn get_task(
        &self,
        task_id: &TaskId,
        history_length: Option<usize>,
    ) -> Result<Task, TaskError> {
        let mut task = self
            .inner
            .tasks
            .get(task_id)
            .map(|t| t.clone())
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.clone(),
            })?;
        if let Some(limit) = history_length {
            task.truncate_history(limit);
        }
        Ok(task)
    }

    /// All task snapshots
    #[must_use]
    pub fn list_tasks(&self) -> Vec<Task> {
        self.inner.tasks.iter().map(|t| t.clone()).collect()
    }

    /// Number of stored tasks
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Cancels a task cooperatively
    ///
    /// Sets the abort signal, clears any pending timeout, removes the
    /// running entry, and publishes a terminal `cancelled` event. Unknown
    /// ids fail with `NotFound`; already-terminal tasks with
    /// `NotCancelable`.
    pub fn cancel_task(&self, task_id: &TaskId) -> Result<Task, TaskError> {
        {
            let entry = self.inner.tasks.get(task_id).ok_or_else(|| TaskError::NotFound {
                task_id: task_id.clone(),
            })?;
            if entry.status.state.is_terminal() {
                return Err(TaskError::NotCancelable {
                    task_id: task_id.clone(),
                });
            }
        }

        if let Some((_, running)) = self.inner.running.remove(task_id) {
            running.stop();
        }

        if let Some(mut entry) = self.inner.tasks.get_mut(task_id) {
            let elapsed = (Utc::now() - entry.created_at).num_milliseconds().max(0);
            entry.results = Some(TaskResult {
                task_id: task_id.clone(),
                success: false,
                result: None,
                error: Some(CANCELLED_MESSAGE.to_string()),
                executed_by: entry.executed_by.clone(),
                execution_time_ms: u64::try_from(elapsed).unwrap_or(0),
                timestamp: Utc::now(),
                artifacts: entry.artifacts.clone(),
            });
        }
        self.inner.transition(
            task_id,
            TaskState::Cancelled,
            Some(Message::agent_text(CANCELLED_MESSAGE)),
            true,
            HashMap::new(),
        )?;
        info!(task_id = %task_id, "task cancelled");
        self.get_task(task_id, None)
    }

    /// Handles one inbound message through an executor
    ///
    /// Policy decides whether the work becomes a task (returned
    /// immediately while execution continues in the background) or runs
    /// inline and returns a message.
    pub async fn handle_message(
        &self,
        executor: Arc<dyn TaskExecutor>,
        message: Message,
        capability: Option<Capability>,
        metadata: HashMap<String, Value>,
        agent_id: Option<AgentId>,
    ) -> Result<StreamEvent, TaskError> {
        let existing_task = message
            .task_id
            .as_ref()
            .and_then(|id| self.inner.tasks.get(id).map(|t| t.clone()));

        if should_create_task(capability.as_ref(), &metadata) || existing_task.is_some() {
            let task = match &existing_task {
                Some(task) => task.clone(),
                None => self.create_task(TaskDefinition {
                    context_id: message.context_id.clone(),
                    message: Some(message.clone()),
                    executed_by: agent_id.clone(),
                    metadata: metadata.clone(),
                }),
            };
            self.spawn_execution(
                executor,
                RequestContext {
                    task_id: task.id.clone(),
                    context_id: task.context_id.clone(),
                    message,
                    capability,
                    metadata,
                    existing_task,
                    agent_id,
                    cancellation: CancellationToken::new(),
                },
            );
            return Ok(StreamEvent::Task(task));
        }

        // Inline execution: no task record, events are discarded
        let context_id = message.context_id.clone().unwrap_or_else(ContextId::generate);
        let ctx = RequestContext {
            task_id: TaskId::generate(),
            context_id: context_id.clone(),
            message,
            capability,
            metadata,
            existing_task: None,
            agent_id,
            cancellation: CancellationToken::new(),
        };
        let bus = ExecutionEventBus {
            inner: Arc::clone(&self.inner),
            task_id: ctx.task_id.clone(),
            detached: true,
        };
        let started = Instant::now();
        let result = executor.execute(ctx, bus).await;
        #[allow(clippy::cast_precision_loss)]
        let elapsed_ms = started.elapsed().as_millis() as f64;
        match result {
            Ok(value) => {
                self.inner
                    .record_metrics(executor.id(), ExecutionOutcome::Success, elapsed_ms);
                let mut reply = Message::data(crate::types::message::Role::Agent, value);
                reply.context_id = Some(context_id);
                Ok(StreamEvent::Message(reply))
            }
            Err(e) => {
                self.inner
                    .record_metrics(executor.id(), ExecutionOutcome::Failure, elapsed_ms);
                Err(e)
            }
        }
    }

    /// Starts background execution of a created task
    pub fn spawn_execution(&self, executor: Arc<dyn TaskExecutor>, ctx: RequestContext) {
        let inner = Arc::clone(&self.inner);
        let task_id = ctx.task_id.clone();
        let cancellation = ctx.cancellation.clone();

        // A metadata timeout cancels the task as if cancel_task were called
        let timeout = ctx
            .metadata
            .get("timeout")
            .and_then(Value::as_u64)
            .map(|ms| {
                let inner = Arc::clone(&inner);
                let task_id = task_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    warn!(task_id = %task_id, "task timed out");
                    TaskManager { inner }.cancel_task(&task_id).ok();
                })
            });

        self.inner.running.insert(
            task_id.clone(),
            RunningTask {
                cancellation: cancellation.clone(),
                timeout,
            },
        );

        let executor_id = executor.id().to_string();
        tokio::spawn(async move {
            let started = Instant::now();
            if let Err(e) =
                inner.transition(&task_id, TaskState::InProgress, None, false, HashMap::new())
            {
                debug!(task_id = %task_id, error = %e, "task no longer startable");
                inner.running.remove(&task_id);
                return;
            }

            let bus = ExecutionEventBus {
                inner: Arc::clone(&inner),
                task_id: task_id.clone(),
                detached: false,
            };
            let outcome = tokio::select! {
                () = cancellation.cancelled() => ExecutionOutcome::Cancelled,
                result = executor.execute(ctx, bus) => {
                    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    match result {
                        Ok(value) => {
                            inner.complete_task(&task_id, value, elapsed_ms);
                            ExecutionOutcome::Success
                        }
                        Err(e) => {
                            inner.fail_task(&task_id, e.to_string(), elapsed_ms);
                            ExecutionOutcome::Failure
                        }
                    }
                }
            };

            if let Some((_, running)) = inner.running.remove(&task_id) {
                running.stop();
            }
            #[allow(clippy::cast_precision_loss)]
            inner.record_metrics(&executor_id, outcome, started.elapsed().as_millis() as f64);
        });
    }

    /// Opens a subscription to a task's event stream
    pub fn subscribe(
        &self,
        task_id: &TaskId,
    ) -> Result<tokio::sync::broadcast::Receiver<StreamEvent>, TaskError> {
        self.inner
            .channels
            .get(task_id)
            .map(|c| c.subscribe())
            .ok_or_else(|| TaskError::NotFound {
                task_id: task_id.clone(),
            })
    }

    /// Whether a task's stream has published its final event
    #[must_use]
    pub fn is_stream_sealed(&self, task_id: &TaskId) -> bool {
        self.inner
            .channels
            .get(task_id)
            .is_some_and(|c| c.is_sealed())
    }

    /// Stores a push-notification configuration for a task
    pub fn set_push_config(
        &self,
        config: TaskPushNotificationConfig,
    ) -> Result<TaskPushNotificationConfig, TaskError> {
        if !self.inner.tasks.contains_key(&config.task_id) {
            return Err(TaskError::NotFound {
                task_id: config.task_id.clone(),
            });
        }
        let mut configs = self.inner.push_configs.entry(config.task_id.clone()).or_default();
        if let Some(existing) = configs
            .iter_mut()
            .find(|c| c.push_notification_config.url == config.push_notification_config.url)
        {
            *existing = config.clone();
        } else {
            configs.push(config.clone());
        }
        Ok(config)
    }

    /// First stored configuration for a task
    pub fn get_push_config(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<TaskPushNotificationConfig>, TaskError> {
        if !self.inner.tasks.contains_key(task_id) {
            return Err(TaskError::NotFound {
                task_id: task_id.clone(),
            });
        }
        Ok(self
            .inner
            .push_configs
            .get(task_id)
            .and_then(|c| c.first().cloned()))
    }

    /// All stored configurations for a task
    pub fn list_push_configs(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<TaskPushNotificationConfig>, TaskError> {
        if !self.inner.tasks.contains_key(task_id) {
            return Err(TaskError::NotFound {
                task_id: task_id.clone(),
            });
        }
        Ok(self
            .inner
            .push_configs
            .get(task_id)
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    /// Removes all configurations for a task
    pub fn delete_push_configs(&self, task_id: &TaskId) -> Result<(), TaskError> {
        if !self.inner.tasks.contains_key(task_id) {
            return Err(TaskError::NotFound {
                task_id: task_id.clone(),
            });
        }
        self.inner.push_configs.remove(task_id);
        Ok(())
    }

    /// Metrics for one executor, if it has run
    #[must_use]
    pub fn executor_metrics(&self, executor_id: &str) -> Option<ExecutorMetrics> {
        self.inner.metrics.get(executor_id).map(|m| *m)
    }

    /// Cancels all running tasks and stops accepting work; idempotent
    pub fn shutdown(&self) {
        if self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let running_ids: Vec<TaskId> = self
            .inner
            .running
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for task_id in running_ids {
            if let Some((_, running)) = self.inner.running.remove(&task_id) {
                running.stop();
            }
        }
        self.inner.events.emit(FabricEvent::Shutdown { component: "tasks" });
        info!("task manager shut down");
    }
}

impl Clone for TaskManager {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

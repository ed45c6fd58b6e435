//! Task lifecycle entities
//!
//! A task is a durable unit of work with a state machine, optional
//! history and artifacts, and streaming status/artifact updates.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain_types::{AgentId, ArtifactId, ContextId, TaskId};
use crate::types::message::Message;

/// Lifecycle state of a task, string-union form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    InProgress,
    Working,
    InputRequired,
    Completed,
    Failed,
    Cancelled,
    Rejected,
    AuthRequired,
    Unknown,
}

impl TaskState {
    /// Whether no further transitions are legal from this state
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Rejected
        )
    }

    /// Whether the transition `self -> next` is legal
    ///
    /// `working` is a cooperative sub-state of `in-progress` and shares
    /// its terminal transitions; `auth-required` pauses like
    /// `input-required`. `unknown` is a recovery state from which any
    /// transition is accepted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Submitted => matches!(
                next,
                Self::InProgress | Self::Rejected | Self::Cancelled | Self::AuthRequired
            ),
            Self::InProgress => matches!(
                next,
                Self::Working
                    | Self::Completed
                    | Self::Failed
                    | Self::Cancelled
                    | Self::InputRequired
            ),
            Self::Working => matches!(
                next,
                Self::InProgress | Self::Completed | Self::Failed | Self::Cancelled
            ),
            Self::InputRequired | Self::AuthRequired => {
                matches!(next, Self::InProgress | Self::Cancelled)
            }
            Self::Completed | Self::Failed | Self::Cancelled | Self::Rejected => false,
            Self::Unknown => true,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::InProgress => "in-progress",
            Self::Working => "working",
            Self::InputRequired => "input-required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::AuthRequired => "auth-required",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// State plus an optional human-readable annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    pub timestamp: DateTime<Utc>,
}

impl TaskStatus {
    /// Status in the given state stamped now
    #[must_use]
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Status with an annotation message
    #[must_use]
    pub fn with_message(state: TaskState, message: Message) -> Self {
        Self {
            state,
            message: Some(message),
            timestamp: Utc::now(),
        }
    }
}

/// A produced content chunk associated with a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub artifact_id: ArtifactId,
    pub parts: Vec<crate::types::message::Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Final outcome record of a task execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_by: Option<AgentId>,
    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,
}

/// A durable unit of work with lifecycle and optional history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub context_id: ContextId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<Artifact>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_by: Option<AgentId>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<TaskResult>,
}

impl Task {
    /// A freshly submitted task
    #[must_use]
    pub fn submitted(id: TaskId, context_id: ContextId) -> Self {
        let now = Utc::now();
        Self {
            id,
            context_id,
            status: TaskStatus::new(TaskState::Submitted),
            history: None,
            artifacts: None,
            created_at: now,
            updated_at: now,
            executed_by: None,
            metadata: HashMap::new(),
            results: None,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.status.state
    }

    /// Appends a message to the task history
    pub fn push_history(&mut self, message: Message) {
        self.history.get_or_insert_with(Vec::new).push(message);
        self.updated_at = Utc::now();
    }

    /// Truncates history to the most recent `limit` messages
    pub fn truncate_history(&mut self, limit: usize) {
        let Some(history) = &mut self.history else {
            return;
        };
        if history.len() > limit {
            let excess = history.len() - limit;
            history.drain(..excess);
        }
    }
}

/// Definition accepted by `create_task`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ContextId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_by: Option<AgentId>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Streaming status update for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdateEvent {
    pub task_id: TaskId,
    pub context_id: ContextId,
    pub status: TaskStatus,
    /// When true, no further events follow for this task
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Streaming artifact update for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskArtifactUpdateEvent {
    pub task_id: TaskId,
    pub context_id: ContextId,
    pub artifact: Artifact,
    /// Append to an existing artifact with the same id instead of replacing
    #[serde(default)]
    pub append: bool,
    /// Marks end-of-stream for this artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_chunks: Option<bool>,
}

/// Where to deliver push notifications for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotificationConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Value>,
}

/// Per-task push notification configuration entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPushNotificationConfig {
    pub task_id: TaskId,
    pub push_notification_config: PushNotificationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&TaskState::InProgress).unwrap(),
            "\"in-progress\""
        );
        assert_eq!(
            serde_json::to_string(&TaskState::AuthRequired).unwrap(),
            "\"auth-required\""
        );
        let parsed: TaskState = serde_json::from_str("\"input-required\"").unwrap();
        assert_eq!(parsed, TaskState::InputRequired);
    }

    #[test_log::test]
    fn terminal_states_accept_no_transition() {
        for terminal in [
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Cancelled,
            TaskState::Rejected,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                TaskState::Submitted,
                TaskState::InProgress,
                TaskState::Working,
                TaskState::Completed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test_log::test]
    fn submitted_transitions() {
        let from = TaskState::Submitted;
        assert!(from.can_transition_to(TaskState::InProgress));
        assert!(from.can_transition_to(TaskState::Rejected));
        assert!(from.can_transition_to(TaskState::Cancelled));
        assert!(from.can_transition_to(TaskState::AuthRequired));
        assert!(!from.can_transition_to(TaskState::Completed));
        assert!(!from.can_transition_to(TaskState::Working));
    }

    #[test_log::test]
    fn working_oscillates_with_in_progress() {
        assert!(TaskState::InProgress.can_transition_to(TaskState::Working));
        assert!(TaskState::Working.can_transition_to(TaskState::InProgress));
    }

    #[test_log::test]
    fn input_required_resumes_or_cancels() {
        assert!(TaskState::InputRequired.can_transition_to(TaskState::InProgress));
        assert!(TaskState::InputRequired.can_transition_to(TaskState::Cancelled));
        assert!(!TaskState::InputRequired.can_transition_to(TaskState::Completed));
    }

    #[test_log::test]
    fn history_truncation_keeps_most_recent() {
        let mut task = Task::submitted(TaskId::generate(), ContextId::generate());
        for i in 0..5 {
            task.push_history(Message::user_text(format!("m{i}")));
        }
        task.truncate_history(2);
        let history = task.history.as_ref().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), "m3");
        assert_eq!(history[1].text(), "m4");
    }

    #[test_log::test]
    fn status_update_event_serializes_final_flag() {
        let event = TaskStatusUpdateEvent {
            task_id: TaskId::try_new("t-1".to_string()).unwrap(),
            context_id: ContextId::try_new("c-1".to_string()).unwrap(),
            status: TaskStatus::new(TaskState::Completed),
            is_final: true,
            metadata: HashMap::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["final"], true);
        assert_eq!(json["taskId"], "t-1");
    }
}

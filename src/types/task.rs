//! Task status state machine and the read-only task snapshot.
//!
//! [`TaskStatus`] is the lifecycle enum persisted on every record.
//! [`TaskView`] is what [`TaskManager::get_status`](crate::manager::TaskManager::get_status)
//! hands back to callers: an owned copy, never a live reference.
//!
//! # Serialization
//!
//! Statuses serialize as lowercase strings. `TaskView` keeps the snake_case
//! field names used in the status API, and omits `result` and
//! `error_message` when they are absent.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;

/// Task lifecycle status.
///
/// Terminal states (`Completed`, `Failed`) reject all transitions.
/// Self-transitions are rejected.
///
/// # State Machine
///
/// ```text
/// Pending -> Running, Failed (cancellation before start)
/// Running -> Completed, Failed
/// Completed -> (terminal, no transitions)
/// Failed -> (terminal, no transitions)
/// ```
///
/// # Examples
///
/// ```
/// use task_engine::TaskStatus;
///
/// let status = TaskStatus::Pending;
/// assert!(!status.is_terminal());
/// assert!(status.can_transition_to(&TaskStatus::Running));
/// assert!(!status.can_transition_to(&TaskStatus::Completed)); // must run first
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Record created, not yet picked up by a worker.
    Pending,
    /// A worker is invoking the handler.
    Running,
    /// Handler returned successfully (terminal).
    Completed,
    /// Handler raised, timed out, panicked, or the task was cancelled (terminal).
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    /// Returns `true` if this status is terminal (no further transitions allowed).
    ///
    /// # Examples
    ///
    /// ```
    /// use task_engine::TaskStatus;
    ///
    /// assert!(!TaskStatus::Pending.is_terminal());
    /// assert!(!TaskStatus::Running.is_terminal());
    /// assert!(TaskStatus::Completed.is_terminal());
    /// assert!(TaskStatus::Failed.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns `true` if transitioning from this status to `next` is valid.
    ///
    /// `Pending -> Failed` exists only for pre-execution cancellation; a
    /// pending task can never jump straight to `Completed`.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self == next {
            return false;
        }

        match self {
            Self::Pending => matches!(next, Self::Running | Self::Failed),
            Self::Running => matches!(next, Self::Completed | Self::Failed),
            Self::Completed | Self::Failed => false,
        }
    }

    /// Validates a transition from this status to `next`.
    ///
    /// # Examples
    ///
    /// ```
    /// use task_engine::TaskStatus;
    ///
    /// assert!(TaskStatus::Running
    ///     .validate_transition("task-123", &TaskStatus::Completed)
    ///     .is_ok());
    /// assert!(TaskStatus::Completed
    ///     .validate_transition("task-123", &TaskStatus::Running)
    ///     .is_err());
    /// ```
    pub fn validate_transition(&self, task_id: &str, next: &Self) -> Result<(), TaskError> {
        if self.can_transition_to(next) {
            return Ok(());
        }

        let suggested_action = if self.is_terminal() {
            Some("task is in a terminal state; resubmit it as a new task instead".to_string())
        } else if self == next {
            Some(format!("task is already {self}"))
        } else {
            None
        };

        Err(TaskError::InvalidTransition {
            task_id: task_id.to_string(),
            from: *self,
            to: *next,
            suggested_action,
        })
    }
}

/// Point-in-time snapshot of a task, as returned by the status API.
///
/// # Examples
///
/// ```
/// use task_engine::{TaskStatus, TaskView};
/// use serde_json::json;
///
/// let now = chrono::Utc::now();
/// let view = TaskView {
///     id: "abc-123".to_string(),
///     task_type: "nft_mint".to_string(),
///     status: TaskStatus::Completed,
///     payload: json!({"user_id": 7}),
///     result: Some(json!({"x": 1})),
///     error_message: None,
///     retry_count: 0,
///     max_retries: 3,
///     created_at: now,
///     updated_at: now,
/// };
///
/// let wire = serde_json::to_value(&view).unwrap();
/// assert_eq!(wire["status"], "completed");
/// assert_eq!(wire["task_type"], "nft_mint");
/// assert!(wire.get("error_message").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    /// Unique identifier for this task.
    pub id: String,
    /// Caller-defined kind of work, e.g. `"nft_mint"`.
    pub task_type: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Caller-supplied metadata describing the task input.
    pub payload: Value,
    /// Handler output; present only when `status` is `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description; present only when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Retries and failures recorded so far.
    pub retry_count: u32,
    /// Retry ceiling chosen at submission.
    pub max_retries: u32,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        for (status, wire) in [
            (TaskStatus::Pending, "\"pending\""),
            (TaskStatus::Running, "\"running\""),
            (TaskStatus::Completed, "\"completed\""),
            (TaskStatus::Failed, "\"failed\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), wire);
            assert_eq!(status.to_string(), wire.trim_matches('"'));
        }
    }

    #[test]
    fn pending_cannot_skip_running() {
        assert!(!TaskStatus::Pending.can_transition_to(&TaskStatus::Completed));
        assert!(TaskStatus::Pending.can_transition_to(&TaskStatus::Failed));
    }

    #[test]
    fn terminal_rejection_suggests_resubmit() {
        let err = TaskStatus::Failed
            .validate_transition("t", &TaskStatus::Running)
            .unwrap_err();
        match err {
            TaskError::InvalidTransition {
                suggested_action, ..
            } => assert!(suggested_action.unwrap().contains("resubmit")),
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn self_transition_rejected() {
        let err = TaskStatus::Running
            .validate_transition("t", &TaskStatus::Running)
            .unwrap_err();
        assert!(err.to_string().contains("running to running"));
    }
}

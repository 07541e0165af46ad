//! Error types for task engine operations.
//!
//! [`TaskError`] covers submission, store, and management failures. Errors
//! raised by the work itself are [`HandlerError`](crate::handler::HandlerError)
//! values and never surface through this type; they end up in the task
//! record's `error_message` instead.

use thiserror::Error;

use crate::types::task::TaskStatus;

/// Errors that can occur during task operations.
///
/// Each variant carries enough context (task ID, statuses, sizes) to debug
/// the failure from a log line alone.
///
/// # Examples
///
/// ```
/// use task_engine::TaskError;
///
/// let err = TaskError::NotFound {
///     task_id: "missing-task".to_string(),
/// };
/// assert!(err.to_string().contains("missing-task"));
/// assert!(err.is_not_found());
/// ```
#[derive(Debug, Error)]
pub enum TaskError {
    /// Attempted an invalid state machine transition.
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        /// The task that was being transitioned.
        task_id: String,
        /// The current status of the task.
        from: TaskStatus,
        /// The target status that was rejected.
        to: TaskStatus,
        /// Optional suggestion for the caller.
        suggested_action: Option<String>,
    },

    /// Task with the given ID was not found.
    #[error("task not found: {task_id}")]
    NotFound {
        /// The task ID that was not found.
        task_id: String,
    },

    /// A compare-and-swap write kept losing to concurrent writers.
    #[error(
        "concurrent modification of task {task_id}: expected version {expected_version}, found {actual_version}"
    )]
    ConcurrentModification {
        /// The contended task.
        task_id: String,
        /// Version the writer read.
        expected_version: u64,
        /// Version present in storage at write time.
        actual_version: u64,
    },

    /// Serialized payload exceeds the configured limit.
    #[error("payload size limit exceeded: {actual_bytes} bytes exceeds {limit_bytes} byte limit")]
    PayloadTooLarge {
        /// The configured limit in bytes.
        limit_bytes: usize,
        /// The actual payload size in bytes.
        actual_bytes: usize,
    },

    /// The task cannot be resubmitted (not failed, or retry budget spent).
    #[error(
        "task {task_id} cannot be resubmitted (status: {status}, retries: {retry_count}/{max_retries})"
    )]
    NotResubmittable {
        /// The task that was asked to be resubmitted.
        task_id: String,
        /// Its current status.
        status: TaskStatus,
        /// Failures recorded so far.
        retry_count: u32,
        /// The task's retry ceiling.
        max_retries: u32,
    },

    /// The manager no longer accepts submissions.
    #[error("task manager is shutting down")]
    ShuttingDown,

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A task record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend storage error.
    #[error("store error: {0}")]
    StoreError(String),
}

impl TaskError {
    /// Returns `true` for [`TaskError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

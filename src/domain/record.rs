//! Task record -- the store's internal representation of a task.
//!
//! [`TaskRecord`] holds every persisted field plus the storage `version`
//! used for optimistic concurrency. [`TaskRecord::to_view`] produces the
//! caller-facing [`TaskView`] snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::task::{TaskStatus, TaskView};

/// Internal storage representation of a task.
///
/// All fields are public so that store implementors have full access.
/// Mutations should go through a [`TaskStore`](crate::store::TaskStore),
/// which enforces the state machine and the result/error exclusivity rule.
///
/// # Construction
///
/// ```
/// use task_engine::domain::TaskRecord;
/// use task_engine::TaskStatus;
/// use serde_json::json;
///
/// let record = TaskRecord::new("nft_mint", json!({"user_id": 42}), 3);
/// assert_eq!(record.status, TaskStatus::Pending);
/// assert_eq!(record.retry_count, 0);
/// assert_eq!(record.id.len(), 36);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Globally unique identifier (UUIDv4), immutable.
    pub id: String,

    /// Caller-defined tag for the kind of work. Opaque to the engine.
    pub task_type: String,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Caller-supplied input description, kept for auditing and ownership
    /// correlation. Opaque to the engine.
    pub payload: Value,

    /// Handler output, set only on `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure description, set only on `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Incremented on every recorded retry and every failure.
    pub retry_count: u32,

    /// Retry ceiling chosen at submission.
    pub max_retries: u32,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,

    /// The failed record this one was resubmitted from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resubmitted_from: Option<String>,

    /// Storage version for CAS writes. Populated by the store on read;
    /// never serialized.
    #[serde(skip)]
    pub version: u64,
}

impl TaskRecord {
    /// Creates a new record in the `Pending` state with a fresh UUIDv4 ID.
    pub fn new(task_type: impl Into<String>, payload: Value, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            status: TaskStatus::Pending,
            payload,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            resubmitted_from: None,
            version: 0,
        }
    }

    /// Returns `true` if this record may be resubmitted as a new task.
    ///
    /// Only failed records qualify, and only while the failure count has
    /// not gone past `max_retries`.
    ///
    /// ```
    /// use task_engine::domain::TaskRecord;
    /// use task_engine::TaskStatus;
    /// use serde_json::Value;
    ///
    /// let mut record = TaskRecord::new("sync", Value::Null, 1);
    /// assert!(!record.can_resubmit());
    ///
    /// record.status = TaskStatus::Failed;
    /// record.retry_count = 1;
    /// assert!(record.can_resubmit());
    ///
    /// record.retry_count = 2;
    /// assert!(!record.can_resubmit());
    /// ```
    pub fn can_resubmit(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count <= self.max_retries
    }

    /// Returns an owned snapshot suitable for handing to callers.
    pub fn to_view(&self) -> TaskView {
        TaskView {
            id: self.id.clone(),
            task_type: self.task_type.clone(),
            status: self.status,
            payload: self.payload.clone(),
            result: self.result.clone(),
            error_message: self.error_message.clone(),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_record_has_uuid_v4_id() {
        let record = TaskRecord::new("nft_mint", Value::Null, 3);
        let parsed = Uuid::parse_str(&record.id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn new_record_timestamps_match() {
        let record = TaskRecord::new("nft_mint", Value::Null, 3);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn new_record_has_no_outcome() {
        let record = TaskRecord::new("nft_mint", json!({"a": 1}), 0);
        assert!(record.result.is_none());
        assert!(record.error_message.is_none());
        assert!(record.resubmitted_from.is_none());
        assert_eq!(record.max_retries, 0);
    }

    #[test]
    fn version_is_not_serialized() {
        let mut record = TaskRecord::new("nft_mint", Value::Null, 3);
        record.version = 9;
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("version").is_none());

        let back: TaskRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.version, 0);
        assert_eq!(back.id, record.id);
    }

    #[test]
    fn view_copies_every_field() {
        let mut record = TaskRecord::new("nft_mint", json!({"owner": "u1"}), 5);
        record.status = TaskStatus::Completed;
        record.result = Some(json!({"tx_digest": "0xabc"}));
        record.retry_count = 2;

        let view = record.to_view();
        assert_eq!(view.id, record.id);
        assert_eq!(view.status, TaskStatus::Completed);
        assert_eq!(view.payload, json!({"owner": "u1"}));
        assert_eq!(view.result, Some(json!({"tx_digest": "0xabc"})));
        assert_eq!(view.retry_count, 2);
        assert_eq!(view.max_retries, 5);
    }
}

//! Task-aware store layered over any [`StorageBackend`].
//!
//! [`GenericTaskStore`] is where task records are encoded to JSON, where
//! status changes are checked against the state machine, and where the
//! payload limit and retry counter are enforced. Backends underneath only
//! see bytes.
//!
//! # Construction
//!
//! ```
//! use task_engine::store::generic::GenericTaskStore;
//! use task_engine::store::memory::InMemoryBackend;
//! use task_engine::store::StoreConfig;
//!
//! let store = GenericTaskStore::new(InMemoryBackend::new())
//!     .with_config(StoreConfig::default());
//! ```
//!
//! # CAS Semantics
//!
//! All mutations re-read the record, apply the change, and write it back
//! with [`StorageBackend::put_if_version`]. A version conflict triggers a
//! fresh read, up to [`StoreConfig::max_update_attempts`] times, after which
//! [`TaskError::ConcurrentModification`] is returned. The transition check
//! runs against the freshly read record on every attempt, so a lost race
//! can never push a record backwards.

use chrono::Utc;
use serde_json::Value;

use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::store::backend::{make_key, parse_key, StorageBackend, StorageError, TASK_KEY_PREFIX};
use crate::store::StoreConfig;
use crate::types::task::TaskStatus;

/// Task store that owns all domain logic and delegates raw storage to `B`.
#[derive(Debug)]
pub struct GenericTaskStore<B: StorageBackend> {
    backend: B,
    config: StoreConfig,
}

impl<B: StorageBackend> GenericTaskStore<B> {
    /// Creates a store over `backend` with the default [`StoreConfig`].
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: StoreConfig::default(),
        }
    }

    /// Sets the store configuration.
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    fn serialize_record(record: &TaskRecord) -> Result<Vec<u8>, TaskError> {
        serde_json::to_vec(record)
            .map_err(|e| TaskError::Serialization(format!("failed to serialize TaskRecord: {e}")))
    }

    fn deserialize_record(data: &[u8]) -> Result<TaskRecord, TaskError> {
        serde_json::from_slice(data).map_err(|e| {
            TaskError::Serialization(format!("failed to deserialize TaskRecord: {e}"))
        })
    }

    fn map_storage_error(err: StorageError, task_id: &str) -> TaskError {
        match err {
            StorageError::NotFound { .. } => TaskError::NotFound {
                task_id: task_id.to_string(),
            },
            StorageError::VersionConflict {
                expected, actual, ..
            } => TaskError::ConcurrentModification {
                task_id: task_id.to_string(),
                expected_version: expected,
                actual_version: actual,
            },
            StorageError::Backend { message, .. } => TaskError::StoreError(message),
        }
    }

    fn check_payload_size(&self, payload: &Value) -> Result<(), TaskError> {
        let actual_bytes = serde_json::to_vec(payload)
            .map_err(|e| TaskError::Serialization(format!("payload is not serializable: {e}")))?
            .len();
        if actual_bytes > self.config.max_payload_bytes {
            return Err(TaskError::PayloadTooLarge {
                limit_bytes: self.config.max_payload_bytes,
                actual_bytes,
            });
        }
        Ok(())
    }

    /// Read-modify-CAS loop shared by every mutation.
    ///
    /// `apply` runs against the freshly read record on each attempt and may
    /// reject the change. It returns `false` to leave the record untouched,
    /// in which case nothing is written. `updated_at` is refreshed only when
    /// `apply` reports a change.
    async fn mutate<F>(&self, task_id: &str, mut apply: F) -> Result<Option<TaskRecord>, TaskError>
    where
        F: FnMut(&mut TaskRecord) -> Result<bool, TaskError> + Send,
    {
        let key = make_key(task_id);
        let mut last_conflict = (0, 0);

        for attempt in 0..self.config.max_update_attempts.max(1) {
            let versioned = match self.backend.get(&key).await {
                Ok(versioned) => versioned,
                Err(StorageError::NotFound { .. }) => return Ok(None),
                Err(e) => return Err(Self::map_storage_error(e, task_id)),
            };

            let mut record = Self::deserialize_record(&versioned.data)?;
            if !apply(&mut record)? {
                record.version = versioned.version;
                return Ok(Some(record));
            }
            record.updated_at = Utc::now();

            let bytes = Self::serialize_record(&record)?;
            match self
                .backend
                .put_if_version(&key, &bytes, versioned.version)
                .await
            {
                Ok(new_version) => {
                    record.version = new_version;
                    return Ok(Some(record));
                },
                Err(StorageError::VersionConflict {
                    expected, actual, ..
                }) => {
                    tracing::debug!(
                        task_id = task_id,
                        attempt = attempt,
                        expected = expected,
                        actual = actual,
                        "version conflict on task write, re-reading"
                    );
                    last_conflict = (expected, actual);
                },
                Err(StorageError::NotFound { .. }) => return Ok(None),
                Err(e) => return Err(Self::map_storage_error(e, task_id)),
            }
        }

        Err(TaskError::ConcurrentModification {
            task_id: task_id.to_string(),
            expected_version: last_conflict.0,
            actual_version: last_conflict.1,
        })
    }

    /// Creates and persists a new `Pending` record.
    pub async fn create(
        &self,
        task_type: &str,
        payload: Value,
        max_retries: u32,
    ) -> Result<TaskRecord, TaskError> {
        self.insert(TaskRecord::new(task_type, payload, max_retries))
            .await
    }

    /// Persists a caller-built `Pending` record.
    pub async fn insert(&self, mut record: TaskRecord) -> Result<TaskRecord, TaskError> {
        if record.status != TaskStatus::Pending {
            return Err(TaskError::InvalidTransition {
                task_id: record.id.clone(),
                from: record.status,
                to: TaskStatus::Pending,
                suggested_action: Some("new records must start pending".to_string()),
            });
        }
        self.check_payload_size(&record.payload)?;

        let key = make_key(&record.id);
        let bytes = Self::serialize_record(&record)?;
        let version = self
            .backend
            .put(&key, &bytes)
            .await
            .map_err(|e| Self::map_storage_error(e, &record.id))?;
        record.version = version;

        Ok(record)
    }

    /// Looks up a record by ID.
    pub async fn find_by_id(&self, task_id: &str) -> Result<Option<TaskRecord>, TaskError> {
        let key = make_key(task_id);
        let versioned = match self.backend.get(&key).await {
            Ok(versioned) => versioned,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(Self::map_storage_error(e, task_id)),
        };

        let mut record = Self::deserialize_record(&versioned.data)?;
        record.version = versioned.version;
        Ok(Some(record))
    }

    /// Transitions a record, enforcing the state machine and the rule that
    /// `result` and `error_message` are never both set.
    pub async fn update_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<Option<TaskRecord>, TaskError> {
        self.mutate(task_id, |record| {
            record.status.validate_transition(task_id, &new_status)?;
            record.status = new_status;

            match new_status {
                TaskStatus::Completed => {
                    record.result = Some(result.clone().unwrap_or(Value::Null));
                    record.error_message = None;
                },
                TaskStatus::Failed => {
                    record.result = None;
                    record.error_message = Some(
                        error_message
                            .clone()
                            .unwrap_or_else(|| "task failed".to_string()),
                    );
                    record.retry_count = record.retry_count.saturating_add(1);
                },
                TaskStatus::Pending | TaskStatus::Running => {
                    record.result = None;
                    record.error_message = None;
                },
            }
            Ok(true)
        })
        .await
    }

    /// Bumps `retry_count` by one.
    pub async fn increment_retry_count(
        &self,
        task_id: &str,
    ) -> Result<Option<TaskRecord>, TaskError> {
        self.mutate(task_id, |record| {
            record.retry_count = record.retry_count.saturating_add(1);
            Ok(true)
        })
        .await
    }

    /// Bumps `retry_count` by one unless it already reached `cap`.
    ///
    /// The cap is checked against the record read in the same CAS attempt,
    /// so concurrent callers can never push the count past it. At the cap
    /// the record is returned unchanged and nothing is written.
    pub async fn increment_retry_count_capped(
        &self,
        task_id: &str,
        cap: u32,
    ) -> Result<Option<TaskRecord>, TaskError> {
        self.mutate(task_id, |record| {
            if record.retry_count >= cap {
                return Ok(false);
            }
            record.retry_count += 1;
            Ok(true)
        })
        .await
    }

    /// Lists every record in `status`, oldest first.
    ///
    /// Records that fail to decode are skipped with a warning rather than
    /// failing the whole listing.
    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, TaskError> {
        let entries = self
            .backend
            .list_by_prefix(TASK_KEY_PREFIX)
            .await
            .map_err(|e| Self::map_storage_error(e, ""))?;

        let mut records: Vec<TaskRecord> = entries
            .into_iter()
            .filter_map(|(key, versioned)| {
                match Self::deserialize_record(&versioned.data) {
                    Ok(mut record) => {
                        record.version = versioned.version;
                        Some(record)
                    },
                    Err(e) => {
                        tracing::warn!(
                            task_id = parse_key(&key).unwrap_or(key.as_str()),
                            error = %e,
                            "skipping undecodable task record"
                        );
                        None
                    },
                }
            })
            .filter(|record| record.status == status)
            .collect();

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Active limits.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

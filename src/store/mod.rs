//! Where task records live.
//!
//! # Architecture
//!
//! Storage is split in three layers:
//!
//! 1. **[`TaskStore`]** -- the interface the [`TaskManager`](crate::manager::TaskManager)
//!    holds as `Arc<dyn TaskStore>`. It is the single source of truth for
//!    task status.
//!
//! 2. **[`GenericTaskStore<B>`](generic::GenericTaskStore)** -- all domain
//!    logic (state machine, result/error exclusivity, retry counting,
//!    payload limits, CAS-based mutations, JSON serialization). Has a
//!    blanket `TaskStore` impl.
//!
//! 3. **[`StorageBackend`]** -- dumb versioned KV trait that backends
//!    implement. No domain logic.
//!
//! # Backends
//!
//! - [`InMemoryBackend`](crate::store::memory::InMemoryBackend) -- `DashMap`
//!   backed, used by [`InMemoryTaskStore`](crate::store::memory::InMemoryTaskStore).
//! - `RedisBackend` -- durable backend behind the `redis` feature flag.

pub mod backend;
pub mod generic;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use serde_json::Value;

pub use backend::{StorageBackend, StorageError, VersionedRecord};

use crate::constants::{DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_MAX_UPDATE_ATTEMPTS};
use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::types::task::TaskStatus;

/// Store-level limits.
///
/// # Defaults
///
/// | Setting               | Default   | Description                                 |
/// |-----------------------|-----------|---------------------------------------------|
/// | `max_payload_bytes`   | 1,048,576 | Max serialized size of a task payload       |
/// | `max_update_attempts` | 8         | CAS re-read attempts before giving up       |
///
/// # Examples
///
/// ```
/// use task_engine::store::StoreConfig;
///
/// let config = StoreConfig::default();
/// assert_eq!(config.max_payload_bytes, 1_048_576);
/// assert_eq!(config.max_update_attempts, 8);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum serialized size of a payload accepted by `create`.
    pub max_payload_bytes: usize,

    /// How many times a mutation re-reads the record after losing a CAS race.
    pub max_update_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_update_attempts: DEFAULT_MAX_UPDATE_ATTEMPTS,
        }
    }
}

/// Persistence boundary for task records.
///
/// "Absent" results (`Ok(None)`) mean the ID is unknown; errors are
/// reserved for storage failures and rejected transitions.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. Every call may come from a
/// different worker; none of them may rely on a shared session object.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Creates a new `Pending` record with a fresh ID and `retry_count = 0`.
    ///
    /// # Errors
    ///
    /// - [`TaskError::PayloadTooLarge`] if the payload exceeds
    ///   [`StoreConfig::max_payload_bytes`].
    /// - [`TaskError::StoreError`] on backend failures. A submission whose
    ///   record could not be created must fail.
    async fn create(
        &self,
        task_type: &str,
        payload: Value,
        max_retries: u32,
    ) -> Result<TaskRecord, TaskError>;

    /// Persists a fully-formed record as-is (used for resubmission, where
    /// the caller sets `resubmitted_from`). The record must be `Pending`.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidTransition`] if the record is not `Pending`.
    /// - [`TaskError::PayloadTooLarge`] / [`TaskError::StoreError`] as for `create`.
    async fn insert(&self, record: TaskRecord) -> Result<TaskRecord, TaskError>;

    /// Read-only lookup. Returns `Ok(None)` for an unknown ID.
    ///
    /// # Errors
    ///
    /// - [`TaskError::StoreError`] on backend failures.
    async fn find_by_id(&self, task_id: &str) -> Result<Option<TaskRecord>, TaskError>;

    /// Moves a task to `new_status`, setting `result` (on `Completed`) or
    /// `error_message` (on `Failed`) and refreshing `updated_at`. Moving to
    /// `Failed` also bumps `retry_count` in the same write.
    ///
    /// Returns `Ok(None)` for an unknown ID.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidTransition`] if the state machine forbids it.
    /// - [`TaskError::ConcurrentModification`] if CAS retries are exhausted.
    /// - [`TaskError::StoreError`] on backend failures.
    async fn update_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<Option<TaskRecord>, TaskError>;

    /// Atomically bumps `retry_count`. Returns `Ok(None)` for an unknown ID.
    ///
    /// # Errors
    ///
    /// - [`TaskError::ConcurrentModification`] if CAS retries are exhausted.
    /// - [`TaskError::StoreError`] on backend failures.
    async fn increment_retry_count(&self, task_id: &str) -> Result<Option<TaskRecord>, TaskError>;

    /// Bumps `retry_count` unless it already reached `cap`, checking and
    /// writing in one atomic step. At the cap the record comes back
    /// unchanged. Returns `Ok(None)` for an unknown ID.
    ///
    /// # Errors
    ///
    /// - [`TaskError::ConcurrentModification`] if CAS retries are exhausted.
    /// - [`TaskError::StoreError`] on backend failures.
    async fn increment_retry_count_capped(
        &self,
        task_id: &str,
        cap: u32,
    ) -> Result<Option<TaskRecord>, TaskError>;

    /// Returns every record currently in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// - [`TaskError::StoreError`] on backend failures.
    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, TaskError>;

    /// Returns the store's configuration.
    fn config(&self) -> &StoreConfig;
}

#[async_trait]
impl<B: StorageBackend + 'static> TaskStore for generic::GenericTaskStore<B> {
    async fn create(
        &self,
        task_type: &str,
        payload: Value,
        max_retries: u32,
    ) -> Result<TaskRecord, TaskError> {
        self.create(task_type, payload, max_retries).await
    }

    async fn insert(&self, record: TaskRecord) -> Result<TaskRecord, TaskError> {
        self.insert(record).await
    }

    async fn find_by_id(&self, task_id: &str) -> Result<Option<TaskRecord>, TaskError> {
        self.find_by_id(task_id).await
    }

    async fn update_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<Option<TaskRecord>, TaskError> {
        self.update_status(task_id, new_status, result, error_message)
            .await
    }

    async fn increment_retry_count(&self, task_id: &str) -> Result<Option<TaskRecord>, TaskError> {
        self.increment_retry_count(task_id).await
    }

    async fn increment_retry_count_capped(
        &self,
        task_id: &str,
        cap: u32,
    ) -> Result<Option<TaskRecord>, TaskError> {
        self.increment_retry_count_capped(task_id, cap).await
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, TaskError> {
        self.list_by_status(status).await
    }

    fn config(&self) -> &StoreConfig {
        self.config()
    }
}

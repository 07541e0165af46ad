//! The versioned byte store underneath every task store.
//!
//! A [`StorageBackend`] only moves opaque bytes keyed by string and tracks a
//! version per key. It never decodes a task record: status rules, retry
//! counting, and JSON encoding all sit one layer up in `GenericTaskStore`.
//!
//! # Key Structure
//!
//! Keys have the form `task:{task_id}`. Listing every task is a prefix
//! query on [`TASK_KEY_PREFIX`].
//!
//! # Versioning
//!
//! Each stored record carries a monotonic `u64` version starting at 1,
//! incremented on every successful write. `put_if_version` provides
//! compare-and-swap semantics so that two writers never silently clobber
//! each other.

use async_trait::async_trait;
use thiserror::Error;

/// Prefix shared by every task key.
pub const TASK_KEY_PREFIX: &str = "task:";

/// Raw bytes read from a backend, with the version they were written at.
///
/// # Examples
///
/// ```
/// use task_engine::store::backend::VersionedRecord;
///
/// let record = VersionedRecord {
///     data: b"{}".to_vec(),
///     version: 1,
/// };
/// assert_eq!(record.version, 1);
/// ```
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// Serialized task record bytes (JSON produced by `GenericTaskStore`).
    pub data: Vec<u8>,

    /// Monotonic version, starting at 1.
    pub version: u64,
}

/// Failure of a raw backend call.
///
/// `GenericTaskStore` maps these to [`TaskError`](crate::error::TaskError)
/// variants before surfacing them to callers.
///
/// # Examples
///
/// ```
/// use task_engine::store::backend::StorageError;
///
/// let err = StorageError::VersionConflict {
///     key: "task:1".to_string(),
///     expected: 2,
///     actual: 3,
/// };
/// assert!(err.to_string().contains("expected 2"));
/// ```
#[derive(Debug, Error)]
pub enum StorageError {
    /// No record exists for the key.
    #[error("key not found: {key}")]
    NotFound {
        /// Missing key.
        key: String,
    },

    /// A CAS write found a different version than expected.
    #[error("version conflict on key {key}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Contended key.
        key: String,
        /// Version the writer read.
        expected: u64,
        /// Version present at write time.
        actual: u64,
    },

    /// Connection, I/O, or other backend-specific failure.
    #[error("backend error: {message}")]
    Backend {
        /// What went wrong, for logs.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    /// Wraps an arbitrary backend error.
    pub fn backend<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Versioned key-value persistence used by `GenericTaskStore`.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: every worker calls into the same
/// backend concurrently. A backend that talks to a server must hand each
/// call its own connection handle (from a pool or a multiplexing manager)
/// rather than share one stateful session across workers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetches a record and its version.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no record exists for the key.
    /// - [`StorageError::Backend`] when the backend itself fails.
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError>;

    /// Unconditionally stores a record, returning its new version
    /// (1 for a new key).
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] when the backend itself fails.
    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError>;

    /// Stores a record only if the current version matches `expected_version`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if no record exists for the key.
    /// - [`StorageError::VersionConflict`] if the stored version differs.
    /// - [`StorageError::Backend`] when the backend itself fails.
    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// Deletes a record. Returns `false` if the key did not exist.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] when the backend itself fails.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Lists all records whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Backend`] when the backend itself fails.
    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError>;
}

/// Constructs the storage key for a task.
///
/// ```
/// use task_engine::store::backend::make_key;
///
/// assert_eq!(make_key("abc-123"), "task:abc-123");
/// ```
pub fn make_key(task_id: &str) -> String {
    format!("{TASK_KEY_PREFIX}{task_id}")
}

/// Extracts the task ID from a storage key, if it has the task prefix.
///
/// ```
/// use task_engine::store::backend::parse_key;
///
/// assert_eq!(parse_key("task:abc-123"), Some("abc-123"));
/// assert_eq!(parse_key("other:abc"), None);
/// ```
pub fn parse_key(key: &str) -> Option<&str> {
    key.strip_prefix(TASK_KEY_PREFIX)
}

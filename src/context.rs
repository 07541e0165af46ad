//! Per-execution handle passed to task handlers.
//!
//! [`TaskContext`] scopes store access to a single task, so handler code
//! never juggles task IDs or store handles. It is `Clone + Send + Sync`:
//! cloning is cheap and yields a handle to the same task and store.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use task_engine::context::TaskContext;
//! use task_engine::store::memory::InMemoryTaskStore;
//! use task_engine::store::TaskStore;
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = Arc::new(InMemoryTaskStore::new());
//! let record = store.create("nft_mint", json!({"user_id": 7}), 2).await.unwrap();
//!
//! let ctx = TaskContext::new(store.clone(), &record);
//! assert_eq!(ctx.payload()["user_id"], 7);
//!
//! assert_eq!(ctx.record_retry().await.unwrap(), 1);
//! assert_eq!(ctx.record_retry().await.unwrap(), 2);
//! // capped at max_retries
//! assert_eq!(ctx.record_retry().await.unwrap(), 2);
//! # });
//! ```

use std::sync::Arc;

use serde_json::Value;

use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::store::TaskStore;

/// Handle to the task currently being executed.
#[derive(Clone)]
pub struct TaskContext {
    store: Arc<dyn TaskStore>,
    task_id: String,
    task_type: String,
    payload: Value,
    max_retries: u32,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("task_type", &self.task_type)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    /// Creates a context for `record`, backed by `store`.
    pub fn new(store: Arc<dyn TaskStore>, record: &TaskRecord) -> Self {
        Self {
            store,
            task_id: record.id.clone(),
            task_type: record.task_type.clone(),
            payload: record.payload.clone(),
            max_retries: record.max_retries,
        }
    }

    /// The task's ID.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The task's type tag.
    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    /// The payload recorded at submission.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The task's retry ceiling.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Reads a fresh snapshot of the task record.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the record has disappeared.
    /// - [`TaskError::StoreError`] on backend failures.
    pub async fn record(&self) -> Result<TaskRecord, TaskError> {
        self.store
            .find_by_id(&self.task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound {
                task_id: self.task_id.clone(),
            })
    }

    /// Records one retry on the task and returns the resulting
    /// `retry_count`. The count never goes past `max_retries` here; the
    /// final failure transition is what may take it to `max_retries + 1`.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the record has disappeared.
    /// - Store errors from the underlying update.
    pub async fn record_retry(&self) -> Result<u32, TaskError> {
        let updated = self
            .store
            .increment_retry_count_capped(&self.task_id, self.max_retries)
            .await?
            .ok_or_else(|| TaskError::NotFound {
                task_id: self.task_id.clone(),
            })?;
        Ok(updated.retry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::{StorageBackend, StorageError, VersionedRecord};
    use crate::store::generic::GenericTaskStore;
    use crate::store::memory::{InMemoryBackend, InMemoryTaskStore};
    use async_trait::async_trait;
    use serde_json::json;

    #[tokio::test]
    async fn accessors_reflect_record() {
        let store = Arc::new(InMemoryTaskStore::new());
        let record = store
            .create("nft_mint", json!({"owner": "u1"}), 4)
            .await
            .unwrap();
        let ctx = TaskContext::new(store, &record);

        assert_eq!(ctx.task_id(), record.id);
        assert_eq!(ctx.task_type(), "nft_mint");
        assert_eq!(ctx.max_retries(), 4);
        assert_eq!(ctx.payload(), &json!({"owner": "u1"}));
        assert!(format!("{ctx:?}").contains("nft_mint"));
    }

    #[tokio::test]
    async fn record_retry_with_zero_budget_is_noop() {
        let store = Arc::new(InMemoryTaskStore::new());
        let record = store.create("t", Value::Null, 0).await.unwrap();
        let ctx = TaskContext::new(store.clone(), &record);

        assert_eq!(ctx.record_retry().await.unwrap(), 0);
        assert_eq!(ctx.record().await.unwrap().retry_count, 0);
    }

    /// Backend whose reads yield once, so concurrent callers interleave
    /// between reading a record and writing it back.
    struct YieldingBackend {
        inner: InMemoryBackend,
    }

    #[async_trait]
    impl StorageBackend for YieldingBackend {
        async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
            let read = self.inner.get(key).await;
            tokio::task::yield_now().await;
            read
        }

        async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
            self.inner.put(key, data).await
        }

        async fn put_if_version(
            &self,
            key: &str,
            data: &[u8],
            expected_version: u64,
        ) -> Result<u64, StorageError> {
            self.inner.put_if_version(key, data, expected_version).await
        }

        async fn delete(&self, key: &str) -> Result<bool, StorageError> {
            self.inner.delete(key).await
        }

        async fn list_by_prefix(
            &self,
            prefix: &str,
        ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
            self.inner.list_by_prefix(prefix).await
        }
    }

    #[tokio::test]
    async fn concurrent_retries_never_pass_the_cap() {
        let store: Arc<dyn TaskStore> = Arc::new(GenericTaskStore::new(YieldingBackend {
            inner: InMemoryBackend::new(),
        }));
        let record = store.create("nft_mint", Value::Null, 1).await.unwrap();
        let a = TaskContext::new(Arc::clone(&store), &record);
        let b = a.clone();

        let (left, right) = tokio::join!(a.record_retry(), b.record_retry());
        assert_eq!(left.unwrap(), 1);
        assert_eq!(right.unwrap(), 1);
        assert_eq!(a.record().await.unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn concurrent_retries_below_the_cap_all_count() {
        let store: Arc<dyn TaskStore> = Arc::new(GenericTaskStore::new(YieldingBackend {
            inner: InMemoryBackend::new(),
        }));
        let record = store.create("nft_mint", Value::Null, 5).await.unwrap();
        let a = TaskContext::new(Arc::clone(&store), &record);
        let b = a.clone();
        let c = a.clone();

        let (x, y, z) = tokio::join!(a.record_retry(), b.record_retry(), c.record_retry());
        let mut seen = vec![x.unwrap(), y.unwrap(), z.unwrap()];
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(a.record().await.unwrap().retry_count, 3);
    }

    #[tokio::test]
    async fn record_of_missing_task_is_not_found() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let orphan = TaskRecord::new("t", Value::Null, 3);
        let ctx = TaskContext::new(store, &orphan);
        assert!(ctx.record().await.unwrap_err().is_not_found());
    }
}

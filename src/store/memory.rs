//! Process-local storage: a `DashMap` backend and the store built on it.
//!
//! [`InMemoryBackend`] keeps each serialized record in a [`Slot`] next to its
//! CAS version. Sharded locking means two workers finishing different tasks
//! never wait on each other.
//!
//! [`InMemoryTaskStore`] pairs that backend with
//! [`GenericTaskStore`](crate::store::generic::GenericTaskStore) and is the
//! store [`TaskManager::builder`](crate::manager::TaskManager::builder) falls
//! back to. Records live as long as the process does.
//!
//! ```
//! use task_engine::store::memory::InMemoryTaskStore;
//! use task_engine::store::StoreConfig;
//!
//! let store = InMemoryTaskStore::new().with_config(StoreConfig {
//!     max_payload_bytes: 64 * 1024,
//!     ..StoreConfig::default()
//! });
//! assert!(store.is_empty());
//! ```

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::store::backend::{StorageBackend, StorageError, VersionedRecord};
use crate::store::generic::GenericTaskStore;
use crate::types::task::TaskStatus;

use super::{StoreConfig, TaskStore};

/// One stored value and the version it was written at.
#[derive(Debug, Clone)]
struct Slot {
    bytes: Vec<u8>,
    version: u64,
}

impl Slot {
    fn snapshot(&self) -> VersionedRecord {
        VersionedRecord {
            data: self.bytes.clone(),
            version: self.version,
        }
    }
}

fn missing(key: &str) -> StorageError {
    StorageError::NotFound {
        key: key.to_string(),
    }
}

/// Versioned KV map with no knowledge of tasks.
///
/// Versions start at 1 and grow by one per write to the same key.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    slots: DashMap<String, Slot>,
}

impl InMemoryBackend {
    /// An empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        self.slots
            .get(key)
            .map(|slot| slot.snapshot())
            .ok_or_else(|| missing(key))
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        let version = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                slot.version += 1;
                slot.bytes = data.to_vec();
                slot.version
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    bytes: data.to_vec(),
                    version: 1,
                });
                1
            },
        };
        Ok(version)
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let mut slot = self.slots.get_mut(key).ok_or_else(|| missing(key))?;
        if slot.version != expected_version {
            return Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: slot.version,
            });
        }
        slot.version += 1;
        slot.bytes = data.to_vec();
        Ok(slot.version)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.slots.remove(key).is_some())
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        Ok(self
            .slots
            .iter()
            .filter(|slot| slot.key().starts_with(prefix))
            .map(|slot| (slot.key().clone(), slot.value().snapshot()))
            .collect())
    }
}

/// [`TaskStore`] kept entirely in process memory.
#[derive(Debug)]
pub struct InMemoryTaskStore {
    inner: GenericTaskStore<InMemoryBackend>,
}

impl InMemoryTaskStore {
    /// An empty store with default limits.
    pub fn new() -> Self {
        Self {
            inner: GenericTaskStore::new(InMemoryBackend::new()),
        }
    }

    /// Replaces the store limits.
    pub fn with_config(self, config: StoreConfig) -> Self {
        Self {
            inner: self.inner.with_config(config),
        }
    }

    /// Number of task records, whatever their status.
    pub fn len(&self) -> usize {
        self.inner.backend().len()
    }

    /// `true` when no task was ever recorded.
    pub fn is_empty(&self) -> bool {
        self.inner.backend().is_empty()
    }

    /// The raw backend, for inspecting serialized records.
    pub fn backend(&self) -> &InMemoryBackend {
        self.inner.backend()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(
        &self,
        task_type: &str,
        payload: Value,
        max_retries: u32,
    ) -> Result<TaskRecord, TaskError> {
        self.inner.create(task_type, payload, max_retries).await
    }

    async fn insert(&self, record: TaskRecord) -> Result<TaskRecord, TaskError> {
        self.inner.insert(record).await
    }

    async fn find_by_id(&self, task_id: &str) -> Result<Option<TaskRecord>, TaskError> {
        self.inner.find_by_id(task_id).await
    }

    async fn update_status(
        &self,
        task_id: &str,
        new_status: TaskStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) -> Result<Option<TaskRecord>, TaskError> {
        self.inner
            .update_status(task_id, new_status, result, error_message)
            .await
    }

    async fn increment_retry_count(&self, task_id: &str) -> Result<Option<TaskRecord>, TaskError> {
        self.inner.increment_retry_count(task_id).await
    }

    async fn increment_retry_count_capped(
        &self,
        task_id: &str,
        cap: u32,
    ) -> Result<Option<TaskRecord>, TaskError> {
        self.inner.increment_retry_count_capped(task_id, cap).await
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, TaskError> {
        self.inner.list_by_status(status).await
    }

    fn config(&self) -> &StoreConfig {
        self.inner.config()
    }
}

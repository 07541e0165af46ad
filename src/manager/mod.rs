//! The task manager: submission, status, cancellation, and the worker pool.
//!
//! [`TaskManager`] turns "fire and track" calls into records in a
//! [`TaskStore`] plus work on a fixed pool of tokio workers. `submit`
//! returns the new task id as soon as the record exists; the handler runs
//! later on whichever worker frees up first.
//!
//! # Lifecycle
//!
//! ```text
//! submit ──► pending ──► running ──► completed
//!               │            └─────► failed
//!               └── cancel ────────► failed ("cancelled")
//! ```
//!
//! At most `workers` handlers run at once; the rest wait in a FIFO queue.
//! `cancel` only succeeds while a task is still queued.
//!
//! # Examples
//!
//! ```
//! use task_engine::{handler_fn, TaskManager, TaskStatus};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let manager = TaskManager::builder().workers(2).build().unwrap();
//!
//! let id = manager
//!     .submit("nft_mint", handler_fn(|_| async { Ok(json!({"x": 1})) }), json!({"user": 1}), None)
//!     .await
//!     .unwrap();
//!
//! manager.shutdown().await;
//! let view = manager.get_status(&id).await.unwrap().unwrap();
//! assert_eq!(view.status, TaskStatus::Completed);
//! assert_eq!(view.result, Some(json!({"x": 1})));
//! # });
//! ```

pub mod config;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

pub use config::ManagerConfig;

use crate::constants::CANCELLED_MESSAGE;
use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::handler::TaskHandler;
use crate::store::memory::InMemoryTaskStore;
use crate::store::TaskStore;
use crate::types::task::{TaskStatus, TaskView};

use worker::{QueuedWork, Shared};

/// Submits tasks and runs them on a bounded worker pool.
pub struct TaskManager {
    shared: Arc<Shared>,
    config: ManagerConfig,
    /// `None` once shutdown has begun.
    sender: RwLock<Option<UnboundedSender<String>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("config", &self.config)
            .field("queued", &self.shared.queued.len())
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Creates a manager over `store` and spawns its workers.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Config`] if `config` is invalid.
    pub fn new(store: Arc<dyn TaskStore>, config: ManagerConfig) -> Result<Self, TaskError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            store,
            queued: DashMap::new(),
            execution_timeout: config.execution_timeout,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..config.workers)
            .map(|n| tokio::spawn(worker::worker_loop(n, Arc::clone(&shared), Arc::clone(&rx))))
            .collect();

        tracing::info!(
            workers = config.workers,
            default_max_retries = config.default_max_retries,
            "task manager started"
        );

        Ok(Self {
            shared,
            config,
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(handles),
        })
    }

    /// Starts a [`TaskManagerBuilder`].
    pub fn builder() -> TaskManagerBuilder {
        TaskManagerBuilder::default()
    }

    /// The configuration the manager was started with.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The store holding every task record.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.shared.store
    }

    /// Records a new `pending` task and queues `handler` to run it.
    ///
    /// Returns the task id without waiting for the handler. `max_retries`
    /// falls back to [`ManagerConfig::default_max_retries`].
    ///
    /// # Errors
    ///
    /// - [`TaskError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    ///   began. No record is created.
    /// - [`TaskError::PayloadTooLarge`] / [`TaskError::StoreError`] if the
    ///   record could not be created. The handler never runs.
    pub async fn submit<H: TaskHandler>(
        &self,
        task_type: &str,
        handler: H,
        payload: Value,
        max_retries: Option<u32>,
    ) -> Result<String, TaskError> {
        let sender = self.sender.read().await;
        let tx = sender.as_ref().ok_or(TaskError::ShuttingDown)?;

        let max_retries = max_retries.unwrap_or(self.config.default_max_retries);
        let record = self
            .shared
            .store
            .create(task_type, payload, max_retries)
            .await?;

        tracing::info!(
            task_id = %record.id,
            task_type = %record.task_type,
            max_retries = max_retries,
            "task submitted"
        );
        self.enqueue(tx, record, Arc::new(handler)).await
    }

    /// Snapshot of a task, or `None` for an unknown id.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::StoreError`] on backend failures.
    pub async fn get_status(&self, task_id: &str) -> Result<Option<TaskView>, TaskError> {
        Ok(self
            .shared
            .store
            .find_by_id(task_id)
            .await?
            .map(|record| record.to_view()))
    }

    /// Cancels a task that no worker has picked up yet, marking it `failed`
    /// with the message `"cancelled"`.
    ///
    /// Returns `false` if the task is unknown, already running, or finished.
    /// Running handlers are never interrupted.
    ///
    /// # Errors
    ///
    /// Returns the store error if the cancellation could not be recorded.
    /// The task stays dequeued either way.
    pub async fn cancel(&self, task_id: &str) -> Result<bool, TaskError> {
        let Some((_, work)) = self.shared.queued.remove(task_id) else {
            return Ok(false);
        };

        tracing::warn!(
            task_id = %task_id,
            task_type = %work.record.task_type,
            "task cancelled before execution"
        );
        self.shared
            .store
            .update_status(
                task_id,
                TaskStatus::Failed,
                None,
                Some(CANCELLED_MESSAGE.to_string()),
            )
            .await?;
        Ok(true)
    }

    /// Every record in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::StoreError`] on backend failures.
    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>, TaskError> {
        self.shared.store.list_by_status(status).await
    }

    /// Runs a failed task again as a brand-new record.
    ///
    /// The new record copies the type, payload, and `max_retries` of the
    /// failed one and points back at it through `resubmitted_from`. The
    /// failed record itself is left untouched.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] for an unknown id.
    /// - [`TaskError::NotResubmittable`] unless the record is `failed` with
    ///   `retry_count <= max_retries`.
    /// - [`TaskError::ShuttingDown`] after shutdown began.
    pub async fn resubmit<H: TaskHandler>(
        &self,
        failed_task_id: &str,
        handler: H,
    ) -> Result<String, TaskError> {
        let sender = self.sender.read().await;
        let tx = sender.as_ref().ok_or(TaskError::ShuttingDown)?;

        let original = self
            .shared
            .store
            .find_by_id(failed_task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound {
                task_id: failed_task_id.to_string(),
            })?;
        if !original.can_resubmit() {
            return Err(TaskError::NotResubmittable {
                task_id: original.id,
                status: original.status,
                retry_count: original.retry_count,
                max_retries: original.max_retries,
            });
        }

        let mut fresh = TaskRecord::new(
            original.task_type.clone(),
            original.payload.clone(),
            original.max_retries,
        );
        fresh.resubmitted_from = Some(original.id.clone());
        let record = self.shared.store.insert(fresh).await?;

        tracing::info!(
            task_id = %record.id,
            task_type = %record.task_type,
            resubmitted_from = %original.id,
            "task resubmitted"
        );
        self.enqueue(tx, record, Arc::new(handler)).await
    }

    /// Tasks submitted but not yet picked up by a worker.
    pub fn queued_len(&self) -> usize {
        self.shared.queued.len()
    }

    /// Stops accepting submissions, lets the workers drain the queue, and
    /// waits for them to exit. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.sender.write().await.take().is_some() {
            tracing::info!(queued = self.queued_len(), "task manager shutting down");
        }

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker exited abnormally");
            }
        }
    }

    async fn enqueue(
        &self,
        tx: &UnboundedSender<String>,
        record: TaskRecord,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<String, TaskError> {
        let task_id = record.id.clone();
        self.shared
            .queued
            .insert(task_id.clone(), QueuedWork { record, handler });

        if tx.send(task_id.clone()).is_err() {
            // every worker is gone; the record must not stay pending forever
            self.shared.queued.remove(&task_id);
            if let Err(e) = self
                .shared
                .store
                .update_status(
                    &task_id,
                    TaskStatus::Failed,
                    None,
                    Some(TaskError::ShuttingDown.to_string()),
                )
                .await
            {
                tracing::error!(task_id = %task_id, error = %e, "failed to record rejected task");
            }
            return Err(TaskError::ShuttingDown);
        }
        Ok(task_id)
    }
}

/// Builder for [`TaskManager`].
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use task_engine::store::memory::InMemoryTaskStore;
/// use task_engine::TaskManager;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let manager = TaskManager::builder()
///     .store(Arc::new(InMemoryTaskStore::new()))
///     .workers(3)
///     .default_max_retries(1)
///     .execution_timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// assert_eq!(manager.config().workers, 3);
/// # });
/// ```
#[derive(Default)]
pub struct TaskManagerBuilder {
    store: Option<Arc<dyn TaskStore>>,
    config: ManagerConfig,
}

impl std::fmt::Debug for TaskManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManagerBuilder")
            .field("config", &self.config)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl TaskManagerBuilder {
    /// Uses `store` for task records. Defaults to an [`InMemoryTaskStore`].
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the pool size.
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Sets the default retry budget for new tasks.
    pub fn default_max_retries(mut self, max_retries: u32) -> Self {
        self.config.default_max_retries = max_retries;
        self
    }

    /// Sets the per-execution timeout.
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.config.execution_timeout = Some(timeout);
        self
    }

    /// Builds the manager and spawns its workers.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Config`] if the configuration is invalid.
    pub fn build(self) -> Result<TaskManager, TaskError> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        TaskManager::new(store, self.config)
    }
}

//! Asynchronous background task execution with persisted status tracking.
//!
//! Callers submit a unit of work (a [`TaskHandler`]) and get a task id back
//! immediately. A fixed pool of workers runs the work, and every step of
//! the task's life is written to a [`TaskStore`] that callers poll.
//!
//! # Overview
//!
//! A task moves through a small state machine:
//! `pending` -> `running` -> `completed` | `failed`. A task that is still
//! queued can be cancelled, which marks it `failed` with the message
//! `"cancelled"`. Terminal states are final; a failed task can be run again
//! with [`TaskManager::resubmit`], which creates a new record.
//!
//! Retrying is opt-in per handler: wrap it in [`Retrying`] (or call
//! [`TaskHandlerExt::with_retry`]) to get exponential backoff.
//!
//! # Module Organization
//!
//! - [`manager`] - [`TaskManager`], its builder, configuration, and workers
//! - [`handler`] - the [`TaskHandler`] trait, closures, and the retry adapter
//! - [`retry`] - [`RetryPolicy`] and the backoff loop
//! - [`context`] - [`TaskContext`] handed to handlers
//! - [`store`] - the [`TaskStore`] trait and its backends
//! - [`types`] - [`TaskStatus`] and the [`TaskView`] snapshot
//! - [`domain`] - [`TaskRecord`], the persisted representation
//! - [`error`] - [`TaskError`]
//! - [`constants`] - defaults and environment variable names
//!
//! # Feature Flags
//!
//! | Feature       | Default | Description                                    |
//! |---------------|---------|------------------------------------------------|
//! | `logging`     | yes     | `logging::init_logging` via `tracing-subscriber` |
//! | `redis`       | no      | Durable `RedisBackend`                          |
//! | `redis-tests` | no      | Runs the Redis backend tests against a server   |
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use task_engine::{handler_fn, HandlerError, RetryPolicy, TaskHandlerExt, TaskManager};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let manager = TaskManager::builder().workers(5).build().unwrap();
//!
//! let owner = "user-42".to_string();
//! let mint = handler_fn(move |_ctx| {
//!     let owner = owner.clone();
//!     async move {
//!         if owner.is_empty() {
//!             return Err(HandlerError::msg("missing owner"));
//!         }
//!         Ok(json!({ "object_id": "0x1", "owner": owner }))
//!     }
//! })
//! .with_retry(RetryPolicy::new(3, Duration::from_millis(10)));
//!
//! let task_id = manager
//!     .submit("nft_mint", mint, json!({ "owner": "user-42" }), Some(3))
//!     .await
//!     .unwrap();
//!
//! let view = manager.get_status(&task_id).await.unwrap();
//! assert!(view.is_some());
//! manager.shutdown().await;
//! # });
//! ```

pub mod constants;
pub mod context;
pub mod domain;
pub mod error;
pub mod handler;
#[cfg(feature = "logging")]
pub mod logging;
pub mod manager;
pub mod retry;
pub mod store;
pub mod types;

pub use context::TaskContext;
pub use domain::TaskRecord;
pub use error::TaskError;
pub use handler::{handler_fn, json_result, HandlerError, Retrying, TaskHandler, TaskHandlerExt};
pub use manager::{ManagerConfig, TaskManager, TaskManagerBuilder};
pub use retry::{retry_with_backoff, RetryPolicy, Sleeper, TokioSleeper};
pub use store::memory::InMemoryTaskStore;
pub use store::{StoreConfig, TaskStore};
pub use types::*;

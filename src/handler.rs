//! Task handlers: the caller-supplied work a task runs.
//!
//! A handler is anything implementing [`TaskHandler`]. Closures become
//! handlers through [`handler_fn`]; they capture their own arguments, so
//! the engine never needs to know what a handler takes.
//!
//! Handlers must raise on failure (return `Err`) rather than encode errors
//! in their result, and they should be safe to run more than once when
//! wrapped in [`Retrying`]: the engine does not deduplicate side effects
//! across attempts.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use task_engine::handler::{handler_fn, HandlerError, TaskHandlerExt};
//! use task_engine::retry::RetryPolicy;
//! use serde_json::json;
//!
//! let token_id = 42;
//! let mint = handler_fn(move |_ctx| async move {
//!     if token_id == 0 {
//!         return Err(HandlerError::msg("token id must be non-zero"));
//!     }
//!     Ok(json!({ "object_id": token_id, "tx_digest": "0xabc" }))
//! })
//! .with_retry(RetryPolicy::new(3, Duration::from_millis(10)));
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::context::TaskContext;
use crate::retry::{retry_with_backoff_notify, RetryPolicy, Sleeper, TokioSleeper};

/// Error raised by a handler. Its `Display` text becomes the task's
/// `error_message`.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A plain failure description.
    #[error("{0}")]
    Failed(String),

    /// Any other error, with its source chain preserved.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Creates a [`HandlerError::Failed`] from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(err.into())
    }
}

/// Serializes a handler's output into the `Value` stored as the task result.
///
/// ```
/// use task_engine::handler::json_result;
///
/// #[derive(serde::Serialize)]
/// struct Minted { object_id: u64 }
///
/// let value = json_result(&Minted { object_id: 9 }).unwrap();
/// assert_eq!(value["object_id"], 9);
/// ```
pub fn json_result<T: Serialize>(output: &T) -> Result<Value, HandlerError> {
    Ok(serde_json::to_value(output)?)
}

/// The unit of work a task executes.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Runs the work once. `ctx` identifies the task being executed.
    async fn run(&self, ctx: &TaskContext) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<H: TaskHandler + ?Sized> TaskHandler for Arc<H> {
    async fn run(&self, ctx: &TaskContext) -> Result<Value, HandlerError> {
        (**self).run(ctx).await
    }
}

/// [`TaskHandler`] built from a closure; see [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Wraps a closure as a [`TaskHandler`].
///
/// The closure may be called more than once (under [`Retrying`]), so it is
/// `Fn`, and receives an owned [`TaskContext`] clone per call.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn run(&self, ctx: &TaskContext) -> Result<Value, HandlerError> {
        (self.f)(ctx.clone()).await
    }
}

/// Applies a [`RetryPolicy`] to an inner handler.
///
/// Every retry is recorded on the task through
/// [`TaskContext::record_retry`]; a failure to record it is logged and does
/// not abort the retry loop.
pub struct Retrying<H> {
    inner: H,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<H> std::fmt::Debug for Retrying<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrying")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<H: TaskHandler> Retrying<H> {
    /// Wraps `inner` with `policy`, sleeping on the tokio timer.
    pub fn new(inner: H, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replaces the sleeper, e.g. with one that records delays in tests.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// The policy being applied.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<H: TaskHandler> TaskHandler for Retrying<H> {
    async fn run(&self, ctx: &TaskContext) -> Result<Value, HandlerError> {
        retry_with_backoff_notify(
            &self.policy,
            self.sleeper.as_ref(),
            |attempt| async move {
                if let Err(e) = ctx.record_retry().await {
                    tracing::warn!(
                        task_id = ctx.task_id(),
                        attempt = attempt,
                        error = %e,
                        "failed to record retry on task"
                    );
                }
            },
            |_| self.inner.run(ctx),
        )
        .await
    }
}

/// Combinators available on every handler.
pub trait TaskHandlerExt: TaskHandler + Sized {
    /// Wraps this handler in [`Retrying`] with `policy`.
    fn with_retry(self, policy: RetryPolicy) -> Retrying<Self> {
        Retrying::new(self, policy)
    }
}

impl<H: TaskHandler> TaskHandlerExt for H {}

//! Worker loop and single-task execution.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::context::TaskContext;
use crate::domain::TaskRecord;
use crate::handler::TaskHandler;
use crate::store::TaskStore;
use crate::types::task::TaskStatus;

/// A submitted task waiting for a worker.
pub(crate) struct QueuedWork {
    pub(crate) record: TaskRecord,
    pub(crate) handler: Arc<dyn TaskHandler>,
}

/// State shared by the manager and every worker.
pub(crate) struct Shared {
    pub(crate) store: Arc<dyn TaskStore>,
    /// Work not yet claimed by a worker. Removing an entry claims it.
    pub(crate) queued: DashMap<String, QueuedWork>,
    pub(crate) execution_timeout: Option<Duration>,
}

/// Pulls task ids off the queue until it closes and drains.
pub(crate) async fn worker_loop(
    worker: usize,
    shared: Arc<Shared>,
    queue: Arc<Mutex<UnboundedReceiver<String>>>,
) {
    tracing::debug!(worker = worker, "worker started");
    loop {
        let next = queue.lock().await.recv().await;
        let Some(task_id) = next else {
            break;
        };
        // cancelled while queued
        let Some((_, work)) = shared.queued.remove(&task_id) else {
            tracing::debug!(worker = worker, task_id = %task_id, "skipping cancelled task");
            continue;
        };
        let span = tracing::info_span!(
            "task",
            worker = worker,
            task_id = %work.record.id,
            task_type = %work.record.task_type,
        );
        let outcome = AssertUnwindSafe(execute(&shared, work).instrument(span))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            tracing::error!(
                worker = worker,
                task_id = %task_id,
                panic = panic_message(panic.as_ref()),
                "task execution panicked outside the handler; worker continues"
            );
        }
    }
    tracing::debug!(worker = worker, "worker stopped");
}

/// Runs one task: `running`, then the handler, then `completed` or `failed`.
///
/// Persistence failures are logged and never abort the execution itself.
pub(crate) async fn execute(shared: &Shared, work: QueuedWork) {
    let QueuedWork { record, handler } = work;
    let store = &shared.store;

    match store
        .update_status(&record.id, TaskStatus::Running, None, None)
        .await
    {
        Ok(Some(_)) => {},
        Ok(None) => {
            tracing::error!("task record vanished before execution");
            return;
        },
        Err(e) => {
            tracing::error!(error = %e, "failed to mark task running");
        },
    }

    let ctx = TaskContext::new(Arc::clone(store), &record);
    match run_handler(handler.as_ref(), &ctx, shared.execution_timeout).await {
        Ok(result) => {
            match store
                .update_status(&record.id, TaskStatus::Completed, Some(result), None)
                .await
            {
                Ok(_) => tracing::info!("task completed"),
                Err(e) => tracing::error!(error = %e, "failed to record task completion"),
            }
        },
        Err(message) => {
            tracing::error!(error = %message, "task failed");
            if let Err(e) = store
                .update_status(&record.id, TaskStatus::Failed, None, Some(message))
                .await
            {
                tracing::error!(error = %e, "failed to record task failure");
            }
        },
    }
}

/// Invokes the handler, folding errors, panics, and timeouts into a
/// failure message.
async fn run_handler(
    handler: &dyn TaskHandler,
    ctx: &TaskContext,
    timeout: Option<Duration>,
) -> Result<Value, String> {
    let guarded = AssertUnwindSafe(handler.run(ctx)).catch_unwind();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(format!("task timed out after {}ms", limit.as_millis()));
            },
        },
        None => guarded.await,
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

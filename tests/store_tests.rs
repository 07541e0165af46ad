//! Store behavior through the `Arc<dyn TaskStore>` seam the manager uses.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use task_engine::domain::TaskRecord;
use task_engine::store::generic::GenericTaskStore;
use task_engine::store::memory::{InMemoryBackend, InMemoryTaskStore};
use task_engine::store::{StorageBackend, StoreConfig, TaskStore};
use task_engine::{TaskError, TaskStatus};

fn store() -> Arc<dyn TaskStore> {
    Arc::new(InMemoryTaskStore::new())
}

#[tokio::test]
async fn create_then_find() {
    let store = store();
    let record = store
        .create("nft_mint", json!({"user_id": 42, "name": "Badge"}), 3)
        .await
        .unwrap();

    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.retry_count, 0);
    assert_eq!(record.max_retries, 3);
    assert_eq!(record.result, None);
    assert_eq!(record.error_message, None);

    let found = store.find_by_id(&record.id).await.unwrap().unwrap();
    assert_eq!(found.id, record.id);
    assert_eq!(found.task_type, "nft_mint");
    assert_eq!(found.payload, json!({"user_id": 42, "name": "Badge"}));
    assert_eq!(found.created_at, record.created_at);
}

#[tokio::test]
async fn unknown_id_is_absent_everywhere() {
    let store = store();
    assert!(store.find_by_id("missing").await.unwrap().is_none());
    assert!(store
        .update_status("missing", TaskStatus::Running, None, None)
        .await
        .unwrap()
        .is_none());
    assert!(store.increment_retry_count("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn success_path_sets_result_only() {
    let store = store();
    let record = store.create("t", Value::Null, 3).await.unwrap();

    let running = store
        .update_status(&record.id, TaskStatus::Running, None, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(running.status, TaskStatus::Running);

    let done = store
        .update_status(
            &record.id,
            TaskStatus::Completed,
            Some(json!({"object_id": "0x1", "tx_digest": "abc"})),
            Some("ignored".to_string()),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result, Some(json!({"object_id": "0x1", "tx_digest": "abc"})));
    assert_eq!(done.error_message, None);
    assert_eq!(done.retry_count, 0);
    assert!(done.updated_at >= record.updated_at);
}

#[tokio::test]
async fn failure_sets_error_and_bumps_retry_count() {
    let store = store();
    let record = store.create("t", Value::Null, 3).await.unwrap();
    store
        .update_status(&record.id, TaskStatus::Running, None, None)
        .await
        .unwrap();
    store.increment_retry_count(&record.id).await.unwrap();

    let failed = store
        .update_status(&record.id, TaskStatus::Failed, None, Some("rpc timeout".into()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("rpc timeout"));
    assert_eq!(failed.result, None);
    assert_eq!(failed.retry_count, 2);
}

#[tokio::test]
async fn terminal_records_reject_further_transitions() {
    let store = store();
    let record = store.create("t", Value::Null, 3).await.unwrap();
    store
        .update_status(&record.id, TaskStatus::Failed, None, Some("cancelled".into()))
        .await
        .unwrap();

    for target in TaskStatus::ALL {
        let err = store
            .update_status(&record.id, target, None, None)
            .await
            .unwrap_err();
        match err {
            TaskError::InvalidTransition {
                from,
                to,
                suggested_action,
                ..
            } => {
                assert_eq!(from, TaskStatus::Failed);
                assert_eq!(to, target);
                assert!(suggested_action.is_some());
            },
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    let unchanged = store.find_by_id(&record.id).await.unwrap().unwrap();
    assert_eq!(unchanged.error_message.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn pending_cannot_complete_directly() {
    let store = store();
    let record = store.create("t", Value::Null, 3).await.unwrap();
    let err = store
        .update_status(&record.id, TaskStatus::Completed, Some(json!(1)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::InvalidTransition { .. }));
}

#[tokio::test]
async fn payload_limit_enforced() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new().with_config(StoreConfig {
        max_payload_bytes: 32,
        ..StoreConfig::default()
    }));

    let err = store
        .create("t", json!({"blob": "x".repeat(64)}), 3)
        .await
        .unwrap_err();
    match err {
        TaskError::PayloadTooLarge {
            limit_bytes,
            actual_bytes,
        } => {
            assert_eq!(limit_bytes, 32);
            assert!(actual_bytes > 32);
        },
        other => panic!("expected PayloadTooLarge, got {other:?}"),
    }
    assert!(store.create("t", json!({"ok": 1}), 3).await.is_ok());
}

#[tokio::test]
async fn insert_requires_pending() {
    let store = store();
    let mut record = TaskRecord::new("t", Value::Null, 3);
    record.status = TaskStatus::Running;
    assert!(matches!(
        store.insert(record).await,
        Err(TaskError::InvalidTransition { .. })
    ));

    let mut fresh = TaskRecord::new("t", Value::Null, 3);
    fresh.resubmitted_from = Some("older".to_string());
    let stored = store.insert(fresh).await.unwrap();
    let found = store.find_by_id(&stored.id).await.unwrap().unwrap();
    assert_eq!(found.resubmitted_from.as_deref(), Some("older"));
}

#[tokio::test]
async fn list_by_status_filters_and_orders() {
    let store = store();
    let mut ids = Vec::new();
    for n in 0..4 {
        let record = store.create("t", json!({"n": n}), 3).await.unwrap();
        ids.push(record.id);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    store
        .update_status(&ids[1], TaskStatus::Running, None, None)
        .await
        .unwrap();

    let pending: Vec<String> = store
        .list_by_status(TaskStatus::Pending)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(pending, vec![ids[0].clone(), ids[2].clone(), ids[3].clone()]);

    let running = store.list_by_status(TaskStatus::Running).await.unwrap();
    assert_eq!(running.len(), 1);
    assert!(store
        .list_by_status(TaskStatus::Completed)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn generic_store_over_shared_backend() {
    let store = GenericTaskStore::new(InMemoryBackend::new());
    let record = store.create("t", json!({"a": 1}), 2).await.unwrap();
    assert_eq!(store.backend().len(), 1);

    let raw = store
        .backend()
        .get(&format!("task:{}", record.id))
        .await
        .unwrap();
    let decoded: Value = serde_json::from_slice(&raw.data).unwrap();
    assert_eq!(decoded["status"], "pending");
    assert_eq!(decoded["payload"], json!({"a": 1}));
    assert!(decoded.get("version").is_none());
}

#[tokio::test]
async fn view_exposes_all_fields() {
    let store = store();
    let record = store.create("nft_mint", json!({"u": 1}), 3).await.unwrap();
    let view = serde_json::to_value(record.to_view()).unwrap();

    for field in [
        "id",
        "task_type",
        "status",
        "payload",
        "retry_count",
        "max_retries",
        "created_at",
        "updated_at",
    ] {
        assert!(view.get(field).is_some(), "missing {field}");
    }
    assert_eq!(view["status"], "pending");
}

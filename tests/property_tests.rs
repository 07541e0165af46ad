//! Property-based tests using proptest.
//!
//! State machine invariants are checked both on [`TaskStatus`] directly and
//! through a real store, so the persisted record can never disagree with the
//! transition rules. Backoff delays and status deserialization get the same
//! treatment under arbitrary inputs.

use std::time::Duration;

use proptest::prelude::*;
use serde_json::{json, Value};

use task_engine::retry::RetryPolicy;
use task_engine::store::memory::InMemoryTaskStore;
use task_engine::store::TaskStore;
use task_engine::{TaskError, TaskStatus};

// ─── Arbitrary Strategies ───────────────────────────────────────────────────

fn arb_task_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

fn arb_payload() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z0-9 ]{0,32}".prop_map(|s| json!({ "note": s })),
    ]
}

// ─── Status Invariants ──────────────────────────────────────────────────────

proptest! {
    /// Terminal states reject every transition.
    #[test]
    fn terminal_states_reject_all_transitions(
        from in prop::sample::select(vec![TaskStatus::Completed, TaskStatus::Failed]),
        to in arb_task_status(),
    ) {
        prop_assert!(!from.can_transition_to(&to));
    }

    /// No status can transition to itself.
    #[test]
    fn no_self_transitions(status in arb_task_status()) {
        prop_assert!(!status.can_transition_to(&status));
    }

    /// `is_terminal` holds exactly when no outgoing transition exists.
    #[test]
    fn is_terminal_iff_no_valid_transitions(status in arb_task_status()) {
        let has_any = TaskStatus::ALL.iter().any(|t| status.can_transition_to(t));
        prop_assert_eq!(status.is_terminal(), !has_any);
    }

    /// Nothing ever moves back to `pending`.
    #[test]
    fn pending_is_never_a_target(from in arb_task_status()) {
        prop_assert!(!from.can_transition_to(&TaskStatus::Pending));
    }

    /// Arbitrary strings never panic the status deserializer.
    #[test]
    fn fuzz_task_status_deserialization(s in "\\PC*") {
        let _ = serde_json::from_value::<TaskStatus>(Value::String(s));
    }
}

// ─── Store-level Invariants ─────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// For arbitrary sequences of requested transitions, the store accepts
    /// exactly those the state machine allows, and the persisted record
    /// never holds both a result and an error.
    #[test]
    fn store_follows_state_machine(
        targets in prop::collection::vec(arb_task_status(), 1..6),
        payload in arb_payload(),
        max_retries in 0u32..5,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryTaskStore::new();
            let record = store.create("prop", payload.clone(), max_retries).await.unwrap();
            let mut expected = TaskStatus::Pending;
            let mut failures = 0u32;

            for target in &targets {
                let outcome = store
                    .update_status(&record.id, *target, Some(json!("r")), Some("e".to_string()))
                    .await;
                if expected.can_transition_to(target) {
                    prop_assert!(outcome.is_ok(), "{expected} -> {target} should be accepted");
                    expected = *target;
                    if *target == TaskStatus::Failed {
                        failures += 1;
                    }
                } else {
                    let rejected = matches!(outcome, Err(TaskError::InvalidTransition { .. }));
                    prop_assert!(rejected, "{expected} -> {target} should be rejected");
                }
            }

            let stored = store.find_by_id(&record.id).await.unwrap().unwrap();
            prop_assert_eq!(stored.status, expected);
            prop_assert_eq!(&stored.payload, &payload);
            prop_assert_eq!(stored.retry_count, failures);
            prop_assert!(!(stored.result.is_some() && stored.error_message.is_some()));
            prop_assert_eq!(stored.result.is_some(), expected == TaskStatus::Completed);
            prop_assert_eq!(stored.error_message.is_some(), expected == TaskStatus::Failed);
            prop_assert!(stored.updated_at >= stored.created_at);

            Ok(())
        })?;
    }

    /// Task IDs are unique across arbitrary batch sizes.
    #[test]
    fn task_ids_always_unique(n in 1usize..40) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryTaskStore::new();
            let mut ids = std::collections::HashSet::new();
            for _ in 0..n {
                let record = store.create("prop", Value::Null, 3).await.unwrap();
                prop_assert!(ids.insert(record.id));
            }
            prop_assert_eq!(store.len(), n);
            Ok(())
        })?;
    }
}

// ─── Backoff ────────────────────────────────────────────────────────────────

proptest! {
    /// Each backoff step doubles the previous one while nothing saturates.
    #[test]
    fn backoff_doubles(base_ms in 0u64..10_000, k in 0u32..50) {
        let policy = RetryPolicy::new(3, Duration::from_millis(base_ms));
        prop_assert_eq!(policy.delay_for(k), Duration::from_millis(base_ms << k));
        prop_assert_eq!(policy.delay_for(k + 1), policy.delay_for(k) * 2);
    }

    /// Zero attempts are treated as one; otherwise the count is kept.
    #[test]
    fn attempts_never_zero(max_retries in any::<u32>()) {
        let policy = RetryPolicy::new(max_retries, Duration::ZERO);
        prop_assert_eq!(policy.attempts(), max_retries.max(1));
    }
}

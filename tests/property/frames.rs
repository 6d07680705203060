#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property tests for the frame classifier.
//!
//! 1. Arbitrary text never panics `classify`.
//! 2. A JSON object whose `type` is not a known frame type is `UnknownType`.
//! 3. Any encoded server frame classifies back to the same content.
//! 4. A known `type` with a broken body is `InvalidFields`, never a delta.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Map, Value, json};
use taskwatch_proto::frame::{self, Classified, KNOWN_TYPES, ServerFrame, Unrecognized, classify};
use taskwatch_proto::task::{Stats, Task, TaskId, TaskStatus, TaskType};

fn arb_time() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..2_000_000_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

fn arb_stats() -> impl Strategy<Value = Stats> {
    (0u64..1000, 0u64..1000, 0u64..1000, 0u64..1000, 0u64..1000, 0u64..5000).prop_map(
        |(pending, processing, completed, failed, retrying, total)| Stats {
            total,
            pending,
            processing,
            completed,
            failed,
            retrying,
        },
    )
}

fn arb_payload() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..4).prop_map(|m| {
        m.into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect()
    })
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        "[a-f0-9]{8}",
        "[ -~]{0,24}",
        prop::sample::select(TaskType::ALL.to_vec()),
        prop::sample::select(TaskStatus::ALL.to_vec()),
        arb_payload(),
        -5i32..15,
        arb_time(),
        proptest::option::of(arb_time()),
        proptest::option::of("[ -~]{0,16}"),
        (0u32..10, 0u8..=100),
    )
        .prop_map(
            |(id, name, task_type, status, payload, priority, created_at, done, error, (retry_count, progress))| Task {
                task_id: TaskId::new(id),
                name,
                task_type,
                status,
                payload,
                priority,
                created_at,
                updated_at: done,
                started_at: None,
                completed_at: done,
                error,
                retry_count,
                progress,
            },
        )
}

fn arb_frame() -> impl Strategy<Value = ServerFrame> {
    prop_oneof![
        (arb_stats(), prop::collection::vec(arb_task(), 0..6))
            .prop_map(|(stats, tasks)| ServerFrame::InitialData { stats, tasks }),
        (arb_stats(), arb_task()).prop_map(|(stats, task)| ServerFrame::TaskUpdate { stats, task }),
        arb_stats().prop_map(|stats| ServerFrame::StatsUpdate { stats }),
    ]
}

proptest! {
    #[test]
    fn classify_never_panics(text in "\\PC*") {
        let _ = classify(&text);
    }

    #[test]
    fn unknown_type_is_rejected(kind in "[a-z_]{1,16}", extra in any::<i64>()) {
        prop_assume!(!KNOWN_TYPES.contains(&kind.as_str()));
        let text = json!({ "type": kind, "stats": extra }).to_string();
        prop_assert_eq!(
            classify(&text),
            Classified::Unrecognized(Unrecognized::UnknownType(kind))
        );
    }

    #[test]
    fn encoded_frames_classify_to_their_content(frame in arb_frame()) {
        let text = frame::encode(&frame).unwrap();
        prop_assert_eq!(classify(&text), Classified::from(frame));
    }

    #[test]
    fn known_type_with_broken_body_is_invalid(
        kind in prop::sample::select(KNOWN_TYPES.to_vec()),
        junk in any::<i64>(),
    ) {
        let text = json!({ "type": kind, "stats": junk, "tasks": junk, "task": junk }).to_string();
        let classified = classify(&text);
        prop_assert!(
            matches!(
                &classified,
                Classified::Unrecognized(Unrecognized::InvalidFields { kind: k, .. }) if k == kind
            ),
            "{:?}",
            classified
        );
    }
}

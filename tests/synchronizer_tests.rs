//! # Resource Synchronizer Integration Tests
//!
//! These tests verify:
//! - Concurrent status writers converge without losing either update
//! - `create_or_patch` suppresses writes that would change nothing
//! - `try_update` aborts when the object disappears
//! - The retry budget turns persistent transient errors into `RetryExhausted`

mod common;

use common::*;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use std::sync::Arc;
use vault_access_controller::crd::{AccessRequest, Condition};
use vault_access_controller::sync::{
    Clock, ManualClock, MemoryStore, ObjectStore, ResourceSynchronizer, VerbType,
};
use vault_access_controller::Error;

fn config_map_sync(store: &Arc<MemoryStore<ConfigMap>>) -> ResourceSynchronizer<ConfigMap> {
    ResourceSynchronizer::new(
        Arc::clone(store) as Arc<dyn ObjectStore<ConfigMap>>,
        fast_retry(),
        Arc::new(ManualClock::new(start_time())) as Arc<dyn Clock>,
    )
}

fn request_sync(store: &Arc<MemoryStore<AccessRequest>>) -> ResourceSynchronizer<AccessRequest> {
    ResourceSynchronizer::new(
        Arc::clone(store) as Arc<dyn ObjectStore<AccessRequest>>,
        fast_retry(),
        Arc::new(ManualClock::new(start_time())) as Arc<dyn Clock>,
    )
}

fn condition(reason: &str) -> Condition {
    Condition {
        r#type: "Observed".to_string(),
        status: "True".to_string(),
        reason: reason.to_string(),
        message: String::new(),
        last_update_time: "2024-01-01T00:00:00Z".to_string(),
    }
}

fn config_map(data: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some("settings".to_string()),
            namespace: Some("demo".to_string()),
            ..ObjectMeta::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        ),
        ..ConfigMap::default()
    }
}

#[tokio::test]
async fn test_concurrent_status_writers_both_land() {
    let store = Arc::new(MemoryStore::new());
    let sync = request_sync(&store);
    let stale = store.create(&pg_request("pg-req", "pg")).await.unwrap();

    // Both writers start from the same resourceVersion; one of them conflicts
    // and has to re-apply its transform to the fresh object.
    let first = sync.update_status(&stale, |mut s| {
        s.conditions.push(condition("First"));
        s
    });
    let second = sync.update_status(&stale, |mut s| {
        s.conditions.push(condition("Second"));
        s
    });
    let (a, b) = tokio::join!(first, second);
    a.unwrap();
    b.unwrap();

    let stored = store.get("pg", "pg-req").await.unwrap();
    let mut reasons: Vec<String> = stored
        .status
        .unwrap()
        .conditions
        .into_iter()
        .map(|c| c.reason)
        .collect();
    reasons.sort();
    assert_eq!(reasons, vec!["First", "Second"]);
}

#[tokio::test]
async fn test_create_or_patch_creates_then_skips_identical_write() {
    let store = Arc::new(MemoryStore::new());
    let sync = config_map_sync(&store);

    let desired = config_map(&[("mode", "strict")]);
    let (_, verb) = sync
        .create_or_patch("demo", "settings", |mut cm| {
            cm.data.clone_from(&desired.data);
            cm
        })
        .await
        .unwrap();
    assert_eq!(verb, VerbType::Created);
    let writes = store.write_count();

    let (_, verb) = sync
        .create_or_patch("demo", "settings", |mut cm| {
            cm.data.clone_from(&desired.data);
            cm
        })
        .await
        .unwrap();
    assert_eq!(verb, VerbType::Unchanged);
    assert_eq!(store.write_count(), writes);
}

#[tokio::test]
async fn test_create_or_patch_sends_only_the_difference() {
    let store = Arc::new(MemoryStore::new());
    let sync = config_map_sync(&store);
    store
        .create(&config_map(&[("mode", "strict"), ("owner", "ops")]))
        .await
        .unwrap();

    let (patched, verb) = sync
        .create_or_patch("demo", "settings", |mut cm| {
            cm.data
                .get_or_insert_with(Default::default)
                .insert("mode".to_string(), "lenient".to_string());
            cm
        })
        .await
        .unwrap();
    assert_eq!(verb, VerbType::Patched);
    let data = patched.data.unwrap();
    assert_eq!(data.get("mode").map(String::as_str), Some("lenient"));
    assert_eq!(data.get("owner").map(String::as_str), Some("ops"));
}

#[tokio::test]
async fn test_try_update_aborts_on_missing_object() {
    let store = Arc::new(MemoryStore::new());
    let sync = request_sync(&store);

    let err = sync
        .try_update("pg", "gone", |mut r: AccessRequest| {
            r.metadata.finalizers = Some(vec!["example.dev/x".to_string()]);
            r
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_try_update_retries_through_conflicts() {
    let store = Arc::new(MemoryStore::new());
    let sync = request_sync(&store);
    store.create(&pg_request("pg-req", "pg")).await.unwrap();
    store.fail_next_writes([
        Error::Conflict("AccessRequest pg/pg-req".to_string()),
        Error::Conflict("AccessRequest pg/pg-req".to_string()),
    ]);

    let updated = sync
        .try_update("pg", "pg-req", |mut r| {
            r.metadata.finalizers = Some(vec!["example.dev/x".to_string()]);
            r
        })
        .await
        .unwrap();
    assert_eq!(
        updated.metadata.finalizers,
        Some(vec!["example.dev/x".to_string()])
    );
}

#[tokio::test]
async fn test_update_status_gives_up_after_timeout() {
    let store = Arc::new(MemoryStore::new());
    let sync = request_sync(&store);
    let stored = store.create(&pg_request("pg-req", "pg")).await.unwrap();
    store.fail_next_writes((0..50).map(|_| Error::Store {
        message: "etcd leader changed".to_string(),
        transient: true,
    }));

    let err = sync
        .update_status(&stored, |mut s| {
            s.conditions.push(condition("Never"));
            s
        })
        .await
        .unwrap_err();
    match err {
        Error::RetryExhausted { attempts, source } => {
            // 100ms budget at a 10ms interval
            assert!((10..=11).contains(&attempts), "attempts = {attempts}");
            assert!(matches!(*source, Error::Store { .. }));
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_update_status_does_not_retry_permanent_errors() {
    let store = Arc::new(MemoryStore::new());
    let sync = request_sync(&store);
    let stored = store.create(&pg_request("pg-req", "pg")).await.unwrap();
    store.fail_next_writes([Error::Store {
        message: "forbidden".to_string(),
        transient: false,
    }]);

    let err = sync
        .update_status(&stored, |mut s| {
            s.conditions.push(condition("Once"));
            s
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Store { transient: false, .. }));
}

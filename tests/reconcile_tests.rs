//! # Reconciliation Integration Tests
//!
//! Drives `reconcile` against in-memory stores, an in-memory credential engine
//! and a manual clock.
//!
//! These tests verify:
//! - A Pending request becomes Available with a Secret, Role, RoleBinding and lease
//! - Issue failures are recorded as conditions and re-driven on backoff
//! - Non-retryable failures wait for a spec change
//! - Expired leases are re-issued
//! - Spec changes while Available re-derive the grant without re-issuing
//! - Deletion revokes the lease before the finalizer is removed

mod common;

use common::*;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use vault_access_controller::constants::LEASE_FINALIZER;
use vault_access_controller::controller::reconciler::conditions::phase;
use vault_access_controller::crd::{Phase, RoleKind, SubjectRef};
use vault_access_controller::runtime::error_policy::handle_reconciliation_error;
use vault_access_controller::sync::ObjectStore;
use vault_access_controller::vault::MemoryEngine;
use vault_access_controller::Error;

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()?
        .get(key)
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
}

fn unavailable() -> Error {
    Error::BackendUnavailable("vault is sealed".to_string())
}

#[tokio::test]
async fn test_pending_request_becomes_available() {
    let h = Harness::new();
    h.create(&pg_request("pg-req", "pg")).await;

    let action = h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));

    let stored = h.get("pg", "pg-req").await;
    assert_eq!(phase(&stored), Phase::Available);
    assert!(stored.finalizers().iter().any(|f| f == LEASE_FINALIZER));

    let status = stored.status.unwrap();
    assert_eq!(status.secret_ref.unwrap().name, "pg-req-cred");
    let lease = status.lease.unwrap();
    assert_eq!(lease.id, "1");
    assert_eq!(lease.duration, 300);
    assert_eq!(lease.issue_time, "2024-01-01T00:00:00Z");
    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(status.conditions.len(), 1);
    assert_eq!(status.conditions[0].reason, "Issued");
    assert_eq!(status.conditions[0].status, "True");

    let secret = h.secrets.get("pg", "pg-req-cred").await.unwrap();
    assert_eq!(secret_value(&secret, "username").as_deref(), Some("v-pg-1"));
    assert!(h.roles.get("pg", "pg-req-role").await.is_ok());
    assert!(h.bindings.get("pg", "pg-req-role-binding").await.is_ok());
}

#[tokio::test]
async fn test_available_request_is_rechecked_without_reissue() {
    let h = Harness::new();
    h.create(&pg_request("pg-req", "pg")).await;
    h.reconcile("pg", "pg-req").await.unwrap();
    let writes = h.requests.write_count();

    h.clock.advance(Duration::from_secs(200));
    let action = h.reconcile("pg", "pg-req").await.unwrap();

    // Requeued for the remaining lifetime of the lease
    assert_eq!(action, Action::requeue(Duration::from_secs(100)));
    assert_eq!(h.engine.issued_count(), 1);
    assert_eq!(h.requests.write_count(), writes);
}

#[tokio::test]
async fn test_issue_failure_is_recorded_and_retried_after_backoff() {
    let h = Harness::new();
    h.engine.fail_next_issue(unavailable());
    h.create(&pg_request("pg-req", "pg")).await;

    let err = h.reconcile("pg", "pg-req").await.unwrap_err();
    assert_eq!(err.reason(), "BackendUnavailable");

    let stored = h.get("pg", "pg-req").await;
    assert_eq!(phase(&stored), Phase::Failed);
    let status = stored.status.clone().unwrap();
    let failure = status.conditions.last().unwrap();
    assert_eq!(failure.reason, "BackendUnavailable");
    assert!(failure.message.contains("vault is sealed"));
    assert!(status.secret_ref.is_none());

    // The runtime hands the error to the error policy
    let action = handle_reconciliation_error(Arc::new(stored), &err, Arc::clone(&h.reconciler));
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));

    // Too early: the reconciler holds back until the backoff window has passed
    h.clock.advance(Duration::from_secs(10));
    let action = h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(20)));
    assert_eq!(h.engine.issued_count(), 0);

    h.clock.advance(Duration::from_secs(20));
    h.reconcile("pg", "pg-req").await.unwrap();
    let stored = h.get("pg", "pg-req").await;
    assert_eq!(phase(&stored), Phase::Available);
    assert_eq!(h.engine.issued_count(), 1);

    // Success clears the backoff
    let key = "pg/pg-req";
    assert!(h.reconciler.next_retry_at(key).is_none());
}

#[tokio::test]
async fn test_failed_request_without_backoff_state_waits_one_backoff_floor() {
    let h = Harness::new();
    h.engine.fail_next_issue(unavailable());
    h.create(&pg_request("pg-req", "pg")).await;
    h.reconcile("pg", "pg-req").await.unwrap_err();

    // As after a controller restart: no in-memory backoff for the request
    let action = h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));

    h.clock.advance(Duration::from_secs(30));
    h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(phase(&h.get("pg", "pg-req").await), Phase::Available);
}

#[tokio::test]
async fn test_repeated_identical_failure_is_not_rewritten() {
    let h = Harness::new();
    h.engine.fail_next_issue(unavailable());
    h.engine.fail_next_issue(unavailable());
    h.create(&pg_request("pg-req", "pg")).await;

    h.reconcile("pg", "pg-req").await.unwrap_err();
    let writes = h.requests.write_count();

    h.clock.advance(Duration::from_secs(30));
    h.reconcile("pg", "pg-req").await.unwrap_err();
    assert_eq!(h.requests.write_count(), writes);
    let status = h.get("pg", "pg-req").await.status.unwrap();
    assert_eq!(status.conditions.len(), 1);
}

#[tokio::test]
async fn test_malformed_response_waits_for_spec_change() {
    let h = Harness::new();
    h.engine
        .fail_next_issue(Error::MalformedResponse("data is not an object".to_string()));
    h.create(&pg_request("pg-req", "pg")).await;

    let action = h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(action, Action::await_change());
    let stored = h.get("pg", "pg-req").await;
    assert_eq!(
        stored.status.unwrap().conditions.last().unwrap().reason,
        "MalformedResponse"
    );

    h.clock.advance(Duration::from_secs(3600));
    let action = h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.engine.issued_count(), 0);

    h.edit_spec("pg", "pg-req", |spec| spec.engine_path = Some("database".to_string()))
        .await;
    h.reconcile("pg", "pg-req").await.unwrap();
    let stored = h.get("pg", "pg-req").await;
    assert_eq!(phase(&stored), Phase::Available);
    assert_eq!(stored.status.unwrap().observed_generation, Some(2));
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_issuing() {
    let h = Harness::new();
    let mut request = pg_request("pg-req", "pg");
    request.spec.subjects.clear();
    h.create(&request).await;

    let action = h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.engine.issued_count(), 0);

    let stored = h.get("pg", "pg-req").await;
    assert_eq!(phase(&stored), Phase::Failed);
    assert!(stored.finalizers().is_empty());
    assert_eq!(
        stored.status.unwrap().conditions.last().unwrap().reason,
        "InvalidRequest"
    );

    h.edit_spec("pg", "pg-req", |spec| {
        spec.subjects.push(SubjectRef {
            kind: "ServiceAccount".to_string(),
            name: "pg-sa".to_string(),
            namespace: None,
            api_group: None,
        });
    })
    .await;
    h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(phase(&h.get("pg", "pg-req").await), Phase::Available);
}

#[tokio::test]
async fn test_expose_failure_revokes_fresh_lease() {
    let h = Harness::new();
    h.secrets.fail_next_writes([Error::Store {
        message: "admission webhook denied the request".to_string(),
        transient: false,
    }]);
    h.create(&pg_request("pg-req", "pg")).await;

    let err = h.reconcile("pg", "pg-req").await.unwrap_err();
    assert_eq!(err.reason(), "StoreError");
    assert_eq!(h.engine.issued_count(), 1);
    assert_eq!(h.engine.revoked_count(), 1);
    assert_eq!(h.engine.active_leases(), 0);

    let status = h.get("pg", "pg-req").await.status.unwrap();
    assert!(status.lease.is_none());
    assert_eq!(status.conditions.last().unwrap().reason, "StoreError");
}

#[tokio::test]
async fn test_expired_lease_is_reissued() {
    let h = Harness::new();
    h.create(&pg_request("pg-req", "pg")).await;
    h.reconcile("pg", "pg-req").await.unwrap();

    h.engine.expire_lease("1");
    h.clock.advance(Duration::from_secs(300));
    let action = h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));

    let status = h.get("pg", "pg-req").await.status.unwrap();
    let lease = status.lease.unwrap();
    assert_eq!(lease.id, "2");
    assert_eq!(lease.issue_time, "2024-01-01T00:05:00Z");
    // The success entry is refreshed rather than duplicated
    assert_eq!(status.conditions.len(), 1);
    assert_eq!(status.conditions[0].last_update_time, "2024-01-01T00:05:00Z");
    assert_eq!(h.engine.issued_count(), 2);
    assert_eq!(h.engine.active_leases(), 1);
}

#[tokio::test]
async fn test_overdue_lease_still_listed_is_not_polled_every_second() {
    let h = Harness::new();
    h.create(&pg_request("pg-req", "pg")).await;
    h.reconcile("pg", "pg-req").await.unwrap();

    // Past issue time + duration, but the backend still reports time left
    h.clock.advance(Duration::from_secs(400));
    let action = h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    assert_eq!(h.engine.issued_count(), 1);

    h.clock.advance(Duration::from_secs(30));
    let action = h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    assert_eq!(phase(&h.get("pg", "pg-req").await), Phase::Available);
}

#[tokio::test]
async fn test_lease_listed_with_zero_ttl_is_reissued() {
    let h = Harness::new();
    h.create(&pg_request("pg-req", "pg")).await;
    h.reconcile("pg", "pg-req").await.unwrap();

    h.engine.set_lease_ttl("1", 0);
    h.clock.advance(Duration::from_secs(400));
    let action = h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));

    let lease = h.get("pg", "pg-req").await.status.unwrap().lease.unwrap();
    assert_eq!(lease.id, "2");
    assert_eq!(lease.issue_time, "2024-01-01T00:06:40Z");
    assert_eq!(h.engine.issued_count(), 2);
    // The overdue lease is revoked once replaced
    assert!(!h.engine.has_lease("1"));
}

#[tokio::test]
async fn test_lookup_error_keeps_request_available() {
    let h = Harness::new();
    h.create(&pg_request("pg-req", "pg")).await;
    h.reconcile("pg", "pg-req").await.unwrap();

    h.engine.fail_next_lookup(unavailable());
    let err = h.reconcile("pg", "pg-req").await.unwrap_err();
    assert_eq!(err.reason(), "BackendUnavailable");

    let stored = h.get("pg", "pg-req").await;
    assert_eq!(phase(&stored), Phase::Available);
    assert_eq!(stored.status.unwrap().lease.unwrap().id, "1");
    assert_eq!(h.engine.issued_count(), 1);
}

#[tokio::test]
async fn test_spec_change_while_available_rederives_grant() {
    let h = Harness::new();
    h.create(&pg_request("pg-req", "pg")).await;
    h.reconcile("pg", "pg-req").await.unwrap();

    h.edit_spec("pg", "pg-req", |spec| {
        spec.subjects.push(SubjectRef {
            kind: "User".to_string(),
            name: "alice@example.com".to_string(),
            namespace: None,
            api_group: None,
        });
    })
    .await;
    h.reconcile("pg", "pg-req").await.unwrap();

    assert_eq!(h.engine.issued_count(), 1);
    let binding = h.bindings.get("pg", "pg-req-role-binding").await.unwrap();
    assert_eq!(binding.subjects.unwrap().len(), 2);
    let status = h.get("pg", "pg-req").await.status.unwrap();
    assert_eq!(status.observed_generation, Some(2));
    assert_eq!(status.lease.unwrap().id, "1");
}

#[tokio::test]
async fn test_unleased_credential_is_available_without_expiry() {
    let engine = MemoryEngine::new().without_leases();
    engine.add_role("gcp/token/k8s.-.pg.viewer", [("token", "ya29.token")]);
    let h = Harness::with_engine(engine);
    let mut request = pg_request("gcp-req", "pg");
    request.spec.role_ref.kind = RoleKind::Gcp;
    request.spec.role_ref.name = "viewer".to_string();
    h.create(&request).await;

    let action = h.reconcile("pg", "gcp-req").await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(300)));

    let stored = h.get("pg", "gcp-req").await;
    assert_eq!(phase(&stored), Phase::Available);
    assert!(stored.status.unwrap().lease.is_none());
    let secret = h.secrets.get("pg", "gcp-req-cred").await.unwrap();
    assert_eq!(secret_value(&secret, "token").as_deref(), Some("ya29.token"));
}

#[tokio::test]
async fn test_deletion_revokes_lease_and_releases_request() {
    let h = Harness::new();
    h.create(&pg_request("pg-req", "pg")).await;
    h.reconcile("pg", "pg-req").await.unwrap();

    h.requests.delete("pg", "pg-req").unwrap();
    assert_eq!(phase(&h.get("pg", "pg-req").await), Phase::Deleting);

    let action = h.reconcile("pg", "pg-req").await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(h.engine.revoked_count(), 1);
    assert!(!h.engine.has_lease("1"));
    assert!(h.requests.get("pg", "pg-req").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_deletion_keeps_finalizer_until_revocation_succeeds() {
    let h = Harness::new();
    h.create(&pg_request("pg-req", "pg")).await;
    h.reconcile("pg", "pg-req").await.unwrap();
    h.requests.delete("pg", "pg-req").unwrap();

    h.engine.fail_next_revoke(unavailable());
    let err = h.reconcile("pg", "pg-req").await.unwrap_err();
    assert_eq!(err.reason(), "BackendUnavailable");
    let stored = h.get("pg", "pg-req").await;
    assert!(stored.finalizers().iter().any(|f| f == LEASE_FINALIZER));
    assert!(h.engine.has_lease("1"));

    h.reconcile("pg", "pg-req").await.unwrap();
    assert!(h.requests.get("pg", "pg-req").await.unwrap_err().is_not_found());
    assert_eq!(h.engine.revoked_count(), 1);
}

//! # Conditions
//!
//! Condition history and phase derivation.
//!
//! The history is append-mostly: a repeat of the latest (type, reason) pair
//! refreshes that entry instead of growing the list, and `lastUpdateTime` never
//! goes backwards. The history is capped at [`MAX_CONDITIONS`] entries, but the
//! latest success entry is never dropped.

use crate::constants::{CONDITION_AVAILABLE, MAX_CONDITIONS, REASON_ISSUED};
use crate::crd::{AccessRequest, Condition, Phase};
use crate::error::Error;
use chrono::{DateTime, SecondsFormat, Utc};

const STATUS_TRUE: &str = "True";
const STATUS_FALSE: &str = "False";

/// Reasons whose failures are left alone until the spec changes
const NON_RETRYABLE_REASONS: &[&str] = &[
    "MalformedResponse",
    "InvalidRequest",
    "AuthenticationFailed",
    "SerializationError",
];

#[must_use]
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `{Available, True, Issued}`
#[must_use]
pub fn success_condition(now: DateTime<Utc>) -> Condition {
    Condition {
        r#type: CONDITION_AVAILABLE.to_string(),
        status: STATUS_TRUE.to_string(),
        reason: REASON_ISSUED.to_string(),
        message: "credential issued and exposed".to_string(),
        last_update_time: timestamp(now),
    }
}

/// `{Available, False, <error kind>, <detail>}`
#[must_use]
pub fn failure_condition(err: &Error, now: DateTime<Utc>) -> Condition {
    Condition {
        r#type: CONDITION_AVAILABLE.to_string(),
        status: STATUS_FALSE.to_string(),
        reason: err.reason().to_string(),
        message: err.to_string(),
        last_update_time: timestamp(now),
    }
}

#[must_use]
pub fn is_success(condition: &Condition) -> bool {
    condition.r#type == CONDITION_AVAILABLE && condition.status == STATUS_TRUE
}

#[must_use]
pub fn is_retryable_reason(reason: &str) -> bool {
    !NON_RETRYABLE_REASONS.contains(&reason)
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Add `condition` to the history
pub fn record(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(last) = conditions.last() {
        if let (Some(prev), Some(next)) = (
            parse_time(&last.last_update_time),
            parse_time(&condition.last_update_time),
        ) {
            if next < prev {
                condition.last_update_time.clone_from(&last.last_update_time);
            }
        }
    }

    match conditions.last_mut() {
        Some(last) if last.r#type == condition.r#type && last.reason == condition.reason => {
            *last = condition;
        }
        _ => conditions.push(condition),
    }

    while conditions.len() > MAX_CONDITIONS {
        let keep = conditions.iter().rposition(is_success);
        let drop_at = if keep == Some(0) { 1 } else { 0 };
        conditions.remove(drop_at);
    }
}

/// Latest entry of the `Available` condition type
#[must_use]
pub fn latest_available(conditions: &[Condition]) -> Option<&Condition> {
    conditions
        .iter()
        .rev()
        .find(|c| c.r#type == CONDITION_AVAILABLE)
}

/// Whether writing `condition` would leave the history as it is apart from the timestamp
#[must_use]
pub fn repeats_latest(conditions: &[Condition], condition: &Condition) -> bool {
    conditions.last().is_some_and(|last| {
        last.r#type == condition.r#type
            && last.status == condition.status
            && last.reason == condition.reason
            && last.message == condition.message
    })
}

/// Lifecycle phase of a request
#[must_use]
pub fn phase(request: &AccessRequest) -> Phase {
    if request.is_deleting() {
        return Phase::Deleting;
    }
    let Some(status) = request.status.as_ref() else {
        return Phase::Pending;
    };
    match latest_available(&status.conditions) {
        Some(c) if is_success(c) && status.secret_ref.is_some() => Phase::Available,
        Some(c) if c.status == STATUS_FALSE => Phase::Failed,
        _ => Phase::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AccessRequestSpec, AccessRequestStatus, RoleKind, RoleRef, SecretReference};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn failure(reason: &str, secs: i64) -> Condition {
        Condition {
            r#type: CONDITION_AVAILABLE.to_string(),
            status: STATUS_FALSE.to_string(),
            reason: reason.to_string(),
            message: format!("{reason} happened"),
            last_update_time: timestamp(at(secs)),
        }
    }

    #[test]
    fn test_repeated_reason_refreshes_last_entry() {
        let mut conditions = Vec::new();
        record(&mut conditions, failure("BackendUnavailable", 0));
        record(&mut conditions, failure("BackendUnavailable", 10));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_update_time, timestamp(at(10)));

        record(&mut conditions, success_condition(at(20)));
        assert_eq!(conditions.len(), 2);
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let mut conditions = Vec::new();
        record(&mut conditions, failure("BackendUnavailable", 100));
        record(&mut conditions, success_condition(at(50)));
        assert_eq!(conditions[1].last_update_time, timestamp(at(100)));
    }

    #[test]
    fn test_history_is_capped_but_keeps_latest_success() {
        let mut conditions = Vec::new();
        record(&mut conditions, success_condition(at(0)));
        for i in 0..40 {
            let reason = if i % 2 == 0 { "BackendUnavailable" } else { "StoreError" };
            record(&mut conditions, failure(reason, i + 1));
        }
        assert_eq!(conditions.len(), MAX_CONDITIONS);
        assert!(is_success(&conditions[0]));
        assert_eq!(conditions.last().unwrap().last_update_time, timestamp(at(40)));
    }

    #[test]
    fn test_retryable_reasons() {
        assert!(is_retryable_reason("BackendUnavailable"));
        assert!(is_retryable_reason("RetryExhausted"));
        assert!(!is_retryable_reason("MalformedResponse"));
        assert!(!is_retryable_reason("InvalidRequest"));
    }

    #[test]
    fn test_phase_derivation() {
        let mut req = AccessRequest::new(
            "pg-req",
            AccessRequestSpec {
                role_ref: RoleRef {
                    kind: RoleKind::Postgres,
                    name: "readonly".to_string(),
                    namespace: None,
                },
                subjects: vec![],
                engine_path: None,
                key_algorithm: None,
                key_type: None,
                secret_type: None,
                credential_type: None,
                ttl: None,
            },
        );
        assert_eq!(phase(&req), Phase::Pending);

        let mut status = AccessRequestStatus::default();
        record(&mut status.conditions, failure("BackendUnavailable", 0));
        req.status = Some(status.clone());
        assert_eq!(phase(&req), Phase::Failed);

        record(&mut status.conditions, success_condition(at(1)));
        status.secret_ref = Some(SecretReference {
            name: "pg-req-cred".to_string(),
        });
        req.status = Some(status);
        assert_eq!(phase(&req), Phase::Available);

        req.metadata.deletion_timestamp =
            serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap();
        assert_eq!(phase(&req), Phase::Deleting);
    }

    #[test]
    fn test_failure_condition_carries_error_kind() {
        let c = failure_condition(&Error::BackendUnavailable("connection refused".into()), at(0));
        assert_eq!(c.reason, "BackendUnavailable");
        assert_eq!(c.status, "False");
        assert!(c.message.contains("connection refused"));
    }
}

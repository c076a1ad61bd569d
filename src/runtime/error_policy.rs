//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::AccessRequest;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource so one failing request does not slow
/// down the others. The computed retry instant is what the reconciler checks
/// before re-driving a Failed request.
pub fn handle_reconciliation_error(
    obj: Arc<AccessRequest>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = %name,
        resource.namespace = %namespace,
        reason = error.reason()
    );
    let _error_guard = error_span.enter();

    error!(error = %error, "reconciliation error");
    metrics::increment_reconciliation_errors();

    let key = Reconciler::resource_key(&namespace, &name);
    let (delay, error_count) = ctx.record_failure(&key);
    let next_trigger_time = ctx.clock.now() + crate::sync::clock::to_chrono(delay);

    info!(
        backoff_secs = delay.as_secs(),
        error_count,
        next_retry = %next_trigger_time.to_rfc3339(),
        "retrying with Fibonacci backoff"
    );

    metrics::increment_requeues_total("error-backoff");
    Action::requeue(delay)
}

/// Watch stream error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 410: resource version too old
    Expired,
    /// 429: API server storage reinitializing
    TooManyRequests,
    /// 404: CRD missing or object deleted
    NotFound,
    Other,
}

/// Classify a watch error by its debug rendering
///
/// 404 is checked before 401 because a plain-text 404 body surfaces as a
/// decoding error that also mentions `WatchFailed`.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
        return WatchErrorKind::Unauthorized;
    }
    if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        return WatchErrorKind::Expired;
    }
    if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        return WatchErrorKind::TooManyRequests;
    }
    if is_not_found {
        return WatchErrorKind::NotFound;
    }
    WatchErrorKind::Other
}

/// Handle watch stream errors with appropriate classification and backoff
///
/// Returns `None` to filter out the error (allow restart) or `Some(())` to continue.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
    watch_restart_delay_secs: u64,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized => {
            error!("Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
            error!("Verify the controller ClusterRole, ClusterRoleBinding and ServiceAccount still exist");
            warn!(
                "Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                watch_restart_delay_secs
            );
            tokio::time::sleep(Duration::from_secs(watch_restart_delay_secs)).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "watch resource version expired, watch will restart");
            None
        }
        WatchErrorKind::TooManyRequests => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            let new_backoff = std::cmp::min(current_backoff.saturating_mul(2), max_backoff_ms);
            backoff.store(new_backoff, Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            warn!(
                "Resource not found (404) - normal if the AccessRequest was deleted; check the CRD is installed. Error: {}",
                error_string
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(Duration::from_secs(watch_restart_delay_secs)).await;
            None
        }
    }
}

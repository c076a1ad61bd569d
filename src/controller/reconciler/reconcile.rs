//! # Reconciliation Logic
//!
//! Main reconciliation entry point for `AccessRequest` resources.
//!
//! ```text
//! Pending ──issue+expose──> Available ──lease gone──> Pending (re-issue)
//!    │                          │
//!    └──error──> Failed <───────┘ (grant failure)
//!                  │
//!                  └── re-driven on spec change or once the backoff window
//!                      has passed for a retryable error
//! any ──deletionTimestamp──> Deleting ──revoke──> finalizer removed
//! ```
//!
//! Errors are turned into conditions here and nowhere else. Retryable failures
//! are also returned to the runtime so the error policy can schedule a retry.

use super::conditions::{self, failure_condition, success_condition};
use super::finalize::{ensure_finalizer, finalize};
use super::types::{Reconciler, ReconcilerError};
use super::validation::validate_access_request;
use crate::crd::{AccessRequest, LeaseStatus, Phase, SecretReference};
use crate::error::Error;
use crate::observability::metrics;
use crate::sync::clock::to_chrono;
use crate::vault::{IssueRequest, Lease, LeaseTracker};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// Reconcile one `AccessRequest`
pub async fn reconcile(
    request: Arc<AccessRequest>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let span = tracing::info_span!(
        "reconcile",
        resource.name = %request.name_any(),
        resource.namespace = %request.namespace_or_default(),
        resource.kind = "AccessRequest"
    );
    metrics::increment_reconciliations();

    let result = reconcile_phase(&request, &ctx).instrument(span).await;

    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    result
}

async fn reconcile_phase(
    request: &AccessRequest,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    let phase = conditions::phase(request);
    debug!(
        phase = %phase,
        generation = ?request.metadata.generation,
        "reconciling"
    );

    if phase != Phase::Deleting {
        if let Err(err) = validate_access_request(request) {
            warn!(error = %err, "request failed validation");
            return record_failure(request, ctx, err).await;
        }
    }

    match phase {
        Phase::Deleting => finalize(request, ctx).await,
        Phase::Pending => issue_and_expose(request, ctx).await,
        Phase::Failed => match redrive(request, ctx) {
            Redrive::Now => issue_and_expose(request, ctx).await,
            Redrive::After(delay) => {
                debug!(delay_secs = delay.as_secs(), "failed request waiting for backoff");
                metrics::increment_requeues_total("error-backoff");
                Ok(Action::requeue(delay))
            }
            Redrive::Never => Ok(Action::await_change()),
        },
        Phase::Available => recheck(request, ctx).await,
    }
}

/// What to do with a request in the Failed phase
#[derive(Debug, PartialEq, Eq)]
enum Redrive {
    Now,
    After(Duration),
    Never,
}

fn redrive(request: &AccessRequest, ctx: &Reconciler) -> Redrive {
    let Some(status) = request.status.as_ref() else {
        return Redrive::Now;
    };
    if request.metadata.generation != status.observed_generation {
        info!("spec changed since the last failure, re-driving");
        return Redrive::Now;
    }
    let Some(failure) = conditions::latest_available(&status.conditions) else {
        return Redrive::Now;
    };
    if !conditions::is_retryable_reason(&failure.reason) {
        debug!(reason = %failure.reason, "failure is not retryable, waiting for a spec change");
        return Redrive::Never;
    }

    let key = Reconciler::resource_key(&request.namespace_or_default(), &request.name_any());
    // Without in-memory backoff (e.g. after a restart) wait one backoff floor
    // from the recorded failure
    let due = ctx.next_retry_at(&key).or_else(|| {
        DateTime::parse_from_rfc3339(&failure.last_update_time)
            .ok()
            .map(|t| {
                t.with_timezone(&Utc)
                    + to_chrono(Duration::from_secs(ctx.config.backoff_min_secs))
            })
    });
    let now = ctx.clock.now();
    match due {
        Some(at) if at > now => Redrive::After((at - now).to_std().unwrap_or(Duration::ZERO)),
        _ => Redrive::Now,
    }
}

/// Result of a successful issue followed by a successful expose
struct Provisioned {
    tracker: LeaseTracker,
    secret_ref: SecretReference,
    lease: Option<Lease>,
}

/// Issue a credential and expose it
///
/// A lease whose credential could not be exposed is revoked again.
async fn provision(request: &AccessRequest, ctx: &Reconciler) -> Result<Provisioned, Error> {
    let tracker = ctx.lease_tracker().await?;
    let issue = IssueRequest::for_request(request, ctx.config.cluster_name.as_deref());
    let (credential, lease) = tracker.issue(&issue).await?;

    match ctx.provisioner.expose(request, &credential).await {
        Ok(exposure) => Ok(Provisioned {
            tracker,
            secret_ref: exposure.secret_ref,
            lease,
        }),
        Err(err) => {
            if let Some(lease) = &lease {
                revoke_quietly(&tracker, &lease.id).await;
            }
            Err(err)
        }
    }
}

async fn issue_and_expose(
    request: &AccessRequest,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    let request = match ensure_finalizer(request, ctx).await {
        Ok(updated) => updated,
        Err(e) if e.is_not_found() => return Ok(Action::await_change()),
        Err(e) => return record_failure(request, ctx, e).await,
    };
    let previous_lease = request.status.as_ref().and_then(|s| s.lease.clone());

    let provisioned = match provision(&request, ctx).await {
        Ok(p) => p,
        Err(e) => return record_failure(&request, ctx, e).await,
    };

    let now = ctx.clock.now();
    let generation = request.metadata.generation;
    let lease_status = provisioned.lease.as_ref().map(Lease::to_status);
    let success = success_condition(now);
    let written = ctx
        .requests
        .update_status(&request, |mut status| {
            status.secret_ref = Some(provisioned.secret_ref.clone());
            status.lease.clone_from(&lease_status);
            status.observed_generation = generation;
            conditions::record(&mut status.conditions, success.clone());
            status
        })
        .await;

    if let Err(e) = written {
        // An unrecorded lease would never be revoked
        if let Some(lease) = &provisioned.lease {
            revoke_quietly(&provisioned.tracker, &lease.id).await;
        }
        if e.is_not_found() {
            return Ok(Action::await_change());
        }
        return record_failure(&request, ctx, e).await;
    }

    ctx.reset_backoff(&Reconciler::resource_key(
        &request.namespace_or_default(),
        &request.name_any(),
    ));
    if let Some(previous) = previous_lease {
        if lease_status.as_ref().is_none_or(|l| l.id != previous.id) {
            revoke_quietly(&provisioned.tracker, &previous.id).await;
        }
    }

    info!(
        secret = %provisioned.secret_ref.name,
        lease.id = lease_status.as_ref().map_or("", |l| l.id.as_str()),
        "credential available"
    );
    metrics::increment_requeues_total("lease-recheck");
    Ok(Action::requeue(requeue_after(lease_status.as_ref(), now, ctx)))
}

/// Periodic check of an Available request
async fn recheck(request: &AccessRequest, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let status = request.status.clone().unwrap_or_default();

    if let Some(lease) = &status.lease {
        let tracker = ctx.lease_tracker().await?;
        if tracker.check_expiry(&lease.id).await? {
            info!(lease.id = %lease.id, "lease expired, re-issuing");
            return issue_and_expose(request, ctx).await;
        }
    }

    if request.metadata.generation != status.observed_generation {
        let secret_name = request.secret_name();
        if let Err(e) = ctx.provisioner.ensure_grant(request, &secret_name).await {
            return record_failure(request, ctx, e).await;
        }
        let generation = request.metadata.generation;
        match ctx
            .requests
            .update_status(request, |mut s| {
                s.observed_generation = generation;
                s
            })
            .await
        {
            Ok(_) => info!(generation = ?generation, "access grant re-derived"),
            Err(e) if e.is_not_found() => return Ok(Action::await_change()),
            Err(e) => return Err(e.into()),
        }
    }

    metrics::increment_requeues_total("lease-recheck");
    Ok(Action::requeue(requeue_after(
        status.lease.as_ref(),
        ctx.clock.now(),
        ctx,
    )))
}

/// Recheck interval, or the time left on the lease when that is sooner
///
/// A lease past its expiry that the backend still lists is looked up again
/// after the minimum backoff.
fn requeue_after(lease: Option<&LeaseStatus>, now: DateTime<Utc>, ctx: &Reconciler) -> Duration {
    let recheck = ctx.config.lease_recheck_interval();
    let Some(expiry) = lease.and_then(LeaseStatus::expiry_time) else {
        return recheck;
    };
    match (expiry - now).to_std() {
        Ok(remaining) if !remaining.is_zero() => recheck.min(remaining).max(Duration::from_secs(1)),
        _ => recheck.min(Duration::from_secs(ctx.config.backoff_min_secs.max(1))),
    }
}

/// Revoke without failing the caller
pub(super) async fn revoke_quietly(tracker: &LeaseTracker, lease_id: &str) {
    if let Err(e) = tracker.revoke(lease_id).await {
        warn!(lease.id = lease_id, error = %e, "best-effort lease revocation failed");
    }
}

/// Write a failure condition
///
/// A repeat of the latest failure for the same generation is not written again.
pub(super) async fn write_failure(
    request: &AccessRequest,
    ctx: &Reconciler,
    err: &Error,
) -> Result<(), Error> {
    let condition = failure_condition(err, ctx.clock.now());
    let generation = request.metadata.generation;
    let repeated = request.status.as_ref().is_some_and(|s| {
        s.observed_generation == generation && conditions::repeats_latest(&s.conditions, &condition)
    });
    if repeated {
        return Ok(());
    }

    ctx.requests
        .update_status(request, |mut status| {
            conditions::record(&mut status.conditions, condition.clone());
            status.observed_generation = generation;
            status
        })
        .await?;
    Ok(())
}

/// Record `err` on the request and decide whether the runtime should retry
pub(super) async fn record_failure(
    request: &AccessRequest,
    ctx: &Reconciler,
    err: Error,
) -> Result<Action, ReconcilerError> {
    warn!(reason = err.reason(), error = %err, "reconciliation failed");
    match write_failure(request, ctx, &err).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return Ok(Action::await_change()),
        Err(e) => return Err(e.into()),
    }
    if err.is_retryable() {
        Err(err.into())
    } else {
        Ok(Action::await_change())
    }
}

//! # Finalization
//!
//! The lease-revocation finalizer keeps an `AccessRequest` around until its
//! backend lease is revoked.

use super::reconcile::write_failure;
use super::types::{Reconciler, ReconcilerError};
use crate::constants::LEASE_FINALIZER;
use crate::crd::AccessRequest;
use crate::error::{Error, Result};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

#[must_use]
pub fn has_finalizer(request: &AccessRequest) -> bool {
    request.finalizers().iter().any(|f| f == LEASE_FINALIZER)
}

/// Add the finalizer; returns the latest stored object
pub async fn ensure_finalizer(request: &AccessRequest, ctx: &Reconciler) -> Result<AccessRequest> {
    if has_finalizer(request) {
        return Ok(request.clone());
    }
    let updated = ctx
        .requests
        .try_update(&request.namespace_or_default(), &request.name_any(), |mut current| {
            if !has_finalizer(&current) {
                current.finalizers_mut().push(LEASE_FINALIZER.to_string());
            }
            current
        })
        .await?;
    debug!(finalizer = LEASE_FINALIZER, "finalizer added");
    Ok(updated)
}

/// Revoke the lease, then let the object go
pub async fn finalize(request: &AccessRequest, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let namespace = request.namespace_or_default();
    let name = request.name_any();
    let key = Reconciler::resource_key(&namespace, &name);

    if !has_finalizer(request) {
        ctx.forget(&key);
        return Ok(Action::await_change());
    }

    if let Some(lease) = request.status.as_ref().and_then(|s| s.lease.as_ref()) {
        let revoked = match ctx.lease_tracker().await {
            Ok(tracker) => tracker.revoke(&lease.id).await,
            Err(e) => Err(e),
        };
        if let Err(err) = revoked {
            warn!(lease.id = %lease.id, error = %err, "lease revocation failed, keeping finalizer");
            match write_failure(request, ctx, &err).await {
                Err(e) if e.is_not_found() => return Ok(Action::await_change()),
                Err(e) => warn!(error = %e, "failed to record revocation failure"),
                Ok(()) => {}
            }
            // Deletion must finish eventually, so every error is retried
            return Err(err.into());
        }
    }

    match ctx
        .requests
        .try_update(&namespace, &name, |mut current| {
            current.finalizers_mut().retain(|f| f != LEASE_FINALIZER);
            current
        })
        .await
    {
        Ok(_) | Err(Error::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    ctx.forget(&key);
    info!("lease revoked, finalizer removed");
    Ok(Action::await_change())
}

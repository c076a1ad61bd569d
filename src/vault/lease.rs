//! # Lease Tracker
//!
//! Issues credentials and follows their leases through
//! `Unissued -> Active -> {Revoked | Expired}`.
//!
//! The tracker keeps no state of its own; the lease record lives in the
//! AccessRequest status. It only borrows a backend session, which may be shared
//! by concurrent calls.

use super::engine::{Credential, CredentialEngine, IssueRequest, LeaseLookup, RevokeOutcome};
use crate::crd::LeaseStatus;
use crate::error::Result;
use crate::observability::metrics;
use crate::sync::Clock;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Backend validity window for one issued credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: String,
    /// Seconds, as assigned by the backend
    pub duration: u64,
    /// Controller-observed issue time
    pub issue_time: DateTime<Utc>,
}

impl Lease {
    /// Status representation
    #[must_use]
    pub fn to_status(&self) -> LeaseStatus {
        LeaseStatus {
            id: self.id.clone(),
            duration: i64::try_from(self.duration).unwrap_or(i64::MAX),
            issue_time: self.issue_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Issues, checks and revokes leases over one backend session
#[derive(Debug, Clone)]
pub struct LeaseTracker {
    engine: Arc<dyn CredentialEngine>,
    clock: Arc<dyn Clock>,
}

impl LeaseTracker {
    #[must_use]
    pub fn new(engine: Arc<dyn CredentialEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }

    /// Mint a credential
    ///
    /// The lease is `None` for credentials the backend does not lease.
    pub async fn issue(&self, request: &IssueRequest) -> Result<(Credential, Option<Lease>)> {
        let issued = self
            .engine
            .issue_credential(request)
            .await
            .inspect_err(metrics::record_backend_error)?;
        metrics::increment_leases_issued();
        let lease = if issued.lease_id.is_empty() {
            debug!(role = %request.role, "credential issued without a lease");
            None
        } else {
            info!(
                role = %request.role,
                lease.id = %issued.lease_id,
                lease.duration = issued.lease_duration,
                "credential issued"
            );
            Some(Lease {
                id: issued.lease_id,
                duration: issued.lease_duration,
                issue_time: self.clock.now(),
            })
        };
        Ok((issued.credential, lease))
    }

    /// Whether the lease is expired
    ///
    /// A lease the backend does not know, or still lists with no TTL left, is
    /// expired, not an error. Transport and decoding errors are returned as-is.
    pub async fn check_expiry(&self, lease_id: &str) -> Result<bool> {
        let lookup = self
            .engine
            .lookup_lease(lease_id)
            .await
            .inspect_err(metrics::record_backend_error)?;
        match lookup {
            LeaseLookup::Present { ttl: Some(0) } => {
                info!(lease.id = lease_id, "lease past its TTL, awaiting backend cleanup");
                metrics::increment_leases_expired();
                Ok(true)
            }
            LeaseLookup::Present { ttl } => {
                debug!(lease.id = lease_id, ttl = ?ttl, "lease still valid");
                Ok(false)
            }
            LeaseLookup::Absent => {
                info!(lease.id = lease_id, "lease expired");
                metrics::increment_leases_expired();
                Ok(true)
            }
        }
    }

    /// Revoke the lease; an already-absent lease counts as revoked
    pub async fn revoke(&self, lease_id: &str) -> Result<()> {
        let outcome = self
            .engine
            .revoke_lease(lease_id)
            .await
            .inspect_err(metrics::record_backend_error)?;
        match outcome {
            RevokeOutcome::Revoked => info!(lease.id = lease_id, "lease revoked"),
            RevokeOutcome::NotFound => info!(lease.id = lease_id, "lease already gone"),
        }
        metrics::increment_leases_revoked();
        Ok(())
    }
}

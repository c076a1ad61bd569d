//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::provisioner::AccessProvisioner;
use crate::crd::AccessRequest;
use crate::error::Error;
use crate::observability::metrics;
use crate::sync::{Clock, KubeStore, ObjectStore, ResourceSynchronizer};
use crate::vault::{BackendConnector, LeaseTracker, VaultConnector};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] Error),
}

impl ReconcilerError {
    /// Condition reason of the wrapped error
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcilerError::ReconciliationFailed(e) => e.reason(),
        }
    }
}

/// Backoff state for a specific resource
///
/// Tracks error count and the backoff calculator for progressive retries.
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
    /// Earliest instant a failed request may be re-driven
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
            next_retry_at: None,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.next_retry_at = None;
        self.backoff.reset();
    }
}

/// Shared reconciliation context
#[derive(Clone)]
pub struct Reconciler {
    pub requests: ResourceSynchronizer<AccessRequest>,
    pub provisioner: AccessProvisioner,
    pub backend: Arc<dyn BackendConnector>,
    pub config: ControllerConfig,
    pub clock: Arc<dyn Clock>,
    // Backoff state per resource (identified by namespace/name)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        requests: ResourceSynchronizer<AccessRequest>,
        provisioner: AccessProvisioner,
        backend: Arc<dyn BackendConnector>,
        config: ControllerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            requests,
            provisioner,
            backend,
            config,
            clock,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wire every collaborator against the API server and Vault
    pub fn from_client(
        client: kube::Client,
        config: ControllerConfig,
        clock: Arc<dyn Clock>,
    ) -> crate::error::Result<Self> {
        let retry = config.retry_config();
        let secret_store: Arc<dyn ObjectStore<Secret>> = Arc::new(KubeStore::new(client.clone()));
        let provisioner = AccessProvisioner::new(
            ResourceSynchronizer::new(Arc::clone(&secret_store), retry, Arc::clone(&clock)),
            ResourceSynchronizer::new(
                Arc::new(KubeStore::new(client.clone())),
                retry,
                Arc::clone(&clock),
            ),
            ResourceSynchronizer::new(
                Arc::new(KubeStore::new(client.clone())),
                retry,
                Arc::clone(&clock),
            ),
        );
        let requests =
            ResourceSynchronizer::new(Arc::new(KubeStore::new(client)), retry, Arc::clone(&clock));
        let backend = Arc::new(VaultConnector::new(config.vault.clone(), secret_store)?);
        Ok(Self::new(requests, provisioner, backend, config, clock))
    }

    /// Key under which per-resource state is tracked
    #[must_use]
    pub fn resource_key(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    /// Open a backend session for one reconciliation
    pub async fn lease_tracker(&self) -> crate::error::Result<LeaseTracker> {
        let engine = self
            .backend
            .connect()
            .await
            .inspect_err(metrics::record_backend_error)?;
        Ok(LeaseTracker::new(engine, Arc::clone(&self.clock)))
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, BackoffState>> {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the resource's backoff and return the delay until the next retry
    pub fn record_failure(&self, key: &str) -> (Duration, u32) {
        let now = self.clock.now();
        let mut states = self.states();
        let state = states.entry(key.to_string()).or_insert_with(|| {
            BackoffState::new(self.config.backoff_min_secs, self.config.backoff_max_secs)
        });
        state.increment_error();
        let delay = state.backoff.next_backoff();
        state.next_retry_at = Some(now + crate::sync::clock::to_chrono(delay));
        (delay, state.error_count)
    }

    /// Recorded retry instant, if the resource has failed since the last success
    #[must_use]
    pub fn next_retry_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.states().get(key).and_then(|s| s.next_retry_at)
    }

    pub fn reset_backoff(&self, key: &str) {
        if let Some(state) = self.states().get_mut(key) {
            state.reset();
        }
    }

    /// Drop all state for a resource that is gone
    pub fn forget(&self, key: &str) {
        self.states().remove(key);
    }
}

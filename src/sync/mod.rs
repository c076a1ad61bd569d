//! # Resource Synchronization
//!
//! Conflict-safe writes against the versioned object store.
//!
//! [`ResourceSynchronizer`] is the one place that absorbs optimistic-concurrency
//! contention. Callers describe the desired object as a transform of the current
//! one and the synchronizer takes care of fetching, diffing, retrying and
//! re-fetching after conflicts.
//!
//! ## Operations
//!
//! - [`ResourceSynchronizer::create_or_patch`] - create from scratch or send a
//!   minimal merge patch (no-op writes are suppressed)
//! - [`ResourceSynchronizer::try_update`] - fetch/transform/replace loop with
//!   bounded polling; NotFound aborts
//! - [`ResourceSynchronizer::update_status`] - status-only read-modify-write loop
//!   that re-fetches on conflict

pub mod clock;
pub mod memory;
pub mod merge_patch;
pub mod store;

pub use clock::{Clock, ManualClock, TokioClock};
pub use memory::MemoryStore;
pub use store::{KubeStore, ObjectStore, StoreObject};

use crate::constants::{DEFAULT_SYNC_RETRY_INTERVAL_MS, DEFAULT_SYNC_RETRY_TIMEOUT_MS};
use crate::error::{Error, Result};
use crate::observability::metrics;
use kube::ResourceExt;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded polling parameters for every retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay between attempts
    pub interval: Duration,
    /// Overall deadline measured from the first attempt
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_SYNC_RETRY_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_SYNC_RETRY_TIMEOUT_MS),
        }
    }
}

/// Outcome of [`ResourceSynchronizer::create_or_patch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbType {
    Created,
    Patched,
    Unchanged,
}

impl VerbType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            VerbType::Created => "created",
            VerbType::Patched => "patched",
            VerbType::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for VerbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object kinds with a status sub-object
pub trait HasStatus {
    type Status: Clone + Default + PartialEq + Serialize + Send + Sync;

    fn status(&self) -> Option<&Self::Status>;
    fn status_mut(&mut self) -> &mut Option<Self::Status>;
}

/// Generic create-or-patch-or-update primitive for one resource kind
pub struct ResourceSynchronizer<K: StoreObject> {
    store: Arc<dyn ObjectStore<K>>,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
}

impl<K: StoreObject> Clone for ResourceSynchronizer<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<K: StoreObject> fmt::Debug for ResourceSynchronizer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSynchronizer")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<K: StoreObject> ResourceSynchronizer<K> {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore<K>>, retry: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self { store, retry, clock }
    }

    /// Create the object or patch it towards `transform(current)`
    ///
    /// The transform receives a copy of the current object (or `K::default()`
    /// with name and namespace filled in when absent). Only the merge-patch
    /// difference is written, and nothing is written when it is empty.
    pub async fn create_or_patch<F>(
        &self,
        namespace: &str,
        name: &str,
        transform: F,
    ) -> Result<(K, VerbType)>
    where
        K: Default,
        F: FnOnce(K) -> K + Send,
    {
        let kind = K::kind(&());
        match self.store.get(namespace, name).await {
            Ok(current) => {
                let original = serde_json::to_value(&current)?;
                let modified = serde_json::to_value(transform(current.clone()))?;
                let patch = merge_patch::create(&original, &modified);
                if merge_patch::is_empty(&patch) {
                    debug!(kind = %kind, namespace, name, "create_or_patch: unchanged");
                    return Ok((current, VerbType::Unchanged));
                }
                let patched = self.store.patch(namespace, name, &patch).await?;
                metrics::increment_store_writes(&kind, VerbType::Patched.as_str());
                debug!(kind = %kind, namespace, name, "create_or_patch: patched");
                Ok((patched, VerbType::Patched))
            }
            Err(Error::NotFound(_)) => {
                let mut fresh = K::default();
                fresh.meta_mut().name = Some(name.to_string());
                fresh.meta_mut().namespace = Some(namespace.to_string());
                let mut desired = transform(fresh);
                // Identity is fixed by the key, whatever the transform did
                desired.meta_mut().name = Some(name.to_string());
                desired.meta_mut().namespace = Some(namespace.to_string());
                let created = self.store.create(&desired).await?;
                metrics::increment_store_writes(&kind, VerbType::Created.as_str());
                debug!(kind = %kind, namespace, name, "create_or_patch: created");
                Ok((created, VerbType::Created))
            }
            Err(e) => Err(e),
        }
    }

    /// Re-fetch, transform and fully update the object until it sticks
    ///
    /// Transient errors (conflicts included) are retried every
    /// `retry.interval` until `retry.timeout`. NotFound and permanent errors
    /// abort immediately. A transform that changes nothing writes nothing.
    pub async fn try_update<F>(&self, namespace: &str, name: &str, transform: F) -> Result<K>
    where
        F: Fn(K) -> K + Send + Sync,
    {
        let store = &self.store;
        let transform = &transform;
        self.poll(namespace, name, |_| async move {
            let current = store.get(namespace, name).await?;
            let desired = transform(current.clone());
            if serde_json::to_value(&desired)? == serde_json::to_value(&current)? {
                return Ok(current);
            }
            let updated = store.update(&desired).await?;
            metrics::increment_store_writes(&K::kind(&()), "updated");
            Ok(updated)
        })
        .await
    }

    /// Status-only read-modify-write
    ///
    /// `transform` maps the current status (default when unset) to the desired
    /// one; spec and metadata are carried through from the latest observed
    /// version. On conflict the latest version is re-fetched and the transform
    /// re-applied against it.
    pub async fn update_status<F>(&self, obj: &K, transform: F) -> Result<K>
    where
        K: HasStatus,
        F: Fn(K::Status) -> K::Status + Send + Sync,
    {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let kind = K::kind(&());
        let deadline = self.clock.now() + clock::to_chrono(self.retry.timeout);
        let mut latest = obj.clone();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let current_status = latest.status().cloned().unwrap_or_default();
            let desired_status = transform(current_status.clone());
            if latest.status().is_some() && desired_status == current_status {
                return Ok(latest);
            }
            let mut desired = latest.clone();
            *desired.status_mut() = Some(desired_status);

            let err = match self.store.update_status(&desired).await {
                Ok(updated) => {
                    metrics::increment_store_writes(&kind, "status");
                    return Ok(updated);
                }
                Err(e) => e,
            };

            let refetch = match &err {
                Error::Conflict(_) => {
                    metrics::increment_store_conflicts(&kind);
                    true
                }
                e if e.is_transient() => false,
                _ => return Err(err),
            };

            if self.clock.now() + clock::to_chrono(self.retry.interval) > deadline {
                warn!(kind = %kind, namespace = %namespace, name = %name, attempts, "update_status: retry budget exhausted");
                return Err(Error::RetryExhausted {
                    attempts,
                    source: Box::new(err),
                });
            }
            debug!(kind = %kind, namespace = %namespace, name = %name, attempts, error = %err, "update_status: retrying");
            self.clock.sleep(self.retry.interval).await;

            if refetch {
                latest = self.store.get(&namespace, &name).await?;
            }
        }
    }

    /// Run `attempt` until it succeeds, fails permanently or the deadline passes
    async fn poll<T, F, Fut>(&self, namespace: &str, name: &str, attempt: F) -> Result<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let kind = K::kind(&());
        let deadline = self.clock.now() + clock::to_chrono(self.retry.timeout);
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let err = match attempt(attempts).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if err.is_not_found() || !err.is_transient() {
                return Err(err);
            }
            if err.is_conflict() {
                metrics::increment_store_conflicts(&kind);
            }
            if self.clock.now() + clock::to_chrono(self.retry.interval) > deadline {
                warn!(kind = %kind, namespace, name, attempts, "try_update: retry budget exhausted");
                return Err(Error::RetryExhausted {
                    attempts,
                    source: Box::new(err),
                });
            }
            debug!(kind = %kind, namespace, name, attempts, error = %err, "try_update: retrying");
            self.clock.sleep(self.retry.interval).await;
        }
    }
}

//! # In-Memory Credential Engine
//!
//! [`CredentialEngine`] with a role table and a lease table held in memory.
//! Used by the test suite and for dry runs without a Vault server.

use super::engine::{
    Credential, CredentialEngine, IssueRequest, IssuedCredential, LeaseLookup, RevokeOutcome,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    roles: BTreeMap<String, BTreeMap<String, String>>,
    /// Lease ID to the TTL reported on lookup
    leases: BTreeMap<String, u64>,
    next_lease: u64,
    issued: usize,
    revoked: usize,
    issue_failures: VecDeque<Error>,
    lookup_failures: VecDeque<Error>,
    revoke_failures: VecDeque<Error>,
}

/// In-process backend engine
#[derive(Debug)]
pub struct MemoryEngine {
    state: Mutex<State>,
    lease_duration: u64,
    leased: bool,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Engine issuing 300 second leases with IDs counting up from 1
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_lease: 1,
                ..State::default()
            }),
            lease_duration: 300,
            leased: true,
        }
    }

    #[must_use]
    pub fn with_lease_duration(mut self, seconds: u64) -> Self {
        self.lease_duration = seconds;
        self
    }

    /// Issue credentials without leases, like GCP access tokens
    #[must_use]
    pub fn without_leases(mut self) -> Self {
        self.leased = false;
        self
    }

    /// Start lease IDs at `first`
    #[must_use]
    pub fn with_first_lease_id(self, first: u64) -> Self {
        self.lock().next_lease = first;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a role path (as in `IssueRequest::call().path`) and its fields
    pub fn add_role<I, K, V>(&self, path: &str, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.lock().roles.insert(path.to_string(), fields);
    }

    /// Make a lease known without issuing
    pub fn insert_lease(&self, lease_id: &str) {
        self.lock()
            .leases
            .insert(lease_id.to_string(), self.lease_duration);
    }

    /// Change the TTL a lookup reports, e.g. 0 for a lease the backend has
    /// not cleaned up yet
    pub fn set_lease_ttl(&self, lease_id: &str, ttl: u64) {
        if let Some(current) = self.lock().leases.get_mut(lease_id) {
            *current = ttl;
        }
    }

    /// Drop a lease as if it reached its TTL
    pub fn expire_lease(&self, lease_id: &str) {
        self.lock().leases.remove(lease_id);
    }

    #[must_use]
    pub fn has_lease(&self, lease_id: &str) -> bool {
        self.lock().leases.contains_key(lease_id)
    }

    #[must_use]
    pub fn active_leases(&self) -> usize {
        self.lock().leases.len()
    }

    #[must_use]
    pub fn issued_count(&self) -> usize {
        self.lock().issued
    }

    #[must_use]
    pub fn revoked_count(&self) -> usize {
        self.lock().revoked
    }

    pub fn fail_next_issue(&self, err: Error) {
        self.lock().issue_failures.push_back(err);
    }

    pub fn fail_next_lookup(&self, err: Error) {
        self.lock().lookup_failures.push_back(err);
    }

    pub fn fail_next_revoke(&self, err: Error) {
        self.lock().revoke_failures.push_back(err);
    }
}

#[async_trait]
impl CredentialEngine for MemoryEngine {
    async fn issue_credential(&self, request: &IssueRequest) -> Result<IssuedCredential> {
        let path = request.call().path;
        let mut state = self.lock();
        if let Some(err) = state.issue_failures.pop_front() {
            return Err(err);
        }
        let fields = state
            .roles
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("backend role path {path}")))?;
        let credential: Credential = fields.into_iter().collect();
        state.issued += 1;

        if !self.leased {
            return Ok(IssuedCredential {
                lease_id: String::new(),
                lease_duration: 0,
                credential,
            });
        }
        let lease_id = state.next_lease.to_string();
        state.next_lease += 1;
        state.leases.insert(lease_id.clone(), self.lease_duration);
        Ok(IssuedCredential {
            lease_id,
            lease_duration: self.lease_duration,
            credential,
        })
    }

    async fn lookup_lease(&self, lease_id: &str) -> Result<LeaseLookup> {
        let mut state = self.lock();
        if let Some(err) = state.lookup_failures.pop_front() {
            return Err(err);
        }
        Ok(match state.leases.get(lease_id) {
            Some(ttl) => LeaseLookup::Present { ttl: Some(*ttl) },
            None => LeaseLookup::Absent,
        })
    }

    async fn revoke_lease(&self, lease_id: &str) -> Result<RevokeOutcome> {
        let mut state = self.lock();
        if let Some(err) = state.revoke_failures.pop_front() {
            return Err(err);
        }
        if state.leases.remove(lease_id).is_some() {
            state.revoked += 1;
            Ok(RevokeOutcome::Revoked)
        } else {
            Ok(RevokeOutcome::NotFound)
        }
    }
}

//! # Vault Backend
//!
//! Everything that talks to the credential backend.
//!
//! - `engine.rs` - `CredentialEngine` capability interface and request types
//! - `client.rs` - Vault HTTP implementation
//! - `auth.rs` - auth Secret parsing and login
//! - `lease.rs` - `LeaseTracker` issuing, checking and revoking leases
//! - `memory.rs` - in-process engine

pub mod auth;
pub mod client;
pub mod engine;
pub mod lease;
pub mod memory;

pub use auth::{AuthMethod, Authenticator, HttpAuthenticator};
pub use client::VaultClient;
pub use engine::{
    Credential, CredentialEngine, EngineCall, IssueRequest, IssuedCredential, LeaseLookup,
    RevokeOutcome, SecretEngine,
};
pub use lease::{Lease, LeaseTracker};
pub use memory::MemoryEngine;

use crate::config::VaultConfig;
use crate::error::{Error, Result};
use crate::sync::ObjectStore;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

/// Opaque backend session token
#[derive(Clone)]
pub struct VaultSession {
    token: Zeroizing<String>,
}

impl VaultSession {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
        }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        self.token.as_str()
    }
}

impl std::fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultSession(<redacted>)")
    }
}

/// Hands out a session-bound engine for one reconciliation
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn CredentialEngine>>;
}

/// Connector that always returns the same engine
#[derive(Debug, Clone)]
pub struct StaticConnector(pub Arc<dyn CredentialEngine>);

#[async_trait]
impl BackendConnector for StaticConnector {
    async fn connect(&self) -> Result<Arc<dyn CredentialEngine>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Reads the auth Secret, logs in and returns a [`VaultClient`]
pub struct VaultConnector {
    config: VaultConfig,
    http: reqwest::Client,
    secrets: Arc<dyn ObjectStore<Secret>>,
}

impl std::fmt::Debug for VaultConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VaultConnector {
    pub fn new(config: VaultConfig, secrets: Arc<dyn ObjectStore<Secret>>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(config.skip_tls_verify)
            .build()
            .map_err(|e| Error::BackendUnavailable(format!("building HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            secrets,
        })
    }
}

#[async_trait]
impl BackendConnector for VaultConnector {
    async fn connect(&self) -> Result<Arc<dyn CredentialEngine>> {
        let secret = self
            .secrets
            .get(&self.config.auth_secret_namespace, &self.config.auth_secret_name)
            .await
            .map_err(|e| match e {
                Error::NotFound(what) => {
                    Error::Authentication(format!("auth secret {what} not found"))
                }
                other => other,
            })?;
        let method = AuthMethod::from_secret(&secret)?;
        debug!(method = method.name(), addr = %self.config.addr, "connecting to Vault");
        let authenticator = HttpAuthenticator::new(
            self.http.clone(),
            &self.config.addr,
            self.config.namespace.clone(),
            method,
        );
        let session = authenticator.login().await?;
        Ok(Arc::new(VaultClient::new(
            self.http.clone(),
            &self.config.addr,
            self.config.namespace.clone(),
            session,
        )))
    }
}

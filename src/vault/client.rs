//! # Vault HTTP Client
//!
//! [`CredentialEngine`] implementation speaking the Vault HTTP API.
//!
//! ## Response classification
//!
//! - transport failure, 429, 5xx: `BackendUnavailable`
//! - 404 on issue: `NotFound` (role path does not exist)
//! - undecodable 2xx body or non-scalar credential fields: `MalformedResponse`
//! - any other non-2xx: `Backend { status, message }`
//!
//! Lease lookup and revocation treat 404 and "invalid lease" 400s as absence.

use super::engine::{
    Credential, CredentialEngine, IssueRequest, IssuedCredential, LeaseLookup, RevokeOutcome,
};
use super::VaultSession;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Header carrying the session token
pub const TOKEN_HEADER: &str = "X-Vault-Token";

/// Header selecting a Vault Enterprise namespace
pub const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

/// Session-authenticated client for one Vault server
#[derive(Clone)]
pub struct VaultClient {
    http: reqwest::Client,
    addr: String,
    namespace: Option<String>,
    session: VaultSession,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("addr", &self.addr)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Generic secret response envelope
#[derive(Debug, Deserialize)]
struct SecretResponse {
    #[serde(default)]
    lease_id: String,
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    data: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LookupData {
    #[serde(default)]
    ttl: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    data: Option<LookupData>,
}

impl VaultClient {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        addr: &str,
        namespace: Option<String>,
        session: VaultSession,
    ) -> Self {
        Self {
            http,
            addr: addr.trim_end_matches('/').to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
            session,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/{}", self.addr, path.trim_start_matches('/'));
        let mut builder = self
            .http
            .request(method, url)
            .header(TOKEN_HEADER, self.session.token());
        if let Some(ns) = &self.namespace {
            builder = builder.header(NAMESPACE_HEADER, ns);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<(StatusCode, String)> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("{what}: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("{what}: reading response body: {e}")))?;
        Ok((status, body))
    }

    async fn lease_call(&self, op: &str, lease_id: &str) -> Result<Option<(StatusCode, String)>> {
        let builder = self
            .request(Method::PUT, &format!("sys/leases/{op}"))
            .json(&json!({ "lease_id": lease_id }));
        let (status, body) = self.send(builder, &format!("lease {op}")).await?;
        if status.is_success() {
            return Ok(Some((status, body)));
        }
        if lease_absent(status, &body) {
            debug!(lease_op = op, "lease not known to the backend");
            return Ok(None);
        }
        Err(classify(status, &body, &format!("lease {op}")))
    }
}

/// Map a non-success response to the error taxonomy
fn classify(status: StatusCode, body: &str, what: &str) -> Error {
    let message = error_message(body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::BackendUnavailable(format!("{what}: {status}: {message}"))
    } else if status == StatusCode::NOT_FOUND {
        Error::NotFound(what.to_string())
    } else {
        Error::Backend {
            status: status.as_u16(),
            message: format!("{what}: {message}"),
        }
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        _ => body.trim().chars().take(200).collect(),
    }
}

/// 404, or a 400 naming an invalid or unknown lease
fn lease_absent(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::NOT_FOUND {
        return true;
    }
    if status != StatusCode::BAD_REQUEST {
        return false;
    }
    let message = error_message(body).to_lowercase();
    message.contains("invalid lease") || message.contains("lease not found")
}

#[async_trait]
impl CredentialEngine for VaultClient {
    async fn issue_credential(&self, request: &IssueRequest) -> Result<IssuedCredential> {
        let call = request.call();
        let method = if call.write { Method::POST } else { Method::GET };
        let mut builder = self.request(method, &call.path);
        if let Some(body) = &call.body {
            builder = builder.json(body);
        }
        let what = format!("backend role path {}", call.path);
        let (status, body) = self.send(builder, &what).await?;
        if !status.is_success() {
            return Err(classify(status, &body, &what));
        }

        let parsed: SecretResponse = serde_json::from_str(&body)
            .map_err(|e| Error::MalformedResponse(format!("{what}: {e}")))?;
        let data = parsed
            .data
            .ok_or_else(|| Error::MalformedResponse(format!("{what}: response carries no data")))?;
        let credential = Credential::from_data(&data)?;
        debug!(
            engine = request.engine.name(),
            role = %request.role,
            fields = credential.len(),
            "issued credential"
        );
        Ok(IssuedCredential {
            lease_id: parsed.lease_id,
            lease_duration: parsed.lease_duration,
            credential,
        })
    }

    async fn lookup_lease(&self, lease_id: &str) -> Result<LeaseLookup> {
        match self.lease_call("lookup", lease_id).await? {
            Some((_, body)) => {
                let parsed: LookupResponse = if body.trim().is_empty() {
                    LookupResponse::default()
                } else {
                    serde_json::from_str(&body)
                        .map_err(|e| Error::MalformedResponse(format!("lease lookup: {e}")))?
                };
                Ok(LeaseLookup::Present {
                    ttl: parsed.data.and_then(|d| d.ttl),
                })
            }
            None => Ok(LeaseLookup::Absent),
        }
    }

    async fn revoke_lease(&self, lease_id: &str) -> Result<RevokeOutcome> {
        match self.lease_call("revoke", lease_id).await? {
            Some(_) => Ok(RevokeOutcome::Revoked),
            None => {
                warn!("lease already absent on revoke");
                Ok(RevokeOutcome::NotFound)
            }
        }
    }
}

//! # Vault Authentication
//!
//! Turns the controller's auth Secret into a Vault session token.
//!
//! The Secret `type` selects the mechanism:
//!
//! | Secret type | Keys | Default path |
//! |---|---|---|
//! | `engine.vaultaccess.dev/token` | `token` | none (no login call) |
//! | `kubernetes.io/basic-auth` | `username`, `password` | `userpass` |
//! | `engine.vaultaccess.dev/kubernetes` | `token` + role annotation | `kubernetes` |
//! | `engine.vaultaccess.dev/approle` | `role_id`, `secret_id` | `approle` |
//!
//! The `engine.vaultaccess.dev/auth-path` annotation overrides the path.

use super::client::NAMESPACE_HEADER;
use super::VaultSession;
use crate::constants::{AUTH_PATH_ANNOTATION, KUBERNETES_ROLE_ANNOTATION};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use zeroize::Zeroizing;

pub const SECRET_TYPE_TOKEN: &str = "engine.vaultaccess.dev/token";
pub const SECRET_TYPE_BASIC_AUTH: &str = "kubernetes.io/basic-auth";
pub const SECRET_TYPE_KUBERNETES: &str = "engine.vaultaccess.dev/kubernetes";
pub const SECRET_TYPE_APPROLE: &str = "engine.vaultaccess.dev/approle";

/// Auth mechanism with its material
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Token {
        token: Zeroizing<String>,
    },
    UserPass {
        path: String,
        username: String,
        password: Zeroizing<String>,
    },
    Kubernetes {
        path: String,
        role: String,
        jwt: Zeroizing<String>,
    },
    AppRole {
        path: String,
        role_id: String,
        secret_id: Zeroizing<String>,
    },
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Token { .. } => f.write_str("Token"),
            AuthMethod::UserPass { path, username, .. } => f
                .debug_struct("UserPass")
                .field("path", path)
                .field("username", username)
                .finish_non_exhaustive(),
            AuthMethod::Kubernetes { path, role, .. } => f
                .debug_struct("Kubernetes")
                .field("path", path)
                .field("role", role)
                .finish_non_exhaustive(),
            AuthMethod::AppRole { path, role_id, .. } => f
                .debug_struct("AppRole")
                .field("path", path)
                .field("role_id", role_id)
                .finish_non_exhaustive(),
        }
    }
}

fn secret_value(secret: &Secret, key: &str) -> Result<Zeroizing<String>> {
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| {
            Error::Authentication(format!("auth secret {} is missing key {key}", secret.name_any()))
        })?;
    let value = String::from_utf8(bytes.0.clone()).map_err(|e| {
        Error::Authentication(format!(
            "auth secret {} key {key} is not UTF-8: {}",
            secret.name_any(),
            e.utf8_error()
        ))
    })?;
    Ok(Zeroizing::new(value.trim().to_string()))
}

impl AuthMethod {
    /// Parse the auth Secret
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let secret_type = secret.type_.as_deref().unwrap_or_default();
        let path_for = |default: &str| {
            secret
                .annotations()
                .get(AUTH_PATH_ANNOTATION)
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        match secret_type {
            SECRET_TYPE_TOKEN => Ok(AuthMethod::Token {
                token: secret_value(secret, "token")?,
            }),
            SECRET_TYPE_BASIC_AUTH => Ok(AuthMethod::UserPass {
                path: path_for("userpass"),
                username: secret_value(secret, "username")?.to_string(),
                password: secret_value(secret, "password")?,
            }),
            SECRET_TYPE_KUBERNETES => {
                let role = secret
                    .annotations()
                    .get(KUBERNETES_ROLE_ANNOTATION)
                    .cloned()
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| {
                        Error::Authentication(format!(
                            "auth secret {} is missing annotation {KUBERNETES_ROLE_ANNOTATION}",
                            secret.name_any()
                        ))
                    })?;
                Ok(AuthMethod::Kubernetes {
                    path: path_for("kubernetes"),
                    role,
                    jwt: secret_value(secret, "token")?,
                })
            }
            SECRET_TYPE_APPROLE => Ok(AuthMethod::AppRole {
                path: path_for("approle"),
                role_id: secret_value(secret, "role_id")?.to_string(),
                secret_id: secret_value(secret, "secret_id")?,
            }),
            other => Err(Error::Authentication(format!(
                "auth secret {} has unsupported type {other:?}",
                secret.name_any()
            ))),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::Token { .. } => "token",
            AuthMethod::UserPass { .. } => "userpass",
            AuthMethod::Kubernetes { .. } => "kubernetes",
            AuthMethod::AppRole { .. } => "approle",
        }
    }
}

/// Produces a reusable backend session
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self) -> Result<VaultSession>;
}

/// Logs in over HTTP with one [`AuthMethod`]
#[derive(Debug, Clone)]
pub struct HttpAuthenticator {
    http: reqwest::Client,
    addr: String,
    namespace: Option<String>,
    method: AuthMethod,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    #[serde(default)]
    client_token: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: Option<LoginAuth>,
}

impl HttpAuthenticator {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        addr: &str,
        namespace: Option<String>,
        method: AuthMethod,
    ) -> Self {
        Self {
            http,
            addr: addr.trim_end_matches('/').to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
            method,
        }
    }

    fn login_call(&self) -> Option<(String, serde_json::Value)> {
        match &self.method {
            AuthMethod::Token { .. } => None,
            AuthMethod::UserPass {
                path,
                username,
                password,
            } => Some((
                format!("auth/{path}/login/{username}"),
                json!({ "password": password.as_str() }),
            )),
            AuthMethod::Kubernetes { path, role, jwt } => Some((
                format!("auth/{path}/login"),
                json!({ "role": role, "jwt": jwt.as_str() }),
            )),
            AuthMethod::AppRole {
                path,
                role_id,
                secret_id,
            } => Some((
                format!("auth/{path}/login"),
                json!({ "role_id": role_id, "secret_id": secret_id.as_str() }),
            )),
        }
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn login(&self) -> Result<VaultSession> {
        let Some((path, body)) = self.login_call() else {
            if let AuthMethod::Token { token } = &self.method {
                debug!("using static Vault token");
                return Ok(VaultSession::new(token.to_string()));
            }
            return Err(Error::Authentication("no login call for auth method".to_string()));
        };

        let mut builder = self
            .http
            .post(format!("{}/v1/{path}", self.addr))
            .json(&body);
        if let Some(ns) = &self.namespace {
            builder = builder.header(NAMESPACE_HEADER, ns);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("vault login: {e}")))?;
        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::BackendUnavailable(format!("vault login: {status}")));
        }
        if !status.is_success() {
            return Err(Error::Authentication(format!(
                "{} login at {path} rejected with {status}",
                self.method.name()
            )));
        }

        let parsed: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::Authentication(format!("vault login response: {e}")))?;
        let token = parsed
            .auth
            .map(|a| a.client_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Authentication("login response carries no client token".to_string()))?;
        info!(method = self.method.name(), "logged in to Vault");
        Ok(VaultSession::new(token))
    }
}

//! # Credential Engine
//!
//! Uniform capability interface over the backend secret engines, plus the
//! request and credential types that cross it.

use crate::crd::{AccessRequest, AwsCredentialType, GcpSecretType, RoleKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::ByteString;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroizing;

/// Secret engine variant, selected by the role kind of the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretEngine {
    /// MySQL, Postgres and MongoDB roles share the database engine
    Database { mount: String },
    Aws {
        mount: String,
        credential_type: AwsCredentialType,
        ttl: Option<String>,
    },
    Gcp {
        mount: String,
        secret_type: GcpSecretType,
        key_algorithm: Option<String>,
        key_type: Option<String>,
    },
    Azure { mount: String },
}

/// One backend call: method, path below `/v1/`, optional JSON body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCall {
    pub write: bool,
    pub path: String,
    pub body: Option<Value>,
}

impl SecretEngine {
    /// Engine for a request, honouring `spec.enginePath`
    #[must_use]
    pub fn for_request(request: &AccessRequest) -> Self {
        let spec = &request.spec;
        let mount = |default: &str| {
            spec.engine_path
                .as_deref()
                .map(|p| p.trim_matches('/'))
                .filter(|p| !p.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        match spec.role_ref.kind {
            RoleKind::MySql | RoleKind::Postgres | RoleKind::MongoDb => SecretEngine::Database {
                mount: mount("database"),
            },
            RoleKind::Aws => SecretEngine::Aws {
                mount: mount("aws"),
                credential_type: spec.credential_type.unwrap_or(AwsCredentialType::IamUser),
                ttl: spec.ttl.clone(),
            },
            RoleKind::Gcp => SecretEngine::Gcp {
                mount: mount("gcp"),
                secret_type: spec.secret_type.unwrap_or(GcpSecretType::AccessToken),
                key_algorithm: spec.key_algorithm.clone(),
                key_type: spec.key_type.clone(),
            },
            RoleKind::Azure => SecretEngine::Azure {
                mount: mount("azure"),
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            SecretEngine::Database { .. } => "database",
            SecretEngine::Aws { .. } => "aws",
            SecretEngine::Gcp { .. } => "gcp",
            SecretEngine::Azure { .. } => "azure",
        }
    }

    /// The call that mints a credential for `role`
    #[must_use]
    pub fn issue_call(&self, role: &str) -> EngineCall {
        match self {
            SecretEngine::Database { mount } | SecretEngine::Azure { mount } => EngineCall {
                write: false,
                path: format!("{mount}/creds/{role}"),
                body: None,
            },
            SecretEngine::Aws {
                mount,
                credential_type,
                ttl,
            } => match credential_type {
                AwsCredentialType::IamUser => EngineCall {
                    write: false,
                    path: format!("{mount}/creds/{role}"),
                    body: None,
                },
                AwsCredentialType::AssumedRole | AwsCredentialType::FederationToken => EngineCall {
                    write: true,
                    path: format!("{mount}/sts/{role}"),
                    body: Some(ttl.as_ref().map_or_else(|| json!({}), |ttl| json!({ "ttl": ttl }))),
                },
            },
            SecretEngine::Gcp {
                mount,
                secret_type,
                key_algorithm,
                key_type,
            } => match secret_type {
                GcpSecretType::AccessToken => EngineCall {
                    write: false,
                    path: format!("{mount}/token/{role}"),
                    body: None,
                },
                GcpSecretType::ServiceAccountKey => {
                    let mut body = serde_json::Map::new();
                    if let Some(alg) = key_algorithm {
                        body.insert("key_algorithm".to_string(), json!(alg));
                    }
                    if let Some(kt) = key_type {
                        body.insert("key_type".to_string(), json!(kt));
                    }
                    EngineCall {
                        write: true,
                        path: format!("{mount}/key/{role}"),
                        body: Some(Value::Object(body)),
                    }
                }
            },
        }
    }
}

/// Parameters of one issuance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub engine: SecretEngine,
    /// Backend role name
    pub role: String,
}

impl IssueRequest {
    #[must_use]
    pub fn for_request(request: &AccessRequest, cluster_name: Option<&str>) -> Self {
        Self {
            engine: SecretEngine::for_request(request),
            role: request.backend_role_name(cluster_name),
        }
    }

    #[must_use]
    pub fn call(&self) -> EngineCall {
        self.engine.issue_call(&self.role)
    }
}

/// Secret material for one lease
///
/// Values are wiped on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    fields: BTreeMap<String, Zeroizing<String>>,
}

impl Credential {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), Zeroizing::new(value.into()));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|v| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Secret `data` entries for these fields
    #[must_use]
    pub fn to_secret_data(&self) -> BTreeMap<String, ByteString> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
            .collect()
    }

    /// Build from a backend `data` object
    ///
    /// Strings are taken as-is, numbers and booleans are stringified, nulls are
    /// skipped. Nested arrays or objects cannot be represented as a secret field.
    pub fn from_data(data: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut credential = Self::new();
        for (key, value) in data {
            match value {
                Value::Null => {}
                Value::String(s) => credential.insert(key.clone(), s.clone()),
                Value::Number(n) => credential.insert(key.clone(), n.to_string()),
                Value::Bool(b) => credential.insert(key.clone(), b.to_string()),
                Value::Array(_) | Value::Object(_) => {
                    return Err(Error::MalformedResponse(format!(
                        "credential field {key} is not a scalar value"
                    )));
                }
            }
        }
        Ok(credential)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.fields.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credential {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut credential = Self::new();
        for (k, v) in iter {
            credential.insert(k, v);
        }
        credential
    }
}

/// What the backend returned for one issuance
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    /// Empty when the credential has no lease (e.g. GCP access tokens)
    pub lease_id: String,
    /// Lease duration in seconds
    pub lease_duration: u64,
    pub credential: Credential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseLookup {
    /// Lease is known; remaining TTL in seconds when reported
    Present { ttl: Option<u64> },
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    /// The lease was already gone
    NotFound,
}

/// Issue, look up and revoke credentials on a backend engine
#[async_trait]
pub trait CredentialEngine: Send + Sync + fmt::Debug {
    async fn issue_credential(&self, request: &IssueRequest) -> Result<IssuedCredential>;

    /// Absence of the lease is a normal outcome, not an error
    async fn lookup_lease(&self, lease_id: &str) -> Result<LeaseLookup>;

    /// Absence of the lease is a normal outcome, not an error
    async fn revoke_lease(&self, lease_id: &str) -> Result<RevokeOutcome>;
}

//! # AccessRequest Spec
//!
//! The request a client files to receive a short-lived backend credential.

use crate::constants::CLUSTER_NAME_FALLBACK;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// AccessRequest Custom Resource Definition
///
/// Asks the controller to mint a credential under a backend role and expose it
/// as a Secret readable by the listed subjects.
///
/// # Example
///
/// ```yaml
/// apiVersion: engine.vaultaccess.dev/v1alpha1
/// kind: AccessRequest
/// metadata:
///   name: pg-req
///   namespace: pg
/// spec:
///   roleRef:
///     kind: PostgresRole
///     name: readonly
///   subjects:
///     - kind: ServiceAccount
///       name: pg-sa
///       namespace: pg
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "AccessRequest",
    group = "engine.vaultaccess.dev",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::AccessRequestStatus",
    shortname = "accreq",
    printcolumn = r#"{"name":"Role", "type":"string", "jsonPath":".spec.roleRef.name"}, {"name":"Secret", "type":"string", "jsonPath":".status.secretRef.name"}, {"name":"Lease", "type":"string", "jsonPath":".status.lease.id"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequestSpec {
    /// Backend role the credential is issued under
    pub role_ref: RoleRef,
    /// Principals granted read access to the resulting Secret
    #[serde(default)]
    pub subjects: Vec<SubjectRef>,
    /// Secret engine mount path; defaults per engine
    #[serde(default)]
    pub engine_path: Option<String>,
    /// GCP service account key algorithm (e.g. KEY_ALG_RSA_2048)
    #[serde(default)]
    pub key_algorithm: Option<String>,
    /// GCP private key type (e.g. TYPE_GOOGLE_CREDENTIALS_FILE)
    #[serde(default)]
    pub key_type: Option<String>,
    /// GCP secret flavour; defaults to access_token
    #[serde(default)]
    pub secret_type: Option<GcpSecretType>,
    /// AWS credential flavour; defaults to iam_user
    #[serde(default)]
    pub credential_type: Option<AwsCredentialType>,
    /// Requested TTL for AWS STS credentials (e.g. "1h")
    #[serde(default)]
    pub ttl: Option<String>,
}

/// Reference to a backend role defined by another resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    pub kind: RoleKind,
    pub name: String,
    /// Defaults to the AccessRequest namespace
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Role kinds, one per backend secret engine family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub enum RoleKind {
    #[serde(rename = "MySQLRole")]
    MySql,
    #[serde(rename = "PostgresRole")]
    Postgres,
    #[serde(rename = "MongoDBRole")]
    MongoDb,
    #[serde(rename = "AWSRole")]
    Aws,
    #[serde(rename = "GCPRole")]
    Gcp,
    #[serde(rename = "AzureRole")]
    Azure,
}

impl RoleKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::MySql => "MySQLRole",
            RoleKind::Postgres => "PostgresRole",
            RoleKind::MongoDb => "MongoDBRole",
            RoleKind::Aws => "AWSRole",
            RoleKind::Gcp => "GCPRole",
            RoleKind::Azure => "AzureRole",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Principal receiving read access; mirrors an RBAC subject
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    /// User, Group or ServiceAccount
    pub kind: String,
    pub name: String,
    /// ServiceAccount namespace; defaults to the AccessRequest namespace
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub api_group: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GcpSecretType {
    AccessToken,
    ServiceAccountKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AwsCredentialType {
    IamUser,
    AssumedRole,
    FederationToken,
}

impl AccessRequest {
    /// Namespace of the request, empty for malformed objects
    #[must_use]
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_default()
    }

    /// Name of the Secret holding the credential
    ///
    /// Once a secret has been recorded in status that name sticks.
    #[must_use]
    pub fn secret_name(&self) -> String {
        self.status
            .as_ref()
            .and_then(|s| s.secret_ref.as_ref())
            .map_or_else(|| format!("{}-cred", self.name_any()), |r| r.name.clone())
    }

    #[must_use]
    pub fn role_name(&self) -> String {
        format!("{}-role", self.name_any())
    }

    #[must_use]
    pub fn role_binding_name(&self) -> String {
        format!("{}-role-binding", self.name_any())
    }

    /// Namespace of the referenced role
    #[must_use]
    pub fn role_namespace(&self) -> String {
        self.spec
            .role_ref
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.namespace_or_default())
    }

    /// Deterministic backend role name `k8s.<cluster>.<namespace>.<role>`
    ///
    /// Re-issuing after a crash targets the same backend role.
    #[must_use]
    pub fn backend_role_name(&self, cluster_name: Option<&str>) -> String {
        let cluster = cluster_name
            .filter(|c| !c.is_empty())
            .unwrap_or(CLUSTER_NAME_FALLBACK);
        format!(
            "k8s.{}.{}.{}",
            cluster,
            self.role_namespace(),
            self.spec.role_ref.name
        )
    }

    /// Whether deletion has been requested
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

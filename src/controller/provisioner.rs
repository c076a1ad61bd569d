//! # Access Provisioner
//!
//! Materializes an issued credential as a Secret and grants the request's
//! subjects read access to exactly that Secret.
//!
//! ```text
//! Secret      <req>-cred           credential fields (merged into existing data)
//! Role        <req>-role           get on secrets/<req>-cred
//! RoleBinding <req>-role-binding   Role -> subjects
//! ```
//!
//! Every write goes through [`ResourceSynchronizer::create_or_patch`], so each
//! step is idempotent and `expose` can be re-run after a crash at any point.

use crate::constants::{ACCESS_REQUEST_LABEL, CONTROLLER_NAME, MANAGED_BY_LABEL};
use crate::crd::{AccessRequest, SecretReference, SubjectRef};
use crate::error::Result;
use crate::sync::{ResourceSynchronizer, VerbType};
use crate::vault::Credential;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::info;

pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Write outcome of one [`AccessProvisioner::expose`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exposure {
    pub secret_ref: SecretReference,
    pub secret: VerbType,
    pub role: VerbType,
    pub role_binding: VerbType,
}

/// Writes the Secret, Role and RoleBinding for a request
#[derive(Debug, Clone)]
pub struct AccessProvisioner {
    secrets: ResourceSynchronizer<Secret>,
    roles: ResourceSynchronizer<Role>,
    bindings: ResourceSynchronizer<RoleBinding>,
}

impl AccessProvisioner {
    #[must_use]
    pub fn new(
        secrets: ResourceSynchronizer<Secret>,
        roles: ResourceSynchronizer<Role>,
        bindings: ResourceSynchronizer<RoleBinding>,
    ) -> Self {
        Self {
            secrets,
            roles,
            bindings,
        }
    }

    /// Write the credential and the grant; any failing step aborts the call
    ///
    /// Credential fields overwrite same-named keys in an existing Secret; other
    /// keys are preserved.
    pub async fn expose(&self, request: &AccessRequest, credential: &Credential) -> Result<Exposure> {
        let namespace = request.namespace_or_default();
        let secret_name = request.secret_name();
        let data = credential.to_secret_data();

        let (_, secret_verb) = self
            .secrets
            .create_or_patch(&namespace, &secret_name, |mut secret| {
                stamp_metadata(&mut secret.metadata, request);
                if secret.type_.is_none() {
                    secret.type_ = Some("Opaque".to_string());
                }
                secret.data.get_or_insert_with(Default::default).extend(data);
                secret
            })
            .await?;
        info!(
            resource.name = %request.name_any(),
            resource.namespace = %namespace,
            secret = %secret_name,
            verb = %secret_verb,
            "credential secret written"
        );

        let (role_verb, role_binding_verb) = self.ensure_grant(request, &secret_name).await?;

        Ok(Exposure {
            secret_ref: SecretReference { name: secret_name },
            secret: secret_verb,
            role: role_verb,
            role_binding: role_binding_verb,
        })
    }

    /// Re-derive the Role and RoleBinding from the current subjects
    pub async fn ensure_grant(
        &self,
        request: &AccessRequest,
        secret_name: &str,
    ) -> Result<(VerbType, VerbType)> {
        let namespace = request.namespace_or_default();
        let role_name = request.role_name();

        let (_, role_verb) = self
            .roles
            .create_or_patch(&namespace, &role_name, |mut role| {
                stamp_metadata(&mut role.metadata, request);
                role.rules = Some(vec![read_secret_rule(secret_name)]);
                role
            })
            .await?;

        let subjects: Vec<Subject> = request
            .spec
            .subjects
            .iter()
            .map(|s| rbac_subject(s, &namespace))
            .collect();
        let (_, binding_verb) = self
            .bindings
            .create_or_patch(&namespace, &request.role_binding_name(), |mut binding| {
                stamp_metadata(&mut binding.metadata, request);
                binding.role_ref = RoleRef {
                    api_group: RBAC_API_GROUP.to_string(),
                    kind: "Role".to_string(),
                    name: role_name.clone(),
                };
                binding.subjects = Some(subjects);
                binding
            })
            .await?;

        info!(
            resource.name = %request.name_any(),
            resource.namespace = %namespace,
            role = %role_verb,
            role_binding = %binding_verb,
            "access grant written"
        );
        Ok((role_verb, binding_verb))
    }
}

/// `get` on exactly one named secret
#[must_use]
pub fn read_secret_rule(secret_name: &str) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(vec!["secrets".to_string()]),
        resource_names: Some(vec![secret_name.to_string()]),
        verbs: vec!["get".to_string()],
        ..PolicyRule::default()
    }
}

/// RBAC subject for a request subject
///
/// ServiceAccounts default to the request namespace; users and groups get the
/// RBAC API group unless one is given.
#[must_use]
pub fn rbac_subject(subject: &SubjectRef, default_namespace: &str) -> Subject {
    let is_service_account = subject.kind == "ServiceAccount";
    let api_group = subject.api_group.clone().or_else(|| {
        if is_service_account {
            None
        } else {
            Some(RBAC_API_GROUP.to_string())
        }
    });
    let namespace = if is_service_account {
        subject
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| Some(default_namespace.to_string()))
    } else {
        subject.namespace.clone()
    };
    Subject {
        kind: subject.kind.clone(),
        name: subject.name.clone(),
        namespace,
        api_group,
    }
}

/// Labels and controller owner reference shared by all provisioned objects
fn stamp_metadata(meta: &mut ObjectMeta, request: &AccessRequest) {
    let labels = meta.labels.get_or_insert_with(Default::default);
    labels.insert(MANAGED_BY_LABEL.to_string(), CONTROLLER_NAME.to_string());
    labels.insert(ACCESS_REQUEST_LABEL.to_string(), request.name_any());

    if let Some(owner) = request.controller_owner_ref(&()) {
        let owners = meta.owner_references.get_or_insert_with(Vec::new);
        if !owners.iter().any(|o| o.uid == owner.uid) {
            owners.push(owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(kind: &str, name: &str, namespace: Option<&str>) -> SubjectRef {
        SubjectRef {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            api_group: None,
        }
    }

    #[test]
    fn test_read_secret_rule_shape() {
        let rule = read_secret_rule("pg-req-cred");
        assert_eq!(rule.api_groups, Some(vec![String::new()]));
        assert_eq!(rule.resources, Some(vec!["secrets".to_string()]));
        assert_eq!(rule.resource_names, Some(vec!["pg-req-cred".to_string()]));
        assert_eq!(rule.verbs, vec!["get".to_string()]);
    }

    #[test]
    fn test_service_account_subject_defaults_namespace() {
        let s = rbac_subject(&subject("ServiceAccount", "pg-sa", None), "pg");
        assert_eq!(s.namespace.as_deref(), Some("pg"));
        assert_eq!(s.api_group, None);

        let s = rbac_subject(&subject("ServiceAccount", "pg-sa", Some("other")), "pg");
        assert_eq!(s.namespace.as_deref(), Some("other"));
    }

    #[test]
    fn test_user_and_group_subjects_get_rbac_group() {
        let s = rbac_subject(&subject("User", "nahid", None), "pg");
        assert_eq!(s.api_group.as_deref(), Some(RBAC_API_GROUP));
        assert_eq!(s.namespace, None);

        let s = rbac_subject(&subject("Group", "dbas", None), "pg");
        assert_eq!(s.kind, "Group");
        assert_eq!(s.api_group.as_deref(), Some(RBAC_API_GROUP));
    }
}

//! # Validation
//!
//! Checks an `AccessRequest` before any backend call is made.
//!
//! Names follow RFC 1123 the way the API server checks them.

use crate::crd::{AccessRequest, RoleKind};
use crate::error::{Error, Result};
use regex::Regex;

const SUBJECT_KINDS: &[&str] = &["User", "Group", "ServiceAccount"];

/// Validate every field the controller relies on
pub fn validate_access_request(request: &AccessRequest) -> Result<()> {
    let spec = &request.spec;

    validate_kubernetes_name(&spec.role_ref.name, "roleRef.name")?;
    if let Some(ns) = spec.role_ref.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        validate_kubernetes_label(ns, "roleRef.namespace")?;
    }

    if spec.subjects.is_empty() {
        return Err(Error::Validation(
            "subjects must list at least one principal".to_string(),
        ));
    }
    for (i, subject) in spec.subjects.iter().enumerate() {
        let field = format!("subjects[{i}]");
        if !SUBJECT_KINDS.contains(&subject.kind.as_str()) {
            return Err(Error::Validation(format!(
                "{field}.kind must be one of User, Group or ServiceAccount, got '{}'",
                subject.kind
            )));
        }
        if subject.kind == "ServiceAccount" {
            validate_kubernetes_name(&subject.name, &format!("{field}.name"))?;
            if let Some(ns) = subject.namespace.as_deref().filter(|ns| !ns.is_empty()) {
                validate_kubernetes_label(ns, &format!("{field}.namespace"))?;
            }
        } else if subject.name.trim().is_empty() {
            return Err(Error::Validation(format!("{field}.name cannot be empty")));
        }
    }

    let is_gcp = spec.role_ref.kind == RoleKind::Gcp;
    let gcp_only = [
        ("keyAlgorithm", spec.key_algorithm.is_some()),
        ("keyType", spec.key_type.is_some()),
        ("secretType", spec.secret_type.is_some()),
    ];
    if !is_gcp {
        if let Some((field, _)) = gcp_only.iter().find(|(_, set)| *set) {
            return Err(Error::Validation(format!(
                "{field} is only valid for GCPRole, not {}",
                spec.role_ref.kind
            )));
        }
    }

    let is_aws = spec.role_ref.kind == RoleKind::Aws;
    if !is_aws && (spec.credential_type.is_some() || spec.ttl.is_some()) {
        return Err(Error::Validation(format!(
            "credentialType and ttl are only valid for AWSRole, not {}",
            spec.role_ref.kind
        )));
    }

    if let Some(path) = spec.engine_path.as_deref() {
        if path.trim().is_empty() || path.starts_with('/') || path.ends_with('/') {
            return Err(Error::Validation(format!(
                "enginePath '{path}' must be a non-empty mount path without leading or trailing '/'"
            )));
        }
    }

    Ok(())
}

/// Validate Kubernetes resource name (RFC 1123 subdomain)
/// Format: lowercase alphanumeric, hyphens, dots
/// Length: 1-253 characters
pub fn validate_kubernetes_name(name: &str, field_name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation(format!("{field_name} cannot be empty")));
    }

    if name.len() > 253 {
        return Err(Error::Validation(format!(
            "{field_name} '{name}' exceeds maximum length of 253 characters (got {})",
            name.len()
        )));
    }

    let name_regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .map_err(|e| Error::Validation(format!("Failed to compile regex: {e}")))?;

    if !name_regex.is_match(name) {
        return Err(Error::Validation(format!(
            "{field_name} '{name}' must be a valid Kubernetes name (lowercase alphanumeric, hyphens, dots; cannot start/end with hyphen or dot)"
        )));
    }

    Ok(())
}

/// Validate Kubernetes namespace (RFC 1123 label)
/// Format: lowercase alphanumeric, hyphens
/// Length: 1-63 characters
pub fn validate_kubernetes_label(value: &str, field_name: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{field_name} cannot be empty")));
    }

    if value.len() > 63 {
        return Err(Error::Validation(format!(
            "{field_name} '{value}' exceeds maximum length of 63 characters (got {})",
            value.len()
        )));
    }

    let label_regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$")
        .map_err(|e| Error::Validation(format!("Failed to compile regex: {e}")))?;

    if !label_regex.is_match(value) {
        return Err(Error::Validation(format!(
            "{field_name} '{value}' must be a valid RFC 1123 label (lowercase alphanumeric, hyphens; cannot start/end with hyphen)"
        )));
    }

    Ok(())
}

//! # AccessRequest Status
//!
//! Status types recording the issuance outcome, the exposed secret and the
//! tracked lease.

use serde::{Deserialize, Serialize};

/// Status of the AccessRequest resource
///
/// Fields are serialized even when empty so a status write fully describes the
/// status sub-object (a `null` clears the field on the server).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequestStatus {
    /// Ordered condition history, oldest first
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Secret holding the credential; set on first successful issue
    #[serde(default)]
    pub secret_ref: Option<SecretReference>,
    /// Backend lease backing the current credential
    #[serde(default)]
    pub lease: Option<LeaseStatus>,
    /// Generation of the spec the status was computed for
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// One timestamped observation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Machine-readable reason; an error kind on failure
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// RFC3339 timestamp
    pub last_update_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
}

/// Backend lease as observed by the controller
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaseStatus {
    /// Backend-assigned lease ID
    pub id: String,
    /// Lease duration in seconds
    pub duration: i64,
    /// RFC3339 time the controller received the credential
    pub issue_time: String,
}

impl LeaseStatus {
    /// `issue_time + duration`, `None` when the issue time does not parse
    #[must_use]
    pub fn expiry_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let issued = chrono::DateTime::parse_from_rfc3339(&self.issue_time).ok()?;
        Some(issued.with_timezone(&chrono::Utc) + chrono::Duration::seconds(self.duration))
    }
}

/// Lifecycle phase derived from the object, never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Available,
    Failed,
    Deleting,
}

impl Phase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Available => "Available",
            Phase::Failed => "Failed",
            Phase::Deleting => "Deleting",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_expiry_time() {
        let lease = LeaseStatus {
            id: "1204".to_string(),
            duration: 300,
            issue_time: "2024-01-01T00:00:00Z".to_string(),
        };
        let expiry = lease.expiry_time().unwrap();
        assert_eq!(expiry.to_rfc3339(), "2024-01-01T00:05:00+00:00");
    }

    #[test]
    fn test_lease_expiry_time_unparseable() {
        let lease = LeaseStatus {
            id: "1204".to_string(),
            duration: 300,
            issue_time: "yesterday".to_string(),
        };
        assert!(lease.expiry_time().is_none());
    }

    #[test]
    fn test_empty_fields_serialize_as_null() {
        let value = serde_json::to_value(AccessRequestStatus::default()).unwrap();
        assert!(value.get("secretRef").unwrap().is_null());
        assert!(value.get("lease").unwrap().is_null());
    }
}

//! # Custom Resource Definitions
//!
//! CRD types for the Vault Access Controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `AccessRequest` specification and derived names
//! - `status.rs` - Status, conditions and lease tracking types

mod spec;
mod status;

pub use spec::{
    AccessRequest, AccessRequestSpec, AwsCredentialType, GcpSecretType, RoleKind, RoleRef,
    SubjectRef,
};
pub use status::{AccessRequestStatus, Condition, LeaseStatus, Phase, SecretReference};

impl crate::sync::HasStatus for AccessRequest {
    type Status = AccessRequestStatus;

    fn status(&self) -> Option<&AccessRequestStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<AccessRequestStatus> {
        &mut self.status
    }
}

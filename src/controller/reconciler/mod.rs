//! # Reconciler
//!
//! Core reconciliation logic for `AccessRequest` resources.
//!
//! The reconciler:
//! - Validates the request before touching the backend
//! - Issues a credential through the `LeaseTracker`
//! - Exposes it through the `AccessProvisioner` (Secret, Role, RoleBinding)
//! - Records the outcome as a condition through the `ResourceSynchronizer`
//! - Re-checks the lease while the request is Available
//! - Revokes the lease before the request is allowed to go away
//!
//! ## Module Structure
//!
//! - `conditions.rs` - condition history and phase derivation
//! - `finalize.rs` - lease-revocation finalizer
//! - `reconcile.rs` - reconcile entry point and state machine
//! - `types.rs` - `Reconciler` context, `BackoffState`, `ReconcilerError`
//! - `validation.rs` - request validation

pub mod conditions;
pub mod finalize;
pub mod reconcile;
pub mod types;
pub mod validation;

// Re-export public API
pub use reconcile::reconcile;
pub use types::{BackoffState, Reconciler, ReconcilerError};

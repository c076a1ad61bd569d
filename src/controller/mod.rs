//! # Controller
//!
//! Core controller modules for the Vault Access Controller.
//!
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `provisioner`: Secret, Role and RoleBinding provisioning
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod provisioner;
pub mod reconciler;
pub mod server;

pub use provisioner::{AccessProvisioner, Exposure};

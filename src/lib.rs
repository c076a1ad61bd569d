//! # Vault Access Controller Library
//!
//! Core functionality of the Vault Access Controller: the `AccessRequest` CRD,
//! conflict-safe store writes, the Vault lease tracker, the access provisioner
//! and the reconciler that ties them together.
//!
//! ## Module Structure
//!
//! - `config` - environment configuration
//! - `constants` - names, labels and defaults
//! - `controller` - provisioner, reconciler, backoff and HTTP server
//! - `crd` - `AccessRequest` types
//! - `error` - error taxonomy
//! - `observability` - Prometheus metrics
//! - `runtime` - process wiring and watch loop
//! - `sync` - `ResourceSynchronizer` and object stores
//! - `vault` - credential backend, auth and lease tracking

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod error;
pub mod observability;
pub mod runtime;
pub mod sync;
pub mod vault;

pub use error::{Error, Result};

//! # Runtime
//!
//! Process-level wiring around the reconciler.
//!
//! - `initialization.rs` - TLS, tracing, metrics, HTTP server and client setup
//! - `watch_loop.rs` - `kube_runtime::Controller` loop with restart handling
//! - `error_policy.rs` - reconciliation backoff and watch error classification

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;

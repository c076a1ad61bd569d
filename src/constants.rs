//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Field manager / managed-by value written on every object the controller owns
pub const CONTROLLER_NAME: &str = "vault-access-controller";

/// API group of the `AccessRequest` custom resource
pub const API_GROUP: &str = "engine.vaultaccess.dev";

/// Finalizer that blocks deletion until the backend lease is revoked
pub const LEASE_FINALIZER: &str = "engine.vaultaccess.dev/lease-revocation";

/// Label linking provisioned objects back to their `AccessRequest`
pub const ACCESS_REQUEST_LABEL: &str = "engine.vaultaccess.dev/access-request";

/// Standard managed-by label key
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Annotation on the auth secret overriding the Vault auth mount path
pub const AUTH_PATH_ANNOTATION: &str = "engine.vaultaccess.dev/auth-path";

/// Annotation on a Kubernetes-auth secret naming the Vault role to log in as
pub const KUBERNETES_ROLE_ANNOTATION: &str = "engine.vaultaccess.dev/kubernetes-role";

/// Backend role name segment used when no cluster name is configured
pub const CLUSTER_NAME_FALLBACK: &str = "-";

/// Condition type carrying the issuance outcome
pub const CONDITION_AVAILABLE: &str = "Available";

/// Condition reason recorded when a credential was issued and exposed
pub const REASON_ISSUED: &str = "Issued";

/// Maximum number of condition entries kept in status history
pub const MAX_CONDITIONS: usize = 16;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default poll interval for store write retries (milliseconds)
pub const DEFAULT_SYNC_RETRY_INTERVAL_MS: u64 = 50;

/// Default overall timeout for store write retries (milliseconds)
pub const DEFAULT_SYNC_RETRY_TIMEOUT_MS: u64 = 2_000;

/// Default interval between lease expiry checks for available requests (seconds)
pub const DEFAULT_LEASE_RECHECK_INTERVAL_SECS: u64 = 300;

/// Default Fibonacci backoff floor for failed reconciliations (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 30;

/// Default Fibonacci backoff ceiling for failed reconciliations (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 600;

/// Default maximum number of concurrent reconciliations
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Default exponential backoff starting value for watch errors (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value for watch errors (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Default Vault address
pub const DEFAULT_VAULT_ADDR: &str = "http://vault.vault.svc:8200";

/// Default name of the secret holding Vault auth material
pub const DEFAULT_VAULT_AUTH_SECRET_NAME: &str = "vault-access-controller-auth";

/// Default timeout for a single Vault HTTP request (seconds)
pub const DEFAULT_VAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default namespace the controller runs in
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "vault-access-system";

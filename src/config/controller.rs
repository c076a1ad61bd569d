//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::*;
use crate::sync::RetryConfig;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace the controller runs in (`POD_NAMESPACE`)
    pub controller_namespace: String,
    /// Cluster name used in backend role names (`CLUSTER_NAME`)
    pub cluster_name: Option<String>,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Poll interval of store write retries (milliseconds)
    pub sync_retry_interval_ms: u64,
    /// Overall timeout of store write retries (milliseconds)
    pub sync_retry_timeout_ms: u64,
    /// How often an Available request's lease is looked up (seconds)
    pub lease_recheck_interval_secs: u64,
    /// Fibonacci backoff floor for failed reconciliations (seconds)
    pub backoff_min_secs: u64,
    /// Fibonacci backoff ceiling for failed reconciliations (seconds)
    pub backoff_max_secs: u64,
    /// Limits how many requests are reconciled simultaneously
    pub max_concurrent_reconciliations: u16,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after the stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Exponential watch backoff starting value (milliseconds)
    pub watch_backoff_start_ms: u64,
    /// Exponential watch backoff maximum value (milliseconds)
    pub watch_backoff_max_ms: u64,
    pub vault: VaultConfig,
}

/// Vault connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Server address, e.g. `https://vault.vault.svc:8200`
    pub addr: String,
    /// Vault Enterprise namespace
    pub namespace: Option<String>,
    /// Secret holding the auth material
    pub auth_secret_name: String,
    /// Defaults to the controller namespace
    pub auth_secret_namespace: String,
    pub request_timeout_secs: u64,
    pub skip_tls_verify: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let controller_namespace = env_var_or_default_str(&var, "POD_NAMESPACE", DEFAULT_CONTROLLER_NAMESPACE);
        Self {
            cluster_name: var("CLUSTER_NAME"),
            metrics_port: env_var_or_default(&var, "METRICS_PORT", DEFAULT_METRICS_PORT),
            sync_retry_interval_ms: env_var_or_default(
                &var,
                "SYNC_RETRY_INTERVAL_MS",
                DEFAULT_SYNC_RETRY_INTERVAL_MS,
            ),
            sync_retry_timeout_ms: env_var_or_default(
                &var,
                "SYNC_RETRY_TIMEOUT_MS",
                DEFAULT_SYNC_RETRY_TIMEOUT_MS,
            ),
            lease_recheck_interval_secs: env_var_or_default(
                &var,
                "LEASE_RECHECK_INTERVAL_SECS",
                DEFAULT_LEASE_RECHECK_INTERVAL_SECS,
            ),
            backoff_min_secs: env_var_or_default(&var, "BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default(&var, "BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            max_concurrent_reconciliations: env_var_or_default(
                &var,
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            watch_restart_delay_secs: env_var_or_default(
                &var,
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            watch_restart_delay_after_end_secs: env_var_or_default(
                &var,
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            ),
            watch_backoff_start_ms: env_var_or_default(
                &var,
                "WATCH_BACKOFF_START_MS",
                DEFAULT_WATCH_BACKOFF_START_MS,
            ),
            watch_backoff_max_ms: env_var_or_default(
                &var,
                "WATCH_BACKOFF_MAX_MS",
                DEFAULT_WATCH_BACKOFF_MAX_MS,
            ),
            vault: VaultConfig {
                addr: env_var_or_default_str(&var, "VAULT_ADDR", DEFAULT_VAULT_ADDR),
                namespace: var("VAULT_NAMESPACE"),
                auth_secret_name: env_var_or_default_str(
                    &var,
                    "VAULT_AUTH_SECRET_NAME",
                    DEFAULT_VAULT_AUTH_SECRET_NAME,
                ),
                auth_secret_namespace: var("VAULT_AUTH_SECRET_NAMESPACE")
                    .unwrap_or_else(|| controller_namespace.clone()),
                request_timeout_secs: env_var_or_default(
                    &var,
                    "VAULT_REQUEST_TIMEOUT_SECS",
                    DEFAULT_VAULT_REQUEST_TIMEOUT_SECS,
                ),
                skip_tls_verify: env_var_or_default_bool(&var, "VAULT_SKIP_TLS_VERIFY", false),
            },
            controller_namespace,
        }
    }

    /// Retry parameters for the resource synchronizers
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            interval: Duration::from_millis(self.sync_retry_interval_ms),
            timeout: Duration::from_millis(self.sync_retry_timeout_ms),
        }
    }

    /// Get lease recheck interval duration
    #[must_use]
    pub fn lease_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.lease_recheck_interval_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    #[must_use]
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }
}

/// Read a variable and parse it, or return the default
fn env_var_or_default<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    var(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a variable as boolean or return default
fn env_var_or_default_bool(var: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    var(key)
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read a variable as string or return default
fn env_var_or_default_str(var: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| default.to_string())
}

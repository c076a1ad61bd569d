//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `vault_access_reconciliations_total` - Total number of reconciliations
//! - `vault_access_reconciliation_errors_total` - Total number of reconciliation errors
//! - `vault_access_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `vault_access_leases_issued_total` - Credentials issued by the backend
//! - `vault_access_leases_revoked_total` - Leases revoked (including already-gone leases)
//! - `vault_access_leases_expired_total` - Leases found expired on re-check
//! - `vault_access_store_writes_total` - Store writes by kind and verb
//! - `vault_access_store_conflicts_total` - Optimistic-concurrency conflicts by kind
//! - `vault_access_backend_errors_total` - Backend errors by reason
//! - `vault_access_requeues_total` - Requeues by reason

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_access_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_access_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "vault_access_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static LEASES_ISSUED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_access_leases_issued_total",
        "Total number of credentials issued by the backend",
    )
    .expect("Failed to create LEASES_ISSUED_TOTAL metric - this should never happen")
});

static LEASES_REVOKED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_access_leases_revoked_total",
        "Total number of leases revoked",
    )
    .expect("Failed to create LEASES_REVOKED_TOTAL metric - this should never happen")
});

static LEASES_EXPIRED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vault_access_leases_expired_total",
        "Total number of leases found expired on re-check",
    )
    .expect("Failed to create LEASES_EXPIRED_TOTAL metric - this should never happen")
});

static STORE_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_access_store_writes_total",
            "Total number of store writes by resource kind and verb",
        ),
        &["kind", "verb"],
    )
    .expect("Failed to create STORE_WRITES_TOTAL metric - this should never happen")
});

static STORE_CONFLICTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_access_store_conflicts_total",
            "Total number of optimistic-concurrency conflicts by resource kind",
        ),
        &["kind"],
    )
    .expect("Failed to create STORE_CONFLICTS_TOTAL metric - this should never happen")
});

static BACKEND_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_access_backend_errors_total",
            "Total number of credential backend errors by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create BACKEND_ERRORS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "vault_access_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Registration only fails on duplicate metric names"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(LEASES_ISSUED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LEASES_REVOKED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LEASES_EXPIRED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_CONFLICTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BACKEND_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_leases_issued() {
    LEASES_ISSUED_TOTAL.inc();
}

pub fn increment_leases_revoked() {
    LEASES_REVOKED_TOTAL.inc();
}

pub fn increment_leases_expired() {
    LEASES_EXPIRED_TOTAL.inc();
}

pub fn increment_store_writes(kind: &str, verb: &str) {
    STORE_WRITES_TOTAL.with_label_values(&[kind, verb]).inc();
}

pub fn increment_store_conflicts(kind: &str) {
    STORE_CONFLICTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_backend_errors(reason: &str) {
    BACKEND_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

/// Count `err` under its reason when it came from the backend
pub fn record_backend_error(err: &crate::Error) {
    if err.is_backend() {
        increment_backend_errors(err.reason());
    }
}

#[must_use]
pub fn backend_errors(reason: &str) -> u64 {
    BACKEND_ERRORS_TOTAL.with_label_values(&[reason]).get()
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

/// Encode the registry in the Prometheus text format
pub fn gather_text() -> Result<String> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_counters_accumulate() {
        let before = STORE_WRITES_TOTAL.with_label_values(&["Secret", "created"]).get();
        increment_store_writes("Secret", "created");
        increment_store_writes("Secret", "created");
        let after = STORE_WRITES_TOTAL.with_label_values(&["Secret", "created"]).get();
        assert_eq!(after - before, 2);
    }
}

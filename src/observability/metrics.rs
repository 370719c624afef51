//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `vso_reconciliations_total` - Total number of reconciliations, by kind
//! - `vso_reconciliation_errors_total` - Total number of reconciliation errors
//! - `vso_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `vso_requeues_total` - Total number of requeues, by reason
//! - `vso_destination_writes_total` - Total number of destination secret writes
//! - `vso_drift_detected_total` - Total number of times a write was skipped because the MAC matched
//! - `vso_client_cache_size` - Current number of entries in the authenticated-client cache
//! - `vso_lease_renewals_total` - Total number of dynamic lease renewals

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("vso_reconciliations_total", "Total number of reconciliations"),
        &["kind"],
    )
    .expect("failed to create RECONCILIATIONS_TOTAL metric")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vso_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("failed to create RECONCILIATION_ERRORS_TOTAL metric")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "vso_reconciliation_duration_seconds",
            "Duration of a reconcile attempt in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["kind"],
    )
    .expect("failed to create RECONCILIATION_DURATION metric")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("vso_requeues_total", "Total number of requeues, by reason"),
        &["reason"],
    )
    .expect("failed to create REQUEUES_TOTAL metric")
});

static DESTINATION_WRITES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vso_destination_writes_total",
        "Total number of destination secret writes",
    )
    .expect("failed to create DESTINATION_WRITES_TOTAL metric")
});

static DRIFT_SKIPPED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vso_drift_skipped_total",
        "Total number of reconciles that skipped a write because the MAC matched",
    )
    .expect("failed to create DRIFT_SKIPPED_TOTAL metric")
});

static CLIENT_CACHE_SIZE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "vso_client_cache_size",
        "Current number of entries in the authenticated-client cache",
    )
    .expect("failed to create CLIENT_CACHE_SIZE metric")
});

static LEASE_RENEWALS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("vso_lease_renewals_total", "Total number of dynamic lease renewals")
        .expect("failed to create LEASE_RENEWALS_TOTAL metric")
});

static ROLLOUT_RESTARTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "vso_rollout_restarts_total",
        "Total number of rollout restart annotations patched",
    )
    .expect("failed to create ROLLOUT_RESTARTS_TOTAL metric")
});

/// Register every metric with the process-wide [`REGISTRY`]. Called once at
/// startup; idempotent registration errors (e.g. under `cargo test`, where
/// multiple test binaries may share a process) are tolerated.
pub fn register_metrics() -> Result<()> {
    let _ = REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()));
    let _ = REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DESTINATION_WRITES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(DRIFT_SKIPPED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CLIENT_CACHE_SIZE.clone()));
    let _ = REGISTRY.register(Box::new(LEASE_RENEWALS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ROLLOUT_RESTARTS_TOTAL.clone()));
    Ok(())
}

/// Snapshot the registry's metric families, for the `/metrics` HTTP handler.
#[must_use]
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconcile_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration_secs: f64) {
    RECONCILIATION_DURATION.with_label_values(&[kind]).observe(duration_secs);
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_destination_writes() {
    DESTINATION_WRITES_TOTAL.inc();
}

pub fn increment_drift_skipped() {
    DRIFT_SKIPPED_TOTAL.inc();
}

pub fn set_client_cache_size(size: i64) {
    CLIENT_CACHE_SIZE.set(size);
}

pub fn increment_lease_renewals() {
    LEASE_RENEWALS_TOTAL.inc();
}

pub fn increment_rollout_restarts() {
    ROLLOUT_RESTARTS_TOTAL.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_metrics_is_idempotent() {
        assert!(register_metrics().is_ok());
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn gather_reflects_incremented_counters() {
        register_metrics().ok();
        increment_reconcile_errors();
        let families = gather();
        assert!(families.iter().any(|f| f.name() == "vso_reconciliation_errors_total"));
    }
}

//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `monitoring_operator_reconciliations_total` - Total number of reconciliations
//! - `monitoring_operator_reconciliation_errors_total` - Total number of failed reconciliations
//! - `monitoring_operator_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `monitoring_operator_scrape_jobs` - Scrape jobs in the last generated collector config
//! - `monitoring_operator_rule_files` - Rule files in the last generated rules config map
//! - `monitoring_operator_compile_failures` - Resources that failed to compile in the last pass
//! - `monitoring_operator_secret_watches_active` - Secrets currently watched
//! - `monitoring_operator_secret_watch_reopens_total` - Secret watches reopened after closing
//! - `monitoring_operator_ca_bundle_publications_total` - CA bundle writes into webhook configurations
//! - `monitoring_operator_ca_bundle_publication_errors_total` - Failed CA bundle writes
//! - `monitoring_operator_admission_requests_total` - Admission requests by kind, operation and outcome

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "monitoring_operator_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "monitoring_operator_reconciliation_errors_total",
        "Total number of failed reconciliations",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "monitoring_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static SCRAPE_JOBS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "monitoring_operator_scrape_jobs",
        "Number of scrape jobs in the last generated collector configuration",
    )
    .expect("Failed to create SCRAPE_JOBS metric - this should never happen")
});

static RULE_FILES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "monitoring_operator_rule_files",
        "Number of rule files in the last generated rules config map",
    )
    .expect("Failed to create RULE_FILES metric - this should never happen")
});

static COMPILE_FAILURES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "monitoring_operator_compile_failures",
        "Number of monitoring resources that failed to compile in the last reconciliation",
    )
    .expect("Failed to create COMPILE_FAILURES metric - this should never happen")
});

static SECRET_WATCHES_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "monitoring_operator_secret_watches_active",
        "Number of secrets currently watched",
    )
    .expect("Failed to create SECRET_WATCHES_ACTIVE metric - this should never happen")
});

static SECRET_WATCH_REOPENS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "monitoring_operator_secret_watch_reopens_total",
        "Total number of secret watches reopened after closing unexpectedly",
    )
    .expect("Failed to create SECRET_WATCH_REOPENS_TOTAL metric - this should never happen")
});

static CA_BUNDLE_PUBLICATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "monitoring_operator_ca_bundle_publications_total",
        "Total number of CA bundle writes into webhook configurations",
    )
    .expect("Failed to create CA_BUNDLE_PUBLICATIONS_TOTAL metric - this should never happen")
});

static CA_BUNDLE_PUBLICATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "monitoring_operator_ca_bundle_publication_errors_total",
        "Total number of failed CA bundle writes",
    )
    .expect(
        "Failed to create CA_BUNDLE_PUBLICATION_ERRORS_TOTAL metric - this should never happen",
    )
});

static ADMISSION_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "monitoring_operator_admission_requests_total",
            "Total number of admission requests by resource kind, operation and outcome",
        ),
        &["kind", "operation", "allowed"],
    )
    .expect("Failed to create ADMISSION_REQUESTS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(SCRAPE_JOBS.clone()))?;
    REGISTRY.register(Box::new(RULE_FILES.clone()))?;
    REGISTRY.register(Box::new(COMPILE_FAILURES.clone()))?;
    REGISTRY.register(Box::new(SECRET_WATCHES_ACTIVE.clone()))?;
    REGISTRY.register(Box::new(SECRET_WATCH_REOPENS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CA_BUNDLE_PUBLICATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CA_BUNDLE_PUBLICATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_REQUESTS_TOTAL.clone()))?;
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

/// Record the size and health of the last compilation pass
pub fn set_compile_result(scrape_jobs: usize, rule_files: usize, failures: usize) {
    SCRAPE_JOBS.set(saturating_i64(scrape_jobs));
    RULE_FILES.set(saturating_i64(rule_files));
    COMPILE_FAILURES.set(saturating_i64(failures));
}

pub fn set_active_secret_watches(count: usize) {
    SECRET_WATCHES_ACTIVE.set(saturating_i64(count));
}

pub fn increment_secret_watch_reopens() {
    SECRET_WATCH_REOPENS_TOTAL.inc();
}

pub fn increment_ca_bundle_publications() {
    CA_BUNDLE_PUBLICATIONS_TOTAL.inc();
}

pub fn increment_ca_bundle_publication_errors() {
    CA_BUNDLE_PUBLICATION_ERRORS_TOTAL.inc();
}

pub fn record_admission_request(kind: &str, operation: &str, allowed: bool) {
    ADMISSION_REQUESTS_TOTAL
        .with_label_values(&[kind, operation, if allowed { "true" } else { "false" }])
        .inc();
}

fn saturating_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // This should not panic - metrics should register successfully
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.get();
        increment_reconciliations();
        let after = RECONCILIATIONS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_reconciliation_errors() {
        let before = RECONCILIATION_ERRORS_TOTAL.get();
        increment_reconciliation_errors();
        let after = RECONCILIATION_ERRORS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_observe_reconciliation_duration() {
        observe_reconciliation_duration(1.5);
        // Just verify it doesn't panic - histogram observation doesn't return a value
    }

    #[test]
    fn test_set_compile_result() {
        set_compile_result(12, 3, 1);
        assert_eq!(SCRAPE_JOBS.get(), 12);
        assert_eq!(RULE_FILES.get(), 3);
        assert_eq!(COMPILE_FAILURES.get(), 1);
    }

    #[test]
    fn test_increment_secret_watch_reopens() {
        let before = SECRET_WATCH_REOPENS_TOTAL.get();
        increment_secret_watch_reopens();
        assert_eq!(SECRET_WATCH_REOPENS_TOTAL.get(), before + 1u64);
    }

    #[test]
    fn test_record_admission_request() {
        let counter = ADMISSION_REQUESTS_TOTAL.with_label_values(&["Rules", "CREATE", "false"]);
        let before = counter.get();
        record_admission_request("Rules", "CREATE", false);
        assert_eq!(counter.get(), before + 1u64);
    }

    #[test]
    fn test_saturating_i64() {
        assert_eq!(saturating_i64(7), 7);
        assert_eq!(saturating_i64(usize::MAX), i64::MAX);
    }
}

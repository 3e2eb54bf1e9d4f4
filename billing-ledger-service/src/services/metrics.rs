//! Prometheus metrics for billing-ledger-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Ledger operation counter by operation and outcome.
pub static LEDGER_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_operations_total",
        "Total number of ledger transactions by operation",
        &["operation", "status"]
    )
    .expect("Failed to register ledger_operations_total")
});

/// Time spent inside a ledger transaction, including the commit.
pub static TRANSACTION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ledger_transaction_duration_seconds",
        "Ledger transaction duration in seconds",
        &["operation"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register ledger_transaction_duration")
});

/// Import rows by outcome (imported, duplicate, skipped_out, error).
pub static IMPORT_ROWS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_import_rows_total",
        "Total number of statement rows processed by outcome",
        &["outcome"]
    )
    .expect("Failed to register ledger_import_rows_total")
});

/// Job attempts by type and outcome (done, retry, failed).
pub static JOBS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_jobs_total",
        "Total number of job attempts by type and outcome",
        &["job_type", "status"]
    )
    .expect("Failed to register ledger_jobs_total")
});

pub static JOB_ATTEMPT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ledger_job_attempt_duration_seconds",
        "Job attempt duration in seconds",
        &["job_type"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to register ledger_job_attempt_duration")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ledger_errors_total",
        "Total number of ledger errors by type",
        &["error_type"]
    )
    .expect("Failed to register ledger_errors_total")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&LEDGER_OPERATIONS_TOTAL);
    Lazy::force(&TRANSACTION_DURATION);
    Lazy::force(&IMPORT_ROWS_TOTAL);
    Lazy::force(&JOBS_TOTAL);
    Lazy::force(&JOB_ATTEMPT_DURATION);
    Lazy::force(&ERRORS_TOTAL);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_operation(operation: &str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    LEDGER_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

pub fn record_import_rows(outcome: &str, count: usize) {
    if count > 0 {
        IMPORT_ROWS_TOTAL
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }
}

pub fn record_job(job_type: &str, status: &str) {
    JOBS_TOTAL.with_label_values(&[job_type, status]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exported_text_contains_recorded_operations() {
        init_metrics();
        record_operation("metrics_selftest", true);
        let text = get_metrics();
        assert!(text.contains("ledger_operations_total"));
        assert!(text.contains("metrics_selftest"));
    }
}

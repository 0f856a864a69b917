use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec, TextEncoder,
};

// Metrics registry
static RATE_LIMIT_CHECKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_checks_total",
        "Total number of rate limit checks by outcome",
        &["policy", "outcome"]
    )
    .unwrap()
});

static RATE_LIMIT_EXCEEDED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_exceeded_total",
        "Total number of rate limit violations",
        &["policy", "scope"]
    )
    .unwrap()
});

static STORE_FALLBACK_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "rate_limit_store_fallback_total",
        "Increments served in-memory after a distributed store failure"
    )
    .unwrap()
});

pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn record_rate_limit_check(policy: &str, outcome: &str) {
        RATE_LIMIT_CHECKS_TOTAL
            .with_label_values(&[policy, outcome])
            .inc();
    }

    pub fn record_rate_limit_exceeded(policy: &str, scope: &str) {
        RATE_LIMIT_EXCEEDED_TOTAL
            .with_label_values(&[policy, scope])
            .inc();
    }

    pub fn record_store_fallback() {
        STORE_FALLBACK_TOTAL.inc();
    }

    /// Export all metrics in Prometheus format
    pub fn export() -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        encoder.encode_to_string(&metric_families)
    }
}

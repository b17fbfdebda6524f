//! Prometheus metrics for decoy.
//!
//! Tracks imposter traffic, stub matching and injected script execution.
use crate::scripting::{InjectionFault, ScriptRole};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

lazy_static! {
    /// Requests handled by imposters
    pub static ref IMPOSTER_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "decoy_imposter_requests_total",
        "Total number of requests handled by imposters",
        &["port", "protocol", "outcome"]  // outcome: matched|unmatched|fault
    )
    .unwrap();

    /// Active imposters
    pub static ref IMPOSTERS_ACTIVE: Gauge = register_gauge!(
        "decoy_imposters_active",
        "Number of imposters currently listening"
    )
    .unwrap();

    /// Injected script execution duration
    pub static ref INJECTION_DURATION_MS: HistogramVec = register_histogram_vec!(
        "decoy_injection_duration_ms",
        "Histogram of injected script execution time in milliseconds",
        &["role", "result"],  // role: predicate|response, result: ok|<fault kind>
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0]
    )
    .unwrap();

    /// Injection faults
    pub static ref INJECTION_FAULTS_TOTAL: CounterVec = register_counter_vec!(
        "decoy_injection_faults_total",
        "Total number of injected script faults",
        &["role", "kind"]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_imposter_request(port: u16, protocol: &str, outcome: &str) {
    IMPOSTER_REQUESTS_TOTAL
        .with_label_values(&[&port.to_string(), protocol, outcome])
        .inc();
}

pub fn set_active_imposters(count: usize) {
    IMPOSTERS_ACTIVE.set(count as f64);
}

pub fn record_injection(role: ScriptRole, result: &Result<Value, InjectionFault>, elapsed: Duration) {
    let label = match result {
        Ok(_) => "ok",
        Err(fault) => {
            INJECTION_FAULTS_TOTAL
                .with_label_values(&[role.as_str(), fault.kind()])
                .inc();
            fault.kind()
        }
    };
    INJECTION_DURATION_MS
        .with_label_values(&[role.as_str(), label])
        .observe(elapsed.as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_metrics_includes_recorded_series() {
        record_imposter_request(4545, "http", "matched");
        record_injection(
            ScriptRole::Predicate,
            &Err(InjectionFault::NeverCompleted),
            Duration::from_millis(3),
        );
        let text = collect_metrics();
        assert!(text.contains("decoy_imposter_requests_total"));
        assert!(text.contains("decoy_injection_faults_total"));
        assert!(text.contains("never_completed"));
    }
}

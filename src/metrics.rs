//! Prometheus metrics for the dimensions engine
//!
//! Metrics are registered in the default registry on first use and only
//! recorded when the engine is built with metrics enabled.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Raw events accepted by `process_event`
    pub static ref EVENTS_TOTAL: IntCounter = register_int_counter!(
        "dimensions_events_total",
        "Raw events processed by the fan-out dispatcher"
    ).unwrap();

    /// Canonical events merged into a slot or emitted in pass-through mode
    pub static ref MERGES_TOTAL: IntCounter = register_int_counter!(
        "dimensions_merges_total",
        "Canonical events merged or passed through"
    ).unwrap();

    /// (combination, aggregator) pairs skipped after a conversion failure
    pub static ref PAIRS_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dimensions_pairs_skipped_total",
        "Fan-out pairs skipped because conversion failed",
        &["combination", "aggregator"]
    ).unwrap();

    /// Events rejected as a whole under the fail-event policy
    pub static ref EVENTS_FAILED_TOTAL: IntCounter = register_int_counter!(
        "dimensions_events_failed_total",
        "Events rejected because a conversion failed"
    ).unwrap();

    /// Finished aggregate records handed to the sink
    pub static ref AGGREGATES_EMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "dimensions_aggregates_emitted_total",
        "Aggregate records emitted downstream",
        &["mode"]
    ).unwrap();

    /// Time spent draining slots at window close
    pub static ref FLUSH_DURATION: Histogram = register_histogram!(
        "dimensions_flush_duration_seconds",
        "Window flush latency in seconds",
        vec![0.0001, 0.001, 0.01, 0.1, 0.5, 1.0]
    ).unwrap();

    /// Aggregates held across all slots
    pub static ref OPEN_AGGREGATES: IntGauge = register_int_gauge!(
        "dimensions_open_aggregates",
        "Aggregates currently held in slots"
    ).unwrap();
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        EVENTS_TOTAL.inc();
        AGGREGATES_EMITTED_TOTAL.with_label_values(&["accumulate"]).inc();
        let text = gather_metrics();
        assert!(text.contains("dimensions_events_total"));
        assert!(text.contains("dimensions_aggregates_emitted_total"));
    }
}

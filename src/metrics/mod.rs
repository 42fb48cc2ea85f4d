//! Metrics collection for observability

use prometheus::{
    Counter, CounterVec, Histogram, HistogramOpts, IntGauge, Opts, Registry,
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, register_int_gauge_with_registry,
};
use std::sync::Arc;
use once_cell::sync::Lazy;

/// Global metrics registry
pub static ENGINE_METRICS: Lazy<Arc<EngineMetrics>> = Lazy::new(|| {
    Arc::new(EngineMetrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct EngineMetrics {
    registry: Registry,

    // Engine operations
    pub validations: CounterVec,
    pub learn_requests: Counter,
    pub analysis_duration: Histogram,

    // Analyzer output
    pub issues_detected: CounterVec,

    // Transformer
    pub transform_failures: Counter,

    // Pattern sources
    pub index_lookups: CounterVec,

    // Memory store
    pub store_fallbacks: Counter,
    pub contexts_recorded: Counter,
    pub memory_window_size: IntGauge,
}

impl EngineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let validations = register_counter_vec_with_registry!(
            Opts::new("quality_validations_total", "Total validate_and_improve calls by outcome"),
            &["status"],
            registry
        )?;

        let learn_requests = register_counter_with_registry!(
            Opts::new("quality_learn_requests_total", "Total learn calls"),
            registry
        )?;

        let analysis_duration = register_histogram_with_registry!(
            HistogramOpts::new(
                "quality_analysis_duration_seconds",
                "Snippet analysis duration in seconds"
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            registry
        )?;

        let issues_detected = register_counter_vec_with_registry!(
            Opts::new("quality_issues_detected_total", "Detected issues by kind"),
            &["kind"],
            registry
        )?;

        let transform_failures = register_counter_with_registry!(
            Opts::new("quality_transform_failures_total", "Transformations rolled back"),
            registry
        )?;

        let index_lookups = register_counter_vec_with_registry!(
            Opts::new("quality_index_lookups_total", "Semantic index lookups by outcome"),
            &["outcome"],
            registry
        )?;

        let store_fallbacks = register_counter_with_registry!(
            Opts::new("quality_store_fallbacks_total", "Switches to ephemeral memory"),
            registry
        )?;

        let contexts_recorded = register_counter_with_registry!(
            Opts::new("quality_contexts_recorded_total", "Context records appended"),
            registry
        )?;

        let memory_window_size = register_int_gauge_with_registry!(
            Opts::new("quality_memory_window_size", "Records currently held in the memory window"),
            registry
        )?;

        Ok(Self {
            registry,
            validations,
            learn_requests,
            analysis_duration,
            issues_detected,
            transform_failures,
            index_lookups,
            store_fallbacks,
            contexts_recorded,
            memory_window_size,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a finished validation
    pub fn record_validation(&self, status: &str) {
        self.validations.with_label_values(&[status]).inc();
    }

    /// Record an issue of the given kind
    pub fn record_issue(&self, kind: &str) {
        self.issues_detected.with_label_values(&[kind]).inc();
    }

    /// Record a semantic index lookup outcome (hit, empty, timeout, error, breaker_open)
    pub fn record_index_lookup(&self, outcome: &str) {
        self.index_lookups.with_label_values(&[outcome]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = EngineMetrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_record_and_export() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_validation("improved");
        metrics.record_issue("eval_usage");
        metrics.record_index_lookup("timeout");
        metrics.memory_window_size.set(3);

        let text = metrics.export_prometheus();
        assert!(text.contains("quality_validations_total"));
        assert!(text.contains("eval_usage"));
        assert!(text.contains("quality_memory_window_size 3"));
    }
}

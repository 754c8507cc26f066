//! Metrics port for the read and write coordinators
//!
//! Coordinators never look metrics up from global state; a [`Metrics`]
//! implementation is injected at construction and defaults to [`NoopMetrics`].
//!
//! # Example
//!
//! ```rust,ignore
//! use rivven_spanner::prelude::*;
//!
//! let metrics = MetricsCollector::shared();
//! let writer = SpannerWriter::new(client, config).with_metrics(metrics.clone());
//! writer.write(groups).await?;
//!
//! let snapshot = metrics.snapshot();
//! println!("{:?}", snapshot.counter(metric_names::BATCHES_COMMITTED));
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metric types
#[derive(Debug, Clone)]
pub enum MetricValue {
    /// A counter that only goes up
    Counter(u64),
    /// A histogram of values
    Histogram(HistogramSnapshot),
}

/// Snapshot of histogram data
#[derive(Debug, Clone, Default)]
pub struct HistogramSnapshot {
    /// Total count of observations
    pub count: u64,
    /// Sum of all observations
    pub sum: f64,
    /// Minimum observed value
    pub min: f64,
    /// Maximum observed value
    pub max: f64,
}

impl HistogramSnapshot {
    /// Mean of all observations
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// A metric label pair
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct Label {
    /// Label name
    pub name: String,
    /// Label value
    pub value: String,
}

impl Label {
    /// Create a new label
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Sink for coordinator metrics
pub trait Metrics: Send + Sync {
    /// Increment a counter by the given value
    fn increment(&self, name: &str, value: u64);

    /// Increment a counter with labels
    fn increment_with_labels(&self, name: &str, value: u64, labels: &[Label]);

    /// Record a histogram observation
    fn histogram(&self, name: &str, value: f64);

    /// Get all current metrics
    fn snapshot(&self) -> MetricsSnapshot;
}

/// A snapshot of all metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// All metrics keyed by name (labels folded into the key)
    pub metrics: HashMap<String, MetricValue>,
}

impl MetricsSnapshot {
    /// Get a counter value
    pub fn counter(&self, name: &str) -> Option<u64> {
        match self.metrics.get(name) {
            Some(MetricValue::Counter(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get a labelled counter value
    pub fn counter_with_labels(&self, name: &str, labels: &[Label]) -> Option<u64> {
        self.counter(&metric_key(name, labels))
    }

    /// Get a histogram snapshot
    pub fn histogram(&self, name: &str) -> Option<&HistogramSnapshot> {
        match self.metrics.get(name) {
            Some(MetricValue::Histogram(h)) => Some(h),
            _ => None,
        }
    }
}

/// Key under which a labelled metric is stored: `name{k=v,...}`
pub fn metric_key(name: &str, labels: &[Label]) -> String {
    if labels.is_empty() {
        name.to_string()
    } else {
        let label_str: Vec<_> = labels
            .iter()
            .map(|l| format!("{}={}", l.name, l.value))
            .collect();
        format!("{}{{{}}}", name, label_str.join(","))
    }
}

/// Simple in-memory metrics collector
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<HashMap<String, AtomicU64>>,
    histograms: RwLock<HashMap<String, HistogramSnapshot>>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared metrics collector
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Metrics for MetricsCollector {
    fn increment(&self, name: &str, value: u64) {
        let counters = self.counters.read();
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
        } else {
            drop(counters);
            let mut counters = self.counters.write();
            counters
                .entry(name.to_string())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(value, Ordering::Relaxed);
        }
    }

    fn increment_with_labels(&self, name: &str, value: u64, labels: &[Label]) {
        self.increment(&metric_key(name, labels), value);
    }

    fn histogram(&self, name: &str, value: f64) {
        let mut histograms = self.histograms.write();
        let hist = histograms
            .entry(name.to_string())
            .or_insert_with(|| HistogramSnapshot {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                ..Default::default()
            });
        hist.count += 1;
        hist.sum += value;
        hist.min = hist.min.min(value);
        hist.max = hist.max.max(value);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let mut metrics = HashMap::new();

        for (name, counter) in self.counters.read().iter() {
            metrics.insert(
                name.clone(),
                MetricValue::Counter(counter.load(Ordering::Relaxed)),
            );
        }
        for (name, hist) in self.histograms.read().iter() {
            metrics.insert(name.clone(), MetricValue::Histogram(hist.clone()));
        }

        MetricsSnapshot { metrics }
    }
}

/// No-op metrics implementation
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment(&self, _name: &str, _value: u64) {}
    fn increment_with_labels(&self, _name: &str, _value: u64, _labels: &[Label]) {}
    fn histogram(&self, _name: &str, _value: f64) {}

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
}

/// Standard metric names
pub mod metric_names {
    /// Batches for which a commit was attempted
    pub const BATCHES_ATTEMPTED: &str = "rivven_spanner_batches_attempted_total";
    /// Batches committed successfully
    pub const BATCHES_COMMITTED: &str = "rivven_spanner_batches_committed_total";
    /// Storage calls, labelled by `method` and `status`
    pub const API_REQUESTS: &str = "rivven_spanner_api_requests_total";
    /// Commit latency histogram
    pub const COMMIT_LATENCY: &str = "rivven_spanner_commit_latency_seconds";
    /// Partitions generated
    pub const PARTITIONS: &str = "rivven_spanner_partitions_total";
    /// Rows emitted by reads
    pub const ROWS_READ: &str = "rivven_spanner_rows_read_total";
}

/// Labels for one storage call outcome
pub(crate) fn request_labels(method: &str, status: &str) -> [Label; 2] {
    [Label::new("method", method), Label::new("status", status)]
}

/// Count one storage call under `status=ok` or its error category
pub(crate) fn record_request<T>(
    metrics: &dyn Metrics,
    method: &str,
    result: &crate::error::Result<T>,
) {
    let status = match result {
        Ok(_) => "ok".to_string(),
        Err(e) => e.category().to_string(),
    };
    metrics.increment_with_labels(
        metric_names::API_REQUESTS,
        1,
        &request_labels(method, &status),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_counter() {
        let collector = MetricsCollector::new();
        collector.increment("test_counter", 5);
        collector.increment("test_counter", 3);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.counter("test_counter"), Some(8));
        assert_eq!(snapshot.counter("missing"), None);
    }

    #[test]
    fn test_metrics_collector_histogram() {
        let collector = MetricsCollector::new();
        for i in 1..=4 {
            collector.histogram("latency", i as f64);
        }

        let snapshot = collector.snapshot();
        let hist = snapshot.histogram("latency").unwrap();
        assert_eq!(hist.count, 4);
        assert_eq!(hist.min, 1.0);
        assert_eq!(hist.max, 4.0);
        assert_eq!(hist.mean(), 2.5);
    }

    #[test]
    fn test_metrics_with_labels() {
        let collector = MetricsCollector::new();
        let labels = request_labels("commit", "ok");
        collector.increment_with_labels(metric_names::API_REQUESTS, 1, &labels);

        let snapshot = collector.snapshot();
        assert_eq!(
            snapshot.counter("rivven_spanner_api_requests_total{method=commit,status=ok}"),
            Some(1)
        );
        assert_eq!(
            snapshot.counter_with_labels(metric_names::API_REQUESTS, &labels),
            Some(1)
        );
    }

    #[test]
    fn test_noop_metrics() {
        let metrics = NoopMetrics;
        metrics.increment("ignored", 1);
        assert!(metrics.snapshot().metrics.is_empty());
    }
}

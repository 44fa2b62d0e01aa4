//! Telemetry sink interface and in-crate collectors.
//!
//! The container emits a small fixed set of counters (`resolve.count`,
//! `resolve.miss`, `resolve.error`, `analysis.count`, `scope.begin`,
//! `scope.end`, `bootstrap_completed`) and per-resolve observations.
//! Concrete exporters live outside the crate; these types are the seam.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;
use dashmap::DashMap;

/// Counter and observation surface the container emits into.
pub trait TelemetrySink: Send + Sync {
    /// Add `delta` to a named counter.
    fn increment(&self, metric: &str, delta: u64);

    /// Record one sample of a named gauge or histogram.
    fn observe(&self, metric: &str, value: f64);
}

/// A sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    #[inline]
    fn increment(&self, _metric: &str, _delta: u64) {}

    #[inline]
    fn observe(&self, _metric: &str, _value: f64) {}
}

/// An in-memory sink that keeps everything it sees. Intended for tests
/// and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingSink {
    counters: DashMap<String, u64, RandomState>,
    observations: DashMap<String, Vec<f64>, RandomState>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 when never incremented).
    pub fn count(&self, metric: &str) -> u64 {
        self.counters.get(metric).map(|v| *v).unwrap_or(0)
    }

    /// All recorded samples for a metric, in emission order.
    pub fn observations(&self, metric: &str) -> Vec<f64> {
        self.observations
            .get(metric)
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

impl TelemetrySink for RecordingSink {
    fn increment(&self, metric: &str, delta: u64) {
        *self.counters.entry(metric.to_string()).or_insert(0) += delta;
    }

    fn observe(&self, metric: &str, value: f64) {
        self.observations
            .entry(metric.to_string())
            .or_default()
            .push(value);
    }
}

/// Applies the profile's sampling rate to observations before forwarding.
///
/// Sampling happens here, in the collector, never at emission sites.
/// Counters always pass through; only observations are sampled. The
/// sampling decision uses a deterministic linear congruential sequence so
/// test runs are reproducible.
pub struct SamplingCollector {
    inner: Arc<dyn TelemetrySink>,
    rate: f64,
    state: AtomicU64,
}

impl SamplingCollector {
    /// Wrap a sink with a sampling rate clamped to `[0, 1]`.
    pub fn new(inner: Arc<dyn TelemetrySink>, rate: f64) -> Self {
        Self {
            inner,
            rate: rate.clamp(0.0, 1.0),
            state: AtomicU64::new(0x9E3779B97F4A7C15),
        }
    }

    fn sample(&self) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        let next = self
            .state
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| {
                Some(s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407))
            })
            .unwrap_or(0);
        ((next >> 11) as f64 / (1u64 << 53) as f64) < self.rate
    }
}

impl TelemetrySink for SamplingCollector {
    fn increment(&self, metric: &str, delta: u64) {
        self.inner.increment(metric, delta);
    }

    fn observe(&self, metric: &str, value: f64) {
        if self.sample() {
            self.inner.observe(metric, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_counts() {
        let sink = RecordingSink::new();
        sink.increment("resolve.count", 1);
        sink.increment("resolve.count", 1);
        assert_eq!(sink.count("resolve.count"), 2);
        assert_eq!(sink.count("resolve.miss"), 0);
    }

    #[test]
    fn test_recording_sink_observations() {
        let sink = RecordingSink::new();
        sink.observe("resolve.duration_us", 12.5);
        sink.observe("resolve.duration_us", 9.0);
        assert_eq!(sink.observations("resolve.duration_us"), vec![12.5, 9.0]);
    }

    #[test]
    fn test_sampling_zero_drops_observations() {
        let inner = Arc::new(RecordingSink::new());
        let collector = SamplingCollector::new(inner.clone(), 0.0);
        for _ in 0..100 {
            collector.observe("x", 1.0);
        }
        assert!(inner.observations("x").is_empty());
    }

    #[test]
    fn test_sampling_never_drops_counters() {
        let inner = Arc::new(RecordingSink::new());
        let collector = SamplingCollector::new(inner.clone(), 0.0);
        collector.increment("bootstrap_completed", 1);
        assert_eq!(inner.count("bootstrap_completed"), 1);
    }

    #[test]
    fn test_sampling_partial_records_subset() {
        let inner = Arc::new(RecordingSink::new());
        let collector = SamplingCollector::new(inner.clone(), 0.5);
        for _ in 0..1000 {
            collector.observe("x", 1.0);
        }
        let recorded = inner.observations("x").len();
        assert!(recorded > 300 && recorded < 700, "recorded {recorded}");
    }
}

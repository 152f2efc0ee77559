//! Operational metrics with Prometheus
//!
//! Exposes counters for the engine hot paths:
//! - Assignments by allocation method and outcome
//! - Tracked events and ledger evictions
//! - Analysis latency
//! - Retention sweep removals
//!
//! NOTE: Experiment and participant ids are never used as labels to prevent
//! high-cardinality explosion.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Assignment Metrics
    // ============================================================================

    /// Assignment calls by method (random/hash/sticky) and result
    pub static ref ASSIGNMENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("experiment_assignments_total", "Total assignment calls"),
        &["method", "result"]
    ).unwrap();

    /// Sticky bucket cache hits
    pub static ref STICKY_CACHE_HITS: IntCounter = IntCounter::new(
        "experiment_sticky_cache_hits_total",
        "Sticky assignments served from the participant bucket cache"
    ).unwrap();

    // ============================================================================
    // Ledger Metrics
    // ============================================================================

    /// Track calls by result (recorded / ignored_inactive / ignored_unassigned / ...)
    pub static ref EVENTS_TRACKED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("experiment_events_tracked_total", "Total track calls"),
        &["result"]
    ).unwrap();

    /// Events dropped because the ledger was full
    pub static ref LEDGER_EVICTIONS_TOTAL: IntCounter = IntCounter::new(
        "experiment_ledger_evictions_total",
        "Metric events evicted from the capped ledger"
    ).unwrap();

    /// Subscriber handler failures (errors and panics)
    pub static ref HANDLER_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "experiment_event_handler_failures_total",
        "Event subscriber handlers that returned an error or panicked"
    ).unwrap();

    // ============================================================================
    // Analysis Metrics
    // ============================================================================

    /// Analysis duration
    pub static ref ANALYSIS_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "experiment_analysis_duration_seconds",
            "Statistical analysis duration"
        )
        .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5])
    ).unwrap();

    /// Debounced analyses that fired
    pub static ref DEBOUNCED_ANALYSES_TOTAL: IntCounter = IntCounter::new(
        "experiment_debounced_analyses_total",
        "Re-analyses triggered after a burst of track calls"
    ).unwrap();

    // ============================================================================
    // Lifecycle Metrics
    // ============================================================================

    /// Experiments currently registered
    pub static ref EXPERIMENTS_REGISTERED: IntGauge = IntGauge::new(
        "experiment_registered",
        "Experiments currently held by the registry"
    ).unwrap();

    /// Records removed by retention sweeps (kind: event / assignment)
    pub static ref SWEEP_REMOVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("experiment_sweep_removed_total", "Records removed by retention sweeps"),
        &["kind"]
    ).unwrap();
}

/// Register all metrics with the global registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    METRICS_REGISTRY.register(Box::new(ASSIGNMENTS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(STICKY_CACHE_HITS.clone()))?;

    METRICS_REGISTRY.register(Box::new(EVENTS_TRACKED_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(LEDGER_EVICTIONS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(HANDLER_FAILURES_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(ANALYSIS_DURATION.clone()))?;
    METRICS_REGISTRY.register(Box::new(DEBOUNCED_ANALYSES_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(EXPERIMENTS_REGISTERED.clone()))?;
    METRICS_REGISTRY.register(Box::new(SWEEP_REMOVED_TOTAL.clone()))?;

    Ok(())
}

/// Helper to time operations with histogram (RAII pattern)
/// Usage: let _timer = Timer::new(ANALYSIS_DURATION.clone());
pub struct Timer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl Timer {
    /// Create timer that records duration to histogram on drop
    pub fn new(histogram: Histogram) -> Self {
        Self {
            histogram,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_once() {
        // Registration is global; a second call must fail with AlreadyReg
        assert!(register_metrics().is_ok());
        assert!(register_metrics().is_err());
    }

    #[test]
    fn test_timer_observes_on_drop() {
        let before = ANALYSIS_DURATION.get_sample_count();
        {
            let _timer = Timer::new(ANALYSIS_DURATION.clone());
        }
        assert!(ANALYSIS_DURATION.get_sample_count() > before);
    }
}

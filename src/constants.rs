//! Documented constants for the experimentation engine
//!
//! Tunable parameters and statistical thresholds live here with the reason
//! for their values. Centralizing them prevents magic numbers in the
//! analyzer and keeps defaults in `config` consistent.

// =============================================================================
// REGISTRY CONSTANTS
// =============================================================================

/// Allowed deviation of summed traffic shares from 100
///
/// Justification:
/// - Shares are usually entered as decimals (33.33 / 33.33 / 33.34)
/// - 0.01 absorbs rounding in the second decimal place without letting
///   a genuinely under-allocated experiment through
pub const TRAFFIC_SUM_TOLERANCE: f64 = 0.01;

/// Total traffic every experiment must allocate
pub const TRAFFIC_TOTAL: f64 = 100.0;

/// Minimum number of variations (control + at least one treatment)
pub const MIN_VARIATIONS: usize = 2;

/// Maximum length of experiment, variation, metric and participant ids
pub const MAX_ID_LENGTH: usize = 128;

// =============================================================================
// ASSIGNMENT CONSTANTS
// =============================================================================

/// Number of hash buckets participants are mapped into
///
/// One bucket per traffic percentage point, so a share of 25 owns 25 buckets.
pub const HASH_BUCKETS: u32 = 100;

/// Multiplier of the polynomial rolling hash over participant ids
pub const HASH_MULTIPLIER: i32 = 31;

// =============================================================================
// LEDGER CONSTANTS
// =============================================================================

/// Default capacity of the global metric event buffer
///
/// Justification:
/// - Bounds memory to roughly a few MB even with metadata attached
/// - Large enough that debounced re-analysis sees every event of a burst
/// - Eviction is oldest-first and independent of per-experiment retention
pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

/// Default retention window for metric events and assignments (days)
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Capacity of the broadcast channel feeding `subscribe()` receivers
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// SCHEDULER CONSTANTS
// =============================================================================

/// Default quiet period before a burst of `track` calls triggers analysis (ms)
pub const DEFAULT_DEBOUNCE_MS: u64 = 10_000;

/// Default interval between retention sweeps (seconds, 24 hours)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 86_400;

// =============================================================================
// STATISTICAL CONSTANTS
// =============================================================================

/// Significance level for hypothesis tests (p < 0.05)
pub const DEFAULT_SIGNIFICANCE_LEVEL: f64 = 0.05;

/// Critical value for 95% intervals (large-sample normal approximation)
pub const Z_CRITICAL_95: f64 = 1.96;

/// Degrees of freedom above which the t distribution is treated as normal
pub const NORMAL_APPROXIMATION_DF: f64 = 30.0;

/// Observations each arm needs before a pairwise test is run
///
/// A single observation has no variance, so its standard error is undefined.
pub const MIN_OBSERVATIONS_PER_ARM: u64 = 2;

/// Upper bound on reported winner confidence
///
/// Approximated p-values underflow to zero for large effects; reporting
/// certainty would overstate what the approximations can support.
pub const MAX_WINNER_CONFIDENCE: f64 = 0.99;

/// p-value threshold for sample ratio mismatch detection
///
/// Stricter than the test alpha because SRM flags a data quality problem,
/// and a false alarm invalidates an otherwise healthy experiment.
pub const SRM_P_THRESHOLD: f64 = 0.01;

/// Participants required before sample ratio mismatch is evaluated
pub const SRM_MIN_SAMPLE_SIZE: u64 = 100;

// =============================================================================
// RECOMMENDATION CONSTANTS
// =============================================================================

/// Confidence attached to an `extend` recommendation
pub const EXTEND_CONFIDENCE: f64 = 0.8;

/// Confidence attached to a `modify` recommendation for low power
pub const LOW_POWER_CONFIDENCE: f64 = 0.9;

/// Confidence attached to a `stop` recommendation issued at the scheduled end
pub const EXPIRED_STOP_CONFIDENCE: f64 = 0.7;

/// Default target statistics
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
pub const DEFAULT_MINIMUM_DETECTABLE_EFFECT: f64 = 0.05;
pub const DEFAULT_TARGET_POWER: f64 = 0.8;

/// Default minimum sample size when none is configured
pub const DEFAULT_MIN_SAMPLE_SIZE: u64 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_buckets_cover_traffic_total() {
        assert_eq!(HASH_BUCKETS as f64, TRAFFIC_TOTAL);
    }

    #[test]
    fn test_srm_threshold_stricter_than_alpha() {
        assert!(SRM_P_THRESHOLD < DEFAULT_SIGNIFICANCE_LEVEL);
    }

    #[test]
    fn test_recommendation_confidences_ordered() {
        assert!(LOW_POWER_CONFIDENCE > EXTEND_CONFIDENCE);
        assert!(EXTEND_CONFIDENCE > EXPIRED_STOP_CONFIDENCE);
        assert!(MAX_WINNER_CONFIDENCE < 1.0);
    }
}

//! Configuration management for the experiment engine
//!
//! All configurable parameters in one place with environment variable overrides.
//! Sensible defaults, configurable in production.

use std::env;
use std::time::Duration;
use tracing::info;

use crate::constants::{
    DEFAULT_DEBOUNCE_MS, DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_LEDGER_CAPACITY,
    DEFAULT_RETENTION_DAYS, DEFAULT_SIGNIFICANCE_LEVEL, DEFAULT_SWEEP_INTERVAL_SECS,
};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum metric events held in the global ledger (default: 10,000)
    /// Oldest events are evicted first once the buffer is full
    pub ledger_capacity: usize,

    /// Quiet period after the last `track` before re-analysis runs (default: 10s)
    pub debounce_ms: u64,

    /// Metric events and assignments older than this are swept (default: 30 days)
    pub retention_days: i64,

    /// Interval between retention sweeps in seconds (default: 86400 = 24 hours)
    pub sweep_interval_secs: u64,

    /// Alpha for pairwise tests and Benjamini-Hochberg re-evaluation (default: 0.05)
    pub significance_level: f64,

    /// Buffered events per `subscribe()` receiver before lagging (default: 1024)
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            retention_days: DEFAULT_RETENTION_DAYS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            significance_level: DEFAULT_SIGNIFICANCE_LEVEL,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)] // Environment overrides require mutable config
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("EXPERIMENT_LEDGER_CAPACITY") {
            if let Ok(n) = val.parse::<usize>() {
                config.ledger_capacity = n.clamp(1, 10_000_000);
            }
        }

        if let Ok(val) = env::var("EXPERIMENT_DEBOUNCE_MS") {
            if let Ok(n) = val.parse() {
                config.debounce_ms = n;
            }
        }

        if let Ok(val) = env::var("EXPERIMENT_RETENTION_DAYS") {
            if let Ok(n) = val.parse::<i64>() {
                config.retention_days = n.clamp(1, 3650);
            }
        }

        if let Ok(val) = env::var("EXPERIMENT_SWEEP_INTERVAL_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.sweep_interval_secs = n.max(1);
            }
        }

        if let Ok(val) = env::var("EXPERIMENT_SIGNIFICANCE_LEVEL") {
            if let Ok(n) = val.parse::<f64>() {
                config.significance_level = n.clamp(0.001, 0.1);
            }
        }

        if let Ok(val) = env::var("EXPERIMENT_EVENT_CHANNEL_CAPACITY") {
            if let Ok(n) = val.parse::<usize>() {
                config.event_channel_capacity = n.max(1);
            }
        }

        config
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Experiment engine configuration:");
        info!("   Ledger capacity: {} events", self.ledger_capacity);
        info!("   Re-analysis debounce: {}ms", self.debounce_ms);
        info!(
            "   Retention: {} days (sweep every {}h)",
            self.retention_days,
            self.sweep_interval_secs / 3600
        );
        info!("   Significance level: {:.3}", self.significance_level);
    }
}

/// Environment variable documentation
pub fn env_help() -> &'static str {
    "Experiment engine configuration environment variables:\n\
     \n\
     \x20 EXPERIMENT_LEDGER_CAPACITY        - Max buffered metric events (default: 10000)\n\
     \x20 EXPERIMENT_DEBOUNCE_MS            - Re-analysis quiet period (default: 10000)\n\
     \x20 EXPERIMENT_RETENTION_DAYS         - Event/assignment retention (default: 30)\n\
     \x20 EXPERIMENT_SWEEP_INTERVAL_SECS    - Retention sweep interval (default: 86400)\n\
     \x20 EXPERIMENT_SIGNIFICANCE_LEVEL     - Test alpha, 0.001-0.1 (default: 0.05)\n\
     \x20 EXPERIMENT_EVENT_CHANNEL_CAPACITY - Subscriber buffer (default: 1024)\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.ledger_capacity, 10_000);
        assert_eq!(config.debounce(), Duration::from_secs(10));
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.sweep_interval(), Duration::from_secs(86_400));
        assert!((config.significance_level - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_env_overrides_are_clamped() {
        env::set_var("EXPERIMENT_LEDGER_CAPACITY", "500");
        env::set_var("EXPERIMENT_SIGNIFICANCE_LEVEL", "0.5");
        env::set_var("EXPERIMENT_RETENTION_DAYS", "not-a-number");

        let config = EngineConfig::from_env();

        env::remove_var("EXPERIMENT_LEDGER_CAPACITY");
        env::remove_var("EXPERIMENT_SIGNIFICANCE_LEVEL");
        env::remove_var("EXPERIMENT_RETENTION_DAYS");

        assert_eq!(config.ledger_capacity, 500);
        assert!((config.significance_level - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.retention_days, 30);
    }

    #[test]
    fn test_env_help_lists_every_variable() {
        let help = env_help();
        for var in [
            "EXPERIMENT_LEDGER_CAPACITY",
            "EXPERIMENT_DEBOUNCE_MS",
            "EXPERIMENT_RETENTION_DAYS",
            "EXPERIMENT_SWEEP_INTERVAL_SECS",
            "EXPERIMENT_SIGNIFICANCE_LEVEL",
            "EXPERIMENT_EVENT_CHANNEL_CAPACITY",
        ] {
            assert!(help.contains(var), "missing {var}");
        }
    }
}

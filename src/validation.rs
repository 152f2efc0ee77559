//! Experiment configuration validation
//!
//! A configuration is either accepted whole, producing a registered
//! [`Experiment`] with parsed criteria, or rejected with the first violated
//! rule. Nothing is partially applied.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::constants::{MAX_ID_LENGTH, MIN_VARIATIONS, TRAFFIC_SUM_TOLERANCE, TRAFFIC_TOTAL};
use crate::errors::{ExperimentError, Result};
use crate::experiment::types::{Allocation, Criterion, Experiment, ExperimentConfig};

/// Validate an identifier (experiment, variation or metric id)
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ExperimentError::validation(field, "cannot be empty"));
    }

    if value.len() > MAX_ID_LENGTH {
        return Err(ExperimentError::validation(
            field,
            format!("too long: {} chars (max: {MAX_ID_LENGTH})", value.len()),
        ));
    }

    Ok(())
}

/// Validate a configuration and convert it into a registered experiment
pub fn validate_experiment_config(
    config: ExperimentConfig,
    created_at: DateTime<Utc>,
) -> Result<Experiment> {
    validate_identifier("id", &config.id)?;

    if config.name.trim().is_empty() {
        return Err(ExperimentError::validation("name", "cannot be empty"));
    }

    if config.variations.is_empty() {
        return Err(ExperimentError::validation("variations", "missing"));
    }

    if config.variations.len() < MIN_VARIATIONS {
        return Err(ExperimentError::validation(
            "variations",
            format!(
                "at least {MIN_VARIATIONS} variations required, got {}",
                config.variations.len()
            ),
        ));
    }

    let mut variation_ids = HashSet::new();
    for variation in &config.variations {
        validate_identifier("variations.id", &variation.id)?;

        if !variation_ids.insert(variation.id.as_str()) {
            return Err(ExperimentError::validation(
                "variations.id",
                format!("duplicate variation id '{}'", variation.id),
            ));
        }

        if !variation.traffic.is_finite() || !(0.0..=TRAFFIC_TOTAL).contains(&variation.traffic) {
            return Err(ExperimentError::validation(
                "variations.traffic",
                format!(
                    "variation '{}' has traffic {} outside 0-100",
                    variation.id, variation.traffic
                ),
            ));
        }
    }

    let total_traffic: f64 = config.variations.iter().map(|v| v.traffic).sum();
    if (total_traffic - TRAFFIC_TOTAL).abs() > TRAFFIC_SUM_TOLERANCE {
        return Err(ExperimentError::validation(
            "variations.traffic",
            format!("traffic shares must sum to 100, got {total_traffic}"),
        ));
    }

    let controls = config.variations.iter().filter(|v| v.is_control).count();
    if controls != 1 {
        return Err(ExperimentError::validation(
            "variations.is_control",
            format!("exactly one control variation required, got {controls}"),
        ));
    }

    let mut metric_ids = HashSet::new();
    for metric in &config.metrics {
        validate_identifier("metrics.id", &metric.id)?;
        if !metric_ids.insert(metric.id.as_str()) {
            return Err(ExperimentError::validation(
                "metrics.id",
                format!("duplicate metric id '{}'", metric.id),
            ));
        }
    }

    if let Some(end) = config.duration.end {
        if end <= config.duration.start {
            return Err(ExperimentError::validation(
                "duration.end",
                "end must be after start",
            ));
        }
    }

    let targets = &config.targets;
    if !(targets.confidence_level > 0.0 && targets.confidence_level < 1.0) {
        return Err(ExperimentError::validation(
            "targets.confidence_level",
            format!("must be in (0, 1), got {}", targets.confidence_level),
        ));
    }
    if !(targets.target_power > 0.0 && targets.target_power <= 1.0) {
        return Err(ExperimentError::validation(
            "targets.target_power",
            format!("must be in (0, 1], got {}", targets.target_power),
        ));
    }

    let allocation = Allocation {
        method: config.allocation.method,
        inclusion: parse_criteria("allocation.inclusion", &config.allocation.inclusion)?,
        exclusion: parse_criteria("allocation.exclusion", &config.allocation.exclusion)?,
    };

    Ok(Experiment {
        id: config.id,
        name: config.name,
        description: config.description,
        variations: config.variations,
        metrics: config.metrics,
        allocation,
        duration: config.duration,
        targets: config.targets,
        status: config.status,
        tags: config.tags,
        created_at,
    })
}

fn parse_criteria(field: &str, raw: &[String]) -> Result<Vec<Criterion>> {
    raw.iter()
        .map(|r| {
            Criterion::parse(r).ok_or_else(|| {
                ExperimentError::validation(field, format!("malformed criterion '{r}'"))
            })
        })
        .collect()
}

//! Rule-based recommendations from analysis results
//!
//! Every applicable rule fires; the caller receives them ordered by
//! confidence, highest first.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{EXPIRED_STOP_CONFIDENCE, EXTEND_CONFIDENCE, LOW_POWER_CONFIDENCE};
use crate::experiment::analyzer::ExperimentResults;
use crate::experiment::types::Experiment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    Stop,
    Extend,
    Modify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationType,
    pub explanation: String,
    pub confidence: f64,
    pub actions: Vec<String>,
    pub risks: Vec<String>,
}

pub struct RecommendationEngine;

impl RecommendationEngine {
    pub fn recommend(
        experiment: &Experiment,
        results: &ExperimentResults,
        now: DateTime<Utc>,
    ) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();
        let sample_size = results.total_sample_size;
        let min_sample = experiment.duration.min_sample_size;

        // Rule 1: significant with a winner
        if let (true, Some(winner)) = (results.is_significant, &results.winner) {
            recommendations.push(Recommendation {
                kind: RecommendationType::Stop,
                explanation: format!(
                    "Variation '{}' wins with {:.1}% confidence (mean effect size {:.3})",
                    winner.variation_id,
                    winner.confidence * 100.0,
                    winner.average_effect_size
                ),
                confidence: winner.confidence,
                actions: vec![
                    format!("Deploy variation '{}' to all traffic", winner.variation_id),
                    "Set the experiment status to completed".to_string(),
                ],
                risks: vec!["Novelty effects may fade after full rollout".to_string()],
            });
        }

        // Rule 2: will not reach the minimum sample size before the end date
        if sample_size < min_sample {
            if let Some(end) = experiment.duration.end {
                let remaining_days = days_between(now, end);
                let projected_days = projected_days_to_target(
                    sample_size,
                    min_sample,
                    days_between(experiment.duration.start, now),
                );

                if projected_days > remaining_days {
                    let mut actions = Vec::new();
                    match projected_end(now, projected_days) {
                        Some(new_end) => {
                            actions.push(format!("Extend the end date to {}", new_end.to_rfc3339()))
                        }
                        None => {
                            actions.push("Extend the end date until traffic arrives".to_string())
                        }
                    }
                    actions.push("Increase the share of traffic entering the experiment".to_string());

                    recommendations.push(Recommendation {
                        kind: RecommendationType::Extend,
                        explanation: format!(
                            "{sample_size} of {min_sample} required participants; projected {} days to target with {:.1} days remaining",
                            format_days(projected_days),
                            remaining_days.max(0.0)
                        ),
                        confidence: EXTEND_CONFIDENCE,
                        actions,
                        risks: vec![
                            "Longer runs are more exposed to seasonality".to_string(),
                        ],
                    });
                }
            }
        }

        // Rule 3: underpowered
        if results.observed_power < experiment.targets.target_power {
            recommendations.push(Recommendation {
                kind: RecommendationType::Modify,
                explanation: format!(
                    "Observed power {:.1}% is below the {:.1}% target",
                    results.observed_power * 100.0,
                    experiment.targets.target_power * 100.0
                ),
                confidence: LOW_POWER_CONFIDENCE,
                actions: vec![
                    "Increase traffic allocation".to_string(),
                    "Raise the minimum detectable effect or reduce the number of variations"
                        .to_string(),
                ],
                risks: vec!["Results so far may be false negatives".to_string()],
            });
        }

        // Rule 4: past the end date but still running
        if experiment.is_active() && experiment.duration.end.is_some_and(|end| now > end) {
            let (explanation, action) = if results.is_significant {
                let winner = results
                    .winner
                    .as_ref()
                    .map(|w| w.variation_id.as_str())
                    .unwrap_or("the best variation");
                (
                    "Scheduled end has passed; results are significant".to_string(),
                    format!("Deploy {winner}"),
                )
            } else {
                (
                    "Scheduled end has passed with no clear winner".to_string(),
                    "Keep the control experience".to_string(),
                )
            };

            recommendations.push(Recommendation {
                kind: RecommendationType::Stop,
                explanation,
                confidence: EXPIRED_STOP_CONFIDENCE,
                actions: vec![action, "Set the experiment status to completed".to_string()],
                risks: Vec::new(),
            });
        }

        if results.srm.detected {
            let risk = format!(
                "Sample ratio mismatch detected (chi-squared {:.2}, p = {:.4}); assignment counts do not match traffic shares",
                results.srm.chi_squared, results.srm.p_value
            );
            for recommendation in &mut recommendations {
                recommendation.risks.push(risk.clone());
            }
        }

        recommendations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        recommendations
    }
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 86_400.0
}

/// Linear extrapolation of the sampling rate since start
fn projected_days_to_target(sample_size: u64, target: u64, elapsed_days: f64) -> f64 {
    if sample_size == 0 || elapsed_days <= 0.0 {
        return f64::INFINITY;
    }
    let rate = sample_size as f64 / elapsed_days;
    target.saturating_sub(sample_size) as f64 / rate
}

/// `now` plus a projected number of days, or None when the date is not
/// representable
fn projected_end(now: DateTime<Utc>, projected_days: f64) -> Option<DateTime<Utc>> {
    let seconds = projected_days * 86_400.0;
    if !seconds.is_finite() || seconds >= i64::MAX as f64 {
        return None;
    }
    now.checked_add_signed(Duration::try_seconds(seconds as i64)?)
}

fn format_days(days: f64) -> String {
    if days.is_finite() {
        format!("{days:.1}")
    } else {
        "unbounded".to_string()
    }
}

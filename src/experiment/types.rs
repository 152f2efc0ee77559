//! Data model for experiments, assignments and metric observations

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    DEFAULT_CONFIDENCE_LEVEL, DEFAULT_MINIMUM_DETECTABLE_EFFECT, DEFAULT_MIN_SAMPLE_SIZE,
    DEFAULT_TARGET_POWER,
};

/// Arbitrary participant / event metadata
pub type Metadata = HashMap<String, serde_json::Value>;

/// Lifecycle status of an experiment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Being configured; no assignments
    #[default]
    Draft,
    /// Assigning participants and collecting metrics
    Active,
    /// Halted; existing data retained
    Stopped,
    /// Concluded; assignments become eligible for sweeping
    Completed,
    /// Abandoned; assignments become eligible for sweeping
    Cancelled,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled experiments no longer need participant state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy mapping a participant to a variation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMethod {
    /// Uniform draw in [0, 100) per new participant
    #[default]
    Random,
    /// Deterministic bucket from a rolling hash of the participant id
    Hash,
    /// Hash bucket cached per participant, shared across experiments
    Sticky,
}

impl AllocationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Hash => "hash",
            Self::Sticky => "sticky",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Continuous observations compared with a t-test
    #[default]
    Numeric,
    /// Converted (> 0) or not, compared with a z-test
    Conversion,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationGoal {
    #[default]
    Maximize,
    Minimize,
}

impl OptimizationGoal {
    /// Orient an effect size so that larger always means better
    pub fn orient(&self, effect: f64) -> f64 {
        match self {
            Self::Maximize => effect,
            Self::Minimize => -effect,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricPriority {
    /// Decides the winner
    #[default]
    Primary,
    /// Reported but never decides the winner
    Secondary,
}

/// A metric tracked by an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: String,
    #[serde(rename = "type", default)]
    pub metric_type: MetricType,
    #[serde(default)]
    pub goal: OptimizationGoal,
    #[serde(default)]
    pub priority: MetricPriority,
}

impl MetricDefinition {
    pub fn numeric(id: &str) -> Self {
        Self {
            id: id.to_string(),
            metric_type: MetricType::Numeric,
            goal: OptimizationGoal::Maximize,
            priority: MetricPriority::Primary,
        }
    }

    pub fn conversion(id: &str) -> Self {
        Self {
            metric_type: MetricType::Conversion,
            ..Self::numeric(id)
        }
    }

    pub fn with_goal(mut self, goal: OptimizationGoal) -> Self {
        self.goal = goal;
        self
    }

    pub fn secondary(mut self) -> Self {
        self.priority = MetricPriority::Secondary;
        self
    }

    pub fn is_primary(&self) -> bool {
        self.priority == MetricPriority::Primary
    }
}

/// One arm of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    pub id: String,
    pub name: String,
    /// Share of traffic in percent (0-100)
    pub traffic: f64,
    #[serde(default)]
    pub is_control: bool,
    /// Opaque configuration handed back to callers
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Variation {
    pub fn new(id: &str, traffic: f64) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            traffic,
            is_control: false,
            payload: serde_json::Value::Null,
        }
    }

    pub fn control(id: &str, traffic: f64) -> Self {
        Self {
            is_control: true,
            ..Self::new(id, traffic)
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Participant eligibility test, parsed once from `key=value` or `key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Criterion {
    /// Metadata value equals `value`, ignoring case
    Equality { key: String, value: String },
    /// Metadata contains `key`
    Presence { key: String },
}

impl Criterion {
    /// Parse `key=value` into Equality and a bare name into Presence
    ///
    /// Returns None for an empty key.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some(Self::Equality {
                    key: key.to_string(),
                    value: value.trim().to_lowercase(),
                })
            }
            None => {
                let key = raw.trim();
                if key.is_empty() {
                    return None;
                }
                Some(Self::Presence {
                    key: key.to_string(),
                })
            }
        }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Presence { key } => metadata.contains_key(key),
            Self::Equality { key, value } => metadata
                .get(key)
                .map(|actual| metadata_text(actual).to_lowercase() == *value)
                .unwrap_or(false),
        }
    }
}

/// Text form of a metadata value; strings without their JSON quotes
fn metadata_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Allocation settings as supplied in a configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationConfig {
    #[serde(default)]
    pub method: AllocationMethod,
    /// Any match admits the participant (empty admits everyone)
    #[serde(default)]
    pub inclusion: Vec<String>,
    /// Any match rejects the participant
    #[serde(default)]
    pub exclusion: Vec<String>,
}

/// Allocation settings with criteria already parsed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub method: AllocationMethod,
    pub inclusion: Vec<Criterion>,
    pub exclusion: Vec<Criterion>,
}

impl Allocation {
    /// Inclusion uses OR semantics, exclusion rejects on any match
    pub fn admits(&self, metadata: &Metadata) -> bool {
        let included =
            self.inclusion.is_empty() || self.inclusion.iter().any(|c| c.matches(metadata));
        included && !self.exclusion.iter().any(|c| c.matches(metadata))
    }
}

/// When the experiment runs and how much data it needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationWindow {
    pub start: DateTime<Utc>,
    /// Scheduled end; open-ended when absent
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    pub min_sample_size: u64,
}

impl Default for DurationWindow {
    fn default() -> Self {
        Self {
            start: Utc::now(),
            end: None,
            min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
        }
    }
}

/// Statistical targets the experiment was designed for
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetStatistics {
    pub confidence_level: f64,
    pub minimum_detectable_effect: f64,
    pub target_power: f64,
}

impl Default for TargetStatistics {
    fn default() -> Self {
        Self {
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            minimum_detectable_effect: DEFAULT_MINIMUM_DETECTABLE_EFFECT,
            target_power: DEFAULT_TARGET_POWER,
        }
    }
}

/// Experiment configuration as supplied by callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub duration: DurationWindow,
    #[serde(default)]
    pub targets: TargetStatistics,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ExperimentConfig {
    pub fn builder(id: &str, name: &str) -> ExperimentBuilder {
        ExperimentBuilder::new(id, name)
    }
}

/// Builder for experiment configurations
pub struct ExperimentBuilder {
    config: ExperimentConfig,
}

impl ExperimentBuilder {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            config: ExperimentConfig {
                id: id.to_string(),
                name: name.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.config.description = description.to_string();
        self
    }

    pub fn with_variation(mut self, variation: Variation) -> Self {
        self.config.variations.push(variation);
        self
    }

    pub fn with_metric(mut self, metric: MetricDefinition) -> Self {
        self.config.metrics.push(metric);
        self
    }

    pub fn with_allocation(mut self, method: AllocationMethod) -> Self {
        self.config.allocation.method = method;
        self
    }

    pub fn with_inclusion(mut self, criterion: &str) -> Self {
        self.config.allocation.inclusion.push(criterion.to_string());
        self
    }

    pub fn with_exclusion(mut self, criterion: &str) -> Self {
        self.config.allocation.exclusion.push(criterion.to_string());
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.config.duration.start = start;
        self
    }

    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.config.duration.end = Some(end);
        self
    }

    pub fn with_min_sample_size(mut self, min: u64) -> Self {
        self.config.duration.min_sample_size = min;
        self
    }

    pub fn with_target_power(mut self, power: f64) -> Self {
        self.config.targets.target_power = power;
        self
    }

    pub fn with_targets(mut self, targets: TargetStatistics) -> Self {
        self.config.targets = targets;
        self
    }

    pub fn with_status(mut self, status: ExperimentStatus) -> Self {
        self.config.status = status;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.config.tags = tags;
        self
    }

    pub fn build(self) -> ExperimentConfig {
        self.config
    }
}

/// A validated, registered experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: String,
    pub variations: Vec<Variation>,
    pub metrics: Vec<MetricDefinition>,
    pub allocation: Allocation,
    pub duration: DurationWindow,
    pub targets: TargetStatistics,
    pub status: ExperimentStatus,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    pub fn is_active(&self) -> bool {
        self.status == ExperimentStatus::Active
    }

    pub fn control(&self) -> Option<&Variation> {
        self.variations.iter().find(|v| v.is_control)
    }

    pub fn variation(&self, id: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.id == id)
    }

    pub fn metric(&self, id: &str) -> Option<&MetricDefinition> {
        self.metrics.iter().find(|m| m.id == id)
    }
}

/// A tracked observation value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Boolean(bool),
    Numeric(f64),
}

impl MetricValue {
    /// Booleans count as 1 / 0
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Boolean(true) => 1.0,
            Self::Boolean(false) => 0.0,
            Self::Numeric(v) => *v,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Numeric(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

/// One recorded metric observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub id: Uuid,
    pub experiment_id: String,
    pub participant_id: String,
    pub variation_id: String,
    pub metric_id: String,
    pub value: MetricValue,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A participant's stable assignment within one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantAssignment {
    pub experiment_id: String,
    pub participant_id: String,
    pub variation_id: String,
    pub assigned_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Events recorded for this participant, trimmed by retention sweeps
    #[serde(default)]
    pub events: Vec<MetricEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, serde_json::Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_criterion_parsing() {
        assert_eq!(
            Criterion::parse("country = US"),
            Some(Criterion::Equality {
                key: "country".to_string(),
                value: "us".to_string()
            })
        );
        assert_eq!(
            Criterion::parse("beta_user"),
            Some(Criterion::Presence {
                key: "beta_user".to_string()
            })
        );
        assert_eq!(Criterion::parse("=value"), None);
        assert_eq!(Criterion::parse("  "), None);
    }

    #[test]
    fn test_criterion_equality_ignores_value_case() {
        let criterion = Criterion::parse("country=us").unwrap();

        assert!(criterion.matches(&metadata(&[("country", serde_json::json!("US"))])));
        assert!(!criterion.matches(&metadata(&[("country", serde_json::json!("DE"))])));
        assert!(!criterion.matches(&metadata(&[("region", serde_json::json!("us"))])));
    }

    #[test]
    fn test_criterion_equality_on_non_string_values() {
        let tier = Criterion::parse("tier=2").unwrap();
        let premium = Criterion::parse("premium=TRUE").unwrap();

        assert!(tier.matches(&metadata(&[("tier", serde_json::json!(2))])));
        assert!(premium.matches(&metadata(&[("premium", serde_json::json!(true))])));
    }

    #[test]
    fn test_allocation_inclusion_or_exclusion_any() {
        let allocation = Allocation {
            method: AllocationMethod::Hash,
            inclusion: vec![
                Criterion::parse("country=us").unwrap(),
                Criterion::parse("country=ca").unwrap(),
            ],
            exclusion: vec![Criterion::parse("internal").unwrap()],
        };

        assert!(allocation.admits(&metadata(&[("country", serde_json::json!("CA"))])));
        assert!(!allocation.admits(&metadata(&[("country", serde_json::json!("FR"))])));
        assert!(!allocation.admits(&metadata(&[
            ("country", serde_json::json!("us")),
            ("internal", serde_json::json!(true)),
        ])));
        assert!(Allocation::default().admits(&Metadata::new()));
    }

    #[test]
    fn test_metric_value_serde_untagged() {
        let numeric: MetricValue = serde_json::from_str("12.5").unwrap();
        let boolean: MetricValue = serde_json::from_str("true").unwrap();

        assert_eq!(numeric.as_f64(), 12.5);
        assert_eq!(boolean.as_f64(), 1.0);
        assert_eq!(MetricValue::from(false).as_f64(), 0.0);
    }

    #[test]
    fn test_goal_orientation() {
        assert_eq!(OptimizationGoal::Maximize.orient(0.4), 0.4);
        assert_eq!(OptimizationGoal::Minimize.orient(-0.4), 0.4);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ExperimentConfig = serde_json::from_value(serde_json::json!({
            "id": "checkout",
            "name": "Checkout button",
            "variations": [
                { "id": "control", "name": "Control", "traffic": 50.0, "is_control": true },
                { "id": "green", "name": "Green", "traffic": 50.0, "payload": { "color": "green" } }
            ],
            "metrics": [{ "id": "purchase", "type": "conversion" }],
            "duration": { "start": "2026-01-01T00:00:00Z", "min_sample_size": 1000 }
        }))
        .unwrap();

        assert_eq!(config.status, ExperimentStatus::Draft);
        assert_eq!(config.allocation.method, AllocationMethod::Random);
        assert_eq!(config.metrics[0].metric_type, MetricType::Conversion);
        assert!(config.metrics[0].is_primary());
        assert_eq!(config.variations[1].payload["color"], "green");
        assert_eq!(config.duration.end, None);
    }
}

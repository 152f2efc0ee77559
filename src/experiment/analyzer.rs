//! Statistical analysis of experiment observations
//!
//! Turns the raw per-variation observations of an experiment into summaries,
//! pairwise control-vs-treatment tests with false discovery rate correction,
//! a winner decision, observed power and a sample ratio mismatch check.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    MAX_WINNER_CONFIDENCE, MIN_OBSERVATIONS_PER_ARM, SRM_MIN_SAMPLE_SIZE, SRM_P_THRESHOLD,
};
use crate::experiment::types::{Experiment, MetricDefinition, MetricType};
use crate::metrics::{Timer, ANALYSIS_DURATION};
use crate::stats::{
    benjamini_hochberg, chi_squared_sf, t_test, two_proportion_z_test, wald_interval, SampleStats,
};

/// variation id -> metric id -> observed values
pub type Observations = HashMap<String, HashMap<String, Vec<f64>>>;

fn values_of<'a>(observations: &'a Observations, variation_id: &str, metric_id: &str) -> &'a [f64] {
    observations
        .get(variation_id)
        .and_then(|metrics| metrics.get(metric_id))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Descriptive statistics for one variation/metric pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric_id: String,
    /// Number of observations
    pub sample_size: u64,
    pub mean: f64,
    pub std_error: f64,
    /// 95% interval on the mean (numeric) or on the rate (conversion)
    pub confidence_interval: (f64, f64),
    /// Observations with value > 0, conversion metrics only
    pub conversions: Option<u64>,
    pub conversion_rate: Option<f64>,
}

impl MetricSummary {
    pub fn empty(metric: &MetricDefinition) -> Self {
        let is_conversion = metric.metric_type == MetricType::Conversion;
        Self {
            metric_id: metric.id.clone(),
            sample_size: 0,
            mean: 0.0,
            std_error: 0.0,
            confidence_interval: (0.0, 0.0),
            conversions: is_conversion.then_some(0),
            conversion_rate: is_conversion.then_some(0.0),
        }
    }

    fn from_values(metric: &MetricDefinition, values: &[f64]) -> Self {
        let stats = SampleStats::from_values(values);

        match metric.metric_type {
            MetricType::Numeric => Self {
                metric_id: metric.id.clone(),
                sample_size: stats.count,
                mean: stats.mean,
                std_error: stats.std_error,
                confidence_interval: stats.confidence_interval(),
                conversions: None,
                conversion_rate: None,
            },
            MetricType::Conversion => {
                let conversions = values.iter().filter(|v| **v > 0.0).count() as u64;
                let rate = if stats.count > 0 {
                    conversions as f64 / stats.count as f64
                } else {
                    0.0
                };
                Self {
                    metric_id: metric.id.clone(),
                    sample_size: stats.count,
                    mean: stats.mean,
                    std_error: stats.std_error,
                    confidence_interval: wald_interval(rate, stats.count),
                    conversions: Some(conversions),
                    conversion_rate: Some(rate),
                }
            }
        }
    }
}

/// Per-variation block of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationResult {
    pub variation_id: String,
    pub is_control: bool,
    /// Participants assigned to this variation
    pub participants: u64,
    pub metrics: Vec<MetricSummary>,
}

impl VariationResult {
    pub fn metric(&self, metric_id: &str) -> Option<&MetricSummary> {
        self.metrics.iter().find(|m| m.metric_id == metric_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    TTest,
    ZTest,
}

/// One control-vs-treatment comparison on one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceTest {
    /// Treatment variation compared against the control
    pub variation_id: String,
    pub metric_id: String,
    pub test_type: TestType,
    pub statistic: f64,
    pub p_value: f64,
    /// Benjamini-Hochberg adjusted p-value
    pub adjusted_p_value: f64,
    /// Decided on the adjusted p-value
    pub is_significant: bool,
    /// Cohen's d (t-test) or relative lift (z-test), treatment minus control
    pub effect_size: f64,
    /// 95% interval on the raw difference
    pub confidence_interval: (f64, f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Winner {
    pub variation_id: String,
    /// `1 - mean raw p-value` of the qualifying tests, capped at 0.99.
    /// Qualification itself uses the adjusted p-values.
    pub confidence: f64,
    /// Mean goal-oriented effect size over the significant primary tests
    pub average_effect_size: f64,
}

/// Sample ratio mismatch: observed assignment counts vs declared shares
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SrmCheck {
    pub detected: bool,
    pub chi_squared: f64,
    pub p_value: f64,
    pub degrees_of_freedom: u32,
}

/// Complete analysis of one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub experiment_id: String,
    pub variations: Vec<VariationResult>,
    pub tests: Vec<SignificanceTest>,
    /// Any test significant after correction
    pub is_significant: bool,
    pub winner: Option<Winner>,
    /// min(1, total sample size / minimum sample size)
    pub observed_power: f64,
    pub total_sample_size: u64,
    pub srm: SrmCheck,
    /// None until the first analysis has run
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl ExperimentResults {
    pub fn variation(&self, variation_id: &str) -> Option<&VariationResult> {
        self.variations
            .iter()
            .find(|v| v.variation_id == variation_id)
    }

    pub fn test(&self, variation_id: &str, metric_id: &str) -> Option<&SignificanceTest> {
        self.tests
            .iter()
            .find(|t| t.variation_id == variation_id && t.metric_id == metric_id)
    }
}

/// Stateless statistical analyzer
pub struct StatisticalAnalyzer;

impl StatisticalAnalyzer {
    /// Zeroed results with one bucket per variation/metric pair
    pub fn empty_results(experiment: &Experiment) -> ExperimentResults {
        ExperimentResults {
            experiment_id: experiment.id.clone(),
            variations: experiment
                .variations
                .iter()
                .map(|v| VariationResult {
                    variation_id: v.id.clone(),
                    is_control: v.is_control,
                    participants: 0,
                    metrics: experiment.metrics.iter().map(MetricSummary::empty).collect(),
                })
                .collect(),
            tests: Vec::new(),
            is_significant: false,
            winner: None,
            observed_power: 0.0,
            total_sample_size: 0,
            srm: SrmCheck {
                p_value: 1.0,
                ..Default::default()
            },
            analyzed_at: None,
        }
    }

    /// Analyze an experiment
    ///
    /// `alpha` applies both to raw p-values and to the Benjamini-Hochberg
    /// adjusted p-values that decide significance.
    pub fn analyze(
        experiment: &Experiment,
        observations: &Observations,
        variation_samples: &HashMap<String, u64>,
        total_sample_size: u64,
        alpha: f64,
        now: DateTime<Utc>,
    ) -> ExperimentResults {
        let _timer = Timer::new(ANALYSIS_DURATION.clone());

        let variations: Vec<VariationResult> = experiment
            .variations
            .iter()
            .map(|v| VariationResult {
                variation_id: v.id.clone(),
                is_control: v.is_control,
                participants: variation_samples.get(&v.id).copied().unwrap_or(0),
                metrics: experiment
                    .metrics
                    .iter()
                    .map(|m| MetricSummary::from_values(m, values_of(observations, &v.id, &m.id)))
                    .collect(),
            })
            .collect();

        let mut tests = Vec::new();
        if let Some(control) = experiment.control() {
            for treatment in experiment.variations.iter().filter(|v| !v.is_control) {
                for metric in &experiment.metrics {
                    let control_values = values_of(observations, &control.id, &metric.id);
                    let treatment_values = values_of(observations, &treatment.id, &metric.id);
                    if let Some(test) =
                        Self::compare(metric, &treatment.id, control_values, treatment_values)
                    {
                        tests.push(test);
                    }
                }
            }
        }

        let raw: Vec<f64> = tests.iter().map(|t| t.p_value).collect();
        for (test, adjusted) in tests.iter_mut().zip(benjamini_hochberg(&raw)) {
            test.adjusted_p_value = adjusted;
            test.is_significant = adjusted < alpha;
        }

        let is_significant = tests.iter().any(|t| t.is_significant);
        let winner = Self::select_winner(experiment, &tests);

        let min_sample = experiment.duration.min_sample_size;
        let observed_power = if min_sample == 0 {
            1.0
        } else {
            (total_sample_size as f64 / min_sample as f64).min(1.0)
        };

        ExperimentResults {
            experiment_id: experiment.id.clone(),
            variations,
            tests,
            is_significant,
            winner,
            observed_power,
            total_sample_size,
            srm: Self::check_srm(experiment, variation_samples),
            analyzed_at: Some(now),
        }
    }

    /// Pairwise test for one metric; None when either arm is too small
    fn compare(
        metric: &MetricDefinition,
        variation_id: &str,
        control: &[f64],
        treatment: &[f64],
    ) -> Option<SignificanceTest> {
        if (control.len() as u64) < MIN_OBSERVATIONS_PER_ARM
            || (treatment.len() as u64) < MIN_OBSERVATIONS_PER_ARM
        {
            return None;
        }

        let (test_type, statistic, p_value, effect_size, confidence_interval) =
            match metric.metric_type {
                MetricType::Numeric => {
                    let result = t_test(
                        &SampleStats::from_values(control),
                        &SampleStats::from_values(treatment),
                    );
                    (
                        TestType::TTest,
                        result.statistic,
                        result.p_value,
                        result.effect_size,
                        result.confidence_interval,
                    )
                }
                MetricType::Conversion => {
                    let converted = |values: &[f64]| values.iter().filter(|v| **v > 0.0).count() as u64;
                    let result = two_proportion_z_test(
                        converted(control),
                        control.len() as u64,
                        converted(treatment),
                        treatment.len() as u64,
                    );
                    (
                        TestType::ZTest,
                        result.statistic,
                        result.p_value,
                        result.relative_lift,
                        result.confidence_interval,
                    )
                }
            };

        Some(SignificanceTest {
            variation_id: variation_id.to_string(),
            metric_id: metric.id.clone(),
            test_type,
            statistic,
            p_value,
            adjusted_p_value: p_value,
            is_significant: false,
            effect_size,
            confidence_interval,
        })
    }

    /// Highest mean oriented effect among variations with a significant
    /// primary test
    fn select_winner(experiment: &Experiment, tests: &[SignificanceTest]) -> Option<Winner> {
        let mut best: Option<Winner> = None;

        for variation in experiment.variations.iter().filter(|v| !v.is_control) {
            let qualifying: Vec<(f64, f64)> = tests
                .iter()
                .filter(|t| t.variation_id == variation.id && t.is_significant)
                .filter_map(|t| {
                    experiment
                        .metric(&t.metric_id)
                        .filter(|m| m.is_primary())
                        .map(|m| (m.goal.orient(t.effect_size), t.p_value))
                })
                .collect();

            if qualifying.is_empty() {
                continue;
            }

            let n = qualifying.len() as f64;
            let average_effect_size = qualifying.iter().map(|(e, _)| e).sum::<f64>() / n;
            let mean_p = qualifying.iter().map(|(_, p)| p).sum::<f64>() / n;

            if best
                .as_ref()
                .map_or(true, |b| average_effect_size > b.average_effect_size)
            {
                best = Some(Winner {
                    variation_id: variation.id.clone(),
                    confidence: (1.0 - mean_p).min(MAX_WINNER_CONFIDENCE),
                    average_effect_size,
                });
            }
        }

        best
    }

    /// Chi-squared goodness of fit of assignment counts against shares
    pub fn check_srm(experiment: &Experiment, variation_samples: &HashMap<String, u64>) -> SrmCheck {
        let observed: Vec<(f64, f64)> = experiment
            .variations
            .iter()
            .filter(|v| v.traffic > 0.0)
            .map(|v| {
                let count = variation_samples.get(&v.id).copied().unwrap_or(0);
                (count as f64, v.traffic)
            })
            .collect();

        let total: f64 = observed.iter().map(|(count, _)| count).sum();
        let share_total: f64 = observed.iter().map(|(_, share)| share).sum();
        if observed.len() < 2 || total <= 0.0 || share_total <= 0.0 {
            return SrmCheck {
                p_value: 1.0,
                ..Default::default()
            };
        }

        let chi_squared: f64 = observed
            .iter()
            .map(|(count, share)| {
                let expected = total * share / share_total;
                (count - expected).powi(2) / expected
            })
            .sum();
        let degrees_of_freedom = observed.len() as u32 - 1;
        let p_value = chi_squared_sf(chi_squared, degrees_of_freedom);

        SrmCheck {
            detected: total as u64 >= SRM_MIN_SAMPLE_SIZE && p_value < SRM_P_THRESHOLD,
            chi_squared,
            p_value,
            degrees_of_freedom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_SIGNIFICANCE_LEVEL;
    use crate::experiment::types::{ExperimentConfig, OptimizationGoal, Variation};
    use crate::validation::validate_experiment_config;

    fn experiment(metrics: Vec<MetricDefinition>) -> Experiment {
        let mut builder = ExperimentConfig::builder("exp", "Analyzer test")
            .with_variation(Variation::control("control", 50.0))
            .with_variation(Variation::new("variant", 50.0))
            .with_min_sample_size(100);
        for metric in metrics {
            builder = builder.with_metric(metric);
        }
        validate_experiment_config(builder.build(), Utc::now()).unwrap()
    }

    fn observations(pairs: &[(&str, &str, Vec<f64>)]) -> Observations {
        let mut obs = Observations::new();
        for (variation, metric, values) in pairs {
            obs.entry(variation.to_string())
                .or_default()
                .insert(metric.to_string(), values.clone());
        }
        obs
    }

    fn samples(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn conversions(converted: usize, total: usize) -> Vec<f64> {
        (0..total)
            .map(|i| if i < converted { 1.0 } else { 0.0 })
            .collect()
    }

    #[test]
    fn test_numeric_scenario_with_default_goal() {
        let exp = experiment(vec![MetricDefinition::numeric("load_time")]);
        let obs = observations(&[
            ("control", "load_time", vec![180.0, 190.0, 170.0, 200.0, 185.0]),
            ("variant", "load_time", vec![120.0, 130.0, 110.0, 140.0, 125.0]),
        ]);

        let results = StatisticalAnalyzer::analyze(
            &exp,
            &obs,
            &samples(&[("control", 5), ("variant", 5)]),
            10,
            DEFAULT_SIGNIFICANCE_LEVEL,
            Utc::now(),
        );

        let test = results.test("variant", "load_time").unwrap();
        assert!(test.p_value < 0.05);
        assert!(test.is_significant);
        assert!(results.is_significant);

        let winner = results.winner.unwrap();
        assert_eq!(winner.variation_id, "variant");
        assert!(winner.confidence > 0.9);
        // Maximizing, so the drop counts against the variant
        assert!(winner.average_effect_size < 0.0);
    }

    #[test]
    fn test_winner_confidence_uses_raw_p_values() {
        let exp = experiment(vec![
            MetricDefinition::conversion("signup"),
            MetricDefinition::conversion("upgrade"),
        ]);
        let obs = observations(&[
            ("control", "signup", conversions(10, 50)),
            ("variant", "signup", conversions(22, 50)),
            ("control", "upgrade", conversions(15, 50)),
            ("variant", "upgrade", conversions(26, 50)),
        ]);

        let results = StatisticalAnalyzer::analyze(
            &exp,
            &obs,
            &samples(&[("control", 50), ("variant", 50)]),
            100,
            DEFAULT_SIGNIFICANCE_LEVEL,
            Utc::now(),
        );

        let signup = results.test("variant", "signup").unwrap();
        let upgrade = results.test("variant", "upgrade").unwrap();
        assert!(signup.is_significant && upgrade.is_significant);
        assert!(signup.adjusted_p_value > signup.p_value);

        let expected = 1.0 - (signup.p_value + upgrade.p_value) / 2.0;
        assert!(expected < MAX_WINNER_CONFIDENCE);
        let winner = results.winner.unwrap();
        assert!((winner.confidence - expected).abs() < 1e-12);
    }

    #[test]
    fn test_numeric_scenario_picks_lower_mean_when_minimizing() {
        let exp = experiment(vec![
            MetricDefinition::numeric("load_time").with_goal(OptimizationGoal::Minimize)
        ]);
        let obs = observations(&[
            ("control", "load_time", vec![180.0, 190.0, 170.0, 200.0, 185.0]),
            ("variant", "load_time", vec![120.0, 130.0, 110.0, 140.0, 125.0]),
        ]);

        let results = StatisticalAnalyzer::analyze(
            &exp,
            &obs,
            &samples(&[("control", 5), ("variant", 5)]),
            10,
            DEFAULT_SIGNIFICANCE_LEVEL,
            Utc::now(),
        );

        let control = results.variation("control").unwrap().metric("load_time").unwrap();
        assert!((control.mean - 185.0).abs() < 1e-9);
        assert!((control.std_error - 5.0).abs() < 1e-9);

        let test = results.test("variant", "load_time").unwrap();
        assert_eq!(test.test_type, TestType::TTest);
        assert!(test.is_significant);
        assert!(results.is_significant);

        let winner = results.winner.unwrap();
        assert_eq!(winner.variation_id, "variant");
        assert!(winner.confidence > 0.9);
        assert!(winner.confidence <= MAX_WINNER_CONFIDENCE);
        assert!(winner.average_effect_size > 0.0);
        assert!((results.observed_power - 0.1).abs() < 1e-12);
        assert!(results.analyzed_at.is_some());
    }

    #[test]
    fn test_conversion_scenario() {
        let exp = experiment(vec![MetricDefinition::conversion("signup")]);
        let obs = observations(&[
            ("control", "signup", conversions(10, 50)),
            ("variant", "signup", conversions(25, 50)),
        ]);

        let results = StatisticalAnalyzer::analyze(
            &exp,
            &obs,
            &samples(&[("control", 50), ("variant", 50)]),
            100,
            DEFAULT_SIGNIFICANCE_LEVEL,
            Utc::now(),
        );

        let variant = results.variation("variant").unwrap().metric("signup").unwrap();
        assert_eq!(variant.conversions, Some(25));
        assert_eq!(variant.conversion_rate, Some(0.5));

        let test = results.test("variant", "signup").unwrap();
        assert_eq!(test.test_type, TestType::ZTest);
        assert!(test.p_value < 0.05);
        assert!((test.effect_size - 1.5).abs() < 1e-9);
        assert_eq!(results.winner.unwrap().variation_id, "variant");
        assert_eq!(results.observed_power, 1.0);
    }

    #[test]
    fn test_small_arms_are_skipped() {
        let exp = experiment(vec![MetricDefinition::numeric("revenue")]);
        let obs = observations(&[
            ("control", "revenue", vec![10.0]),
            ("variant", "revenue", vec![12.0, 14.0, 13.0]),
        ]);

        let results = StatisticalAnalyzer::analyze(
            &exp,
            &obs,
            &HashMap::new(),
            4,
            DEFAULT_SIGNIFICANCE_LEVEL,
            Utc::now(),
        );

        assert!(results.tests.is_empty());
        assert!(!results.is_significant);
        assert!(results.winner.is_none());
        assert_eq!(
            results.variation("control").unwrap().metric("revenue").unwrap().sample_size,
            1
        );
    }

    #[test]
    fn test_secondary_metric_never_decides_winner() {
        let exp = experiment(vec![MetricDefinition::conversion("clicks").secondary()]);
        let obs = observations(&[
            ("control", "clicks", conversions(10, 50)),
            ("variant", "clicks", conversions(25, 50)),
        ]);

        let results = StatisticalAnalyzer::analyze(
            &exp,
            &obs,
            &HashMap::new(),
            100,
            DEFAULT_SIGNIFICANCE_LEVEL,
            Utc::now(),
        );

        assert!(results.is_significant);
        assert!(results.winner.is_none());
    }

    #[test]
    fn test_adjusted_p_values_bound_raw() {
        let exp = experiment(vec![
            MetricDefinition::conversion("signup"),
            MetricDefinition::numeric("revenue"),
        ]);
        let obs = observations(&[
            ("control", "signup", conversions(10, 50)),
            ("variant", "signup", conversions(12, 50)),
            ("control", "revenue", vec![1.0, 2.0, 3.0, 4.0]),
            ("variant", "revenue", vec![2.0, 3.0, 4.0, 5.0]),
        ]);

        let results = StatisticalAnalyzer::analyze(
            &exp,
            &obs,
            &HashMap::new(),
            108,
            DEFAULT_SIGNIFICANCE_LEVEL,
            Utc::now(),
        );

        assert_eq!(results.tests.len(), 2);
        for test in &results.tests {
            assert!(test.adjusted_p_value >= test.p_value);
            assert!(test.adjusted_p_value <= 1.0);
        }
    }

    #[test]
    fn test_zero_min_sample_size_gives_full_power() {
        let mut exp = experiment(vec![]);
        exp.duration.min_sample_size = 0;

        let results = StatisticalAnalyzer::analyze(
            &exp,
            &Observations::new(),
            &HashMap::new(),
            0,
            DEFAULT_SIGNIFICANCE_LEVEL,
            Utc::now(),
        );
        assert_eq!(results.observed_power, 1.0);
    }

    #[test]
    fn test_srm_detection() {
        let exp = experiment(vec![]);

        let balanced = StatisticalAnalyzer::check_srm(&exp, &samples(&[("control", 505), ("variant", 495)]));
        assert!(!balanced.detected);
        assert_eq!(balanced.degrees_of_freedom, 1);

        let skewed = StatisticalAnalyzer::check_srm(&exp, &samples(&[("control", 600), ("variant", 400)]));
        assert!(skewed.detected);
        assert!((skewed.chi_squared - 40.0).abs() < 1e-9);

        // Too small to call, even when lopsided
        let tiny = StatisticalAnalyzer::check_srm(&exp, &samples(&[("control", 9), ("variant", 1)]));
        assert!(!tiny.detected);
    }

    #[test]
    fn test_empty_results_shape() {
        let exp = experiment(vec![MetricDefinition::conversion("signup")]);
        let empty = StatisticalAnalyzer::empty_results(&exp);

        assert_eq!(empty.variations.len(), 2);
        let summary = &empty.variations[0].metrics[0];
        assert_eq!(summary.conversions, Some(0));
        assert_eq!(empty.srm.p_value, 1.0);
        assert!(empty.analyzed_at.is_none());
    }
}

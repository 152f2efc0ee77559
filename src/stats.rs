//! Numerical kernels for significance testing
//!
//! Pure functions over summary statistics. The analyzer composes these into
//! per-experiment results; nothing here knows about experiments or ledgers.
//!
//! - Sample summaries with Bessel-corrected variance
//! - Two-sample t-test on means (normal approximation above 30 df)
//! - Two-proportion z-test with pooled standard error
//! - Benjamini-Hochberg false discovery rate adjustment
//! - Chi-squared survival function for goodness-of-fit checks

use serde::{Deserialize, Serialize};

use crate::constants::{NORMAL_APPROXIMATION_DF, Z_CRITICAL_95};

/// Mean, variance and standard error of a sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub count: u64,
    pub mean: f64,
    /// Sample variance (divides by n - 1)
    pub variance: f64,
    /// sqrt(variance / n)
    pub std_error: f64,
}

impl SampleStats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = if values.len() > 1 {
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };

        Self {
            count: values.len() as u64,
            mean,
            variance,
            std_error: (variance / n).sqrt(),
        }
    }

    /// 95% confidence interval: mean ± 1.96 * SE
    pub fn confidence_interval(&self) -> (f64, f64) {
        let margin = Z_CRITICAL_95 * self.std_error;
        (self.mean - margin, self.mean + margin)
    }
}

/// Error function approximation (Abramowitz & Stegun 7.1.26)
pub fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Two-tailed p-value for a standard normal statistic: 2 * (1 - Φ(|z|))
pub fn two_tailed_p(z: f64) -> f64 {
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

/// Steep small-sample approximation: min(1, 2 * e^(-t²/2))
///
/// A crude stand-in for the Student's t CDF. It overstates significance for
/// small |t| and understates tails; an incomplete-beta based CDF is the
/// rigorous replacement.
pub fn small_sample_p(t: f64) -> f64 {
    (2.0 * (-0.5 * t * t).exp()).min(1.0)
}

/// Outcome of a two-sample t-test (treatment minus control)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    pub statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    pub difference: f64,
    /// Cohen's d using the pooled standard deviation
    pub effect_size: f64,
    pub confidence_interval: (f64, f64),
}

/// Two-sample t-test on means
///
/// Pooled SE = sqrt(SE_c² + SE_t²), df = n_c + n_t - 2. Above 30 df the
/// p-value comes from the normal distribution, below it from
/// [`small_sample_p`]. With a zero standard error a non-zero difference is
/// certain (t = ±∞, p = 0) and an equal pair gives t = 0, p = 1.
pub fn t_test(control: &SampleStats, treatment: &SampleStats) -> TTest {
    let difference = treatment.mean - control.mean;
    let pooled_se = (control.std_error.powi(2) + treatment.std_error.powi(2)).sqrt();
    let degrees_of_freedom = (control.count + treatment.count) as f64 - 2.0;

    let (statistic, p_value) = if pooled_se > 0.0 {
        let t = difference / pooled_se;
        let p = if degrees_of_freedom > NORMAL_APPROXIMATION_DF {
            two_tailed_p(t)
        } else {
            small_sample_p(t)
        };
        (t, p)
    } else if difference != 0.0 {
        (difference.signum() * f64::INFINITY, 0.0)
    } else {
        (0.0, 1.0)
    };

    let margin = Z_CRITICAL_95 * pooled_se;

    TTest {
        statistic,
        degrees_of_freedom,
        p_value,
        difference,
        effect_size: cohens_d(control, treatment),
        confidence_interval: (difference - margin, difference + margin),
    }
}

/// Cohen's d: mean difference over the pooled standard deviation
pub fn cohens_d(control: &SampleStats, treatment: &SampleStats) -> f64 {
    let df = (control.count + treatment.count) as f64 - 2.0;
    if df <= 0.0 {
        return 0.0;
    }

    let pooled_var = ((control.count as f64 - 1.0).max(0.0) * control.variance
        + (treatment.count as f64 - 1.0).max(0.0) * treatment.variance)
        / df;
    let pooled_sd = pooled_var.sqrt();

    if pooled_sd > 0.0 {
        (treatment.mean - control.mean) / pooled_sd
    } else {
        0.0
    }
}

/// Outcome of a two-proportion z-test (treatment minus control)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZTest {
    pub statistic: f64,
    pub p_value: f64,
    /// rate_t - rate_c
    pub difference: f64,
    /// (rate_t - rate_c) / rate_c, zero when the control rate is zero
    pub relative_lift: f64,
    pub confidence_interval: (f64, f64),
}

/// Two-proportion z-test with pooled standard error
///
/// Tests H0: p_c = p_t. Returns z = 0 and p = 1 when either arm is empty
/// or the pooled proportion is degenerate (0 or 1).
pub fn two_proportion_z_test(
    control_conversions: u64,
    control_n: u64,
    treatment_conversions: u64,
    treatment_n: u64,
) -> ZTest {
    if control_n == 0 || treatment_n == 0 {
        return ZTest {
            statistic: 0.0,
            p_value: 1.0,
            difference: 0.0,
            relative_lift: 0.0,
            confidence_interval: (0.0, 0.0),
        };
    }

    let n_c = control_n as f64;
    let n_t = treatment_n as f64;
    let rate_c = control_conversions as f64 / n_c;
    let rate_t = treatment_conversions as f64 / n_t;
    let difference = rate_t - rate_c;

    // Pooled proportion under H0
    let pooled = (control_conversions + treatment_conversions) as f64 / (n_c + n_t);
    let se = (pooled * (1.0 - pooled) * (1.0 / n_c + 1.0 / n_t)).sqrt();

    let (statistic, p_value) = if se > 0.0 {
        let z = difference / se;
        (z, two_tailed_p(z))
    } else {
        (0.0, 1.0)
    };

    let relative_lift = if rate_c > 0.0 {
        difference / rate_c
    } else {
        0.0
    };

    // Unpooled SE for the interval on the difference
    let se_diff = (rate_c * (1.0 - rate_c) / n_c + rate_t * (1.0 - rate_t) / n_t).sqrt();
    let margin = Z_CRITICAL_95 * se_diff;

    ZTest {
        statistic,
        p_value,
        difference,
        relative_lift,
        confidence_interval: (difference - margin, difference + margin),
    }
}

/// Wald 95% interval on a proportion, clipped to [0, 1]
pub fn wald_interval(rate: f64, n: u64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 0.0);
    }
    let margin = Z_CRITICAL_95 * (rate * (1.0 - rate) / n as f64).sqrt();
    ((rate - margin).max(0.0), (rate + margin).min(1.0))
}

/// Benjamini-Hochberg adjusted p-values, returned in input order
///
/// With p-values sorted ascending at 1-indexed rank i of m:
/// adjusted = min(1, p * m / i), then a running minimum from the largest rank
/// down keeps adjusted values non-decreasing in raw-p order.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    if m == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut adjusted = vec![1.0; m];
    let mut running_min = 1.0_f64;
    for rank in (0..m).rev() {
        let idx = order[rank];
        let scaled = (p_values[idx] * m as f64 / (rank + 1) as f64).min(1.0);
        running_min = running_min.min(scaled);
        adjusted[idx] = running_min;
    }

    adjusted
}

/// Upper-tail probability of the chi-squared distribution
///
/// Exact for one degree of freedom (via the normal), Wilson-Hilferty cube-root
/// approximation otherwise.
pub fn chi_squared_sf(statistic: f64, degrees_of_freedom: u32) -> f64 {
    if statistic <= 0.0 || degrees_of_freedom == 0 {
        return 1.0;
    }

    if degrees_of_freedom == 1 {
        return two_tailed_p(statistic.sqrt());
    }

    let k = degrees_of_freedom as f64;
    let spread = 2.0 / (9.0 * k);
    let z = ((statistic / k).cbrt() - (1.0 - spread)) / spread.sqrt();

    (1.0 - normal_cdf(z)).clamp(0.0, 1.0)
}

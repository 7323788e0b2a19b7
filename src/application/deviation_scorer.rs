// Deviation scorer - Pointwise error metrics and correlation between aligned series
use crate::domain::batch::ParameterStatus;
use crate::domain::report::{DeviationMetrics, DeviationReport};
use crate::domain::series::{Parameter, Series};
use crate::infrastructure::config::{DeviationThreshold, ThresholdConfig};

#[derive(Debug, Clone)]
pub struct DeviationScorer {
    thresholds: ThresholdConfig,
}

impl DeviationScorer {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    /// Compare two series of equal length. Extra points on either side are ignored.
    pub fn score(&self, generated: &Series, reference: &Series) -> DeviationReport {
        DeviationReport::from_fn(|p| {
            self.score_parameter(
                &generated.values(p),
                &reference.values(p),
                self.thresholds.get(p),
            )
        })
    }

    pub fn score_parameter(
        &self,
        generated: &[f64],
        reference: &[f64],
        threshold: DeviationThreshold,
    ) -> DeviationMetrics {
        let point_deviations: Vec<f64> = generated
            .iter()
            .zip(reference)
            .map(|(g, r)| g - r)
            .collect();
        let n = point_deviations.len();

        let (mae, rmse, max_deviation) = if n == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let mae = point_deviations.iter().map(|d| d.abs()).sum::<f64>() / n as f64;
            let mse = point_deviations.iter().map(|d| d * d).sum::<f64>() / n as f64;
            let max = point_deviations.iter().fold(0.0f64, |acc, d| acc.max(d.abs()));
            (mae, mse.sqrt(), max)
        };

        let (correlation, correlation_p_value) =
            pearson(&generated[..n], &reference[..n]);

        DeviationMetrics {
            mae,
            rmse,
            max_deviation,
            correlation,
            correlation_p_value,
            point_deviations,
            status: deviation_status(mae, max_deviation, threshold),
        }
    }

    pub fn threshold(&self, parameter: Parameter) -> DeviationThreshold {
        self.thresholds.get(parameter)
    }
}

/// Max deviation drives critical; mean deviation drives warning.
pub fn deviation_status(
    mae: f64,
    max_deviation: f64,
    threshold: DeviationThreshold,
) -> ParameterStatus {
    if max_deviation >= threshold.critical {
        ParameterStatus::Critical
    } else if mae >= threshold.warning {
        ParameterStatus::Warning
    } else {
        ParameterStatus::Normal
    }
}

/// Pearson correlation with its two-sided p-value.
///
/// Returns `(0.0, 1.0)` when the coefficient is undefined (fewer than two
/// points or a constant input).
pub fn pearson(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len().min(y.len());
    if n < 2 {
        return (0.0, 1.0);
    }

    let nf = n as f64;
    let mean_x = x[..n].iter().sum::<f64>() / nf;
    let mean_y = y[..n].iter().sum::<f64>() / nf;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x[..n].iter().zip(&y[..n]) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let denom = (sxx * syy).sqrt();
    if !(denom > f64::EPSILON) {
        return (0.0, 1.0);
    }

    let r = (sxy / denom).clamp(-1.0, 1.0);
    if n == 2 {
        return (r, 1.0);
    }

    let df = nf - 2.0;
    let one_minus_r2 = 1.0 - r * r;
    if one_minus_r2 <= 0.0 {
        return (r, 0.0);
    }

    // Two-sided Student t tail: P(|T| > t) = I_{df/(df+t²)}(df/2, 1/2)
    let t2 = r * r * df / one_minus_r2;
    let p = regularized_incomplete_beta(df / (df + t2), df / 2.0, 0.5);
    (r, p.clamp(0.0, 1.0))
}

/// I_x(a, b) via Lentz's continued fraction.
fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Lanczos approximation (g = 7, n = 9).
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut acc = COEFFS[0];
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::series_from;

    fn reference() -> Series {
        let t: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let ph: Vec<f64> = t.iter().map(|i| 5.5 - i * 0.03).collect();
        let temp: Vec<f64> = t.iter().map(|i| 19.0 + (i / 5.0).sin()).collect();
        let co2: Vec<f64> = t.iter().map(|i| i * 0.5).collect();
        series_from(&t, &ph, &temp, &co2)
    }

    #[test]
    fn test_identical_series() {
        let scorer = DeviationScorer::new(ThresholdConfig::default());
        let series = reference();
        let report = scorer.score(&series, &series);

        for (_, metrics) in report.iter() {
            assert!(metrics.mae < 1e-6);
            assert!(metrics.rmse < 1e-6);
            assert!(metrics.correlation > 0.999);
            assert!(metrics.correlation_p_value < 1e-6);
            assert_eq!(metrics.status, ParameterStatus::Normal);
        }
    }

    #[test]
    fn test_metric_ranges() {
        let scorer = DeviationScorer::new(ThresholdConfig::default());
        let reference = reference();
        let noisy_ph: Vec<f64> = reference
            .values(Parameter::Ph)
            .iter()
            .enumerate()
            .map(|(i, v)| v + if i % 2 == 0 { 0.1 } else { -0.15 })
            .collect();
        let generated = series_from(
            &reference.timestamps(),
            &noisy_ph,
            &reference.values(Parameter::Temperature).iter().rev().copied().collect::<Vec<_>>(),
            &reference.values(Parameter::Co2),
        );

        let report = scorer.score(&generated, &reference);
        for (_, m) in report.iter() {
            assert!(m.mae >= 0.0);
            assert!(m.rmse >= 0.0);
            assert!((-1.0..=1.0).contains(&m.correlation));
            assert!((0.0..=1.0).contains(&m.correlation_p_value));
        }
        assert!((report.ph.mae - 0.125).abs() < 1e-9);
        assert!((report.ph.max_deviation - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_status_rules() {
        let t = DeviationThreshold { warning: 0.3, critical: 0.5 };
        assert_eq!(deviation_status(0.1, 0.5, t), ParameterStatus::Critical);
        assert_eq!(deviation_status(0.3, 0.49, t), ParameterStatus::Warning);
        assert_eq!(deviation_status(0.29, 0.49, t), ParameterStatus::Normal);
    }

    #[test]
    fn test_constant_series_correlation_sentinel() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[0.5, 0.7, 0.9]), (0.0, 1.0));
        assert_eq!(pearson(&[1.0], &[2.0]), (0.0, 1.0));
        assert_eq!(pearson(&[], &[]), (0.0, 1.0));
    }

    #[test]
    fn test_empty_overlap_is_defined() {
        let scorer = DeviationScorer::new(ThresholdConfig::default());
        let threshold = DeviationThreshold { warning: 0.3, critical: 0.5 };
        let m = scorer.score_parameter(&[], &[], threshold);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.correlation, 0.0);
        assert_eq!(m.correlation_p_value, 1.0);
        assert_eq!(m.status, ParameterStatus::Normal);
    }

    #[test]
    fn test_p_value_matches_reference_values() {
        // r = 0.5 with n = 12 has a two-sided p of about 0.0978
        let x: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let (r, p) = pearson(&x, &x);
        assert!((r - 1.0).abs() < 1e-12);
        assert_eq!(p, 0.0);

        let t2: f64 = 0.25 * 10.0 / 0.75;
        let p = regularized_incomplete_beta(10.0 / (10.0 + t2), 5.0, 0.5);
        assert!((p - 0.0978).abs() < 1e-3, "p = {}", p);
    }

    #[test]
    fn test_ln_gamma() {
        assert!((ln_gamma(5.0) - 24f64.ln()).abs() < 1e-10);
        assert!((ln_gamma(0.5) - std::f64::consts::PI.sqrt().ln()).abs() < 1e-10);
    }
}

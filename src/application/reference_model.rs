// Reference model - Golden-standard series, its statistics and the trained detector
use serde::Serialize;

use crate::application::novelty_detector::NoveltyDetector;
use crate::domain::error::MonitorError;
use crate::domain::series::{PerParameter, Reading, Series};
use crate::infrastructure::config::NoveltyConfig;

/// Summary statistics of one reference parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl ParameterStats {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self { mean: 0.0, std_dev: 0.0, min: 0.0, max: 0.0 };
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));

        Self { mean, std_dev: variance.sqrt(), min, max }
    }
}

/// Read-only ground truth shared by every batch.
#[derive(Debug, Clone)]
pub struct ReferenceModel {
    series: Series,
    stats: PerParameter<ParameterStats>,
    detector: NoveltyDetector,
}

impl ReferenceModel {
    /// Build the model and train the novelty detector on the reference points.
    pub fn new(series: Series, novelty: &NoveltyConfig) -> Result<Self, MonitorError> {
        let detector = NoveltyDetector::fit(&series.vectors(), novelty)?;
        let stats = PerParameter::from_fn(|p| ParameterStats::from_values(&series.values(p)));

        tracing::info!(
            samples = series.len(),
            threshold = detector.threshold(),
            "Reference model ready"
        );

        Ok(Self { series, stats, detector })
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    pub fn stats(&self) -> &PerParameter<ParameterStats> {
        &self.stats
    }

    pub fn detector(&self) -> &NoveltyDetector {
        &self.detector
    }

    /// Reference values at `index`, clamped to the last sample past the end.
    pub fn ideal_at(&self, index: usize) -> Option<Reading> {
        self.series
            .get(index)
            .or_else(|| self.series.last())
            .map(|s| s.reading())
    }
}

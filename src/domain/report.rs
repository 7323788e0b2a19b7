// Comparison and streaming result records
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::batch::{BatchId, BatchStatus, ParameterStatus};
use super::series::{Parameter, PerParameter, Reading};

/// Per-tick comparison of one live sample against the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub batch_id: BatchId,
    pub sample_index: usize,
    pub timestamp: f64,
    pub actual: Reading,
    pub ideal: Reading,
    pub deviations: Reading,
    pub status: TickStatus,
    /// Worst per-parameter threshold status at this tick.
    pub parameter_status: ParameterStatus,
    /// 0..=100, one decimal.
    pub quality_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickStatus {
    pub ph: ParameterStatus,
    pub temperature: ParameterStatus,
    pub co2: ParameterStatus,
    /// Score-banded status; this is what alerts track.
    pub overall: BatchStatus,
}

/// Raw sample as published alongside its comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub batch_id: BatchId,
    pub target_status: BatchStatus,
    pub expected_quality_score: f64,
    pub description: String,
    pub timestamp: f64,
    pub ph: f64,
    pub temperature: f64,
    pub co2: f64,
    pub sample_index: usize,
    pub total_samples: usize,
}

/// One batch's contribution to a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub batch_id: BatchId,
    pub data_point: DataPoint,
    pub comparison: ComparisonReport,
    pub produced_at: DateTime<Utc>,
}

/// Counts per score band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusDistribution {
    pub perfect: usize,
    pub acceptable: usize,
    pub concerning: usize,
    pub failed: usize,
}

/// Aggregate view over the latest envelope of each active batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSummary {
    pub total_active_batches: usize,
    pub status_distribution: StatusDistribution,
    pub average_quality_score: f64,
    pub min_quality_score: f64,
    pub max_quality_score: f64,
    /// Concerning plus failed.
    pub batches_needing_attention: usize,
}

impl StreamSummary {
    pub fn from_latest(latest: &[ResultEnvelope]) -> Self {
        let mut distribution = StatusDistribution::default();
        for envelope in latest {
            match envelope.comparison.status.overall {
                BatchStatus::Perfect => distribution.perfect += 1,
                BatchStatus::Acceptable => distribution.acceptable += 1,
                BatchStatus::Concerning => distribution.concerning += 1,
                BatchStatus::Failed => distribution.failed += 1,
            }
        }

        let scores: Vec<f64> = latest.iter().map(|e| e.comparison.quality_score).collect();
        let (average, min, max) = if scores.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let average = scores.iter().sum::<f64>() / scores.len() as f64;
            let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
            let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            ((average * 100.0).round() / 100.0, min, max)
        };

        Self {
            total_active_batches: latest.len(),
            status_distribution: distribution,
            average_quality_score: average,
            min_quality_score: min,
            max_quality_score: max,
            batches_needing_attention: distribution.concerning + distribution.failed,
        }
    }
}

/// Statistical deviation metrics for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub max_deviation: f64,
    pub correlation: f64,
    pub correlation_p_value: f64,
    /// generated − reference, per aligned point.
    pub point_deviations: Vec<f64>,
    pub status: ParameterStatus,
}

pub type DeviationReport = PerParameter<DeviationMetrics>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSimilarity {
    pub normalized_distance_similarity: f64,
    pub elastic_alignment_similarity: f64,
    pub angular_similarity: f64,
    pub average_similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    pub parameters: PerParameter<ParameterSimilarity>,
    pub overall: f64,
}

/// Classification of an outlying point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyKind {
    pub parameter: Parameter,
    pub severity: ParameterStatus,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_deviation", self.severity, self.parameter.short_name())
    }
}

/// String form of an [`AnomalyKind`] (`critical_ph_deviation`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyKindLabel(pub AnomalyKind);

impl Serialize for AnomalyKindLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyDetail {
    pub index: usize,
    pub timestamp: f64,
    pub kinds: Vec<AnomalyKindLabel>,
    pub deviations: Reading,
}

/// Batch-level novelty result from comparing two full series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub has_anomalies: bool,
    pub anomaly_count: usize,
    pub anomaly_percentage: f64,
    pub indices: Vec<usize>,
    pub timestamps: Vec<f64>,
    /// Per-point anomaly score for every aligned point; higher is more anomalous.
    pub scores: Vec<f64>,
    pub details: Vec<AnomalyDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub overall_status: ParameterStatus,
    pub message: String,
    pub critical_parameters: Vec<Parameter>,
    pub warning_parameters: Vec<Parameter>,
    pub quality_score: f64,
    pub recommendations: Vec<String>,
}

/// Full-series comparison bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetComparison {
    pub deviations: DeviationReport,
    pub anomalies: AnomalyReport,
    pub similarity: SimilarityReport,
    pub assessment: Assessment,
    pub compared_points: usize,
    pub comparison_timestamp: DateTime<Utc>,
}

impl fmt::Display for DatasetComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        let thin = "-".repeat(60);

        writeln!(f, "{}", rule)?;
        writeln!(f, "FERMENTATION DATA COMPARISON REPORT")?;
        writeln!(f, "{}", rule)?;
        writeln!(f)?;

        let a = &self.assessment;
        writeln!(f, "Overall Status: {}", a.overall_status.as_str().to_uppercase())?;
        writeln!(f, "Quality Score: {:.1}/100", a.quality_score)?;
        writeln!(f, "Message: {}", a.message)?;
        writeln!(f)?;

        writeln!(f, "PARAMETER DEVIATIONS:")?;
        writeln!(f, "{}", thin)?;
        for (parameter, d) in self.deviations.iter() {
            writeln!(f, "{}:", parameter.as_str().to_uppercase())?;
            writeln!(f, "  Status: {}", d.status)?;
            writeln!(f, "  MAE: {:.3}", d.mae)?;
            writeln!(f, "  RMSE: {:.3}", d.rmse)?;
            writeln!(f, "  Max Deviation: {:.3}", d.max_deviation)?;
            writeln!(f, "  Correlation: {:.3}", d.correlation)?;
            writeln!(f)?;
        }

        writeln!(f, "ANOMALY DETECTION:")?;
        writeln!(f, "{}", thin)?;
        writeln!(f, "Anomalies Detected: {}", self.anomalies.has_anomalies)?;
        writeln!(f, "Anomaly Count: {}", self.anomalies.anomaly_count)?;
        writeln!(f, "Anomaly Percentage: {:.1}%", self.anomalies.anomaly_percentage)?;
        writeln!(f)?;

        writeln!(f, "RECOMMENDATIONS:")?;
        writeln!(f, "{}", thin)?;
        for (i, rec) in a.recommendations.iter().enumerate() {
            writeln!(f, "{}. {}", i + 1, rec)?;
        }
        writeln!(f)?;
        write!(f, "{}", rule)
    }
}

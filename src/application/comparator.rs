// Comparator - Per-tick scoring and full-series comparison against the reference
use std::sync::Arc;

use chrono::Utc;

use crate::application::deviation_scorer::DeviationScorer;
use crate::application::novelty_detector::NoveltyDetector;
use crate::application::reference_model::ReferenceModel;
use crate::application::similarity_scorer::SimilarityScorer;
use crate::domain::batch::{BatchId, BatchStatus, ParameterStatus};
use crate::domain::error::MonitorError;
use crate::domain::report::{
    AnomalyDetail, AnomalyKind, AnomalyKindLabel, AnomalyReport, Assessment, ComparisonReport,
    DatasetComparison, DeviationReport, SimilarityReport, TickStatus,
};
use crate::domain::series::{align, Parameter, PerParameter, Sample, Series};
use crate::infrastructure::config::{
    ComparisonConfig, DeviationThreshold, NoveltyConfig, Settings, TickScoringConfig,
};

#[derive(Debug, Clone)]
pub struct Comparator {
    reference: Option<Arc<ReferenceModel>>,
    deviation: DeviationScorer,
    similarity: SimilarityScorer,
    comparison: ComparisonConfig,
    tick_scoring: TickScoringConfig,
    novelty: NoveltyConfig,
}

impl Comparator {
    pub fn new(reference: Option<Arc<ReferenceModel>>, settings: &Settings) -> Self {
        Self {
            reference,
            deviation: DeviationScorer::new(settings.thresholds.clone()),
            similarity: SimilarityScorer::new(settings.comparison.dtw_window),
            comparison: settings.comparison.clone(),
            tick_scoring: settings.tick_scoring.clone(),
            novelty: settings.novelty.clone(),
        }
    }

    pub fn reference(&self) -> Option<&ReferenceModel> {
        self.reference.as_deref()
    }

    /// Score one live sample against the reference value at `sample_index`.
    pub fn compare_point(
        &self,
        batch_id: BatchId,
        sample_index: usize,
        sample: &Sample,
    ) -> Result<ComparisonReport, MonitorError> {
        let reference = self.reference.as_ref().ok_or(MonitorError::ReferenceUnavailable)?;
        let ideal = reference
            .ideal_at(sample_index)
            .ok_or(MonitorError::ReferenceUnavailable)?;

        let actual = sample.reading();
        let deviations = actual.abs_diff(&ideal);
        let statuses = PerParameter::from_fn(|p| {
            tick_status(deviations.value(p), self.deviation.threshold(p))
        });

        let score = Parameter::ALL
            .iter()
            .map(|p| {
                let tolerance = self.tick_scoring.tolerance.get(*p);
                (100.0 * (1.0 - deviations.value(*p) / tolerance)).max(0.0)
            })
            .sum::<f64>()
            / Parameter::ALL.len() as f64;

        let parameter_status = statuses
            .iter()
            .map(|(_, s)| *s)
            .max()
            .unwrap_or(ParameterStatus::Normal);

        Ok(ComparisonReport {
            batch_id,
            sample_index,
            timestamp: sample.timestamp,
            actual,
            ideal,
            deviations,
            status: TickStatus {
                ph: statuses.ph,
                temperature: statuses.temperature,
                co2: statuses.co2,
                overall: self.band(score),
            },
            parameter_status,
            quality_score: (score * 10.0).round() / 10.0,
        })
    }

    /// Score band for an unrounded tick quality score.
    pub fn band(&self, score: f64) -> BatchStatus {
        let bands = &self.tick_scoring.bands;
        if score >= bands.perfect {
            BatchStatus::Perfect
        } else if score >= bands.acceptable {
            BatchStatus::Acceptable
        } else if score >= bands.concerning {
            BatchStatus::Concerning
        } else {
            BatchStatus::Failed
        }
    }

    /// Compare a full generated series against `reference`, or the loaded
    /// reference when none is supplied.
    pub fn compare_series(
        &self,
        generated: &Series,
        reference: Option<&Series>,
    ) -> Result<DatasetComparison, MonitorError> {
        let (reference, fitted) = match reference {
            Some(series) => (series, None),
            None => {
                let model = self.reference.as_ref().ok_or(MonitorError::ReferenceUnavailable)?;
                (model.series(), Some(model.detector()))
            }
        };

        let (generated, reference) = align(generated, reference);

        // A supplied reference gets its own detector, trained on the aligned points
        let trained;
        let detector = match fitted {
            Some(detector) => detector,
            None => {
                trained = NoveltyDetector::fit(&reference.vectors(), &self.novelty)?;
                &trained
            }
        };

        let deviations = self.deviation.score(&generated, &reference);
        let anomalies = self.detect_anomalies(detector, &generated, &reference);
        let similarity = self.similarity.score(&generated, &reference);
        let assessment = self.assess(&deviations, &anomalies, &similarity);

        tracing::debug!(
            points = generated.len(),
            status = %assessment.overall_status,
            quality = assessment.quality_score,
            "Compared series"
        );

        Ok(DatasetComparison {
            deviations,
            anomalies,
            similarity,
            assessment,
            compared_points: generated.len(),
            comparison_timestamp: Utc::now(),
        })
    }

    fn detect_anomalies(
        &self,
        detector: &NoveltyDetector,
        generated: &Series,
        reference: &Series,
    ) -> AnomalyReport {
        let scores = detector.score(&generated.vectors());
        let indices: Vec<usize> = scores
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_outlier)
            .map(|(i, _)| i)
            .collect();

        let details: Vec<AnomalyDetail> = indices
            .iter()
            .filter_map(|&index| {
                let actual = generated.get(index)?;
                let ideal = reference.get(index)?;
                let deviations = actual.reading().abs_diff(&ideal.reading());
                let kinds = Parameter::ALL
                    .iter()
                    .filter_map(|p| {
                        let threshold = self.deviation.threshold(*p);
                        let value = deviations.value(*p);
                        let severity = if value > threshold.critical {
                            ParameterStatus::Critical
                        } else if value > threshold.warning {
                            ParameterStatus::Warning
                        } else {
                            return None;
                        };
                        Some(AnomalyKindLabel(AnomalyKind { parameter: *p, severity }))
                    })
                    .collect();

                Some(AnomalyDetail {
                    index,
                    timestamp: actual.timestamp,
                    kinds,
                    deviations,
                })
            })
            .collect();

        let anomaly_percentage = if scores.is_empty() {
            0.0
        } else {
            indices.len() as f64 / scores.len() as f64 * 100.0
        };

        AnomalyReport {
            has_anomalies: !indices.is_empty(),
            anomaly_count: indices.len(),
            anomaly_percentage,
            timestamps: details.iter().map(|d| d.timestamp).collect(),
            indices,
            scores: scores.iter().map(|s| s.anomaly_score).collect(),
            details,
        }
    }

    fn assess(
        &self,
        deviations: &DeviationReport,
        anomalies: &AnomalyReport,
        similarity: &SimilarityReport,
    ) -> Assessment {
        let with_status = |status: ParameterStatus| -> Vec<Parameter> {
            deviations
                .iter()
                .filter(|(_, m)| m.status == status)
                .map(|(p, _)| p)
                .collect()
        };
        let critical_parameters = with_status(ParameterStatus::Critical);
        let warning_parameters = with_status(ParameterStatus::Warning);

        let (overall_status, message) = if !critical_parameters.is_empty() {
            (
                ParameterStatus::Critical,
                format!("Critical deviations detected in: {}", join(&critical_parameters)),
            )
        } else if !warning_parameters.is_empty() {
            (
                ParameterStatus::Warning,
                format!("Warning deviations detected in: {}", join(&warning_parameters)),
            )
        } else if anomalies.has_anomalies {
            (
                ParameterStatus::Warning,
                format!("Anomalies detected at {} time points", anomalies.anomaly_count),
            )
        } else if similarity.overall < self.comparison.similarity_threshold {
            (
                ParameterStatus::Warning,
                format!("Low similarity score: {:.2}", similarity.overall),
            )
        } else {
            (
                ParameterStatus::Normal,
                "Fermentation process is within normal parameters".to_string(),
            )
        };

        let recommendations =
            self.recommendations(&critical_parameters, &warning_parameters, anomalies);

        Assessment {
            overall_status,
            message,
            critical_parameters,
            warning_parameters,
            quality_score: similarity.overall * 100.0,
            recommendations,
        }
    }

    fn recommendations(
        &self,
        critical: &[Parameter],
        warning: &[Parameter],
        anomalies: &AnomalyReport,
    ) -> Vec<String> {
        let mut recommendations: Vec<String> = Parameter::ALL
            .iter()
            .filter_map(|p| {
                let (urgent, monitor) = match p {
                    Parameter::Ph => (
                        "URGENT: Check pH levels - possible contamination or acid imbalance",
                        "Monitor pH closely - slight deviation detected",
                    ),
                    Parameter::Temperature => (
                        "URGENT: Check temperature control - cooling system may be failing",
                        "Monitor temperature - ensure cooling system is functioning",
                    ),
                    Parameter::Co2 => (
                        "URGENT: Check CO2 levels - fermentation may be stalled or over-active",
                        "Monitor CO2 production - fermentation rate may be abnormal",
                    ),
                };
                if critical.contains(p) {
                    Some(urgent.to_string())
                } else if warning.contains(p) {
                    Some(monitor.to_string())
                } else {
                    None
                }
            })
            .collect();

        if anomalies.has_anomalies
            && anomalies.anomaly_percentage > self.comparison.anomaly_density_percent
        {
            recommendations
                .push("Multiple anomalies detected - consider full system inspection".to_string());
        }
        if recommendations.is_empty() {
            recommendations.push("Continue monitoring - process is normal".to_string());
        }
        recommendations
    }
}

/// Single-reading status: below warning is normal, below critical is warning.
pub fn tick_status(deviation: f64, threshold: DeviationThreshold) -> ParameterStatus {
    if deviation < threshold.warning {
        ParameterStatus::Normal
    } else if deviation < threshold.critical {
        ParameterStatus::Warning
    } else {
        ParameterStatus::Critical
    }
}

fn join(parameters: &[Parameter]) -> String {
    parameters.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
}

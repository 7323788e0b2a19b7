// Novelty detector - Isolation forest trained on the reference distribution
//
// Each tree isolates points with random axis-aligned cuts. Points that are
// isolated after few cuts sit in sparse regions and score as anomalous.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::domain::error::MonitorError;
use crate::domain::series::{FeatureVector, PARAMETER_COUNT};
use crate::infrastructure::config::NoveltyConfig;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Anomaly score for one query point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoveltyScore {
    /// In (0, 1]; higher means isolated sooner.
    pub anomaly_score: f64,
    pub is_outlier: bool,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        dim: usize,
        value: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn build(points: Vec<FeatureVector>, max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: grow(points, 0, max_depth, rng),
        }
    }

    fn path_length(&self, point: &FeatureVector) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                Node::Leaf { size } => return depth as f64 + average_path_length(*size),
                Node::Split {
                    dim,
                    value,
                    left,
                    right,
                } => {
                    node = if point[*dim] < *value { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

fn grow(points: Vec<FeatureVector>, depth: usize, max_depth: usize, rng: &mut StdRng) -> Node {
    if depth >= max_depth || points.len() <= 1 {
        return Node::Leaf { size: points.len() };
    }

    // Only dimensions with spread can be cut
    let mut bounds = Vec::with_capacity(PARAMETER_COUNT);
    for dim in 0..PARAMETER_COUNT {
        let (min, max) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p[dim]), hi.max(p[dim]))
        });
        if max > min {
            bounds.push((dim, min, max));
        }
    }
    if bounds.is_empty() {
        return Node::Leaf { size: points.len() };
    }

    let (dim, min, max) = bounds[rng.random_range(0..bounds.len())];
    let value = rng.random_range(min..max);
    let (left, right): (Vec<_>, Vec<_>) = points.into_iter().partition(|p| p[dim] < value);

    Node::Split {
        dim,
        value,
        left: Box::new(grow(left, depth + 1, max_depth, rng)),
        right: Box::new(grow(right, depth + 1, max_depth, rng)),
    }
}

/// Expected path length of an unsuccessful search in a random binary tree of `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated quantile of an unsorted sample, `q` in [0, 1].
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Ensemble outlier scorer fit on a reference point set.
#[derive(Debug, Clone)]
pub struct NoveltyDetector {
    trees: Vec<IsolationTree>,
    subsample: usize,
    contamination: f64,
    threshold: f64,
}

impl NoveltyDetector {
    /// Fit the forest. Identical input and seed reproduce identical trees.
    pub fn fit(reference: &[FeatureVector], config: &NoveltyConfig) -> Result<Self, MonitorError> {
        if reference.len() < 2 {
            return Err(MonitorError::InsufficientData {
                required: 2,
                actual: reference.len(),
            });
        }
        if reference.iter().flatten().any(|v| !v.is_finite()) {
            return Err(MonitorError::InvalidSeries(
                "reference points must be finite".into(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let subsample = config.sample_size.clamp(2, reference.len());
        let max_depth = (subsample as f64).log2().ceil() as usize;

        let trees = (0..config.trees.max(1))
            .map(|_| {
                let points = rand::seq::index::sample(&mut rng, reference.len(), subsample)
                    .into_iter()
                    .map(|i| reference[i])
                    .collect();
                IsolationTree::build(points, max_depth, &mut rng)
            })
            .collect();

        let mut detector = Self {
            trees,
            subsample,
            contamination: config.contamination,
            threshold: f64::INFINITY,
        };

        let self_scores: Vec<f64> = reference.iter().map(|p| detector.raw_score(p)).collect();
        detector.threshold = quantile(&self_scores, 1.0 - config.contamination);

        tracing::debug!(
            trees = detector.trees.len(),
            subsample,
            threshold = detector.threshold,
            "Fitted novelty detector"
        );

        Ok(detector)
    }

    fn raw_score(&self, point: &FeatureVector) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(point)).sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / average_path_length(self.subsample))
    }

    pub fn score_point(&self, point: &FeatureVector) -> NoveltyScore {
        let anomaly_score = self.raw_score(point);
        NoveltyScore {
            anomaly_score,
            is_outlier: anomaly_score > self.threshold,
        }
    }

    /// Score arbitrary points. Never fails; out-of-range values still get a score.
    pub fn score(&self, points: &[FeatureVector]) -> Vec<NoveltyScore> {
        points.iter().map(|p| self.score_point(p)).collect()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }
}

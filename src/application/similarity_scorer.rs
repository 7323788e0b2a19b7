// Similarity scorer - Fuses distance, elastic alignment and angular similarity
use crate::domain::report::{ParameterSimilarity, SimilarityReport};
use crate::domain::series::{PerParameter, Series};

#[derive(Debug, Clone, Default)]
pub struct SimilarityScorer {
    /// Sakoe-Chiba band for the alignment; unconstrained when `None`.
    dtw_window: Option<usize>,
}

impl SimilarityScorer {
    pub fn new(dtw_window: Option<usize>) -> Self {
        Self { dtw_window }
    }

    /// Score the generated series against the reference. `overall` × 100 is the
    /// published quality score.
    pub fn score(&self, generated: &Series, reference: &Series) -> SimilarityReport {
        let parameters = PerParameter::from_fn(|p| {
            self.score_values(&generated.values(p), &reference.values(p))
        });
        let overall = (parameters.ph.average_similarity
            + parameters.temperature.average_similarity
            + parameters.co2.average_similarity)
            / 3.0;

        SimilarityReport {
            parameters,
            overall: finite_or(overall, 1.0),
        }
    }

    pub fn score_values(&self, generated: &[f64], reference: &[f64]) -> ParameterSimilarity {
        let normalized_distance_similarity = normalized_distance_similarity(generated, reference);
        let elastic_alignment_similarity =
            1.0 / (1.0 + dtw_distance(generated, reference, self.dtw_window));
        let angular_similarity = cosine_similarity(generated, reference);

        ParameterSimilarity {
            normalized_distance_similarity,
            elastic_alignment_similarity,
            angular_similarity,
            average_similarity: (normalized_distance_similarity
                + elastic_alignment_similarity
                + angular_similarity)
                / 3.0,
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

/// `1 − d / (√n · range(generated))`. The range comes from the generated side only,
/// so swapping arguments changes the result when ranges differ.
pub fn normalized_distance_similarity(generated: &[f64], reference: &[f64]) -> f64 {
    let n = generated.len().min(reference.len());
    if n == 0 {
        return 1.0;
    }

    let distance = generated[..n]
        .iter()
        .zip(&reference[..n])
        .map(|(g, r)| (g - r).powi(2))
        .sum::<f64>()
        .sqrt();

    let (min, max) = generated[..n]
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let max_possible = (n as f64).sqrt() * (max - min);

    if max_possible > 0.0 {
        finite_or(1.0 - distance / max_possible, 0.0)
    } else {
        1.0
    }
}

/// Minimum cumulative |a_i − b_j| over monotonic, boundary-fixed alignments.
///
/// Two empty sequences align at zero cost; one empty side has no alignment and
/// yields infinity (similarity 0).
pub fn dtw_distance(a: &[f64], b: &[f64], window: Option<usize>) -> f64 {
    let (n, m) = (a.len(), b.len());
    if n == 0 && m == 0 {
        return 0.0;
    }
    if n == 0 || m == 0 {
        return f64::INFINITY;
    }

    // The band must at least cover the length difference for the corner to be reachable
    let band = window.map(|w| w.max(n.abs_diff(m)));

    let mut prev = vec![f64::INFINITY; m + 1];
    let mut curr = vec![f64::INFINITY; m + 1];
    prev[0] = 0.0;

    for i in 1..=n {
        curr.fill(f64::INFINITY);
        let (lo, hi) = match band {
            Some(w) => (i.saturating_sub(w).max(1), (i + w).min(m)),
            None => (1, m),
        };
        for j in lo..=hi {
            let cost = (a[i - 1] - b[j - 1]).abs();
            let best = prev[j].min(curr[j - 1]).min(prev[j - 1]);
            curr[j] = cost + best;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[m]
}

/// Cosine of the angle between the two value vectors.
///
/// Two zero vectors are treated as identical (1.0); one zero vector as
/// unrelated (0.0).
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    let dot: f64 = a[..n].iter().zip(&b[..n]).map(|(x, y)| x * y).sum();
    let norm_a = a[..n].iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b[..n].iter().map(|x| x * x).sum::<f64>().sqrt();

    match (norm_a > 0.0, norm_b > 0.0) {
        (true, true) => finite_or((dot / (norm_a * norm_b)).clamp(-1.0, 1.0), 0.0),
        (false, false) => 1.0,
        _ => 0.0,
    }
}

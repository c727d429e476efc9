//! Individual compatibility matrix construction
//!
//! Evaluates the pairwise metric for all M×N observation-prediction pairs,
//! producing the distance matrix, the boolean compatibility matrix, and the
//! per-observation compatible-candidate counts that order JCBB branching.
//!
//! With the spatial index enabled, prediction means go into a k-d tree and
//! only predictions within a conservative Euclidean gating radius are
//! exact-tested. The radius bounds the largest eigenvalue of each covariance
//! block by its trace, so a pair that could pass the exact test is never
//! skipped; skipped pairs keep the metric's worst value in the distance
//! matrix.

use log::debug;
use nalgebra::DMatrix;

use crate::metric::JointEvaluator;
use crate::spatial::{CandidateLookup, KdTree, LinearScan};
use crate::types::AssociationMetric;

/// Prebuilt pairwise compatibility data, read-only after construction
#[derive(Debug, Clone)]
pub struct CompatibilityMatrix {
    /// M×N distances (d² for Mahalanobis, log-likelihood for matching
    /// likelihood)
    pub distances: DMatrix<f64>,
    /// M×N individual test outcomes
    pub compatible: DMatrix<bool>,
    /// Per observation, how many predictions pass the individual test
    pub counts: Vec<u32>,
}

impl CompatibilityMatrix {
    /// Number of observations
    #[inline]
    pub fn num_observations(&self) -> usize {
        self.distances.nrows()
    }

    /// Number of predictions
    #[inline]
    pub fn num_predictions(&self) -> usize {
        self.distances.ncols()
    }
}

/// Builds the compatibility matrix for one query
pub struct CompatibilityMatrixBuilder<'a> {
    evaluator: &'a JointEvaluator<'a>,
    metric: AssociationMetric,
    /// Admissibility threshold: chi-square gate at O degrees of freedom for
    /// Mahalanobis, the log-likelihood floor for matching likelihood
    threshold: f64,
    use_spatial_index: bool,
}

impl<'a> CompatibilityMatrixBuilder<'a> {
    pub fn new(
        evaluator: &'a JointEvaluator<'a>,
        metric: AssociationMetric,
        threshold: f64,
        use_spatial_index: bool,
    ) -> Self {
        Self {
            evaluator,
            metric,
            threshold,
            use_spatial_index,
        }
    }

    /// Evaluate all pairs and assemble the matrix
    pub fn build(&self) -> CompatibilityMatrix {
        let m = self.evaluator.observations().nrows();
        let n = self.evaluator.predictions().nrows();

        let mut distances = DMatrix::from_element(m, n, self.metric.worst_value());
        let mut compatible = DMatrix::from_element(m, n, false);
        let mut counts = vec![0u32; m];

        if m == 0 || n == 0 {
            return CompatibilityMatrix {
                distances,
                compatible,
                counts,
            };
        }

        let lookup: Box<dyn CandidateLookup> = if self.use_spatial_index {
            Box::new(KdTree::build(self.evaluator.predictions()))
        } else {
            Box::new(LinearScan::new(n))
        };
        let radius_sq = self.gating_radius_sq(n);
        debug!(
            "compatibility build: {}x{} pairs, spatial index {}, gate radius² {:.3}",
            m, n, self.use_spatial_index, radius_sq
        );

        let mut candidates = Vec::with_capacity(n);
        let mut query = vec![0.0; self.evaluator.obs_dim()];
        for i in 0..m {
            for (d, value) in query.iter_mut().zip(self.evaluator.observations().row(i).iter()) {
                *d = *value;
            }
            candidates.clear();
            lookup.candidates(&query, radius_sq, &mut candidates);

            for &j in &candidates {
                // Cholesky failure on this block: leave the pair incompatible
                let Some(stat) = self.evaluator.pair_statistic(i, j) else {
                    continue;
                };
                let (value, is_compatible) = match self.metric {
                    AssociationMetric::Mahalanobis => {
                        (stat.mahalanobis_sq, stat.mahalanobis_sq <= self.threshold)
                    }
                    AssociationMetric::MatchingLikelihood => {
                        (stat.log_likelihood, stat.log_likelihood >= self.threshold)
                    }
                };
                distances[(i, j)] = value;
                if is_compatible {
                    compatible[(i, j)] = true;
                    counts[i] += 1;
                }
            }
        }

        CompatibilityMatrix {
            distances,
            compatible,
            counts,
        }
    }

    /// Conservative Euclidean gating radius squared for the spatial index
    ///
    /// For a pair to pass d² ≤ g it must satisfy |ν|² ≤ g·λmax(S) ≤
    /// g·trace(S); taking the maximum over all prediction blocks gives one
    /// radius valid for every query point.
    fn gating_radius_sq(&self, n: usize) -> f64 {
        if !self.use_spatial_index {
            return f64::INFINITY;
        }
        let o = self.evaluator.obs_dim();
        let mut radius_sq = 0.0f64;
        for j in 0..n {
            let block = self.evaluator.covariance().block(j, o);
            let trace: f64 = (0..o).map(|d| block[(d, d)]).sum();
            let d2_bound = match self.metric {
                AssociationMetric::Mahalanobis => self.threshold,
                // logL ≥ T  ⟺  d² ≤ -2T - O·ln(2π) - ln|S|
                AssociationMetric::MatchingLikelihood => {
                    let det = block.into_owned().determinant();
                    (-2.0 * self.threshold
                        - o as f64 * (2.0 * std::f64::consts::PI).ln()
                        - det.ln())
                    .max(0.0)
                }
            };
            radius_sq = radius_sq.max(d2_bound * trace);
        }
        radius_sq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::chi2_inv;
    use crate::types::PredictionCovariance;

    fn two_by_two_scene() -> (DMatrix<f64>, DMatrix<f64>, PredictionCovariance) {
        let observations = DMatrix::from_row_slice(2, 2, &[0.1, 0.0, 10.0, 10.1]);
        let predictions = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 10.0, 10.0]);
        let cov = PredictionCovariance::Independent(vec![
            DMatrix::identity(2, 2) * 0.05,
            DMatrix::identity(2, 2) * 0.05,
        ]);
        (observations, predictions, cov)
    }

    #[test]
    fn test_separated_pairs_are_diagonal_compatible() {
        let (observations, predictions, cov) = two_by_two_scene();
        let eval = JointEvaluator::new(&observations, &predictions, &cov);
        let thr = chi2_inv(0.99, 2);
        let matrix =
            CompatibilityMatrixBuilder::new(&eval, AssociationMetric::Mahalanobis, thr, false)
                .build();

        assert!(matrix.compatible[(0, 0)]);
        assert!(matrix.compatible[(1, 1)]);
        assert!(!matrix.compatible[(0, 1)]);
        assert!(!matrix.compatible[(1, 0)]);
        assert_eq!(matrix.counts, vec![1, 1]);
    }

    #[test]
    fn test_spatial_index_preserves_compatibility() {
        let (observations, predictions, cov) = two_by_two_scene();
        let eval = JointEvaluator::new(&observations, &predictions, &cov);
        let thr = chi2_inv(0.99, 2);

        let exhaustive =
            CompatibilityMatrixBuilder::new(&eval, AssociationMetric::Mahalanobis, thr, false)
                .build();
        let indexed =
            CompatibilityMatrixBuilder::new(&eval, AssociationMetric::Mahalanobis, thr, true)
                .build();

        assert_eq!(exhaustive.compatible, indexed.compatible);
        assert_eq!(exhaustive.counts, indexed.counts);
        // Exact-tested entries agree wherever the index did test them
        for i in 0..2 {
            for j in 0..2 {
                if indexed.distances[(i, j)].is_finite() {
                    assert!(
                        (indexed.distances[(i, j)] - exhaustive.distances[(i, j)]).abs() < 1e-12
                    );
                }
            }
        }
    }

    #[test]
    fn test_wider_quantile_never_shrinks_compatibility() {
        let (observations, predictions, cov) = two_by_two_scene();
        let eval = JointEvaluator::new(&observations, &predictions, &cov);

        let tight =
            CompatibilityMatrixBuilder::new(
                &eval,
                AssociationMetric::Mahalanobis,
                chi2_inv(0.5, 2),
                false,
            )
            .build();
        let wide = CompatibilityMatrixBuilder::new(
            &eval,
            AssociationMetric::Mahalanobis,
            chi2_inv(0.999, 2),
            false,
        )
        .build();

        for i in 0..2 {
            for j in 0..2 {
                if tight.compatible[(i, j)] {
                    assert!(wide.compatible[(i, j)]);
                }
            }
        }
    }

    #[test]
    fn test_indefinite_block_only_disables_its_pairs() {
        let observations = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        let predictions = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.1, 0.0]);
        // First block is indefinite, second is fine
        let cov = PredictionCovariance::Independent(vec![
            DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]),
            DMatrix::identity(2, 2),
        ]);
        let eval = JointEvaluator::new(&observations, &predictions, &cov);
        let thr = chi2_inv(0.99, 2);
        let matrix =
            CompatibilityMatrixBuilder::new(&eval, AssociationMetric::Mahalanobis, thr, false)
                .build();

        assert!(!matrix.compatible[(0, 0)]);
        assert!(matrix.distances[(0, 0)].is_infinite());
        assert!(matrix.compatible[(0, 1)]);
        assert_eq!(matrix.counts, vec![1]);
    }

    #[test]
    fn test_matching_likelihood_metric() {
        let observations = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        let predictions = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 50.0, 50.0]);
        let cov = PredictionCovariance::Independent(vec![
            DMatrix::identity(2, 2) * 0.01,
            DMatrix::identity(2, 2) * 0.01,
        ]);
        let eval = JointEvaluator::new(&observations, &predictions, &cov);
        // 0.01·I has a high density peak: logL at zero innovation is
        // -0.5(2 ln 2π + ln 1e-4) ≈ 2.77
        let matrix = CompatibilityMatrixBuilder::new(
            &eval,
            AssociationMetric::MatchingLikelihood,
            0.0,
            false,
        )
        .build();

        assert!(matrix.compatible[(0, 0)]);
        assert!(!matrix.compatible[(0, 1)]);
        assert!(matrix.distances[(0, 0)] > matrix.distances[(0, 1)]);
    }
}

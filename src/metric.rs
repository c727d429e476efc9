//! Compatibility statistics between observations and predictions
//!
//! One Cholesky factorization per evaluation yields both the squared
//! Mahalanobis distance and the Gaussian matching log-likelihood:
//!
//! - `d² = νᵀ S⁻¹ ν`
//! - `logL = -0.5 × (dim×ln(2π) + ln|S| + d²)`
//!
//! where `ν` is the innovation and `S` the innovation covariance (the
//! prediction's own block for pairwise tests, the enlarged hypothesis block
//! for joint tests). A failed factorization means `S` is not
//! positive-definite; the caller treats that pair or branch as incompatible.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};

use crate::types::PredictionCovariance;

/// Both statistics of one innovation against one covariance block
#[derive(Debug, Clone, Copy)]
pub struct PairStatistic {
    /// Squared Mahalanobis distance `νᵀ S⁻¹ ν`
    pub mahalanobis_sq: f64,
    /// Gaussian matching log-likelihood
    pub log_likelihood: f64,
}

/// Evaluate innovation `v` against covariance `s`
///
/// Returns `None` when `s` is not positive-definite.
pub fn innovation_statistic(v: &DVector<f64>, s: DMatrix<f64>) -> Option<PairStatistic> {
    let dim = v.len();
    let chol = s.cholesky()?;

    let solved = chol.solve(v);
    let mahalanobis_sq = v.dot(&solved);

    // ln|S| = 2 × Σ ln L_ii from the Cholesky factor
    let l = chol.l();
    let log_det: f64 = (0..dim).map(|i| l[(i, i)].ln()).sum::<f64>() * 2.0;
    let log_likelihood = -0.5 * (dim as f64 * (2.0 * PI).ln() + log_det + mahalanobis_sq);

    Some(PairStatistic {
        mahalanobis_sq,
        log_likelihood,
    })
}

/// Evaluates pairwise and joint statistics for one query's inputs
///
/// Borrows the observation/prediction matrices for the lifetime of the query;
/// all evaluations share the same covariance source so the full and
/// independent input forms go through one code path.
pub struct JointEvaluator<'a> {
    observations: &'a DMatrix<f64>,
    predictions: &'a DMatrix<f64>,
    covariance: &'a PredictionCovariance,
    obs_dim: usize,
}

impl<'a> JointEvaluator<'a> {
    pub fn new(
        observations: &'a DMatrix<f64>,
        predictions: &'a DMatrix<f64>,
        covariance: &'a PredictionCovariance,
    ) -> Self {
        let obs_dim = observations.ncols().max(predictions.ncols());
        Self {
            observations,
            predictions,
            covariance,
            obs_dim,
        }
    }

    /// Observation dimension O
    #[inline]
    pub fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    /// Observation mean rows (M×O)
    #[inline]
    pub fn observations(&self) -> &DMatrix<f64> {
        self.observations
    }

    /// Prediction mean rows (N×O)
    #[inline]
    pub fn predictions(&self) -> &DMatrix<f64> {
        self.predictions
    }

    /// Prediction covariance input
    #[inline]
    pub fn covariance(&self) -> &PredictionCovariance {
        self.covariance
    }

    /// Innovation `z_i - ŷ_j`
    pub fn innovation(&self, obs: usize, pred: usize) -> DVector<f64> {
        (self.observations.row(obs) - self.predictions.row(pred)).transpose()
    }

    /// Statistics of a single observation-prediction pair
    pub fn pair_statistic(&self, obs: usize, pred: usize) -> Option<PairStatistic> {
        let v = self.innovation(obs, pred);
        let s = self.covariance.block(pred, self.obs_dim).into_owned();
        innovation_statistic(&v, s)
    }

    /// Joint statistics of an entire partial hypothesis
    ///
    /// Stacks the innovations of all pairs and assembles the corresponding
    /// joint covariance: the selected submatrix of the full joint covariance,
    /// or the block-diagonal stack of per-prediction blocks in the
    /// independent form.
    pub fn joint_statistic(&self, pairs: &[(usize, usize)]) -> Option<PairStatistic> {
        let k = pairs.len();
        if k == 0 {
            return Some(PairStatistic {
                mahalanobis_sq: 0.0,
                log_likelihood: 0.0,
            });
        }
        if k == 1 {
            return self.pair_statistic(pairs[0].0, pairs[0].1);
        }

        let o = self.obs_dim;
        let dim = k * o;

        let mut v = DVector::zeros(dim);
        for (a, &(obs, pred)) in pairs.iter().enumerate() {
            v.rows_mut(a * o, o).copy_from(&self.innovation(obs, pred));
        }

        let mut s = DMatrix::zeros(dim, dim);
        for (a, &(_, pred_a)) in pairs.iter().enumerate() {
            s.view_mut((a * o, a * o), (o, o))
                .copy_from(&self.covariance.block(pred_a, o));
            for (b, &(_, pred_b)) in pairs.iter().enumerate().skip(a + 1) {
                if let Some(cross) = self.covariance.cross_block(pred_a, pred_b, o) {
                    s.view_mut((a * o, b * o), (o, o)).copy_from(&cross);
                    s.view_mut((b * o, a * o), (o, o)).copy_from(&cross.transpose());
                }
            }
        }

        innovation_statistic(&v, s)
    }
}

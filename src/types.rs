//! Core types for data-association queries
//!
//! Configuration enums, the two prediction-covariance input forms, and the
//! result record returned to the caller.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DMatrixView};

use crate::error::DataAssociationError;

/// Assignment method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AssociationMethod {
    /// Greedy nearest-neighbor: fast, ignores coupling between chosen pairs
    NearestNeighbor,
    /// Joint Compatibility Branch and Bound: maximum-cardinality jointly
    /// compatible assignment
    Jcbb,
}

/// Pairwise statistical metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AssociationMetric {
    /// Squared Mahalanobis distance, gated with an inverse chi-square quantile
    Mahalanobis,
    /// Gaussian matching log-likelihood, gated with a fixed threshold
    MatchingLikelihood,
}

/// Configuration for one association query
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssociationConfig {
    /// Assignment method
    pub method: AssociationMethod,
    /// Metric filling the individual distance matrix
    pub metric: AssociationMetric,
    /// Chi-square gate quantile, in (0, 1)
    pub chi2_quantile: f64,
    /// Index prediction means in a k-d tree to skip exact tests on far pairs
    pub use_spatial_index: bool,
    /// Optional external IDs, one per prediction; when present the result
    /// mapping carries these instead of raw prediction indices
    pub prediction_ids: Option<Vec<usize>>,
    /// Metric used for the joint test inside the JCBB acceptance check
    pub compat_test_metric: AssociationMetric,
    /// Log-likelihood admissibility threshold for the matching-likelihood
    /// metric (individual and joint tests)
    pub log_ml_threshold: f64,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            method: AssociationMethod::Jcbb,
            metric: AssociationMetric::Mahalanobis,
            chi2_quantile: 0.99,
            use_spatial_index: true,
            prediction_ids: None,
            compat_test_metric: AssociationMetric::Mahalanobis,
            log_ml_threshold: 0.0,
        }
    }
}

impl AssociationConfig {
    /// Default configuration with the greedy nearest-neighbor method
    pub fn nearest_neighbor() -> Self {
        Self {
            method: AssociationMethod::NearestNeighbor,
            ..Self::default()
        }
    }

    /// Default configuration with the JCBB method
    pub fn jcbb() -> Self {
        Self::default()
    }

    /// Set the chi-square gate quantile
    pub fn with_chi2_quantile(mut self, quantile: f64) -> Self {
        self.chi2_quantile = quantile;
        self
    }

    /// Attach an external ID table
    pub fn with_prediction_ids(mut self, ids: Vec<usize>) -> Self {
        self.prediction_ids = Some(ids);
        self
    }
}

/// Covariance of the prediction set, in one of two input forms
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PredictionCovariance {
    /// Full (N·O)×(N·O) joint covariance including cross-terms between
    /// predictions
    Full(DMatrix<f64>),
    /// N per-prediction O×O blocks; predictions treated as mutually
    /// independent
    Independent(Vec<DMatrix<f64>>),
}

impl PredictionCovariance {
    /// Split a vertically stacked (N·O)×O matrix of per-prediction blocks
    /// into the independent form.
    pub fn independent_stacked(
        stacked: &DMatrix<f64>,
        obs_dim: usize,
    ) -> Result<Self, DataAssociationError> {
        if obs_dim == 0 || stacked.ncols() != obs_dim || stacked.nrows() % obs_dim != 0 {
            return Err(DataAssociationError::InvalidInput {
                expected: obs_dim,
                actual: stacked.ncols(),
                context: format!(
                    "stacked covariance shape {}x{} (need k*{}x{})",
                    stacked.nrows(),
                    stacked.ncols(),
                    obs_dim,
                    obs_dim
                ),
            });
        }
        let n = stacked.nrows() / obs_dim;
        let blocks = (0..n)
            .map(|j| {
                stacked
                    .view((j * obs_dim, 0), (obs_dim, obs_dim))
                    .into_owned()
            })
            .collect();
        Ok(PredictionCovariance::Independent(blocks))
    }

    /// Number of predictions covered, given the observation dimension
    pub fn num_predictions(&self, obs_dim: usize) -> usize {
        match self {
            PredictionCovariance::Full(cov) => {
                if obs_dim == 0 {
                    0
                } else {
                    cov.nrows() / obs_dim
                }
            }
            PredictionCovariance::Independent(blocks) => blocks.len(),
        }
    }

    /// O×O covariance block of prediction `j`
    pub fn block(&self, j: usize, obs_dim: usize) -> DMatrixView<'_, f64> {
        match self {
            PredictionCovariance::Full(cov) => {
                cov.view((j * obs_dim, j * obs_dim), (obs_dim, obs_dim))
            }
            PredictionCovariance::Independent(blocks) => {
                blocks[j].view((0, 0), (obs_dim, obs_dim))
            }
        }
    }

    /// O×O cross-covariance block between predictions `a` and `b`, or `None`
    /// in the independent form (implicitly zero)
    pub fn cross_block(
        &self,
        a: usize,
        b: usize,
        obs_dim: usize,
    ) -> Option<DMatrixView<'_, f64>> {
        match self {
            PredictionCovariance::Full(cov) => {
                Some(cov.view((a * obs_dim, b * obs_dim), (obs_dim, obs_dim)))
            }
            PredictionCovariance::Independent(_) => None,
        }
    }
}

/// Result of one association query
///
/// `associations` maps observation row indices to prediction row indices, or
/// to external IDs when an ID table was supplied. Observations without a
/// compatible prediction are absent from the map.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssociationResults {
    /// Chosen pairing, observation index -> prediction index (or external ID)
    pub associations: BTreeMap<usize, usize>,
    /// Joint Mahalanobis distance or matching log-likelihood of the chosen
    /// hypothesis (0 when nothing was associated)
    pub distance: f64,
    /// M×N individual distances (d² or log-likelihood, per the metric).
    /// Pairs skipped by the spatial pre-filter hold the metric's worst value.
    pub indiv_distances: DMatrix<f64>,
    /// M×N individual chi-square / threshold test outcomes
    pub indiv_compatibility: DMatrix<bool>,
    /// Per observation, the number of individually compatible predictions
    pub indiv_compatibility_counts: Vec<u32>,
    /// Number of search-tree nodes expanded by JCBB (0 for nearest-neighbor)
    pub nodes_explored: usize,
}

impl AssociationResults {
    /// Empty result for an M-observation, N-prediction query, with matrices
    /// pre-filled with the metric's worst value.
    pub fn empty(m: usize, n: usize, metric: AssociationMetric) -> Self {
        Self {
            associations: BTreeMap::new(),
            distance: 0.0,
            indiv_distances: DMatrix::from_element(m, n, metric.worst_value()),
            indiv_compatibility: DMatrix::from_element(m, n, false),
            indiv_compatibility_counts: vec![0; m],
            nodes_explored: 0,
        }
    }
}

impl AssociationMetric {
    /// Value representing "as bad as possible" for this metric
    #[inline]
    pub fn worst_value(&self) -> f64 {
        match self {
            AssociationMetric::Mahalanobis => f64::INFINITY,
            AssociationMetric::MatchingLikelihood => f64::NEG_INFINITY,
        }
    }

    /// True when `a` scores strictly better than `b` under this metric
    #[inline]
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        match self {
            AssociationMetric::Mahalanobis => a < b,
            AssociationMetric::MatchingLikelihood => a > b,
        }
    }
}

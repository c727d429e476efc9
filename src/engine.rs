//! Query entry points: validation, dispatch, result aggregation
//!
//! `associate` is the single real entry point; the full-covariance and
//! independent-predictions functions are thin wrappers matching the two
//! covariance input forms. Structural and configuration problems are
//! rejected here, before any matrix work; numerical trouble found later
//! degrades inside the search instead of surfacing.

use log::debug;
use nalgebra::DMatrix;

use crate::compatibility::CompatibilityMatrixBuilder;
use crate::error::DataAssociationError;
use crate::jcbb::JcbbSearcher;
use crate::metric::JointEvaluator;
use crate::nn::{nearest_neighbor_match, MatchOutcome};
use crate::stats::chi2_inv;
use crate::types::{
    AssociationConfig, AssociationMethod, AssociationMetric, AssociationResults,
    PredictionCovariance,
};

/// Associate M observations with N predicted landmarks
///
/// Returns the chosen observation→prediction mapping together with the full
/// individual distance/compatibility matrices and search diagnostics. Empty
/// observation or prediction sets yield an empty result, not an error.
pub fn associate(
    observations: &DMatrix<f64>,
    predictions: &DMatrix<f64>,
    covariance: &PredictionCovariance,
    config: &AssociationConfig,
) -> Result<AssociationResults, DataAssociationError> {
    validate_config(config)?;

    let m = observations.nrows();
    let n = predictions.nrows();
    let o = if n > 0 {
        predictions.ncols()
    } else {
        observations.ncols()
    };
    validate_shapes(observations, predictions, covariance, config, o)?;
    validate_covariance_blocks(covariance, n, o)?;

    debug!(
        "data association: {} observations x {} predictions (dim {}), {:?}/{:?}",
        m, n, o, config.method, config.metric
    );

    if m == 0 || n == 0 {
        return Ok(AssociationResults::empty(m, n, config.metric));
    }

    let evaluator = JointEvaluator::new(observations, predictions, covariance);
    let indiv_threshold = match config.metric {
        AssociationMetric::Mahalanobis => chi2_inv(config.chi2_quantile, o),
        AssociationMetric::MatchingLikelihood => config.log_ml_threshold,
    };
    let matrix = CompatibilityMatrixBuilder::new(
        &evaluator,
        config.metric,
        indiv_threshold,
        config.use_spatial_index,
    )
    .build();

    let outcome = match config.method {
        AssociationMethod::NearestNeighbor => nearest_neighbor_match(&matrix, config.metric),
        AssociationMethod::Jcbb => JcbbSearcher::new(
            &matrix,
            &evaluator,
            config.compat_test_metric,
            config.chi2_quantile,
            config.log_ml_threshold,
        )
        .search(),
    };
    debug!(
        "associated {} of {} observations, statistic {:.6}, {} nodes",
        outcome.pairings.len(),
        m,
        outcome.statistic,
        outcome.nodes_explored
    );

    Ok(aggregate(outcome, matrix, config))
}

/// Full-covariance entry point: `covariance` is the (N·O)×(N·O) joint
/// covariance of all predictions, cross-terms included.
pub fn associate_full_covariance(
    observations: &DMatrix<f64>,
    predictions: &DMatrix<f64>,
    covariance: &DMatrix<f64>,
    config: &AssociationConfig,
) -> Result<AssociationResults, DataAssociationError> {
    let covariance = PredictionCovariance::Full(covariance.clone());
    associate(observations, predictions, &covariance, config)
}

/// Independent-predictions entry point: `covariance` vertically stacks the N
/// per-prediction O×O blocks into an (N·O)×O matrix.
pub fn associate_independent_predictions(
    observations: &DMatrix<f64>,
    predictions: &DMatrix<f64>,
    covariance: &DMatrix<f64>,
    config: &AssociationConfig,
) -> Result<AssociationResults, DataAssociationError> {
    let covariance = if covariance.nrows() == 0 {
        PredictionCovariance::Independent(Vec::new())
    } else {
        PredictionCovariance::independent_stacked(covariance, covariance.ncols())?
    };
    associate(observations, predictions, &covariance, config)
}

fn validate_config(config: &AssociationConfig) -> Result<(), DataAssociationError> {
    if !(config.chi2_quantile > 0.0 && config.chi2_quantile < 1.0) {
        return Err(DataAssociationError::Configuration {
            description: format!(
                "chi2_quantile must lie in (0, 1), got {}",
                config.chi2_quantile
            ),
        });
    }
    if !config.log_ml_threshold.is_finite() {
        return Err(DataAssociationError::Configuration {
            description: format!(
                "log_ml_threshold must be finite, got {}",
                config.log_ml_threshold
            ),
        });
    }
    Ok(())
}

fn validate_shapes(
    observations: &DMatrix<f64>,
    predictions: &DMatrix<f64>,
    covariance: &PredictionCovariance,
    config: &AssociationConfig,
    o: usize,
) -> Result<(), DataAssociationError> {
    let m = observations.nrows();
    let n = predictions.nrows();

    if m > 0 && n > 0 {
        if observations.ncols() != predictions.ncols() {
            return Err(DataAssociationError::InvalidInput {
                expected: predictions.ncols(),
                actual: observations.ncols(),
                context: "observation mean columns".to_string(),
            });
        }
        if o == 0 {
            return Err(DataAssociationError::InvalidInput {
                expected: 1,
                actual: 0,
                context: "observation dimension".to_string(),
            });
        }
    }

    match covariance {
        PredictionCovariance::Full(cov) => {
            if cov.nrows() != cov.ncols() {
                return Err(DataAssociationError::InvalidInput {
                    expected: cov.nrows(),
                    actual: cov.ncols(),
                    context: "full covariance columns (must be square)".to_string(),
                });
            }
            if cov.nrows() != n * o {
                return Err(DataAssociationError::InvalidInput {
                    expected: n * o,
                    actual: cov.nrows(),
                    context: "full covariance rows".to_string(),
                });
            }
        }
        PredictionCovariance::Independent(blocks) => {
            if blocks.len() != n {
                return Err(DataAssociationError::InvalidInput {
                    expected: n,
                    actual: blocks.len(),
                    context: "independent covariance block count".to_string(),
                });
            }
            for (j, block) in blocks.iter().enumerate() {
                if block.nrows() != o || block.ncols() != o {
                    return Err(DataAssociationError::InvalidInput {
                        expected: o,
                        actual: block.nrows().max(block.ncols()),
                        context: format!("covariance block {} shape", j),
                    });
                }
            }
        }
    }

    if let Some(ids) = &config.prediction_ids {
        if ids.len() != n {
            return Err(DataAssociationError::InvalidInput {
                expected: n,
                actual: ids.len(),
                context: "prediction ID table length".to_string(),
            });
        }
    }

    Ok(())
}

/// Every supplied block must be positive-definite before the search starts;
/// a failure here names the offending prediction instead of silently gating
/// it out.
fn validate_covariance_blocks(
    covariance: &PredictionCovariance,
    n: usize,
    o: usize,
) -> Result<(), DataAssociationError> {
    if o == 0 {
        return Ok(());
    }
    for j in 0..n {
        if covariance.block(j, o).into_owned().cholesky().is_none() {
            return Err(DataAssociationError::Numerical {
                prediction_index: j,
                context: "Cholesky factorization failed".to_string(),
            });
        }
    }
    Ok(())
}

/// Package the matcher outcome into the externally visible result, remapping
/// prediction indices through the external ID table when one was supplied.
fn aggregate(
    outcome: MatchOutcome,
    matrix: crate::compatibility::CompatibilityMatrix,
    config: &AssociationConfig,
) -> AssociationResults {
    let mut results = AssociationResults {
        associations: Default::default(),
        distance: outcome.statistic,
        indiv_distances: matrix.distances,
        indiv_compatibility: matrix.compatible,
        indiv_compatibility_counts: matrix.counts,
        nodes_explored: outcome.nodes_explored,
    };
    for (obs, pred) in outcome.pairings {
        let value = match &config.prediction_ids {
            Some(ids) => ids[pred],
            None => pred,
        };
        results.associations.insert(obs, value);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_inputs() -> (DMatrix<f64>, DMatrix<f64>, PredictionCovariance) {
        let observations = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        let predictions = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        let cov = PredictionCovariance::Independent(vec![DMatrix::identity(2, 2) * 0.01]);
        (observations, predictions, cov)
    }

    #[test]
    fn test_rejects_out_of_range_quantile() {
        let (observations, predictions, cov) = simple_inputs();
        for q in [0.0, 1.0, -0.5, 1.5] {
            let config = AssociationConfig::default().with_chi2_quantile(q);
            let err = associate(&observations, &predictions, &cov, &config).unwrap_err();
            assert!(matches!(err, DataAssociationError::Configuration { .. }));
        }
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        let observations = DMatrix::from_row_slice(1, 3, &[0.0, 0.0, 0.0]);
        let predictions = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        let cov = PredictionCovariance::Independent(vec![DMatrix::identity(2, 2)]);
        let err = associate(&observations, &predictions, &cov, &AssociationConfig::default())
            .unwrap_err();
        assert!(matches!(err, DataAssociationError::InvalidInput { .. }));
    }

    #[test]
    fn test_rejects_wrong_block_count() {
        let (observations, predictions, _) = simple_inputs();
        let cov = PredictionCovariance::Independent(vec![
            DMatrix::identity(2, 2),
            DMatrix::identity(2, 2),
        ]);
        let err = associate(&observations, &predictions, &cov, &AssociationConfig::default())
            .unwrap_err();
        assert!(matches!(err, DataAssociationError::InvalidInput { .. }));
    }

    #[test]
    fn test_rejects_wrong_id_table_length() {
        let (observations, predictions, cov) = simple_inputs();
        let config = AssociationConfig::default().with_prediction_ids(vec![7, 8]);
        let err = associate(&observations, &predictions, &cov, &config).unwrap_err();
        assert!(matches!(
            err,
            DataAssociationError::InvalidInput { expected: 1, actual: 2, .. }
        ));
    }

    #[test]
    fn test_indefinite_block_surfaces_with_index() {
        let observations = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        let predictions = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 1.0]);
        let cov = PredictionCovariance::Independent(vec![
            DMatrix::identity(2, 2),
            DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]),
        ]);
        let err = associate(&observations, &predictions, &cov, &AssociationConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            DataAssociationError::Numerical { prediction_index: 1, .. }
        ));
    }

    #[test]
    fn test_empty_inputs_are_valid() {
        let observations = DMatrix::zeros(0, 2);
        let predictions = DMatrix::zeros(3, 2);
        let cov = PredictionCovariance::Independent(vec![
            DMatrix::identity(2, 2),
            DMatrix::identity(2, 2),
            DMatrix::identity(2, 2),
        ]);
        let results =
            associate(&observations, &predictions, &cov, &AssociationConfig::default()).unwrap();
        assert!(results.associations.is_empty());
        assert_eq!(results.indiv_distances.nrows(), 0);
        assert_eq!(results.nodes_explored, 0);

        let no_predictions =
            associate(&predictions, &DMatrix::zeros(0, 2),
                &PredictionCovariance::Independent(vec![]), &AssociationConfig::default())
            .unwrap();
        assert!(no_predictions.associations.is_empty());
        assert_eq!(no_predictions.indiv_compatibility_counts, vec![0, 0, 0]);
    }

    #[test]
    fn test_stacked_independent_entry_point() {
        let observations = DMatrix::from_row_slice(1, 2, &[0.1, 0.0]);
        let predictions = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        let stacked = DMatrix::identity(2, 2) * 0.05;
        let results = associate_independent_predictions(
            &observations,
            &predictions,
            &stacked,
            &AssociationConfig::default(),
        )
        .unwrap();
        assert_eq!(results.associations.get(&0), Some(&0));
    }
}

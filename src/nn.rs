//! Greedy nearest-neighbor matcher
//!
//! Fast baseline that processes observations in input order and claims, for
//! each, the best-scoring individually compatible prediction not yet taken.
//! No backtracking, so cross-coupling between chosen pairs is ignored; the
//! result is a valid partial injection but not necessarily the
//! maximum-cardinality one.

use crate::compatibility::CompatibilityMatrix;
use crate::types::AssociationMetric;

/// One matcher outcome: the chosen pairing and its accumulated statistic
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Chosen (observation, prediction) pairs
    pub pairings: Vec<(usize, usize)>,
    /// Accumulated statistic of the pairing (sum of individual d² or
    /// log-likelihoods for nearest-neighbor, the joint statistic for JCBB)
    pub statistic: f64,
    /// Search-tree nodes expanded (always 0 here)
    pub nodes_explored: usize,
}

/// Run the greedy assignment over a prebuilt compatibility matrix
pub fn nearest_neighbor_match(
    matrix: &CompatibilityMatrix,
    metric: AssociationMetric,
) -> MatchOutcome {
    let m = matrix.num_observations();
    let n = matrix.num_predictions();

    let mut claimed = vec![false; n];
    let mut pairings = Vec::new();
    let mut statistic = 0.0;

    for i in 0..m {
        let mut best: Option<(usize, f64)> = None;
        for j in 0..n {
            if claimed[j] || !matrix.compatible[(i, j)] {
                continue;
            }
            let d = matrix.distances[(i, j)];
            // Strict comparison keeps the lowest prediction index on ties
            if best.map_or(true, |(_, best_d)| metric.is_better(d, best_d)) {
                best = Some((j, d));
            }
        }
        if let Some((j, d)) = best {
            claimed[j] = true;
            pairings.push((i, j));
            statistic += d;
        }
    }

    MatchOutcome {
        pairings,
        statistic,
        nodes_explored: 0,
    }
}

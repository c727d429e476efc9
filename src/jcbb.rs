//! Joint Compatibility Branch and Bound
//!
//! Depth-first search over a conceptual tree where depth selects the next
//! observation and each branch either pairs it with a still-unclaimed,
//! individually compatible prediction or leaves it unassigned. Before a
//! pairing is accepted the joint statistic of the entire enlarged hypothesis
//! is recomputed and gated; branches that cannot beat the incumbent
//! cardinality are pruned.
//!
//! The traversal is iterative: partial-hypothesis frames live in an arena
//! (`Vec<SearchFrame>`) addressed by index and an explicit LIFO work-list
//! drives expansion, so memory use does not ride on call-stack depth and a
//! cancellation hook can be added to the loop later without restructuring.
//! Each frame stores only its own pairing plus a parent link; the full
//! pairing chain is recovered by walking parents.
//!
//! Observations are visited in ascending order of their individual
//! compatible-candidate count so that constrained observations fail branches
//! early. Within one observation, candidate predictions are tried in
//! ascending index order, the unassigned branch last, which fixes the
//! discovery order used to break exact ties.

use log::trace;
use smallvec::SmallVec;

use crate::compatibility::CompatibilityMatrix;
use crate::metric::JointEvaluator;
use crate::nn::MatchOutcome;
use crate::stats::Chi2ThresholdCache;
use crate::types::AssociationMetric;

type PairChain = SmallVec<[(usize, usize); 8]>;

/// One node of the search tree
#[derive(Debug, Clone, Copy)]
struct SearchFrame {
    /// Arena index of the parent frame (`None` for the root)
    parent: Option<usize>,
    /// Pairing added at this node; `None` for the root and for
    /// leave-unassigned branches
    pairing: Option<(usize, usize)>,
    /// Number of observations already decided (index into the visit order)
    depth: usize,
    /// Count of paired entries along the chain
    cardinality: u32,
    /// Joint statistic of the chain under the joint-test metric
    statistic: f64,
}

/// Best hypothesis found so far
#[derive(Debug, Clone)]
struct Incumbent {
    pairings: Vec<(usize, usize)>,
    cardinality: u32,
    statistic: f64,
}

/// Branch-and-bound searcher for one query
pub struct JcbbSearcher<'a> {
    matrix: &'a CompatibilityMatrix,
    evaluator: &'a JointEvaluator<'a>,
    /// Metric of the joint acceptance test (may differ from the metric that
    /// filled the individual matrix)
    compat_metric: AssociationMetric,
    log_ml_threshold: f64,
    thresholds: Chi2ThresholdCache,
    /// Observation visit order: fewest compatible candidates first
    order: Vec<usize>,
}

impl<'a> JcbbSearcher<'a> {
    pub fn new(
        matrix: &'a CompatibilityMatrix,
        evaluator: &'a JointEvaluator<'a>,
        compat_metric: AssociationMetric,
        chi2_quantile: f64,
        log_ml_threshold: f64,
    ) -> Self {
        let m = matrix.num_observations();

        let mut order: Vec<usize> = (0..m).collect();
        order.sort_by_key(|&i| matrix.counts[i]);

        Self {
            matrix,
            evaluator,
            compat_metric,
            log_ml_threshold,
            thresholds: Chi2ThresholdCache::new(chi2_quantile, evaluator.obs_dim(), m.max(1)),
            order,
        }
    }

    /// Run the search to exhaustion and return the best hypothesis
    pub fn search(&mut self) -> MatchOutcome {
        let m = self.matrix.num_observations();
        let n = self.matrix.num_predictions();

        let mut arena: Vec<SearchFrame> = Vec::with_capacity(64);
        let mut stack: Vec<usize> = Vec::with_capacity(64);
        arena.push(SearchFrame {
            parent: None,
            pairing: None,
            depth: 0,
            cardinality: 0,
            statistic: 0.0,
        });
        stack.push(0);

        let mut best: Option<Incumbent> = None;
        let mut nodes_explored = 0usize;

        while let Some(frame_idx) = stack.pop() {
            let frame = arena[frame_idx];

            if frame.depth == m {
                // A complete hypothesis; higher cardinality wins, equal
                // cardinality decided by the joint statistic, exact ties keep
                // the first one discovered
                let improves = match &best {
                    None => true,
                    Some(b) => {
                        frame.cardinality > b.cardinality
                            || (frame.cardinality == b.cardinality
                                && self.compat_metric.is_better(frame.statistic, b.statistic))
                    }
                };
                if improves {
                    trace!(
                        "new incumbent: cardinality {}, statistic {:.6}",
                        frame.cardinality,
                        frame.statistic
                    );
                    best = Some(Incumbent {
                        pairings: chain_of(&arena, frame_idx).into_vec(),
                        cardinality: frame.cardinality,
                        statistic: frame.statistic,
                    });
                }
                continue;
            }

            nodes_explored += 1;

            // Cardinality bound: even pairing every remaining observation
            // cannot beat the incumbent
            if let Some(b) = &best {
                if frame.cardinality + (m - frame.depth) as u32 <= b.cardinality {
                    continue;
                }
            }

            let obs = self.order[frame.depth];
            let chain = chain_of(&arena, frame_idx);

            // Children are pushed so pops come out as: candidate predictions
            // in ascending index order, then the leave-unassigned branch
            let skip = SearchFrame {
                parent: Some(frame_idx),
                pairing: None,
                depth: frame.depth + 1,
                cardinality: frame.cardinality,
                statistic: frame.statistic,
            };
            arena.push(skip);
            stack.push(arena.len() - 1);

            for j in (0..n).rev() {
                if !self.matrix.compatible[(obs, j)] {
                    continue;
                }
                if chain.iter().any(|&(_, claimed)| claimed == j) {
                    continue;
                }
                let Some(statistic) = self.joint_test(&chain, obs, j) else {
                    continue;
                };
                arena.push(SearchFrame {
                    parent: Some(frame_idx),
                    pairing: Some((obs, j)),
                    depth: frame.depth + 1,
                    cardinality: frame.cardinality + 1,
                    statistic,
                });
                stack.push(arena.len() - 1);
            }
        }

        let best = best.unwrap_or(Incumbent {
            pairings: Vec::new(),
            cardinality: 0,
            statistic: 0.0,
        });
        let mut pairings = best.pairings;
        pairings.sort_unstable_by_key(|&(obs, _)| obs);

        MatchOutcome {
            pairings,
            statistic: best.statistic,
            nodes_explored,
        }
    }

    /// Gate the hypothesis enlarged by `(obs, pred)`; returns its joint
    /// statistic when admissible, `None` when the gate fails or the joint
    /// covariance is not positive-definite.
    fn joint_test(&mut self, chain: &PairChain, obs: usize, pred: usize) -> Option<f64> {
        let mut pairs = chain.clone();
        pairs.push((obs, pred));

        let stat = self.evaluator.joint_statistic(&pairs)?;
        match self.compat_metric {
            AssociationMetric::Mahalanobis => {
                let gate = self.thresholds.threshold(pairs.len());
                (stat.mahalanobis_sq <= gate).then_some(stat.mahalanobis_sq)
            }
            AssociationMetric::MatchingLikelihood => (stat.log_likelihood
                >= self.log_ml_threshold)
                .then_some(stat.log_likelihood),
        }
    }
}

/// Pairings along the parent chain of `frame_idx`, in discovery order
fn chain_of(arena: &[SearchFrame], frame_idx: usize) -> PairChain {
    let mut chain = PairChain::new();
    let mut cursor = Some(frame_idx);
    while let Some(idx) = cursor {
        let frame = &arena[idx];
        if let Some(pairing) = frame.pairing {
            chain.push(pairing);
        }
        cursor = frame.parent;
    }
    chain.reverse();
    chain
}

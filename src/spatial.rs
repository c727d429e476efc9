//! Candidate lookup for individual-compatibility testing
//!
//! The matrix builder asks, per observation, which predictions could
//! possibly pass the exact statistical test. The answer only has to be a
//! superset: every returned candidate is still exact-tested, so a lookup
//! may over-report but must never miss a truly compatible prediction.
//!
//! Two implementations: [`LinearScan`] hands back every prediction, and
//! [`KdTree`] indexes prediction means so only those inside a conservative
//! Euclidean gating radius are returned.

use nalgebra::DMatrix;

/// Nearest-candidates lookup over the prediction means
pub trait CandidateLookup {
    /// Append to `out` the indices of all predictions that may be compatible
    /// with the observation at `query` given a Euclidean `radius_sq` bound.
    fn candidates(&self, query: &[f64], radius_sq: f64, out: &mut Vec<usize>);
}

/// Trivial lookup: every prediction is a candidate
pub struct LinearScan {
    num_predictions: usize,
}

impl LinearScan {
    pub fn new(num_predictions: usize) -> Self {
        Self { num_predictions }
    }
}

impl CandidateLookup for LinearScan {
    fn candidates(&self, _query: &[f64], _radius_sq: f64, out: &mut Vec<usize>) {
        out.extend(0..self.num_predictions);
    }
}

struct KdNode {
    /// Row index of the prediction at this node
    point: usize,
    /// Split dimension (depth modulo O)
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// Median-split k-d tree over the prediction mean rows
///
/// Nodes live in a flat arena addressed by index; construction is
/// O(N log² N), a range query O(log N + k) on average.
pub struct KdTree {
    nodes: Vec<KdNode>,
    points: Vec<Vec<f64>>,
    root: Option<usize>,
}

impl KdTree {
    /// Build from the N×O prediction mean matrix
    pub fn build(predictions: &DMatrix<f64>) -> Self {
        let n = predictions.nrows();
        let dim = predictions.ncols();
        let points: Vec<Vec<f64>> = (0..n)
            .map(|j| predictions.row(j).iter().copied().collect())
            .collect();

        let mut tree = Self {
            nodes: Vec::with_capacity(n),
            points,
            root: None,
        };
        if n > 0 && dim > 0 {
            let mut indices: Vec<usize> = (0..n).collect();
            tree.root = Some(tree.build_subtree(&mut indices, 0, dim));
        }
        tree
    }

    fn build_subtree(&mut self, indices: &mut [usize], depth: usize, dim: usize) -> usize {
        let axis = depth % dim;
        let median = indices.len() / 2;
        indices.select_nth_unstable_by(median, |&a, &b| {
            self.points[a][axis]
                .partial_cmp(&self.points[b][axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let point = indices[median];

        let node_idx = self.nodes.len();
        self.nodes.push(KdNode {
            point,
            axis,
            left: None,
            right: None,
        });

        // Split the slice around the median; recurse into both halves
        if median > 0 {
            let left = {
                let (lo, _) = indices.split_at_mut(median);
                self.build_subtree(lo, depth + 1, dim)
            };
            self.nodes[node_idx].left = Some(left);
        }
        if median + 1 < indices.len() {
            let right = {
                let (_, hi) = indices.split_at_mut(median + 1);
                self.build_subtree(hi, depth + 1, dim)
            };
            self.nodes[node_idx].right = Some(right);
        }
        node_idx
    }

    fn range_search(&self, node: usize, query: &[f64], radius_sq: f64, out: &mut Vec<usize>) {
        let n = &self.nodes[node];
        let point = &self.points[n.point];

        let dist_sq: f64 = point
            .iter()
            .zip(query.iter())
            .map(|(p, q)| (p - q) * (p - q))
            .sum();
        if dist_sq <= radius_sq {
            out.push(n.point);
        }

        let plane_delta = query[n.axis] - point[n.axis];
        let (near, far) = if plane_delta <= 0.0 {
            (n.left, n.right)
        } else {
            (n.right, n.left)
        };
        if let Some(child) = near {
            self.range_search(child, query, radius_sq, out);
        }
        // The far side can only contain hits when the ball crosses the plane
        if plane_delta * plane_delta <= radius_sq {
            if let Some(child) = far {
                self.range_search(child, query, radius_sq, out);
            }
        }
    }
}

impl CandidateLookup for KdTree {
    fn candidates(&self, query: &[f64], radius_sq: f64, out: &mut Vec<usize>) {
        if let Some(root) = self.root {
            self.range_search(root, query, radius_sq, out);
        }
    }
}

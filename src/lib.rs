/*!
# landmark-assoc-rs - Data association for landmark-based SLAM

Stateless data-association queries between noisy sensor observations and
predicted landmark positions with covariances. Implements the two classic
methods:

- Greedy nearest-neighbor (fast, suboptimal baseline)
- Joint Compatibility Branch and Bound (JCBB): the maximum-cardinality,
  jointly compatible assignment

with both a squared-Mahalanobis-distance and a Gaussian matching-likelihood
metric, chi-square gating, an optional k-d tree pre-filter for individual
compatibility, and graceful degradation when a covariance block is
ill-conditioned.

## Modules

- [`engine`] - Query entry points, validation, result aggregation
- [`compatibility`] - Individual M×N compatibility matrix construction
- [`jcbb`] - Branch-and-bound search
- [`nn`] - Greedy nearest-neighbor baseline
- [`metric`] - Pairwise and joint compatibility statistics
- [`spatial`] - Candidate lookup (linear scan or k-d tree)
- [`stats`] - Chi-square quantile function
- [`types`] - Configuration and result types
- [`error`] - Error taxonomy

## Example

```rust
use landmark_assoc_rs::prelude::*;
use nalgebra::DMatrix;

// One observation at the origin, one prediction right on top of it
let observations = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
let predictions = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
let covariance = PredictionCovariance::Independent(vec![
    DMatrix::identity(2, 2) * 0.01,
]);

let results = associate(
    &observations,
    &predictions,
    &covariance,
    &AssociationConfig::default(),
).unwrap();

assert_eq!(results.associations.get(&0), Some(&0));
assert!(results.distance < 1e-9);
```

Each query is independent and reentrant: no state survives between calls, so
concurrent callers can run separate queries without coordination.
*/

pub mod compatibility;
pub mod engine;
pub mod error;
pub mod jcbb;
pub mod metric;
pub mod nn;
pub mod spatial;
pub mod stats;
pub mod types;

pub use engine::{associate, associate_full_covariance, associate_independent_predictions};
pub use error::DataAssociationError;
pub use types::{
    AssociationConfig, AssociationMethod, AssociationMetric, AssociationResults,
    PredictionCovariance,
};

pub mod prelude {
    pub use crate::engine::{
        associate, associate_full_covariance, associate_independent_predictions,
    };
    pub use crate::error::DataAssociationError;
    pub use crate::stats::chi2_inv;
    pub use crate::types::{
        AssociationConfig, AssociationMethod, AssociationMetric, AssociationResults,
        PredictionCovariance,
    };
}

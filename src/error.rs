//! Error types for data-association queries
//!
//! Structural and configuration problems abort a query before any search
//! runs; numerical problems discovered during the search itself degrade to
//! "not compatible" for the affected pair or branch and never surface here.

use std::fmt;

/// Errors that can abort a data-association query
#[derive(Debug, Clone, PartialEq)]
pub enum DataAssociationError {
    /// Dimension mismatch between expected and actual
    InvalidInput {
        /// What was expected
        expected: usize,
        /// What was received
        actual: usize,
        /// Context (e.g., "prediction mean columns", "prediction ID table length")
        context: String,
    },

    /// A supplied prediction covariance block is not positive-definite
    ///
    /// Raised only from up-front validation of the inputs. Cholesky failures
    /// encountered later, while evaluating a pair or a partial hypothesis,
    /// exclude that pair or branch instead of failing the query.
    Numerical {
        /// Index of the offending prediction
        prediction_index: usize,
        /// Description of the failure
        context: String,
    },

    /// Configuration value out of its valid range
    Configuration {
        /// Description of the configuration issue
        description: String,
    },
}

impl fmt::Display for DataAssociationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataAssociationError::InvalidInput {
                expected,
                actual,
                context,
            } => {
                write!(
                    f,
                    "Invalid input for {}: expected {}, got {}",
                    context, expected, actual
                )
            }
            DataAssociationError::Numerical {
                prediction_index,
                context,
            } => {
                write!(
                    f,
                    "Covariance of prediction {} is not positive-definite: {}",
                    prediction_index, context
                )
            }
            DataAssociationError::Configuration { description } => {
                write!(f, "Configuration error: {}", description)
            }
        }
    }
}

impl std::error::Error for DataAssociationError {}

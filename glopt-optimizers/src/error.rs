//! Error types for the optimizer crate.
//!
//! Configuration problems are rejected before any objective evaluation;
//! run-level failures (invalid fitness, degenerate covariance) are reported
//! through [`crate::Status`] instead and never surface as errors.

use thiserror::Error;

/// Errors that can occur while configuring an optimizer.
#[derive(Debug, Error)]
pub enum OptError {
    /// Lower and upper bounds have different lengths.
    #[error("bounds mismatch: lower has {lower_len} elements, upper has {upper_len}")]
    BoundsMismatch {
        /// Length of the lower bounds array
        lower_len: usize,
        /// Length of the upper bounds array
        upper_len: usize,
    },

    /// A lower bound is not strictly below its upper bound.
    #[error("invalid bounds at index {index}: lower ({lower}) >= upper ({upper})")]
    InvalidBounds {
        /// Index of the invalid bound pair
        index: usize,
        /// The lower bound value
        lower: f64,
        /// The upper bound value
        upper: f64,
    },

    /// Population size is too small for the algorithm.
    #[error("population size ({popsize}) must be >= {min}")]
    PopulationTooSmall {
        /// The invalid population size
        popsize: usize,
        /// The algorithm's minimum
        min: usize,
    },

    /// Initial guess has the wrong dimension.
    #[error("initial guess dimension mismatch: expected {expected}, got {got}")]
    GuessDimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension provided
        got: usize,
    },

    /// Initial step size vector has the wrong dimension.
    #[error("input sigma dimension mismatch: expected {expected}, got {got}")]
    SigmaDimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension provided
        got: usize,
    },

    /// Initial step size must be strictly positive.
    #[error("input sigma must be positive, got {sigma}")]
    NonPositiveSigma {
        /// The offending value
        sigma: f64,
    },

    /// A combinator was built over an empty optimizer list.
    #[error("optimizer list must not be empty")]
    EmptyOptimizerList,

    /// Combinator weights or probabilities do not match the optimizer list.
    #[error("{what}: expected {expected} entries, got {got}")]
    WeightMismatch {
        /// Which parameter is mismatched
        what: &'static str,
        /// Expected number of entries
        expected: usize,
        /// Actual number of entries
        got: usize,
    },

    /// A weight or probability is not strictly positive.
    #[error("{what} must be positive, got {value}")]
    NonPositiveWeight {
        /// Which parameter carries the bad value
        what: &'static str,
        /// The offending value
        value: f64,
    },

    /// `tell` was called with a value batch that does not match the last `ask`.
    #[error("ask/tell mismatch: asked for {expected} values, told {got}")]
    AskTellMismatch {
        /// Size of the pending batch
        expected: usize,
        /// Number of values supplied
        got: usize,
    },
}

/// A specialized `Result` type for optimizer operations.
pub type Result<T> = std::result::Result<T, OptError>;

impl OptError {
    /// Returns `true` if this is a bounds-related error.
    pub fn is_bounds_error(&self) -> bool {
        matches!(
            self,
            OptError::BoundsMismatch { .. } | OptError::InvalidBounds { .. }
        )
    }

    /// Returns `true` if this error comes from optimizer configuration
    /// rather than from the problem definition.
    pub fn is_config_error(&self) -> bool {
        !self.is_bounds_error()
    }
}

//! Error types for the retry engines.

use glopt_optimizers::OptError;
use thiserror::Error;

/// Errors that can occur while configuring or running a retry engine.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Store capacity must be at least 1.
    #[error("store capacity must be positive")]
    InvalidCapacity,

    /// Retry count must be at least 1.
    #[error("number of retries must be positive")]
    InvalidRetries,

    /// Budget schedule endpoints are inconsistent.
    #[error("invalid budget schedule: init {init} must be positive and <= cap {cap}")]
    InvalidBudget {
        /// Initial per-run budget
        init: usize,
        /// Budget cap
        cap: usize,
    },

    /// Keep rate for problem filtering must be in `(0, 1]`.
    #[error("keep rate must be in (0, 1], got {rate}")]
    InvalidKeepRate {
        /// The offending rate
        rate: f64,
    },

    /// Problem filtering needs at least one variant.
    #[error("no problem variants supplied")]
    NoProblems,

    /// An optimizer-side configuration error.
    #[error(transparent)]
    Optimizer(#[from] OptError),

    /// Checkpoint file i/o failed.
    #[error("checkpoint i/o: {0}")]
    Io(#[from] std::io::Error),

    /// A checkpoint record could not be parsed.
    #[error("malformed checkpoint record at line {line}")]
    MalformedCheckpoint {
        /// 1-based line number
        line: usize,
    },
}

/// A specialized `Result` type for retry operations.
pub type Result<T> = std::result::Result<T, RetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = RetryError::InvalidBudget { init: 0, cap: 100 };
        assert_eq!(
            err.to_string(),
            "invalid budget schedule: init 0 must be positive and <= cap 100"
        );
    }

    #[test]
    fn test_optimizer_error_converts() {
        let opt_err = OptError::EmptyOptimizerList;
        let err: RetryError = opt_err.into();
        assert!(matches!(err, RetryError::Optimizer(_)));
    }
}

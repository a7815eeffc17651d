#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

use std::fmt;

use ndarray::Array1;

pub mod error;
pub use error::{OptError, Result};

/// Feasible box and repair operations.
pub mod bounds;
/// Objective wrapper with counting, timeout, and cancellation.
pub mod problem;
pub use bounds::Bounds;
pub use problem::{CancelToken, Problem};

/// Ordered parallel evaluation of candidate batches.
pub mod parallel;
pub use parallel::{BatchEvaluator, ParallelConfig};

pub(crate) mod eigen;

/// CMA-ES optimizer.
pub mod cmaes;
/// Differential evolution optimizer.
pub mod de;
pub use cmaes::{Cmaes, CmaesOptimizer, CmaesOptions};
pub use de::{De, DeOptimizer, DeOptions};

/// Sequence / random-choice algorithm combinators.
pub mod combinators;
pub use combinators::{de_cma, RandomChoice, Sequence};

/// Dual annealing optimizer.
pub mod dual_annealing;
/// Harris hawks optimizer.
pub mod harris_hawks;
pub use dual_annealing::{DualAnnealing, DualAnnealingOptions};
pub use harris_hawks::{HarrisHawks, HarrisHawksOptions};

/// Outcome of a `tell` round or of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The run may continue.
    Continue,
    /// Best fitness reached the configured target.
    StopFitness,
    /// All coordinate standard deviations fell below `tolx`.
    StopTolX,
    /// Fitness spread over the recent history fell below `tolfun`.
    StopTolFun,
    /// Generation or evaluation budget exhausted.
    StopMaxIter,
    /// Numerical degeneracy (ill-conditioned or unrecoverable covariance).
    StopCondition,
    /// An entire generation evaluated to `+inf`.
    StopFitnessInvalid,
    /// The run was cancelled cooperatively or timed out.
    Cancelled,
}

impl Status {
    /// Whether the run must stop.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Continue)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Continue => "continue",
            Status::StopFitness => "stop_fitness",
            Status::StopTolX => "stop_tolx",
            Status::StopTolFun => "stop_tolfun",
            Status::StopMaxIter => "stop_maxiter",
            Status::StopCondition => "stop_condition",
            Status::StopFitnessInvalid => "stop_fitness_invalid",
            Status::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Result of a single optimization run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The best point found.
    pub x: Array1<f64>,
    /// The objective value at `x` (`+inf` when nothing valid was seen).
    pub fun: f64,
    /// Objective evaluations consumed by this run.
    pub nfev: usize,
    /// Iterations (generations) performed.
    pub nit: usize,
    /// Why the run stopped.
    pub status: Status,
    /// Final per-coordinate dispersion of the search distribution, when the
    /// algorithm has one. Chained optimizers derive the next step size from it.
    pub dispersion: Option<Array1<f64>>,
}

impl RunResult {
    /// A run that never produced a valid candidate.
    pub(crate) fn failed(dim: usize, status: Status) -> Self {
        Self {
            x: Array1::zeros(dim),
            fun: f64::INFINITY,
            nfev: 0,
            nit: 0,
            status,
            dispersion: None,
        }
    }
}

/// The contract every optimizer (and combinator of optimizers) satisfies.
///
/// `minimize_run` must be re-entrant: retry engines invoke it concurrently
/// from many workers against forks of the same [`Problem`], each run carrying
/// its own seed and budget. Implementations must not keep global state.
pub trait Optimizer: Send + Sync {
    /// Short human-readable name, used in retry diagnostics.
    fn name(&self) -> String;

    /// Default evaluation budget when the caller does not impose one.
    fn max_evaluations(&self) -> usize;

    /// Runs the optimizer against `problem` and returns the best candidate.
    ///
    /// `x0` defaults to a uniform sample (or the box center, see each
    /// implementation), `sigma0` to `0.3 * scale`. `max_evals` caps objective
    /// evaluations for this run; `seed` fixes the random stream.
    fn minimize_run(
        &self,
        problem: &Problem<'_>,
        x0: Option<&Array1<f64>>,
        sigma0: Option<&Array1<f64>>,
        max_evals: usize,
        seed: u64,
    ) -> RunResult;
}

pub(crate) fn argmin(values: &[f64]) -> (usize, f64) {
    let mut best_i = 0usize;
    let mut best_v = values[0];
    for (i, &v) in values.iter().enumerate() {
        if v < best_v {
            best_v = v;
            best_i = i;
        }
    }
    (best_i, best_v)
}

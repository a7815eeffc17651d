//! Objective wrapper shared by optimizers and retry engines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array1;

use crate::bounds::Bounds;

/// Cooperative cancellation flag shared between a caller and running workers.
///
/// Checked at worker dispatch and between ask/tell rounds; in-flight
/// evaluations are allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Wraps a raw objective with the engine-side evaluation policy:
///
/// - non-finite results (NaN, infinities) become `+inf` so they never poison
///   statistics;
/// - every call increments a shared evaluation counter;
/// - an optional per-evaluation wall-clock limit marks the run as timed out
///   once an evaluation overruns it (the evaluation itself cannot be
///   preempted, so the check happens when it returns);
/// - a [`CancelToken`] lets callers stop runs cooperatively.
///
/// The objective must be `Send + Sync`; in Rust that bound is the caller's
/// declaration that the function is safe to invoke from worker threads.
pub struct Problem<'a> {
    fun: &'a (dyn Fn(&Array1<f64>) -> f64 + Send + Sync),
    bounds: Bounds,
    evals: Arc<AtomicUsize>,
    eval_timeout: Option<Duration>,
    timed_out: AtomicBool,
    cancel: CancelToken,
}

impl<'a> Problem<'a> {
    /// Wraps `fun` over `bounds`.
    pub fn new(fun: &'a (dyn Fn(&Array1<f64>) -> f64 + Send + Sync), bounds: Bounds) -> Self {
        Self {
            fun,
            bounds,
            evals: Arc::new(AtomicUsize::new(0)),
            eval_timeout: None,
            timed_out: AtomicBool::new(false),
            cancel: CancelToken::new(),
        }
    }

    /// Sets a per-evaluation wall-clock limit.
    pub fn with_eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout = Some(timeout);
        self
    }

    /// Attaches an externally held cancellation token.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// A view of the same objective sharing the evaluation counter and the
    /// cancel token, but with a fresh timeout flag. Retry engines fork one
    /// view per run so a timeout in one run does not taint its siblings.
    pub fn fork(&self) -> Problem<'a> {
        Problem {
            fun: self.fun,
            bounds: self.bounds.clone(),
            evals: Arc::clone(&self.evals),
            eval_timeout: self.eval_timeout,
            timed_out: AtomicBool::new(false),
            cancel: self.cancel.clone(),
        }
    }

    /// Evaluates the objective at `x` under the engine policy.
    pub fn eval(&self, x: &Array1<f64>) -> f64 {
        self.evals.fetch_add(1, Ordering::Relaxed);
        let value = match self.eval_timeout {
            None => (self.fun)(x),
            Some(limit) => {
                let started = Instant::now();
                let value = (self.fun)(x);
                if started.elapsed() > limit {
                    self.timed_out.store(true, Ordering::Relaxed);
                    return f64::INFINITY;
                }
                value
            }
        };
        if value.is_finite() {
            value
        } else {
            f64::INFINITY
        }
    }

    /// Total evaluations across this problem and all of its forks.
    pub fn eval_count(&self) -> usize {
        self.evals.load(Ordering::Relaxed)
    }

    /// Whether an evaluation of this view overran the per-evaluation limit.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Relaxed)
    }

    /// Whether cooperative cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The cancellation token observed by this problem.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The feasible box.
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Problem dimension.
    pub fn dim(&self) -> usize {
        self.bounds.dim()
    }
}

//! Simple parallel retry: independent runs, aggregated statistics.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use glopt_optimizers::{Bounds, Optimizer, Problem};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::error::{Result, RetryError};
use crate::logging::{fmt_values, fmt_vector, RetryLogger};
use crate::{RetryResult, RetryStats, TOP_VALUES};

/// Configuration for simple parallel retry.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Number of independent runs.
    pub num_retries: usize,
    /// Worker threads; 1 runs sequentially (and deterministically when
    /// seeded).
    pub workers: usize,
    /// Runs whose objective stays below this feed the mean/stddev statistics.
    pub improvement_threshold: f64,
    /// Seconds between progress summary lines.
    pub log_interval: f64,
    /// Stop scheduling new runs once the best value reaches this.
    pub stop_fitness: f64,
    /// Optional wall-clock limit for the whole call.
    pub wall_time: Option<Duration>,
    /// Random seed for the run-seed stream; `None` draws from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            num_retries: 64,
            workers: 8,
            improvement_threshold: f64::INFINITY,
            log_interval: 10.0,
            stop_fitness: f64::NEG_INFINITY,
            wall_time: None,
            seed: None,
        }
    }
}

struct Aggregate {
    best_x: Option<Array1<f64>>,
    best_f: f64,
    good_values: Vec<f64>,
    top: Vec<f64>,
    retries: usize,
    last_log: Instant,
}

impl Aggregate {
    fn record(&mut self, x: &Array1<f64>, f: f64, threshold: f64) {
        if f < self.best_f {
            self.best_f = f;
            self.best_x = Some(x.clone());
        }
        if f < threshold {
            self.good_values.push(f);
        }
        let pos = self.top.partition_point(|&v| v <= f);
        self.top.insert(pos, f);
        self.top.truncate(TOP_VALUES);
    }

    fn stats(&self) -> RetryStats {
        let count = self.good_values.len();
        if count == 0 {
            return RetryStats {
                mean: f64::NAN,
                std_dev: f64::NAN,
                count: 0,
                top: self.top.clone(),
            };
        }
        let mean = self.good_values.iter().sum::<f64>() / count as f64;
        let var = self
            .good_values
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / count as f64;
        RetryStats {
            mean,
            std_dev: var.sqrt(),
            count,
            top: self.top.clone(),
        }
    }
}

/// Runs `num_retries` independent optimizations of `fun` over `bounds` and
/// returns the best result with aggregate statistics.
///
/// Every run gets a fresh seed, a uniform starting point, and the default
/// step size. A run that panics or times out counts as attempted but
/// contributes nothing.
///
/// # Errors
///
/// `InvalidRetries` when `num_retries` is zero; optimizer configuration
/// errors propagate.
pub fn minimize<F>(
    fun: &F,
    bounds: Bounds,
    optimizer: &dyn Optimizer,
    opts: RetryOptions,
    logger: &dyn RetryLogger,
) -> Result<RetryResult>
where
    F: Fn(&Array1<f64>) -> f64 + Send + Sync,
{
    if opts.num_retries == 0 {
        return Err(RetryError::InvalidRetries);
    }
    let problem = Problem::new(fun, bounds);
    minimize_problem(&problem, optimizer, &opts, logger)
}

/// Same as [`minimize`] over a caller-built [`Problem`] (with its timeout
/// and cancellation policy already attached).
pub fn minimize_problem(
    problem: &Problem<'_>,
    optimizer: &dyn Optimizer,
    opts: &RetryOptions,
    logger: &dyn RetryLogger,
) -> Result<RetryResult> {
    if opts.num_retries == 0 {
        return Err(RetryError::InvalidRetries);
    }

    let t0 = Instant::now();
    let deadline = opts.wall_time.map(|d| t0 + d);
    let cancel = problem.cancel_token();
    let budget = optimizer.max_evaluations();

    let mut master = match opts.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => {
            let mut thread_rng = rand::rng();
            StdRng::from_rng(&mut thread_rng)
        }
    };
    let run_seeds: Vec<u64> = (0..opts.num_retries).map(|_| master.random()).collect();

    let state = Mutex::new(Aggregate {
        best_x: None,
        best_f: f64::INFINITY,
        good_values: Vec::new(),
        top: Vec::new(),
        retries: 0,
        last_log: t0,
    });

    let run_one = |seed: u64| {
        if cancel.is_cancelled() {
            return;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                cancel.cancel();
                return;
            }
        }

        let run_problem = problem.fork();
        let mut rng = StdRng::seed_from_u64(seed);
        let x0 = run_problem.bounds().sample_uniform(&mut rng);
        let run_seed = rng.random::<u64>();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            optimizer.minimize_run(&run_problem, Some(&x0), None, budget, run_seed)
        }));

        let mut agg = state.lock().unwrap();
        agg.retries += 1;
        match outcome {
            Ok(run) if run.fun.is_finite() && !run_problem.timed_out() => {
                agg.record(&run.x, run.fun, opts.improvement_threshold);
            }
            Ok(_) => {}
            Err(_) => log::warn!("retry run panicked; counted without result"),
        }
        if agg.best_f <= opts.stop_fitness {
            cancel.cancel();
        }

        if agg.last_log.elapsed().as_secs_f64() >= opts.log_interval {
            agg.last_log = Instant::now();
            emit_line(logger, t0, &agg, problem.eval_count());
        }
    };

    if opts.workers <= 1 {
        for &seed in &run_seeds {
            run_one(seed);
        }
    } else {
        // a scoped pool per call, so every call gets its own worker count
        match rayon::ThreadPoolBuilder::new()
            .num_threads(opts.workers)
            .build()
        {
            Ok(pool) => pool.install(|| run_seeds.par_iter().for_each(|&seed| run_one(seed))),
            Err(err) => {
                log::debug!("falling back to the global rayon pool: {err}");
                run_seeds.par_iter().for_each(|&seed| run_one(seed));
            }
        }
    }

    let agg = state.lock().unwrap();
    emit_line(logger, t0, &agg, problem.eval_count());

    let stats = agg.stats();
    Ok(RetryResult {
        x: agg
            .best_x
            .clone()
            .unwrap_or_else(|| problem.bounds().center()),
        fun: agg.best_f,
        nfev: problem.eval_count(),
        retries: agg.retries,
        stats,
    })
}

/// `t evals/s retries total_evals best mean std top20 best_x`
fn emit_line(logger: &dyn RetryLogger, t0: Instant, agg: &Aggregate, evals: usize) {
    let t = t0.elapsed().as_secs_f64();
    let evals_per_sec = evals as f64 / t.max(1e-9);
    let stats = agg.stats();
    let best_x = agg.best_x.as_ref();
    logger.log(&format!(
        "{:.2} {:.0} {} {} {:.6e} {:.6e} {:.6e} {} {}",
        t,
        evals_per_sec,
        agg.retries,
        evals,
        agg.best_f,
        stats.mean,
        stats.std_dev,
        fmt_values(&agg.top),
        best_x.map_or_else(|| "[]".to_string(), fmt_vector),
    ));
}

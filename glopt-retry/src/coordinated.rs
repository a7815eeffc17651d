//! Coordinated retry: workers share an elite store and seed new runs from it.
//!
//! Each worker loops independently: claim a retry slot, draw a run descriptor
//! (cold uniform start while the store is filling, crossover of two store
//! entries afterwards) under the store lock, run the optimizer against a fork
//! of the problem, and admit the result back under the lock. The per-run
//! evaluation budget starts cheap and doubles on a schedule so early retries
//! explore and late retries exploit.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use glopt_optimizers::{Bounds, Optimizer, Problem, Status};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, RetryError};
use crate::logging::{fmt_values, fmt_vector, RetryLogger};
use crate::store::{Store, StoreConfig};
use crate::{RetryResult, RetryStats, TOP_VALUES};

/// Configuration for coordinated retry.
#[derive(Debug, Clone)]
pub struct CoordinatedOptions {
    /// Total retry runs to schedule.
    pub num_retries: usize,
    /// Worker threads drawing runs; 1 is sequential (and deterministic when
    /// seeded).
    pub workers: usize,
    /// Per-run evaluation budget at the start of the schedule.
    pub max_evals_init: usize,
    /// Ceiling the doubling schedule saturates at.
    pub max_evals_cap: usize,
    /// Elite store tuning.
    pub store: StoreConfig,
    /// Stop scheduling new runs once the best value reaches this.
    pub stop_fitness: f64,
    /// Optional wall-clock limit for the whole call.
    pub wall_time: Option<Duration>,
    /// Seconds between progress summary lines.
    pub log_interval: f64,
    /// Random seed for descriptor generation; `None` draws from the thread
    /// RNG.
    pub seed: Option<u64>,
}

impl Default for CoordinatedOptions {
    fn default() -> Self {
        Self {
            num_retries: 5000,
            workers: 8,
            max_evals_init: 1500,
            max_evals_cap: 50_000,
            store: StoreConfig::default(),
            stop_fitness: f64::NEG_INFINITY,
            wall_time: None,
            log_interval: 10.0,
            seed: None,
        }
    }
}

/// Runs coordinated retry of `fun` over `bounds` with a fresh store.
///
/// # Errors
///
/// `InvalidRetries`, `InvalidBudget`, or `InvalidCapacity` on bad
/// configuration, all before any evaluation.
pub fn minimize<F>(
    fun: &F,
    bounds: Bounds,
    optimizer: &dyn Optimizer,
    opts: CoordinatedOptions,
    logger: &dyn RetryLogger,
) -> Result<RetryResult>
where
    F: Fn(&Array1<f64>) -> f64 + Send + Sync,
{
    let problem = Problem::new(fun, bounds.clone());
    let store = Mutex::new(Store::new(bounds, opts.store.clone())?);
    retry(&problem, &store, optimizer, &opts, logger)
}

/// Runs `opts.num_retries` coordinated retries against an existing store.
///
/// The store persists across calls, so callers can alternate retry rounds
/// with their own inspection (problem filtering does exactly that).
///
/// # Errors
///
/// `InvalidRetries` or `InvalidBudget` on bad configuration.
pub fn retry(
    problem: &Problem<'_>,
    store: &Mutex<Store>,
    optimizer: &dyn Optimizer,
    opts: &CoordinatedOptions,
    logger: &dyn RetryLogger,
) -> Result<RetryResult> {
    if opts.num_retries == 0 {
        return Err(RetryError::InvalidRetries);
    }
    if opts.max_evals_init == 0 || opts.max_evals_init > opts.max_evals_cap {
        return Err(RetryError::InvalidBudget {
            init: opts.max_evals_init,
            cap: opts.max_evals_cap,
        });
    }

    let t0 = Instant::now();
    let deadline = opts.wall_time.map(|d| t0 + d);
    let cancel = problem.cancel_token();
    let evals_at_start = problem.eval_count();

    // double the budget every `step` completed retries until it saturates
    let doublings_available = (opts.max_evals_cap / opts.max_evals_init).max(1);
    let budget_step = opts.num_retries.div_ceil(doublings_available).max(1);

    let master = Mutex::new(match opts.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => {
            let mut thread_rng = rand::rng();
            StdRng::from_rng(&mut thread_rng)
        }
    });
    let started = AtomicUsize::new(0);
    let completed = AtomicUsize::new(0);
    let last_log = Mutex::new(t0);

    let worker = || {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    cancel.cancel();
                    break;
                }
            }
            if started.fetch_add(1, Ordering::SeqCst) >= opts.num_retries {
                break;
            }

            // descriptor: mode, start point, step size, seed, budget
            let (x0, sigma0, parents, run_seed) = {
                let store_guard = store.lock().unwrap();
                let mut rng = master.lock().unwrap();
                let run_seed = rng.random::<u64>();
                let descriptor = if store_guard.is_cold() {
                    None
                } else {
                    store_guard.crossover_seed(&mut *rng)
                };
                match descriptor {
                    Some(seed) => (seed.x0, Some(seed.sigma0), Some(seed.parents), run_seed),
                    None => (
                        problem.bounds().sample_uniform(&mut *rng),
                        None,
                        None,
                        run_seed,
                    ),
                }
            };
            let budget = run_budget(
                completed.load(Ordering::Relaxed),
                budget_step,
                opts.max_evals_init,
                opts.max_evals_cap,
            );

            let run_problem = problem.fork();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                optimizer.minimize_run(&run_problem, Some(&x0), sigma0.as_ref(), budget, run_seed)
            }));
            completed.fetch_add(1, Ordering::SeqCst);

            {
                let mut store_guard = store.lock().unwrap();
                match outcome {
                    Ok(run) => {
                        if run_problem.timed_out() || run.status == Status::Cancelled {
                            // partial result of a timed-out run is discarded
                            if run.status != Status::Cancelled {
                                log::debug!("run timed out; result discarded");
                            }
                        } else {
                            store_guard.admit(run.x, run.fun, parents);
                        }
                    }
                    Err(_) => {
                        log::warn!("coordinated retry run panicked; counted without result")
                    }
                }
                if let Some((_, best_f)) = store_guard.best() {
                    if best_f <= opts.stop_fitness {
                        cancel.cancel();
                    }
                }

                let mut last = last_log.lock().unwrap();
                if last.elapsed().as_secs_f64() >= opts.log_interval {
                    *last = Instant::now();
                    emit_line(
                        logger,
                        t0,
                        &store_guard,
                        completed.load(Ordering::Relaxed),
                        problem.eval_count(),
                    );
                }
            }
        }
    };

    let workers = opts.workers.max(1);
    if workers == 1 {
        worker();
    } else {
        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(&worker);
            }
        });
    }

    let store_guard = store.lock().unwrap();
    let retries = completed.load(Ordering::Relaxed);
    emit_line(logger, t0, &store_guard, retries, problem.eval_count());

    let values: Vec<f64> = store_guard.entries().iter().map(|e| e.f).collect();
    let stats = if values.is_empty() {
        RetryStats {
            mean: f64::NAN,
            std_dev: f64::NAN,
            count: 0,
            top: Vec::new(),
        }
    } else {
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let var =
            values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
        RetryStats {
            mean,
            std_dev: var.sqrt(),
            count: values.len(),
            top: store_guard.top_values(TOP_VALUES),
        }
    };
    let (x, fun) = match store_guard.best() {
        Some((x, f)) => (x.clone(), f),
        None => (problem.bounds().center(), f64::INFINITY),
    };
    Ok(RetryResult {
        x,
        fun,
        nfev: problem.eval_count() - evals_at_start,
        retries,
        stats,
    })
}

/// Budget after `completed` retries: `init * 2^(completed / step)`, capped.
fn run_budget(completed: usize, step: usize, init: usize, cap: usize) -> usize {
    let doublings = (completed / step).min(usize::BITS as usize - 1);
    init.saturating_mul(1usize << doublings).min(cap)
}

/// `t evals/s retries total_evals best worst_store store_size top20 best_x`
fn emit_line(logger: &dyn RetryLogger, t0: Instant, store: &Store, retries: usize, evals: usize) {
    let t = t0.elapsed().as_secs_f64();
    let evals_per_sec = evals as f64 / t.max(1e-9);
    let (best_x, best_f) = match store.best() {
        Some((x, f)) => (fmt_vector(x), f),
        None => ("[]".to_string(), f64::INFINITY),
    };
    logger.log(&format!(
        "{:.2} {:.0} {} {} {:.6e} {:.6e} {} {} {}",
        t,
        evals_per_sec,
        retries,
        evals,
        best_f,
        store.worst_f(),
        store.len(),
        fmt_values(&store.top_values(TOP_VALUES)),
        best_x,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{MemoryLogger, NullLogger};
    use glopt_optimizers::RunResult;
    use glopt_test_functions::{rastrigin, sphere};

    /// Evaluates the start point once; cheap enough to stress the store.
    struct ProbeOptimizer;

    impl Optimizer for ProbeOptimizer {
        fn name(&self) -> String {
            "probe".into()
        }
        fn max_evaluations(&self) -> usize {
            1
        }
        fn minimize_run(
            &self,
            problem: &Problem<'_>,
            x0: Option<&Array1<f64>>,
            _sigma0: Option<&Array1<f64>>,
            _max_evals: usize,
            _seed: u64,
        ) -> RunResult {
            let x = x0.cloned().unwrap_or_else(|| problem.bounds().center());
            let fun = problem.eval(&x);
            RunResult {
                x,
                fun,
                nfev: 1,
                nit: 1,
                status: Status::StopMaxIter,
                dispersion: None,
            }
        }
    }

    #[test]
    fn test_bad_configuration_rejected() {
        let f = sphere;
        let bounds = Bounds::symmetric(5.0, 2).unwrap();
        let err = minimize(
            &f,
            bounds.clone(),
            &ProbeOptimizer,
            CoordinatedOptions {
                num_retries: 0,
                ..CoordinatedOptions::default()
            },
            &NullLogger,
        );
        assert!(matches!(err, Err(RetryError::InvalidRetries)));

        let err = minimize(
            &f,
            bounds,
            &ProbeOptimizer,
            CoordinatedOptions {
                max_evals_init: 1000,
                max_evals_cap: 100,
                ..CoordinatedOptions::default()
            },
            &NullLogger,
        );
        assert!(matches!(err, Err(RetryError::InvalidBudget { .. })));
    }

    #[test]
    fn test_budget_schedule_doubles_and_saturates() {
        // schedule: 100 retries, init 100, cap 800 -> 8 doublings available,
        // step = ceil(100 / 8) = 13
        assert_eq!(run_budget(0, 13, 100, 800), 100);
        assert_eq!(run_budget(12, 13, 100, 800), 100);
        assert_eq!(run_budget(13, 13, 100, 800), 200);
        assert_eq!(run_budget(26, 13, 100, 800), 400);
        assert_eq!(run_budget(39, 13, 100, 800), 800);
        assert_eq!(run_budget(99, 13, 100, 800), 800);
    }

    #[test]
    fn test_store_invariants_under_stress() {
        let noisy_norm = |x: &Array1<f64>| {
            let base: f64 = x.iter().map(|v| v * v).sum();
            // deterministic jitter keeps near-duplicates plausible
            base + 1e-4 * (1e4 * x[0]).sin()
        };
        let store = Mutex::new(
            Store::new(
                Bounds::symmetric(10.0, 3).unwrap(),
                StoreConfig {
                    capacity: 50,
                    ..StoreConfig::default()
                },
            )
            .unwrap(),
        );
        let problem = Problem::new(&noisy_norm, Bounds::symmetric(10.0, 3).unwrap());
        let result = retry(
            &problem,
            &store,
            &ProbeOptimizer,
            &CoordinatedOptions {
                num_retries: 400,
                workers: 4,
                max_evals_init: 1,
                max_evals_cap: 1,
                seed: Some(11),
                ..CoordinatedOptions::default()
            },
            &NullLogger,
        )
        .unwrap();

        assert_eq!(result.retries, 400);
        let store = store.lock().unwrap();
        assert!(store.len() <= 50);
        let entries = store.entries();
        for w in entries.windows(2) {
            assert!(w[0].f <= w[1].f);
        }
        let bounds = Bounds::symmetric(10.0, 3).unwrap();
        for e in entries {
            assert!(e.f.is_finite());
            assert!(bounds.contains(&e.x));
        }
    }

    #[test]
    fn test_sequential_coordinated_retry_is_deterministic() {
        let f = rastrigin;
        let bounds = Bounds::symmetric(5.12, 3).unwrap();
        let opts = CoordinatedOptions {
            num_retries: 30,
            workers: 1,
            max_evals_init: 300,
            max_evals_cap: 600,
            seed: Some(5),
            ..CoordinatedOptions::default()
        };
        let a = minimize(
            &f,
            bounds.clone(),
            &glopt_optimizers::de_cma(600),
            opts.clone(),
            &NullLogger,
        )
        .unwrap();
        let b = minimize(
            &f,
            bounds,
            &glopt_optimizers::de_cma(600),
            opts,
            &NullLogger,
        )
        .unwrap();
        assert_eq!(a.fun, b.fun);
        assert_eq!(a.x, b.x);
    }

    #[test]
    fn test_rastrigin_small_converges() {
        let f = rastrigin;
        let result = minimize(
            &f,
            Bounds::symmetric(5.12, 3).unwrap(),
            &glopt_optimizers::de_cma(1500),
            CoordinatedOptions {
                num_retries: 50,
                workers: 4,
                max_evals_init: 750,
                max_evals_cap: 3000,
                seed: Some(7),
                ..CoordinatedOptions::default()
            },
            &NullLogger,
        )
        .unwrap();
        assert!(result.fun < 1.0, "got {}", result.fun);
    }

    #[test]
    fn test_wall_time_cancels_promptly() {
        let slowish = |x: &Array1<f64>| {
            std::thread::sleep(Duration::from_millis(1));
            x.iter().map(|v| v * v).sum()
        };
        let t0 = Instant::now();
        let result = minimize(
            &slowish,
            Bounds::symmetric(5.0, 4).unwrap(),
            &glopt_optimizers::CmaesOptimizer::with_budget(10_000),
            CoordinatedOptions {
                num_retries: 1000,
                workers: 2,
                wall_time: Some(Duration::from_millis(400)),
                seed: Some(13),
                ..CoordinatedOptions::default()
            },
            &NullLogger,
        )
        .unwrap();
        // in-flight runs drain, so allow generous slack over the limit
        assert!(t0.elapsed() < Duration::from_secs(30));
        assert!(result.retries < 1000);
        assert!(result.fun.is_finite());
    }

    #[test]
    fn test_summary_line_layout() {
        let f = sphere;
        let logger = MemoryLogger::new();
        minimize(
            &f,
            Bounds::symmetric(5.0, 2).unwrap(),
            &ProbeOptimizer,
            CoordinatedOptions {
                num_retries: 10,
                workers: 1,
                max_evals_init: 1,
                max_evals_cap: 1,
                seed: Some(21),
                ..CoordinatedOptions::default()
            },
            &logger,
        )
        .unwrap();
        let lines = logger.lines();
        assert!(!lines.is_empty());
        let fields: Vec<&str> = lines.last().unwrap().split(' ').collect();
        // t evals/s retries total_evals best worst_store store_size top20 best_x
        assert_eq!(fields.len(), 9);
        assert_eq!(fields[2], "10");
    }
}

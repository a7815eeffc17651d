//! Dual annealing: generalized simulated annealing with restarts.
//!
//! Cauchy-flavoured visiting moves whose reach follows the temperature
//! schedule, Metropolis acceptance, and a restart from the best point once
//! the temperature decays below `restart_temp_ratio * initial_temp`.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Cauchy, Distribution};

use crate::problem::Problem;
use crate::{Optimizer, RunResult, Status};

/// Configuration for a dual annealing run.
#[derive(Debug, Clone)]
pub struct DualAnnealingOptions {
    /// Starting temperature of the schedule.
    pub initial_temp: f64,
    /// Restart once the temperature falls below this fraction of the start.
    pub restart_temp_ratio: f64,
    /// Visiting parameter; larger values produce heavier-tailed moves.
    pub visit: f64,
    /// Evaluation budget for the run.
    pub max_evaluations: usize,
    /// Terminate once the best fitness reaches this value.
    pub stop_fitness: f64,
    /// Random seed; `None` draws one from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for DualAnnealingOptions {
    fn default() -> Self {
        Self {
            initial_temp: 5230.0,
            restart_temp_ratio: 2e-5,
            visit: 2.62,
            max_evaluations: 50_000,
            stop_fitness: f64::NEG_INFINITY,
            seed: None,
        }
    }
}

/// [`Optimizer`] implementation of dual annealing.
#[derive(Debug, Clone, Default)]
pub struct DualAnnealing {
    /// Template options; per-run budget and seed override these.
    pub opts: DualAnnealingOptions,
}

impl DualAnnealing {
    /// Adapter with the given template options.
    pub fn new(opts: DualAnnealingOptions) -> Self {
        Self { opts }
    }

    /// Adapter with default options and the given budget.
    pub fn with_budget(max_evaluations: usize) -> Self {
        Self {
            opts: DualAnnealingOptions {
                max_evaluations,
                ..DualAnnealingOptions::default()
            },
        }
    }
}

impl Optimizer for DualAnnealing {
    fn name(&self) -> String {
        "da".into()
    }

    fn max_evaluations(&self) -> usize {
        self.opts.max_evaluations
    }

    fn minimize_run(
        &self,
        problem: &Problem<'_>,
        x0: Option<&Array1<f64>>,
        _sigma0: Option<&Array1<f64>>,
        max_evals: usize,
        seed: u64,
    ) -> RunResult {
        let n = problem.dim();
        let bounds = problem.bounds();
        let scale = bounds.scale();
        let mut rng = StdRng::seed_from_u64(seed);
        let Ok(cauchy) = Cauchy::new(0.0f64, 1.0) else {
            return RunResult::failed(n, Status::StopCondition);
        };

        let mut x = match x0 {
            Some(g) => {
                let mut g = g.clone();
                bounds.clip(&mut g);
                g
            }
            None => bounds.sample_uniform(&mut rng),
        };
        let mut f = problem.eval(&x);
        let mut evals = 1usize;
        let mut best_x = x.clone();
        let mut best_f = f;
        let mut status = Status::StopMaxIter;
        let mut steps = 0usize;
        let mut t_step = 0u64;

        let qv1 = self.opts.visit - 1.0;
        let t_scale = (2.0f64.powf(qv1) - 1.0).max(1e-300);

        'outer: while evals < max_evals {
            t_step += 1;
            let temp = self.opts.initial_temp * t_scale
                / (((t_step + 1) as f64).powf(qv1) - 1.0).max(1e-300);
            if temp < self.opts.initial_temp * self.opts.restart_temp_ratio {
                // reheat from the incumbent
                x = best_x.clone();
                f = best_f;
                t_step = 1;
                continue;
            }
            let reach = (temp / self.opts.initial_temp).clamp(1e-9, 1.0);

            for _ in 0..(2 * n) {
                if evals >= max_evals {
                    break 'outer;
                }
                if problem.is_cancelled() || problem.timed_out() {
                    status = Status::Cancelled;
                    break 'outer;
                }

                let mut candidate = Array1::from_shape_fn(n, |i| {
                    x[i] + cauchy.sample(&mut rng) * scale[i] * reach
                });
                bounds.reflect(&mut candidate);
                let fc = problem.eval(&candidate);
                evals += 1;

                let accept = fc < f || {
                    let p = (-(fc - f) / temp.max(1e-300)).exp();
                    rng.random::<f64>() < p
                };
                if accept {
                    x = candidate;
                    f = fc;
                    if f < best_f {
                        best_f = f;
                        best_x = x.clone();
                    }
                }
                if best_f <= self.opts.stop_fitness {
                    status = Status::StopFitness;
                    break 'outer;
                }
            }
            steps += 1;
        }

        RunResult {
            x: best_x,
            fun: best_f,
            nfev: evals,
            nit: steps,
            status,
            dispersion: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bounds;
    use glopt_test_functions::sphere;

    #[test]
    fn test_improves_on_sphere() {
        let f = sphere;
        let problem = Problem::new(&f, Bounds::symmetric(5.0, 2).unwrap());
        let da = DualAnnealing::with_budget(5000);
        let run = da.minimize_run(&problem, None, None, 5000, 17);
        assert!(run.fun < 0.5, "got {}", run.fun);
        assert!(problem.bounds().contains(&run.x));
        assert!(run.nfev <= 5000);
    }

    #[test]
    fn test_seeded_runs_are_deterministic() {
        let f = sphere;
        let problem = Problem::new(&f, Bounds::symmetric(5.0, 3).unwrap());
        let da = DualAnnealing::with_budget(2000);
        let a = da.minimize_run(&problem, None, None, 2000, 4);
        let b = da.minimize_run(&problem, None, None, 2000, 4);
        assert_eq!(a.fun, b.fun);
        assert_eq!(a.x, b.x);
    }

    #[test]
    fn test_respects_stop_fitness() {
        let f = sphere;
        let problem = Problem::new(&f, Bounds::symmetric(5.0, 2).unwrap());
        let mut opts = DualAnnealingOptions::default();
        opts.stop_fitness = 1.0;
        let da = DualAnnealing::new(opts);
        let run = da.minimize_run(&problem, None, None, 50_000, 9);
        assert_eq!(run.status, Status::StopFitness);
        assert!(run.fun <= 1.0);
    }
}

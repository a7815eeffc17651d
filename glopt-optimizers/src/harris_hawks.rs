//! Harris hawks optimization.
//!
//! Population of hawks cooperatively besieging the current best ("rabbit").
//! The escaping-energy schedule moves the swarm from exploration to soft and
//! hard besiege, with levy-flight rapid dives in the late phases.
//!
//! Reference: Heidari et al. (2019). Harris hawks optimization: Algorithm and
//! applications. Future Generation Computer Systems, 97.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::problem::Problem;
use crate::{argmin, Optimizer, RunResult, Status};

/// Configuration for a Harris hawks run.
#[derive(Debug, Clone)]
pub struct HarrisHawksOptions {
    /// Number of hawks; default 31.
    pub popsize: usize,
    /// Evaluation budget for the run.
    pub max_evaluations: usize,
    /// Terminate once the best fitness reaches this value.
    pub stop_fitness: f64,
    /// Random seed; `None` draws one from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for HarrisHawksOptions {
    fn default() -> Self {
        Self {
            popsize: 31,
            max_evaluations: 50_000,
            stop_fitness: f64::NEG_INFINITY,
            seed: None,
        }
    }
}

/// [`Optimizer`] implementation of Harris hawks optimization.
#[derive(Debug, Clone, Default)]
pub struct HarrisHawks {
    /// Template options; per-run budget and seed override these.
    pub opts: HarrisHawksOptions,
}

impl HarrisHawks {
    /// Adapter with the given template options.
    pub fn new(opts: HarrisHawksOptions) -> Self {
        Self { opts }
    }

    /// Adapter with default options and the given budget.
    pub fn with_budget(max_evaluations: usize) -> Self {
        Self {
            opts: HarrisHawksOptions {
                max_evaluations,
                ..HarrisHawksOptions::default()
            },
        }
    }
}

impl Optimizer for HarrisHawks {
    fn name(&self) -> String {
        "hh".into()
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
        let popsize = self.opts.popsize.max(5);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut hawks: Vec<Array1<f64>> = (0..popsize)
            .map(|k| match (x0, k) {
                (Some(g), 0) => {
                    let mut g = g.clone();
                    bounds.clip(&mut g);
                    g
                }
                _ => bounds.sample_uniform(&mut rng),
            })
            .collect();
        let mut fitness: Vec<f64> = hawks.iter().map(|x| problem.eval(x)).collect();
        let mut evals = popsize;

        let (best_idx, mut rabbit_f) = argmin(&fitness);
        let mut rabbit = hawks[best_idx].clone();
        let mut status = Status::StopMaxIter;
        let mut generation = 0usize;
        let max_generations = (max_evals / popsize).max(1);

        'outer: while evals < max_evals {
            generation += 1;
            let progress = 1.0 - (generation as f64 / max_generations as f64).min(1.0);

            for i in 0..popsize {
                if evals >= max_evals {
                    break 'outer;
                }
                if problem.is_cancelled() || problem.timed_out() {
                    status = Status::Cancelled;
                    break 'outer;
                }

                let e0 = 2.0 * rng.random::<f64>() - 1.0;
                let energy = 2.0 * e0 * progress;
                let jump = 2.0 * (1.0 - rng.random::<f64>());

                let mut candidate = if energy.abs() >= 1.0 {
                    // exploration: perch on a random hawk or relative to the swarm mean
                    if rng.random::<f64>() >= 0.5 {
                        let r = rng.random_range(0..popsize);
                        let (r1, r2) = (rng.random::<f64>(), rng.random::<f64>());
                        Array1::from_shape_fn(n, |j| {
                            hawks[r][j] - r1 * (hawks[r][j] - 2.0 * r2 * hawks[i][j]).abs()
                        })
                    } else {
                        let mean = swarm_mean(&hawks, n);
                        let (r3, r4) = (rng.random::<f64>(), rng.random::<f64>());
                        let lower = bounds.lower();
                        let upper = bounds.upper();
                        Array1::from_shape_fn(n, |j| {
                            rabbit[j] - mean[j] - r3 * (lower[j] + r4 * (upper[j] - lower[j]))
                        })
                    }
                } else {
                    let r = rng.random::<f64>();
                    if r >= 0.5 && energy.abs() >= 0.5 {
                        // soft besiege
                        Array1::from_shape_fn(n, |j| {
                            rabbit[j]
                                - hawks[i][j]
                                - energy * (jump * rabbit[j] - hawks[i][j]).abs()
                        })
                    } else if r >= 0.5 {
                        // hard besiege
                        Array1::from_shape_fn(n, |j| {
                            rabbit[j] - energy * (rabbit[j] - hawks[i][j]).abs()
                        })
                    } else {
                        // progressive rapid dives
                        let reference = if energy.abs() >= 0.5 {
                            hawks[i].clone()
                        } else {
                            swarm_mean(&hawks, n)
                        };
                        let mut dive = Array1::from_shape_fn(n, |j| {
                            rabbit[j] - energy * (jump * rabbit[j] - reference[j]).abs()
                        });
                        bounds.clip(&mut dive);
                        let f_dive = problem.eval(&dive);
                        evals += 1;
                        if f_dive < fitness[i] {
                            dive
                        } else {
                            let levy = levy_flight(n, &mut rng);
                            Array1::from_shape_fn(n, |j| {
                                dive[j] + rng.random::<f64>() * levy[j] * (upper_minus_lower(bounds, j))
                            })
                        }
                    }
                };

                bounds.clip(&mut candidate);
                let fc = problem.eval(&candidate);
                evals += 1;
                if fc < fitness[i] {
                    hawks[i] = candidate;
                    fitness[i] = fc;
                    if fc < rabbit_f {
                        rabbit_f = fc;
                        rabbit = hawks[i].clone();
                    }
                }
                if rabbit_f <= self.opts.stop_fitness {
                    status = Status::StopFitness;
                    break 'outer;
                }
            }
        }

        RunResult {
            x: rabbit,
            fun: rabbit_f,
            nfev: evals,
            nit: generation,
            status,
            dispersion: None,
        }
    }
}

fn swarm_mean(hawks: &[Array1<f64>], n: usize) -> Array1<f64> {
    let mut mean = Array1::zeros(n);
    for h in hawks {
        mean += h;
    }
    mean / hawks.len() as f64
}

fn upper_minus_lower(bounds: &crate::Bounds, j: usize) -> f64 {
    bounds.upper()[j] - bounds.lower()[j]
}

/// Levy flight step with beta = 1.5.
fn levy_flight<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Array1<f64> {
    const BETA: f64 = 1.5;
    // ((gamma(1+b) sin(pi b / 2)) / (gamma((1+b)/2) b 2^((b-1)/2)))^(1/b) at b = 1.5
    const SIGMA: f64 = 0.696_575;
    Array1::from_shape_fn(n, |_| {
        let u: f64 = rng.sample::<f64, _>(StandardNormal);
        let v: f64 = rng.sample::<f64, _>(StandardNormal);
        0.01 * u * SIGMA / v.abs().max(1e-12).powf(1.0 / BETA)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bounds;
    use glopt_test_functions::{rastrigin, sphere};

    #[test]
    fn test_improves_on_sphere() {
        let f = sphere;
        let problem = Problem::new(&f, Bounds::symmetric(5.0, 2).unwrap());
        let hh = HarrisHawks::with_budget(5000);
        let run = hh.minimize_run(&problem, None, None, 5000, 3);
        assert!(run.fun < 0.5, "got {}", run.fun);
        assert!(problem.bounds().contains(&run.x));
    }

    #[test]
    fn test_population_minimum_enforced() {
        let f = rastrigin;
        let problem = Problem::new(&f, Bounds::symmetric(5.12, 3).unwrap());
        let hh = HarrisHawks::new(HarrisHawksOptions {
            popsize: 1,
            ..HarrisHawksOptions::default()
        });
        let run = hh.minimize_run(&problem, None, None, 500, 5);
        assert!(run.fun.is_finite());
        assert!(run.nfev >= 5); // clamped popsize evaluated at least once
    }

    #[test]
    fn test_seeded_runs_are_deterministic() {
        let f = sphere;
        let problem = Problem::new(&f, Bounds::symmetric(5.0, 4).unwrap());
        let hh = HarrisHawks::with_budget(3000);
        let a = hh.minimize_run(&problem, None, None, 3000, 12);
        let b = hh.minimize_run(&problem, None, None, 3000, 12);
        assert_eq!(a.fun, b.fun);
        assert_eq!(a.x, b.x);
    }
}

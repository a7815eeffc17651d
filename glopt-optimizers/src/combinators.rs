//! Algorithm expressions: optimizers composed from optimizers.
//!
//! [`Sequence`] chains optimizers over a weighted split of the evaluation
//! budget, feeding each stage's best point (and dispersion-derived step size)
//! to the next. [`RandomChoice`] picks one optimizer per invocation. Both
//! satisfy [`Optimizer`], so expressions nest arbitrarily.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cmaes::CmaesOptimizer;
use crate::de::DeOptimizer;
use crate::error::{OptError, Result};
use crate::problem::Problem;
use crate::{Optimizer, RunResult, Status};

/// Runs its member optimizers one after another, splitting the evaluation
/// budget by weight. Each stage starts from the best point of the chain so
/// far; a stage that panics is skipped and the chain continues.
pub struct Sequence {
    optimizers: Vec<Arc<dyn Optimizer>>,
    weights: Vec<f64>,
    max_evaluations: usize,
}

impl Sequence {
    /// Builds a sequence; `weights` are normalized and must be positive.
    ///
    /// # Errors
    ///
    /// `EmptyOptimizerList`, `WeightMismatch`, or `NonPositiveWeight`.
    pub fn new(optimizers: Vec<Arc<dyn Optimizer>>, weights: Vec<f64>) -> Result<Self> {
        let weights = validated_shares(&optimizers, weights, "sequence weights")?;
        let max_evaluations = optimizers.iter().map(|o| o.max_evaluations()).sum();
        Ok(Self {
            optimizers,
            weights,
            max_evaluations,
        })
    }

    /// Builds a sequence with equal budget shares.
    pub fn uniform(optimizers: Vec<Arc<dyn Optimizer>>) -> Result<Self> {
        let n = optimizers.len();
        Self::new(optimizers, vec![1.0; n.max(1)])
    }
}

impl Optimizer for Sequence {
    fn name(&self) -> String {
        self.optimizers
            .iter()
            .map(|o| o.name())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn max_evaluations(&self) -> usize {
        self.max_evaluations
    }

    fn minimize_run(
        &self,
        problem: &Problem<'_>,
        x0: Option<&Array1<f64>>,
        sigma0: Option<&Array1<f64>>,
        max_evals: usize,
        seed: u64,
    ) -> RunResult {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let mut guess = x0.cloned();
        let mut sigma = sigma0.cloned();
        let mut best: Option<RunResult> = None;
        let mut nfev = 0usize;
        let mut nit = 0usize;
        let mut status = Status::StopMaxIter;
        let mut spent = 0usize;

        let last = self.optimizers.len() - 1;
        for (k, (opt, w)) in self.optimizers.iter().zip(&self.weights).enumerate() {
            let budget = if k == last {
                max_evals.saturating_sub(spent)
            } else {
                (w * max_evals as f64).round() as usize
            };
            if budget == 0 {
                continue;
            }
            spent += budget;
            // the first stage reuses the caller's seed so a one-element
            // sequence reproduces the wrapped optimizer exactly
            let sub_seed = if k == 0 { seed } else { rng.random::<u64>() };

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                opt.minimize_run(problem, guess.as_ref(), sigma.as_ref(), budget, sub_seed)
            }));
            let run = match outcome {
                Ok(run) => run,
                Err(_) => {
                    log::warn!("optimizer '{}' panicked, continuing chain", opt.name());
                    continue;
                }
            };

            nfev += run.nfev;
            nit += run.nit;
            status = run.status;
            if run.fun.is_finite() {
                guess = Some(run.x.clone());
                sigma = next_sigma(problem, &run);
            }
            if best.as_ref().map_or(true, |b| run.fun < b.fun) {
                best = Some(run);
            }
            if problem.is_cancelled() {
                status = Status::Cancelled;
                break;
            }
        }

        match best {
            Some(mut run) => {
                run.nfev = nfev;
                run.nit = nit;
                run.status = status;
                run
            }
            None => RunResult::failed(problem.dim(), status),
        }
    }
}

/// Step size for the next stage: the previous stage's dispersion, clamped
/// into `[1e-6 * scale, scale]`, or `None` (stage default) when unavailable.
fn next_sigma(problem: &Problem<'_>, run: &RunResult) -> Option<Array1<f64>> {
    let dispersion = run.dispersion.as_ref()?;
    if dispersion.len() != problem.dim() {
        return None;
    }
    let scale = problem.bounds().scale();
    Some(Array1::from_shape_fn(dispersion.len(), |i| {
        let floor = 1e-6 * scale[i];
        if dispersion[i].is_finite() {
            dispersion[i].clamp(floor, scale[i])
        } else {
            floor
        }
    }))
}

/// Picks one member optimizer per invocation according to a discrete
/// distribution and hands it the whole budget.
pub struct RandomChoice {
    optimizers: Vec<Arc<dyn Optimizer>>,
    probs: Vec<f64>,
    max_evaluations: usize,
}

impl RandomChoice {
    /// Builds a random choice; `probs` are normalized and must be positive.
    ///
    /// # Errors
    ///
    /// `EmptyOptimizerList`, `WeightMismatch`, or `NonPositiveWeight`.
    pub fn new(optimizers: Vec<Arc<dyn Optimizer>>, probs: Vec<f64>) -> Result<Self> {
        let probs = validated_shares(&optimizers, probs, "choice probabilities")?;
        let max_evaluations = optimizers
            .iter()
            .map(|o| o.max_evaluations())
            .max()
            .unwrap_or(0);
        Ok(Self {
            optimizers,
            probs,
            max_evaluations,
        })
    }

    /// Builds a uniform random choice.
    pub fn uniform(optimizers: Vec<Arc<dyn Optimizer>>) -> Result<Self> {
        let n = optimizers.len();
        Self::new(optimizers, vec![1.0; n.max(1)])
    }
}

impl Optimizer for RandomChoice {
    fn name(&self) -> String {
        self.optimizers
            .iter()
            .map(|o| o.name())
            .collect::<Vec<_>>()
            .join("|")
    }

    fn max_evaluations(&self) -> usize {
        self.max_evaluations
    }

    fn minimize_run(
        &self,
        problem: &Problem<'_>,
        x0: Option<&Array1<f64>>,
        sigma0: Option<&Array1<f64>>,
        max_evals: usize,
        seed: u64,
    ) -> RunResult {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut u = rng.random::<f64>();
        let mut choice = self.optimizers.len() - 1;
        for (k, &p) in self.probs.iter().enumerate() {
            if u < p {
                choice = k;
                break;
            }
            u -= p;
        }
        let sub_seed = rng.random::<u64>();
        self.optimizers[choice].minimize_run(problem, x0, sigma0, max_evals, sub_seed)
    }
}

fn validated_shares(
    optimizers: &[Arc<dyn Optimizer>],
    mut shares: Vec<f64>,
    what: &'static str,
) -> Result<Vec<f64>> {
    if optimizers.is_empty() {
        return Err(OptError::EmptyOptimizerList);
    }
    if shares.len() != optimizers.len() {
        return Err(OptError::WeightMismatch {
            what,
            expected: optimizers.len(),
            got: shares.len(),
        });
    }
    for &s in &shares {
        if !(s > 0.0) || !s.is_finite() {
            return Err(OptError::NonPositiveWeight { what, value: s });
        }
    }
    let total: f64 = shares.iter().sum();
    for s in &mut shares {
        *s /= total;
    }
    Ok(shares)
}

/// The default retry chain: differential evolution over the first half of the
/// budget, CMA-ES over the second.
pub fn de_cma(max_evaluations: usize) -> Sequence {
    let de_budget = max_evaluations / 2;
    let cma_budget = max_evaluations - de_budget;
    Sequence {
        optimizers: vec![
            Arc::new(DeOptimizer::with_budget(de_budget)),
            Arc::new(CmaesOptimizer::with_budget(cma_budget)),
        ],
        weights: vec![0.5, 0.5],
        max_evaluations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmaes::CmaesOptions;
    use crate::Bounds;
    use glopt_test_functions::{rosenbrock, sphere};

    struct PanickingOptimizer;

    impl Optimizer for PanickingOptimizer {
        fn name(&self) -> String {
            "boom".into()
        }
        fn max_evaluations(&self) -> usize {
            1000
        }
        fn minimize_run(
            &self,
            _problem: &Problem<'_>,
            _x0: Option<&Array1<f64>>,
            _sigma0: Option<&Array1<f64>>,
            _max_evals: usize,
            _seed: u64,
        ) -> RunResult {
            panic!("synthetic failure");
        }
    }

    #[test]
    fn test_empty_list_rejected() {
        assert!(Sequence::new(vec![], vec![]).is_err());
        assert!(RandomChoice::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_weight_validation() {
        let opts: Vec<Arc<dyn Optimizer>> = vec![Arc::new(CmaesOptimizer::with_budget(100))];
        assert!(Sequence::new(opts, vec![1.0, 2.0]).is_err());

        let opts: Vec<Arc<dyn Optimizer>> = vec![Arc::new(CmaesOptimizer::with_budget(100))];
        assert!(RandomChoice::new(opts, vec![-1.0]).is_err());
    }

    #[test]
    fn test_singleton_sequence_matches_wrapped_optimizer() {
        let f = sphere;
        let bounds = Bounds::symmetric(5.0, 4).unwrap();
        let problem = Problem::new(&f, bounds);

        let inner = CmaesOptimizer::new(CmaesOptions::new().max_evaluations(2000));
        let direct = inner.minimize_run(&problem, None, None, 2000, 31);

        let chain = Sequence::uniform(vec![Arc::new(inner)]).unwrap();
        let chained = chain.minimize_run(&problem, None, None, 2000, 31);

        assert_eq!(direct.fun, chained.fun);
        assert_eq!(direct.x, chained.x);
        assert_eq!(direct.nfev, chained.nfev);
    }

    #[test]
    fn test_degenerate_choice_is_deterministic() {
        let f = sphere;
        let problem = Problem::new(&f, Bounds::symmetric(5.0, 3).unwrap());
        // a single-element choice always runs its only member
        let choice =
            RandomChoice::uniform(vec![Arc::new(CmaesOptimizer::with_budget(1500))]).unwrap();
        let run = choice.minimize_run(&problem, None, None, 1500, 7);
        assert!(run.fun < 1e-6, "got {}", run.fun);
    }

    #[test]
    fn test_chain_survives_panicking_stage() {
        let f = sphere;
        let problem = Problem::new(&f, Bounds::symmetric(5.0, 3).unwrap());
        let chain = Sequence::new(
            vec![
                Arc::new(PanickingOptimizer),
                Arc::new(CmaesOptimizer::with_budget(2000)),
            ],
            vec![0.5, 0.5],
        )
        .unwrap();
        let run = chain.minimize_run(&problem, None, None, 4000, 5);
        assert!(run.fun < 1e-6, "got {}", run.fun);
    }

    #[test]
    fn test_de_cma_improves_on_rosenbrock() {
        let f = rosenbrock;
        let problem = Problem::new(&f, Bounds::of_pairs(&[(-5.0, 10.0); 5]).unwrap());
        let chain = de_cma(10_000);
        let run = chain.minimize_run(&problem, None, None, 10_000, 1234);
        assert!(run.fun < 1.0, "got {}", run.fun);
        assert_eq!(chain.name(), "de cmaes");
    }

    #[test]
    fn test_combinators_nest() {
        let f = sphere;
        let problem = Problem::new(&f, Bounds::symmetric(5.0, 2).unwrap());
        let inner = RandomChoice::uniform(vec![
            Arc::new(CmaesOptimizer::with_budget(1000)),
            Arc::new(DeOptimizer::with_budget(1000)),
        ])
        .unwrap();
        let outer = Sequence::new(
            vec![Arc::new(inner), Arc::new(CmaesOptimizer::with_budget(1000))],
            vec![0.5, 0.5],
        )
        .unwrap();
        let run = outer.minimize_run(&problem, None, None, 2000, 99);
        assert!(run.fun < 1e-4, "got {}", run.fun);
    }
}

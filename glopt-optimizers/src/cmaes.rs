//! CMA-ES: covariance matrix adaptation evolution strategy.
//!
//! Rank-mu plus rank-one covariance updates with cumulative step-size
//! adaptation, driven through an ask/tell surface. `ask` returns a repaired
//! (in-box) population; `tell` consumes the objective values and reports a
//! [`Status`]. [`minimize`] wires the two together, optionally evaluating the
//! population on a rayon pool.
//!
//! Reference: Hansen, N., & Ostermeier, A. (2001). Completely Derandomized
//! Self-Adaptation in Evolution Strategies. Evolutionary Computation, 9(2).

use std::collections::VecDeque;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::bounds::Bounds;
use crate::eigen::symmetric_eigen;
use crate::error::{OptError, Result};
use crate::parallel::{BatchEvaluator, ParallelConfig};
use crate::problem::Problem;
use crate::{argmin, Optimizer, RunResult, Status};

/// Condition number of `C` above which the run is considered degenerate.
const CONDITION_LIMIT: f64 = 1e14;
/// A repeated covariance reset within this many generations terminates the run.
const RESET_WINDOW: usize = 5;

/// Initial step size: one value for every coordinate, or per-coordinate.
#[derive(Debug, Clone)]
pub enum InputSigma {
    /// The same initial step size in every coordinate.
    Scalar(f64),
    /// One initial step size per coordinate.
    PerCoordinate(Array1<f64>),
}

/// Configuration for a CMA-ES run.
#[derive(Debug, Clone)]
pub struct CmaesOptions {
    /// Population size lambda; default `4 + floor(3 ln n)`, at least 5.
    pub popsize: Option<usize>,
    /// Initial step size; default `0.3 * scale`.
    pub input_sigma: Option<InputSigma>,
    /// Evaluation budget for the run.
    pub max_evaluations: usize,
    /// Generation budget for the run.
    pub max_iterations: usize,
    /// Terminate once the best fitness reaches this value.
    pub stop_fitness: f64,
    /// Terminate when all coordinate standard deviations fall below this.
    pub tolx: f64,
    /// Terminate when the recent best-fitness history flattens below this.
    pub tolfun: f64,
    /// Threads for population evaluation; 1 evaluates sequentially.
    pub workers: usize,
    /// Random seed; `None` draws one from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for CmaesOptions {
    fn default() -> Self {
        Self {
            popsize: None,
            input_sigma: None,
            max_evaluations: 50_000,
            max_iterations: 1_000_000,
            stop_fitness: f64::NEG_INFINITY,
            tolx: 1e-12,
            tolfun: 1e-12,
            workers: 1,
            seed: None,
        }
    }
}

impl CmaesOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the population size.
    pub fn popsize(mut self, v: usize) -> Self {
        self.popsize = Some(v);
        self
    }
    /// Sets a scalar initial step size.
    pub fn input_sigma(mut self, v: f64) -> Self {
        self.input_sigma = Some(InputSigma::Scalar(v));
        self
    }
    /// Sets a per-coordinate initial step size.
    pub fn input_sigma_vec(mut self, v: Array1<f64>) -> Self {
        self.input_sigma = Some(InputSigma::PerCoordinate(v));
        self
    }
    /// Sets the evaluation budget.
    pub fn max_evaluations(mut self, v: usize) -> Self {
        self.max_evaluations = v;
        self
    }
    /// Sets the generation budget.
    pub fn max_iterations(mut self, v: usize) -> Self {
        self.max_iterations = v;
        self
    }
    /// Sets the target fitness.
    pub fn stop_fitness(mut self, v: f64) -> Self {
        self.stop_fitness = v;
        self
    }
    /// Sets the coordinate-deviation tolerance.
    pub fn tolx(mut self, v: f64) -> Self {
        self.tolx = v;
        self
    }
    /// Sets the fitness-history tolerance.
    pub fn tolfun(mut self, v: f64) -> Self {
        self.tolfun = v;
        self
    }
    /// Sets the evaluation worker count.
    pub fn workers(mut self, v: usize) -> Self {
        self.workers = v;
        self
    }
    /// Sets the random seed.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = Some(v);
        self
    }
}

impl std::fmt::Debug for Cmaes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cmaes")
            .field("n", &self.n)
            .field("lambda", &self.lambda)
            .field("mu", &self.mu)
            .field("generation", &self.generation)
            .field("evaluations", &self.evaluations)
            .field("best_f", &self.best_f)
            .finish_non_exhaustive()
    }
}

/// Ask/tell CMA-ES state.
pub struct Cmaes<'a> {
    problem: &'a Problem<'a>,
    n: usize,
    lambda: usize,
    mu: usize,
    weights: Array1<f64>,
    mu_eff: f64,
    c_c: f64,
    c_sigma: f64,
    c_1: f64,
    c_mu: f64,
    d_sigma: f64,
    chi_n: f64,
    max_evaluations: usize,
    max_iterations: usize,
    stop_fitness: f64,
    tolx: f64,
    tolfun: f64,
    rng: StdRng,

    mean: Array1<f64>,
    sigma: f64,
    c: Array2<f64>,
    b: Array2<f64>,
    d: Array1<f64>,
    p_sigma: Array1<f64>,
    p_c: Array1<f64>,

    eigen_interval: usize,
    last_eigen_gen: usize,
    last_reset_gen: Option<usize>,

    generation: usize,
    evaluations: usize,
    best_x: Array1<f64>,
    best_f: f64,
    history: VecDeque<f64>,
    history_cap: usize,

    pending_z: Vec<Array1<f64>>,
    pending_x: Vec<Array1<f64>>,
    status: Status,
}

impl<'a> Cmaes<'a> {
    /// Builds the optimizer state over `problem`.
    ///
    /// `x0` (clipped into the box) defaults to a uniform sample; `sigma0`
    /// overrides `opts.input_sigma`.
    ///
    /// # Errors
    ///
    /// Configuration errors (popsize below 5, dimension mismatches,
    /// non-positive sigma) are rejected before any evaluation.
    pub fn new(
        problem: &'a Problem<'a>,
        x0: Option<&Array1<f64>>,
        sigma0: Option<&Array1<f64>>,
        opts: &CmaesOptions,
    ) -> Result<Self> {
        let n = problem.dim();
        let bounds = problem.bounds();

        let lambda = match opts.popsize {
            Some(l) if l < 5 => {
                return Err(OptError::PopulationTooSmall {
                    popsize: l,
                    min: 5,
                })
            }
            Some(l) => l,
            None => ((4.0 + (3.0 * (n as f64).ln()).floor()) as usize).max(5),
        };
        let mu = lambda / 2;

        // log-linear recombination weights over the mu best
        let mut weights = Array1::from_shape_fn(mu, |i| {
            ((mu as f64) + 1.0).ln() - ((i + 1) as f64).ln()
        });
        let wsum: f64 = weights.sum();
        weights.mapv_inplace(|w| w / wsum);
        let mu_eff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let nf = n as f64;
        let c_sigma = (mu_eff + 2.0) / (nf + mu_eff + 5.0);
        let c_c = (4.0 + mu_eff / nf) / (nf + 4.0 + 2.0 * mu_eff / nf);
        let c_1 = 2.0 / ((nf + 1.3).powi(2) + mu_eff);
        let c_mu = (2.0 * (mu_eff - 2.0 + 1.0 / mu_eff) / ((nf + 2.0).powi(2) + mu_eff))
            .min(1.0 - c_1);
        let d_sigma =
            1.0 + 2.0 * (((mu_eff - 1.0) / (nf + 1.0)).sqrt() - 1.0).max(0.0) + c_sigma;
        let chi_n = nf.sqrt() * (1.0 - 1.0 / (4.0 * nf) + 1.0 / (21.0 * nf * nf));

        let mut rng = match opts.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => {
                let mut thread_rng = rand::rng();
                StdRng::from_rng(&mut thread_rng)
            }
        };

        let mean = match x0 {
            Some(g) => {
                if g.len() != n {
                    return Err(OptError::GuessDimensionMismatch {
                        expected: n,
                        got: g.len(),
                    });
                }
                let mut m = g.clone();
                bounds.clip(&mut m);
                m
            }
            None => bounds.sample_uniform(&mut rng),
        };

        let sigma_vec = resolve_sigma(n, bounds, sigma0, opts.input_sigma.as_ref())?;
        let sigma = sigma_vec.iter().cloned().fold(f64::MIN, f64::max);
        // per-coordinate scaling folded into the initial covariance
        let ratios = sigma_vec.mapv(|s| s / sigma);
        let mut c = Array2::zeros((n, n));
        for i in 0..n {
            c[[i, i]] = ratios[i] * ratios[i];
        }

        Ok(Self {
            problem,
            n,
            lambda,
            mu,
            weights,
            mu_eff,
            c_c,
            c_sigma,
            c_1,
            c_mu,
            d_sigma,
            chi_n,
            max_evaluations: opts.max_evaluations,
            max_iterations: opts.max_iterations,
            stop_fitness: opts.stop_fitness,
            tolx: opts.tolx,
            tolfun: opts.tolfun,
            rng,
            mean: mean.clone(),
            sigma,
            c,
            b: Array2::eye(n),
            d: ratios,
            p_sigma: Array1::zeros(n),
            p_c: Array1::zeros(n),
            eigen_interval: (n / 10).max(1),
            last_eigen_gen: 0,
            last_reset_gen: None,
            generation: 0,
            evaluations: 0,
            best_x: mean,
            best_f: f64::INFINITY,
            history: VecDeque::new(),
            history_cap: 10 + (30 * n).div_ceil(lambda),
            pending_z: Vec::new(),
            pending_x: Vec::new(),
            status: Status::Continue,
        })
    }

    /// Samples the next population, repaired into the feasible box.
    ///
    /// Repair applies to the returned points only; the underlying Gaussian
    /// draws are kept for the path updates in [`tell`](Self::tell).
    pub fn ask(&mut self) -> Vec<Array1<f64>> {
        self.pending_z.clear();
        self.pending_x.clear();
        for _ in 0..self.lambda {
            let z = Array1::from_shape_fn(self.n, |_| self.rng.sample::<f64, _>(StandardNormal));
            let y = self.b.dot(&(&self.d * &z));
            let mut x = &self.mean + &(y * self.sigma);
            self.problem.bounds().reflect(&mut x);
            self.pending_z.push(z);
            self.pending_x.push(x);
        }
        self.pending_x.clone()
    }

    /// Consumes the objective values for the last asked population and
    /// advances the state by one generation.
    ///
    /// # Errors
    ///
    /// `AskTellMismatch` when `values` does not match the pending batch.
    pub fn tell(&mut self, values: &[f64]) -> Result<Status> {
        if values.len() != self.pending_x.len() || self.pending_x.is_empty() {
            return Err(OptError::AskTellMismatch {
                expected: self.pending_x.len(),
                got: values.len(),
            });
        }
        self.evaluations += values.len();

        let vals: Vec<f64> = values
            .iter()
            .map(|v| if v.is_finite() { *v } else { f64::INFINITY })
            .collect();

        let (best_idx, gen_best) = argmin(&vals);
        if gen_best < self.best_f {
            self.best_f = gen_best;
            self.best_x = self.pending_x[best_idx].clone();
        }
        if !gen_best.is_finite() {
            self.pending_z.clear();
            self.pending_x.clear();
            self.generation += 1;
            self.status = Status::StopFitnessInvalid;
            return Ok(self.status);
        }

        let mut order: Vec<usize> = (0..vals.len()).collect();
        order.sort_by(|&a, &b| {
            vals[a]
                .partial_cmp(&vals[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // weighted recombination in z-space; y_w = B D z_w by linearity
        let mut z_w = Array1::zeros(self.n);
        for (k, &idx) in order[..self.mu].iter().enumerate() {
            z_w.scaled_add(self.weights[k], &self.pending_z[idx]);
        }
        let y_w = self.b.dot(&(&self.d * &z_w));
        self.mean.scaled_add(self.sigma, &y_w);

        // step-size path; B z_w equals C^(-1/2) y_w
        let bz_w = self.b.dot(&z_w);
        let cs_norm = (self.c_sigma * (2.0 - self.c_sigma) * self.mu_eff).sqrt();
        self.p_sigma.mapv_inplace(|v| v * (1.0 - self.c_sigma));
        self.p_sigma.scaled_add(cs_norm, &bz_w);
        let ps_norm = self.p_sigma.dot(&self.p_sigma).sqrt();

        let denom = (1.0
            - (1.0 - self.c_sigma).powi(2 * (self.generation as i32 + 1)))
        .sqrt();
        let h_sigma = if ps_norm / denom / self.chi_n < 1.4 + 2.0 / (self.n as f64 + 1.0) {
            1.0
        } else {
            0.0
        };

        // covariance path
        let cc_norm = (self.c_c * (2.0 - self.c_c) * self.mu_eff).sqrt();
        self.p_c.mapv_inplace(|v| v * (1.0 - self.c_c));
        self.p_c.scaled_add(h_sigma * cc_norm, &y_w);

        // rank-one + rank-mu covariance update
        let selected_y: Vec<Array1<f64>> = order[..self.mu]
            .iter()
            .map(|&idx| self.b.dot(&(&self.d * &self.pending_z[idx])))
            .collect();
        let delta_h = (1.0 - h_sigma) * self.c_c * (2.0 - self.c_c);
        let decay = 1.0 - self.c_1 - self.c_mu + self.c_1 * delta_h;
        for i in 0..self.n {
            for j in 0..=i {
                let mut v = decay * self.c[[i, j]] + self.c_1 * self.p_c[i] * self.p_c[j];
                for (k, y) in selected_y.iter().enumerate() {
                    v += self.c_mu * self.weights[k] * y[i] * y[j];
                }
                self.c[[i, j]] = v;
                self.c[[j, i]] = v;
            }
        }
        // keep C numerically symmetric
        let ct = self.c.t().to_owned();
        self.c = (&self.c + &ct) * 0.5;

        self.sigma *= ((self.c_sigma / self.d_sigma) * (ps_norm / self.chi_n - 1.0)).exp();

        self.generation += 1;
        self.pending_z.clear();
        self.pending_x.clear();

        if self.generation - self.last_eigen_gen >= self.eigen_interval
            && !self.update_eigensystem()
        {
            self.status = Status::StopCondition;
            return Ok(self.status);
        }

        self.status = self.check_stop(gen_best);
        Ok(self.status)
    }

    /// Recomputes `(B, D)`; returns `false` when degeneracy recurred within
    /// the reset window and the run must stop.
    fn update_eigensystem(&mut self) -> bool {
        let decomposed = symmetric_eigen(&self.c)
            .filter(|(_, d)| d.iter().all(|&v| v.is_finite() && v > 0.0));
        match decomposed {
            Some((b, d2)) => {
                self.b = b;
                self.d = d2.mapv(f64::sqrt);
                self.last_eigen_gen = self.generation;
                true
            }
            None => {
                log::debug!(
                    "covariance degenerate at generation {}, resetting",
                    self.generation
                );
                if let Some(last) = self.last_reset_gen {
                    if self.generation - last <= RESET_WINDOW {
                        return false;
                    }
                }
                self.last_reset_gen = Some(self.generation);
                self.c = Array2::eye(self.n);
                self.b = Array2::eye(self.n);
                self.d = Array1::ones(self.n);
                self.p_sigma = Array1::zeros(self.n);
                self.p_c = Array1::zeros(self.n);
                self.last_eigen_gen = self.generation;
                true
            }
        }
    }

    fn check_stop(&mut self, gen_best: f64) -> Status {
        if self.best_f <= self.stop_fitness {
            return Status::StopFitness;
        }

        if !self.sigma.is_finite() || self.sigma <= 0.0 {
            return Status::StopCondition;
        }
        let d_max = self.d.iter().cloned().fold(f64::MIN, f64::max);
        let d_min = self.d.iter().cloned().fold(f64::MAX, f64::min);
        if (d_max / d_min.max(1e-300)).powi(2) > CONDITION_LIMIT {
            return Status::StopCondition;
        }

        self.history.push_back(gen_best);
        if self.history.len() > self.history_cap {
            self.history.pop_front();
        }
        if self.history.len() == self.history_cap {
            let mean = self.history.iter().sum::<f64>() / self.history.len() as f64;
            let var = self
                .history
                .iter()
                .map(|v| (v - mean) * (v - mean))
                .sum::<f64>()
                / self.history.len() as f64;
            if var.sqrt() < self.tolfun {
                return Status::StopTolFun;
            }
        }

        if (0..self.n).all(|i| self.sigma * self.c[[i, i]].max(0.0).sqrt() < self.tolx) {
            return Status::StopTolX;
        }

        if self.generation >= self.max_iterations || self.evaluations >= self.max_evaluations {
            return Status::StopMaxIter;
        }
        Status::Continue
    }

    /// Marks the run cancelled (used by drivers on cooperative cancellation).
    pub fn cancel(&mut self) {
        self.status = Status::Cancelled;
    }

    /// Current generation count.
    pub fn generation(&self) -> usize {
        self.generation
    }

    /// Evaluations consumed so far by this run.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Current step size.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Current distribution mean.
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Current covariance matrix.
    pub fn covariance(&self) -> &Array2<f64> {
        &self.c
    }

    /// Square roots of the cached eigenvalues of `C`.
    pub fn axis_lengths(&self) -> &Array1<f64> {
        &self.d
    }

    /// Per-coordinate standard deviation of the search distribution.
    pub fn dispersion(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.n, |i| self.sigma * self.c[[i, i]].max(0.0).sqrt())
    }

    /// Best candidate seen so far.
    pub fn best(&self) -> (&Array1<f64>, f64) {
        (&self.best_x, self.best_f)
    }

    fn into_result(self) -> RunResult {
        let dispersion = Some(self.dispersion());
        RunResult {
            x: self.best_x,
            fun: self.best_f,
            nfev: self.evaluations,
            nit: self.generation,
            status: self.status,
            dispersion,
        }
    }
}

fn resolve_sigma(
    n: usize,
    bounds: &Bounds,
    sigma0: Option<&Array1<f64>>,
    input_sigma: Option<&InputSigma>,
) -> Result<Array1<f64>> {
    let v = match (sigma0, input_sigma) {
        (Some(s), _) => s.clone(),
        (None, Some(InputSigma::Scalar(s))) => Array1::from_elem(n, *s),
        (None, Some(InputSigma::PerCoordinate(s))) => s.clone(),
        (None, None) => bounds.default_sigma(),
    };
    if v.len() != n {
        return Err(OptError::SigmaDimensionMismatch {
            expected: n,
            got: v.len(),
        });
    }
    for &s in v.iter() {
        if !(s > 0.0) || !s.is_finite() {
            return Err(OptError::NonPositiveSigma { sigma: s });
        }
    }
    Ok(v)
}

/// Minimizes `fun` over `bounds` with a fresh problem wrapper.
pub fn minimize<F>(fun: &F, bounds: Bounds, opts: CmaesOptions) -> Result<RunResult>
where
    F: Fn(&Array1<f64>) -> f64 + Send + Sync,
{
    let problem = Problem::new(fun, bounds);
    minimize_problem(&problem, None, None, &opts)
}

/// Minimizes an existing [`Problem`], optionally from a given start point and
/// step size. This is the entry the retry engines use.
pub fn minimize_problem(
    problem: &Problem<'_>,
    x0: Option<&Array1<f64>>,
    sigma0: Option<&Array1<f64>>,
    opts: &CmaesOptions,
) -> Result<RunResult> {
    if opts.max_evaluations == 0 {
        return Ok(evaluate_start_point(problem, x0));
    }
    let mut es = Cmaes::new(problem, x0, sigma0, opts)?;
    let evaluator = BatchEvaluator::new(ParallelConfig::from_workers(opts.workers));
    loop {
        if problem.is_cancelled() || problem.timed_out() {
            es.cancel();
            break;
        }
        let xs = es.ask();
        let values = evaluator.evaluate(problem, &xs);
        if es.tell(&values)?.is_terminal() {
            break;
        }
    }
    Ok(es.into_result())
}

/// Zero-budget run: evaluate the start point (or the box center) exactly once.
pub(crate) fn evaluate_start_point(problem: &Problem<'_>, x0: Option<&Array1<f64>>) -> RunResult {
    let mut x = x0
        .cloned()
        .unwrap_or_else(|| problem.bounds().center());
    problem.bounds().clip(&mut x);
    let fun = problem.eval(&x);
    RunResult {
        x,
        fun,
        nfev: 1,
        nit: 0,
        status: Status::StopMaxIter,
        dispersion: None,
    }
}

/// [`Optimizer`] adapter around [`minimize_problem`].
#[derive(Debug, Clone)]
pub struct CmaesOptimizer {
    /// Template options; per-run budget and seed override these.
    pub opts: CmaesOptions,
}

impl CmaesOptimizer {
    /// Adapter with the given template options.
    pub fn new(opts: CmaesOptions) -> Self {
        Self { opts }
    }

    /// Adapter with default options and the given budget.
    pub fn with_budget(max_evaluations: usize) -> Self {
        Self {
            opts: CmaesOptions::new().max_evaluations(max_evaluations),
        }
    }
}

impl Optimizer for CmaesOptimizer {
    fn name(&self) -> String {
        "cmaes".into()
    }

    fn max_evaluations(&self) -> usize {
        self.opts.max_evaluations
    }

    fn minimize_run(
        &self,
        problem: &Problem<'_>,
        x0: Option<&Array1<f64>>,
        sigma0: Option<&Array1<f64>>,
        max_evals: usize,
        seed: u64,
    ) -> RunResult {
        let mut opts = self.opts.clone();
        opts.max_evaluations = max_evals;
        opts.seed = Some(seed);
        match minimize_problem(problem, x0, sigma0, &opts) {
            Ok(result) => result,
            Err(err) => {
                log::debug!("cmaes run rejected: {err}");
                RunResult::failed(problem.dim(), Status::StopCondition)
            }
        }
    }
}

//! Differential evolution, DE/current-to-pbest/1/bin.
//!
//! Two deviations from textbook DE, both aimed at cheap extra progress per
//! generation:
//!
//! - **temporal locality**: when a trial improves on its parent, a second
//!   trial is taken further along the same improvement direction and the
//!   better of the two replaces the parent;
//! - **age-based reinitialization**: individuals that keep failing to improve
//!   are resampled uniformly with probability `age / age_max`.
//!
//! The ask/tell surface is batch-oriented: a main batch of one trial per
//! individual, then (when improvements or reinitializations are queued) a
//! smaller follow-up batch before the generation closes.

use std::collections::{HashSet, VecDeque};

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cmaes::evaluate_start_point;
use crate::error::{OptError, Result};
use crate::parallel::{BatchEvaluator, ParallelConfig};
use crate::problem::Problem;
use crate::{Optimizer, RunResult, Status};

/// Configuration for a differential evolution run.
#[derive(Debug, Clone)]
pub struct DeOptions {
    /// Population size; default `max(5 n, 40)`.
    pub popsize: Option<usize>,
    /// Fraction of the population eligible as `pbest`; default 0.3.
    pub pbest_fraction: f64,
    /// Age at which reinitialization becomes certain; default `popsize`.
    pub age_max: Option<usize>,
    /// Evaluation budget for the run.
    pub max_evaluations: usize,
    /// Generation budget for the run.
    pub max_iterations: usize,
    /// Terminate once the best fitness reaches this value.
    pub stop_fitness: f64,
    /// Terminate when the recent best-fitness history flattens below this.
    pub tolfun: f64,
    /// Terminate when all population coordinate deviations fall below this.
    pub tolx: f64,
    /// Threads for batch evaluation; 1 evaluates sequentially.
    pub workers: usize,
    /// Random seed; `None` draws one from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for DeOptions {
    fn default() -> Self {
        Self {
            popsize: None,
            pbest_fraction: 0.3,
            age_max: None,
            max_evaluations: 50_000,
            max_iterations: 1_000_000,
            stop_fitness: f64::NEG_INFINITY,
            tolfun: 1e-12,
            tolx: 1e-12,
            workers: 1,
            seed: None,
        }
    }
}

impl DeOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the population size.
    pub fn popsize(mut self, v: usize) -> Self {
        self.popsize = Some(v);
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
    /// Sets the age ceiling for reinitialization.
    pub fn age_max(mut self, v: usize) -> Self {
        self.age_max = Some(v);
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

enum Pending {
    /// Initial population member at this slot.
    Init { slot: usize },
    /// Main-phase trial against this parent.
    Trial { parent: usize },
    /// Amplified second trial; carries the winning first trial.
    Followup {
        parent: usize,
        first_x: Array1<f64>,
        first_f: f64,
    },
    /// Uniform resample of an aged-out individual.
    Reinit { parent: usize },
}

/// Ask/tell differential evolution state.
pub struct De<'a> {
    problem: &'a Problem<'a>,
    n: usize,
    popsize: usize,
    pbest_pool: usize,
    age_max: usize,
    max_evaluations: usize,
    max_iterations: usize,
    stop_fitness: f64,
    tolfun: f64,
    tolx: f64,
    rng: StdRng,

    pop: Vec<Array1<f64>>,
    fitness: Vec<f64>,
    ages: Vec<usize>,

    generation: usize,
    evaluations: usize,
    best_x: Array1<f64>,
    best_f: f64,
    history: VecDeque<f64>,
    history_cap: usize,

    pending: Vec<Pending>,
    pending_x: Vec<Array1<f64>>,
    initialized: bool,
    x0: Option<Array1<f64>>,
    status: Status,
}

impl<'a> De<'a> {
    /// Builds the optimizer state over `problem`. An `x0` guess, when given,
    /// replaces one member of the initial population.
    ///
    /// # Errors
    ///
    /// `PopulationTooSmall` for popsize below 5, `GuessDimensionMismatch`
    /// when `x0` has the wrong length.
    pub fn new(
        problem: &'a Problem<'a>,
        x0: Option<&Array1<f64>>,
        opts: &DeOptions,
    ) -> Result<Self> {
        let n = problem.dim();
        let popsize = match opts.popsize {
            Some(p) if p < 5 => {
                return Err(OptError::PopulationTooSmall { popsize: p, min: 5 })
            }
            Some(p) => p,
            None => (5 * n).max(40),
        };
        if let Some(g) = x0 {
            if g.len() != n {
                return Err(OptError::GuessDimensionMismatch {
                    expected: n,
                    got: g.len(),
                });
            }
        }

        let rng = match opts.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => {
                let mut thread_rng = rand::rng();
                StdRng::from_rng(&mut thread_rng)
            }
        };

        let x0 = x0.map(|g| {
            let mut g = g.clone();
            problem.bounds().clip(&mut g);
            g
        });

        Ok(Self {
            problem,
            n,
            popsize,
            pbest_pool: ((opts.pbest_fraction * popsize as f64).ceil() as usize)
                .clamp(1, popsize),
            age_max: opts.age_max.unwrap_or(popsize).max(1),
            max_evaluations: opts.max_evaluations,
            max_iterations: opts.max_iterations,
            stop_fitness: opts.stop_fitness,
            tolfun: opts.tolfun,
            tolx: opts.tolx,
            rng,
            pop: Vec::new(),
            fitness: Vec::new(),
            ages: Vec::new(),
            generation: 0,
            evaluations: 0,
            best_x: problem.bounds().center(),
            best_f: f64::INFINITY,
            history: VecDeque::new(),
            history_cap: 10 + (30 * n).div_ceil(popsize),
            pending: Vec::new(),
            pending_x: Vec::new(),
            initialized: false,
            x0,
            status: Status::Continue,
        })
    }

    /// Returns the next batch to evaluate: the initial population, a main
    /// trial batch, or a follow-up batch, depending on phase.
    pub fn ask(&mut self) -> Vec<Array1<f64>> {
        if !self.pending.is_empty() {
            // follow-up batch queued by the previous tell
            return self.pending_x.clone();
        }
        self.pending_x.clear();
        if !self.initialized {
            for slot in 0..self.popsize {
                let x = match (&self.x0, slot) {
                    (Some(g), 0) => g.clone(),
                    _ => self.problem.bounds().sample_uniform(&mut self.rng),
                };
                self.pending.push(Pending::Init { slot });
                self.pending_x.push(x);
            }
        } else {
            let sorted = self.sorted_indices();
            for parent in 0..self.popsize {
                let x = self.build_trial(parent, &sorted);
                self.pending.push(Pending::Trial { parent });
                self.pending_x.push(x);
            }
        }
        self.pending_x.clone()
    }

    /// Consumes objective values for the last asked batch.
    ///
    /// # Errors
    ///
    /// `AskTellMismatch` when `values` does not match the pending batch.
    pub fn tell(&mut self, values: &[f64]) -> Result<Status> {
        if values.len() != self.pending.len() || self.pending.is_empty() {
            return Err(OptError::AskTellMismatch {
                expected: self.pending.len(),
                got: values.len(),
            });
        }
        self.evaluations += values.len();

        let vals: Vec<f64> = values
            .iter()
            .map(|v| if v.is_finite() { *v } else { f64::INFINITY })
            .collect();
        for (x, &f) in self.pending_x.iter().zip(vals.iter()) {
            if f < self.best_f {
                self.best_f = f;
                self.best_x = x.clone();
            }
        }

        let main_phase = matches!(
            self.pending.first(),
            Some(Pending::Init { .. } | Pending::Trial { .. })
        );
        if main_phase && vals.iter().all(|v| !v.is_finite()) {
            self.clear_pending();
            self.status = Status::StopFitnessInvalid;
            return Ok(self.status);
        }

        let pending = std::mem::take(&mut self.pending);
        let pending_x = std::mem::take(&mut self.pending_x);
        let mut followups: Vec<(Pending, Array1<f64>)> = Vec::new();

        for ((entry, x), &f) in pending.into_iter().zip(pending_x).zip(vals.iter()) {
            match entry {
                Pending::Init { slot } => {
                    debug_assert_eq!(slot, self.pop.len());
                    self.pop.push(x);
                    self.fitness.push(f);
                    self.ages.push(0);
                }
                Pending::Trial { parent } => {
                    if f < self.fitness[parent] {
                        // improvement: amplify along the same direction
                        let second = self.amplified_trial(parent, &x);
                        followups.push((
                            Pending::Followup {
                                parent,
                                first_x: x,
                                first_f: f,
                            },
                            second,
                        ));
                    } else {
                        self.ages[parent] += 1;
                        let p = self.ages[parent] as f64 / self.age_max as f64;
                        if self.rng.random::<f64>() < p {
                            let fresh = self.problem.bounds().sample_uniform(&mut self.rng);
                            followups.push((Pending::Reinit { parent }, fresh));
                        }
                    }
                }
                Pending::Followup {
                    parent,
                    first_x,
                    first_f,
                } => {
                    if f < first_f {
                        self.pop[parent] = x;
                        self.fitness[parent] = f;
                    } else {
                        self.pop[parent] = first_x;
                        self.fitness[parent] = first_f;
                    }
                    self.ages[parent] = 0;
                }
                Pending::Reinit { parent } => {
                    self.pop[parent] = x;
                    self.fitness[parent] = f;
                    self.ages[parent] = 0;
                }
            }
        }
        self.initialized = true;

        if !followups.is_empty() {
            for (entry, x) in followups {
                self.pending.push(entry);
                self.pending_x.push(x);
            }
            // generation closes after the follow-up batch
            self.status = Status::Continue;
            return Ok(self.status);
        }

        self.generation += 1;
        let gen_best = self
            .fitness
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        self.status = self.check_stop(gen_best);
        Ok(self.status)
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
        self.pending_x.clear();
    }

    fn sorted_indices(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.popsize).collect();
        idx.sort_by(|&a, &b| {
            self.fitness[a]
                .partial_cmp(&self.fitness[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        idx
    }

    fn build_trial(&mut self, i: usize, sorted: &[usize]) -> Array1<f64> {
        let f = 0.5 + 0.5 * self.rng.random::<f64>();
        let cr = 0.1 + 0.8 * self.rng.random::<f64>();

        let pbest = sorted[self.rng.random_range(0..self.pbest_pool)];
        let others = distinct_indices(i, 2, self.popsize, &mut self.rng);
        let (r1, r2) = (others[0], others[1]);

        let current = &self.pop[i];
        let mutant = Array1::from_shape_fn(self.n, |j| {
            current[j]
                + f * (self.pop[pbest][j] - current[j])
                + f * (self.pop[r1][j] - self.pop[r2][j])
        });

        // binomial crossover with a guaranteed inherited coordinate
        let jrand = self.rng.random_range(0..self.n);
        let mut trial = current.clone();
        for j in 0..self.n {
            if j == jrand || self.rng.random::<f64>() < cr {
                trial[j] = mutant[j];
            }
        }
        self.resample_out_of_bounds(&mut trial);
        trial
    }

    fn amplified_trial(&mut self, parent: usize, first: &Array1<f64>) -> Array1<f64> {
        let alpha = 1.0 + 0.5 * self.rng.random::<f64>();
        let current = &self.pop[parent];
        let mut second =
            Array1::from_shape_fn(self.n, |j| current[j] + alpha * (first[j] - current[j]));
        self.resample_out_of_bounds(&mut second);
        second
    }

    fn resample_out_of_bounds(&mut self, x: &mut Array1<f64>) {
        let lower = self.problem.bounds().lower();
        let upper = self.problem.bounds().upper();
        for j in 0..self.n {
            if x[j] < lower[j] || x[j] > upper[j] {
                x[j] = lower[j] + self.rng.random::<f64>() * (upper[j] - lower[j]);
            }
        }
    }

    fn check_stop(&mut self, gen_best: f64) -> Status {
        if self.best_f <= self.stop_fitness {
            return Status::StopFitness;
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

        if (0..self.n).all(|j| self.coordinate_std(j) < self.tolx) {
            return Status::StopTolX;
        }

        if self.generation >= self.max_iterations || self.evaluations >= self.max_evaluations {
            return Status::StopMaxIter;
        }
        Status::Continue
    }

    fn coordinate_std(&self, j: usize) -> f64 {
        let mean = self.pop.iter().map(|x| x[j]).sum::<f64>() / self.popsize as f64;
        let var = self
            .pop
            .iter()
            .map(|x| (x[j] - mean) * (x[j] - mean))
            .sum::<f64>()
            / self.popsize as f64;
        var.sqrt()
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

    /// Best candidate seen so far.
    pub fn best(&self) -> (&Array1<f64>, f64) {
        (&self.best_x, self.best_f)
    }

    /// Per-coordinate standard deviation of the current population.
    pub fn dispersion(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.n, |j| self.coordinate_std(j))
    }

    fn into_result(self) -> RunResult {
        let dispersion = if self.pop.is_empty() {
            None
        } else {
            Some(self.dispersion())
        };
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

fn distinct_indices<R: Rng + ?Sized>(
    exclude: usize,
    count: usize,
    pool_size: usize,
    rng: &mut R,
) -> Vec<usize> {
    debug_assert!(count <= pool_size.saturating_sub(1));
    let mut selected: HashSet<usize> = HashSet::with_capacity(count);
    let mut picked = Vec::with_capacity(count);
    while picked.len() < count {
        let idx = rng.random_range(0..pool_size);
        if idx != exclude && selected.insert(idx) {
            picked.push(idx);
        }
    }
    picked
}

/// Minimizes `fun` over `bounds` with a fresh problem wrapper.
pub fn minimize<F>(fun: &F, bounds: crate::Bounds, opts: DeOptions) -> Result<RunResult>
where
    F: Fn(&Array1<f64>) -> f64 + Send + Sync,
{
    let problem = Problem::new(fun, bounds);
    minimize_problem(&problem, None, &opts)
}

/// Minimizes an existing [`Problem`], optionally seeding the population with
/// a start point.
pub fn minimize_problem(
    problem: &Problem<'_>,
    x0: Option<&Array1<f64>>,
    opts: &DeOptions,
) -> Result<RunResult> {
    if opts.max_evaluations == 0 {
        return Ok(evaluate_start_point(problem, x0));
    }
    let mut de = De::new(problem, x0, opts)?;
    let evaluator = BatchEvaluator::new(ParallelConfig::from_workers(opts.workers));
    loop {
        if problem.is_cancelled() || problem.timed_out() {
            de.cancel();
            break;
        }
        let xs = de.ask();
        let values = evaluator.evaluate(problem, &xs);
        if de.tell(&values)?.is_terminal() {
            break;
        }
    }
    Ok(de.into_result())
}

/// [`Optimizer`] adapter around [`minimize_problem`].
#[derive(Debug, Clone)]
pub struct DeOptimizer {
    /// Template options; per-run budget and seed override these.
    pub opts: DeOptions,
}

impl DeOptimizer {
    /// Adapter with the given template options.
    pub fn new(opts: DeOptions) -> Self {
        Self { opts }
    }

    /// Adapter with default options and the given budget.
    pub fn with_budget(max_evaluations: usize) -> Self {
        Self {
            opts: DeOptions::new().max_evaluations(max_evaluations),
        }
    }
}

impl Optimizer for DeOptimizer {
    fn name(&self) -> String {
        "de".into()
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
        let mut opts = self.opts.clone();
        opts.max_evaluations = max_evals;
        opts.seed = Some(seed);
        match minimize_problem(problem, x0, &opts) {
            Ok(result) => result,
            Err(err) => {
                log::debug!("de run rejected: {err}");
                RunResult::failed(problem.dim(), Status::StopCondition)
            }
        }
    }
}

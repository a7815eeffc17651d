//! Parallel batch evaluation of candidate points.

use ndarray::Array1;
use rayon::prelude::*;

use crate::problem::Problem;

/// Parallel evaluation configuration for a single optimizer run.
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Enable parallel evaluation
    pub enabled: bool,
    /// Number of threads to use (None = use rayon default)
    pub num_threads: Option<usize>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            num_threads: None,
        }
    }
}

impl ParallelConfig {
    /// Maps a caller-facing `workers` count onto a configuration:
    /// `workers <= 1` evaluates sequentially.
    pub fn from_workers(workers: usize) -> Self {
        Self {
            enabled: workers > 1,
            num_threads: if workers > 1 { Some(workers) } else { None },
        }
    }
}

/// Evaluates candidate batches for one optimizer run.
///
/// When a thread count is pinned, a dedicated pool of that size is built
/// once per run and every batch runs on it; otherwise batches run on the
/// global rayon pool.
pub struct BatchEvaluator {
    config: ParallelConfig,
    pool: Option<rayon::ThreadPool>,
}

impl BatchEvaluator {
    /// Builds the evaluator, creating the pinned-size pool up front.
    pub fn new(config: ParallelConfig) -> Self {
        let pool = match (config.enabled, config.num_threads) {
            (true, Some(n)) => match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                Ok(pool) => Some(pool),
                Err(err) => {
                    log::debug!("falling back to the global rayon pool: {err}");
                    None
                }
            },
            _ => None,
        };
        Self { config, pool }
    }

    /// Evaluates a batch of points, preserving submission order in the
    /// returned values (the caller's tell phase relies on positional
    /// correspondence).
    pub fn evaluate(&self, problem: &Problem<'_>, points: &[Array1<f64>]) -> Vec<f64> {
        if !self.config.enabled || points.len() < 4 {
            // Sequential evaluation for small batches or when disabled
            return points.iter().map(|x| problem.eval(x)).collect();
        }

        // Indexed parallel map; rayon's collect keeps input order
        match &self.pool {
            Some(pool) => pool.install(|| points.par_iter().map(|x| problem.eval(x)).collect()),
            None => points.par_iter().map(|x| problem.eval(x)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Bounds;
    use ndarray::Array1;

    #[test]
    fn test_batch_order_is_preserved() {
        let first = |x: &Array1<f64>| x[0];
        let problem = Problem::new(&first, Bounds::symmetric(100.0, 1).unwrap());
        let points: Vec<Array1<f64>> = (0..32).map(|i| Array1::from_elem(1, i as f64)).collect();

        let evaluator = BatchEvaluator::new(ParallelConfig::from_workers(4));
        let values = evaluator.evaluate(&problem, &points);

        assert_eq!(values.len(), 32);
        for (i, v) in values.iter().enumerate() {
            assert_eq!(*v, i as f64);
        }
        assert_eq!(problem.eval_count(), 32);
    }

    #[test]
    fn test_pinned_pool_is_built_and_used() {
        let thread_count = |_x: &Array1<f64>| rayon::current_num_threads() as f64;
        let problem = Problem::new(&thread_count, Bounds::symmetric(1.0, 1).unwrap());
        let points: Vec<Array1<f64>> = (0..8).map(|_| Array1::zeros(1)).collect();

        let evaluator = BatchEvaluator::new(ParallelConfig::from_workers(2));
        assert!(evaluator.pool.is_some());
        let values = evaluator.evaluate(&problem, &points);
        for v in values {
            assert_eq!(v, 2.0);
        }
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let square = |x: &Array1<f64>| x[0] * x[0];
        let problem = Problem::new(&square, Bounds::symmetric(10.0, 1).unwrap());
        let points: Vec<Array1<f64>> = (0..8).map(|i| Array1::from_elem(1, i as f64)).collect();

        let seq = BatchEvaluator::new(ParallelConfig::default()).evaluate(&problem, &points);
        let par = BatchEvaluator::new(ParallelConfig::from_workers(4)).evaluate(&problem, &points);
        assert_eq!(seq, par);
    }
}

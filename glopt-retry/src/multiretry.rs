//! Problem-set filtering: coordinated retry over a list of problem variants.
//!
//! Useful when a family of narrowly-bound integer choices is enumerated into
//! one continuous problem per combination: retry every variant a little,
//! drop the worst-performing fraction, and repeat until a single variant
//! survives. Every variant keeps its own elite store across rounds, so later
//! rounds deepen earlier progress instead of restarting.

use std::sync::{Arc, Mutex};

use glopt_optimizers::{Bounds, Optimizer, Problem};
use ndarray::Array1;

use crate::coordinated::{self, CoordinatedOptions};
use crate::error::{Result, RetryError};
use crate::logging::RetryLogger;
use crate::store::Store;

/// One member of the problem set.
pub struct ProblemVariant {
    /// Diagnostic name, used in log lines.
    pub name: String,
    /// The variant's objective.
    pub fun: Arc<dyn Fn(&Array1<f64>) -> f64 + Send + Sync>,
    /// The variant's feasible box.
    pub bounds: Bounds,
}

impl ProblemVariant {
    /// Builds a variant from a closure.
    pub fn new<F>(name: impl Into<String>, fun: F, bounds: Bounds) -> Self
    where
        F: Fn(&Array1<f64>) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            fun: Arc::new(fun),
            bounds,
        }
    }
}

/// Per-variant outcome of the filtering process.
#[derive(Debug, Clone)]
pub struct VariantResult {
    /// The variant's name.
    pub name: String,
    /// Best objective value reached.
    pub best_f: f64,
    /// Best point reached.
    pub best_x: Array1<f64>,
    /// Coordinated retries spent on this variant.
    pub retries: usize,
    /// Objective evaluations spent on this variant.
    pub evaluations: usize,
}

/// Filters `variants` down to a single survivor: each round runs
/// `opts.num_retries` coordinated retries against every active variant, then
/// drops the worst `1 - keep` fraction (at least one). Returns results for
/// every variant, best first.
///
/// # Errors
///
/// `NoProblems` for an empty set, `InvalidKeepRate` for `keep` outside
/// `(0, 1]`; configuration errors from the coordinated engine propagate.
pub fn filter_problems(
    variants: &[ProblemVariant],
    optimizer: &dyn Optimizer,
    opts: &CoordinatedOptions,
    keep: f64,
    logger: &dyn RetryLogger,
) -> Result<Vec<VariantResult>> {
    if variants.is_empty() {
        return Err(RetryError::NoProblems);
    }
    if !(keep > 0.0 && keep <= 1.0) {
        return Err(RetryError::InvalidKeepRate { rate: keep });
    }

    struct VariantState<'a> {
        problem: Problem<'a>,
        store: Mutex<Store>,
        retries: usize,
        evaluations: usize,
    }

    let mut states: Vec<VariantState<'_>> = Vec::with_capacity(variants.len());
    for v in variants {
        states.push(VariantState {
            problem: Problem::new(v.fun.as_ref(), v.bounds.clone()),
            store: Mutex::new(Store::new(v.bounds.clone(), opts.store.clone())?),
            retries: 0,
            evaluations: 0,
        });
    }

    let best_of = |state: &VariantState<'_>| -> f64 {
        state
            .store
            .lock()
            .unwrap()
            .best()
            .map_or(f64::INFINITY, |(_, f)| f)
    };

    let mut active: Vec<usize> = (0..variants.len()).collect();
    let mut round = 0usize;
    while active.len() > 1 {
        round += 1;
        for &i in &active {
            logger.log(&format!("problem {} round {}", variants[i].name, round));
            let result = coordinated::retry(
                &states[i].problem,
                &states[i].store,
                optimizer,
                opts,
                logger,
            )?;
            states[i].retries += result.retries;
            states[i].evaluations += result.nfev;
        }

        active.sort_by(|&a, &b| {
            best_of(&states[a])
                .partial_cmp(&best_of(&states[b]))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let to_drop = (((1.0 - keep) * active.len() as f64).round() as usize)
            .max(1)
            .min(active.len() - 1);
        active.truncate(active.len() - to_drop);

        for &i in &active {
            logger.log(&format!(
                "{} {:.6e}",
                variants[i].name,
                best_of(&states[i])
            ));
        }
    }

    let mut results: Vec<VariantResult> = variants
        .iter()
        .zip(&states)
        .map(|(v, s)| {
            let store = s.store.lock().unwrap();
            let (best_x, best_f) = match store.best() {
                Some((x, f)) => (x.clone(), f),
                None => (v.bounds.center(), f64::INFINITY),
            };
            VariantResult {
                name: v.name.clone(),
                best_f,
                best_x,
                retries: s.retries,
                evaluations: s.evaluations,
            }
        })
        .collect();
    results.sort_by(|a, b| {
        a.best_f
            .partial_cmp(&b.best_f)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(results)
}

//! End-to-end retry scenarios over the standard benchmark objectives.
//!
//! The full-scale runs are `#[ignore]`d to keep the default suite fast; the
//! quick variants exercise the same paths at reduced budgets.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use glopt_optimizers::{de_cma, Bounds, CmaesOptimizer, Problem};
use glopt_retry::{coordinated, simple, CoordinatedOptions, NullLogger, RetryOptions, Store, StoreConfig};
use glopt_test_functions::{ackley, rastrigin, rosenbrock};
use ndarray::Array1;

#[test]
fn scenario_rosenbrock_sequence_with_simple_retry() {
    let f = rosenbrock;
    let chain = de_cma(10_000);
    let result = simple::minimize(
        &f,
        Bounds::of_pairs(&[(-5.0, 10.0); 5]).unwrap(),
        &chain,
        RetryOptions {
            num_retries: 16,
            workers: 4,
            seed: Some(42),
            ..RetryOptions::default()
        },
        &NullLogger,
    )
    .unwrap();
    assert!(result.fun < 1e-6, "got {}", result.fun);
    assert_eq!(result.retries, 16);
}

#[test]
fn scenario_rastrigin_coordinated_quick() {
    let f = rastrigin;
    let result = coordinated::minimize(
        &f,
        Bounds::symmetric(5.12, 4).unwrap(),
        &de_cma(4000),
        CoordinatedOptions {
            num_retries: 120,
            workers: 4,
            max_evals_init: 500,
            max_evals_cap: 4000,
            seed: Some(77),
            ..CoordinatedOptions::default()
        },
        &NullLogger,
    )
    .unwrap();
    assert!(result.fun < 1.0, "got {}", result.fun);
}

#[test]
fn retry_best_equals_best_observed_evaluation() {
    let observed = Mutex::new(f64::INFINITY);
    let f = |x: &Array1<f64>| {
        let v = rastrigin(x);
        let mut best = observed.lock().unwrap();
        if v < *best {
            *best = v;
        }
        v
    };
    let result = simple::minimize(
        &f,
        Bounds::symmetric(5.12, 3).unwrap(),
        &CmaesOptimizer::with_budget(1000),
        RetryOptions {
            num_retries: 8,
            workers: 2,
            seed: Some(5),
            ..RetryOptions::default()
        },
        &NullLogger,
    )
    .unwrap();
    assert_eq!(result.fun, *observed.lock().unwrap());
}

#[test]
#[ignore = "full-scale scenario, minutes of runtime"]
fn scenario_rastrigin_coordinated_full() {
    let f = rastrigin;
    let result = coordinated::minimize(
        &f,
        Bounds::symmetric(5.12, 10).unwrap(),
        &de_cma(50_000),
        CoordinatedOptions {
            num_retries: 500,
            workers: 8,
            seed: Some(1),
            ..CoordinatedOptions::default()
        },
        &NullLogger,
    )
    .unwrap();
    assert!(result.fun < 1.0, "got {}", result.fun);
}

#[test]
#[ignore = "full-scale scenario, minutes of runtime"]
fn scenario_ackley_coordinated_full() {
    let f = ackley;
    let result = coordinated::minimize(
        &f,
        Bounds::symmetric(32.0, 20).unwrap(),
        &de_cma(50_000),
        CoordinatedOptions {
            num_retries: 1000,
            workers: 8,
            seed: Some(2),
            ..CoordinatedOptions::default()
        },
        &NullLogger,
    )
    .unwrap();
    assert!(result.fun < 1e-3, "got {}", result.fun);
}

#[test]
#[ignore = "full-scale store stress"]
fn scenario_store_invariants_full() {
    let noisy_norm = |x: &Array1<f64>| {
        let base: f64 = x.iter().map(|v| v * v).sum();
        base + 1e-4 * (1e4 * x[0]).sin()
    };
    let bounds = Bounds::symmetric(10.0, 4).unwrap();
    let config = StoreConfig {
        capacity: 200,
        ..StoreConfig::default()
    };
    let store = Mutex::new(Store::new(bounds.clone(), config.clone()).unwrap());
    let problem = Problem::new(&noisy_norm, bounds.clone());
    coordinated::retry(
        &problem,
        &store,
        &CmaesOptimizer::with_budget(500),
        &CoordinatedOptions {
            num_retries: 2000,
            workers: 8,
            max_evals_init: 200,
            max_evals_cap: 500,
            store: config,
            seed: Some(3),
            ..CoordinatedOptions::default()
        },
        &NullLogger,
    )
    .unwrap();

    let store = store.lock().unwrap();
    assert_eq!(store.len(), 200);
    let entries = store.entries();
    let dedup_radius = 0.15 * 2.0; // 0.15 * sqrt(n), n = 4
    let scale = bounds.scale();
    for w in entries.windows(2) {
        assert!(w[0].f <= w[1].f, "store not sorted");
    }
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let dist = entries[i]
                .x
                .iter()
                .zip(entries[j].x.iter())
                .zip(scale.iter())
                .map(|((&a, &b), &s)| ((a - b) / s).powi(2))
                .sum::<f64>()
                .sqrt();
            let tol = 0.05 * entries[i].f.abs().max(1.0);
            assert!(
                dist >= dedup_radius || (entries[i].f - entries[j].f).abs() >= tol,
                "entries {i} and {j} violate deduplication"
            );
        }
    }
}

#[test]
#[ignore = "60 second wall-clock scenario"]
fn scenario_cancellation_returns_within_limit() {
    let f = rastrigin;
    let t0 = Instant::now();
    let result = coordinated::minimize(
        &f,
        Bounds::symmetric(5.12, 50).unwrap(),
        &de_cma(50_000),
        CoordinatedOptions {
            num_retries: 1_000_000,
            workers: 4,
            wall_time: Some(Duration::from_secs(60)),
            seed: Some(4),
            ..CoordinatedOptions::default()
        },
        &NullLogger,
    )
    .unwrap();
    assert!(t0.elapsed() < Duration::from_secs(61));
    assert!(result.fun.is_finite());
}

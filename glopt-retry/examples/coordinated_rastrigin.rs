//! Coordinated retry on the 10-D Rastrigin function.
//!
//! Run with `cargo run --release --example coordinated_rastrigin`.

use glopt_optimizers::{de_cma, Bounds};
use glopt_retry::{coordinated, CoordinatedOptions, FacadeLogger};
use glopt_test_functions::rastrigin;

fn main() {
    env_logger::init();

    let bounds = Bounds::symmetric(5.12, 10).expect("valid bounds");
    let opts = CoordinatedOptions {
        num_retries: 500,
        workers: 8,
        seed: Some(42),
        ..CoordinatedOptions::default()
    };

    let result = coordinated::minimize(&rastrigin, bounds, &de_cma(50_000), opts, &FacadeLogger)
        .expect("valid configuration");

    println!(
        "best f = {:.6e} after {} retries and {} evaluations",
        result.fun, result.retries, result.nfev
    );
    println!("best x = {:?}", result.x.to_vec());
}

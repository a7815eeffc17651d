#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

use ndarray::Array1;
use std::collections::HashMap;

/// Benchmark function modules, one file per function.
pub mod functions;
pub use functions::*;

/// A scalable benchmark objective.
pub type BenchFn = fn(&Array1<f64>) -> f64;

/// Metadata for a benchmark function: default bounds, optimum, modality.
#[derive(Debug, Clone)]
pub struct FunctionMetadata {
    /// Function name
    pub name: &'static str,
    /// The objective itself
    pub function: BenchFn,
    /// Default per-coordinate bounds (lower, upper), identical in every dimension
    pub bounds: (f64, f64),
    /// Global minimum value (for scalable functions, valid in every dimension)
    pub minimum: f64,
    /// Coordinate at which the minimum is attained, replicated per dimension
    pub minimum_coordinate: f64,
    /// Whether the function has more than one local minimum
    pub multimodal: bool,
    /// Dimensions the function is defined for; empty means any `n >= 1`
    pub dimensions: Vec<usize>,
}

/// Lower/upper bound vectors of dimension `n` from a per-coordinate range.
pub fn create_bounds(n: usize, lower: f64, upper: f64) -> (Array1<f64>, Array1<f64>) {
    (Array1::from_elem(n, lower), Array1::from_elem(n, upper))
}

/// Registry of all benchmark functions keyed by name.
pub fn get_function_metadata() -> HashMap<&'static str, FunctionMetadata> {
    let mut metadata = HashMap::new();

    let mut insert = |m: FunctionMetadata| {
        metadata.insert(m.name, m);
    };

    insert(FunctionMetadata {
        name: "sphere",
        function: sphere,
        bounds: (-5.0, 5.0),
        minimum: 0.0,
        minimum_coordinate: 0.0,
        multimodal: false,
        dimensions: vec![],
    });
    insert(FunctionMetadata {
        name: "rosenbrock",
        function: rosenbrock,
        bounds: (-5.0, 10.0),
        minimum: 0.0,
        minimum_coordinate: 1.0,
        multimodal: false,
        dimensions: vec![],
    });
    insert(FunctionMetadata {
        name: "rastrigin",
        function: rastrigin,
        bounds: (-5.12, 5.12),
        minimum: 0.0,
        minimum_coordinate: 0.0,
        multimodal: true,
        dimensions: vec![],
    });
    insert(FunctionMetadata {
        name: "ackley",
        function: ackley,
        bounds: (-32.768, 32.768),
        minimum: 0.0,
        minimum_coordinate: 0.0,
        multimodal: true,
        dimensions: vec![],
    });
    insert(FunctionMetadata {
        name: "griewank",
        function: griewank,
        bounds: (-600.0, 600.0),
        minimum: 0.0,
        minimum_coordinate: 0.0,
        multimodal: true,
        dimensions: vec![],
    });
    insert(FunctionMetadata {
        name: "schwefel",
        function: schwefel,
        bounds: (-500.0, 500.0),
        minimum: 0.0,
        minimum_coordinate: 420.9687,
        multimodal: true,
        dimensions: vec![],
    });
    insert(FunctionMetadata {
        name: "levy",
        function: levy,
        bounds: (-10.0, 10.0),
        minimum: 0.0,
        minimum_coordinate: 1.0,
        multimodal: true,
        dimensions: vec![],
    });
    insert(FunctionMetadata {
        name: "zakharov",
        function: zakharov,
        bounds: (-5.0, 10.0),
        minimum: 0.0,
        minimum_coordinate: 0.0,
        multimodal: false,
        dimensions: vec![],
    });
    insert(FunctionMetadata {
        name: "eggholder",
        function: eggholder,
        bounds: (-512.0, 512.0),
        minimum: -959.6407,
        minimum_coordinate: f64::NAN,
        multimodal: true,
        dimensions: vec![2],
    });

    metadata
}

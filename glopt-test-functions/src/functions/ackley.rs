//! Ackley test function

use ndarray::Array1;

/// Ackley function - N-dimensional multimodal
/// Global minimum: f(x) = 0 at x = (0, 0, ..., 0)
/// Bounds: x_i in [-32.768, 32.768]
pub fn ackley(x: &Array1<f64>) -> f64 {
    let n = x.len() as f64;
    let sum_sq: f64 = x.iter().map(|&xi| xi.powi(2)).sum();
    let sum_cos: f64 = x
        .iter()
        .map(|&xi| (2.0 * std::f64::consts::PI * xi).cos())
        .sum();

    -20.0 * (-0.2 * (sum_sq / n).sqrt()).exp() - (sum_cos / n).exp() + 20.0 + std::f64::consts::E
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    #[test]
    fn test_ackley_at_optimum() {
        let x = Array1::zeros(20);
        assert_relative_eq!(ackley(&x), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ackley_far_field_plateau() {
        // far from the origin the function saturates near 20 + e
        let x = Array1::from_elem(4, 30.0);
        assert!(ackley(&x) > 19.0);
    }
}

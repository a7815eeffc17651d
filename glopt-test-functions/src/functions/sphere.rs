//! Sphere test function

use ndarray::Array1;

/// Sphere function - N-dimensional, unimodal, separable
/// Global minimum: f(x) = 0 at x = (0, 0, ..., 0)
pub fn sphere(x: &Array1<f64>) -> f64 {
    x.iter().map(|&xi| xi * xi).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sphere_values() {
        assert_eq!(sphere(&array![0.0, 0.0, 0.0]), 0.0);
        assert_eq!(sphere(&array![1.0, 2.0]), 5.0);
        assert_eq!(sphere(&array![-3.0]), 9.0);
    }
}

//! Zakharov test function

use ndarray::Array1;

/// Zakharov function - unimodal with a plate-shaped region
/// Global minimum: f(x) = 0 at x = (0, 0, ..., 0)
/// Bounds: x_i in [-5, 10]
pub fn zakharov(x: &Array1<f64>) -> f64 {
    let sum_sq: f64 = x.iter().map(|&xi| xi.powi(2)).sum();
    let weighted: f64 = x
        .iter()
        .enumerate()
        .map(|(i, &xi)| 0.5 * (i + 1) as f64 * xi)
        .sum();
    sum_sq + weighted.powi(2) + weighted.powi(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn test_zakharov_at_optimum() {
        assert_eq!(zakharov(&Array1::zeros(5)), 0.0);
    }
}

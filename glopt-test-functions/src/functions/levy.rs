//! Levy test function

use ndarray::Array1;

/// Levy function - N-dimensional multimodal
/// Global minimum: f(x) = 0 at x = (1, 1, ..., 1)
/// Bounds: x_i in [-10, 10]
pub fn levy(x: &Array1<f64>) -> f64 {
    use std::f64::consts::PI;
    let w = |xi: f64| 1.0 + (xi - 1.0) / 4.0;
    let n = x.len();

    let w1 = w(x[0]);
    let wn = w(x[n - 1]);
    let mut sum = (PI * w1).sin().powi(2);
    for i in 0..n - 1 {
        let wi = w(x[i]);
        sum += (wi - 1.0).powi(2) * (1.0 + 10.0 * (PI * wi + 1.0).sin().powi(2));
    }
    sum + (wn - 1.0).powi(2) * (1.0 + (2.0 * PI * wn).sin().powi(2))
}

//! Symmetric eigendecomposition via cyclic Jacobi rotations.
//!
//! Sized for the covariance matrices CMA-ES produces (n up to a few hundred);
//! for those the O(n^3) sweep is negligible next to objective evaluations.

use ndarray::{Array1, Array2};

/// Decomposes a symmetric matrix `c` into eigenvectors `b` (columns) and
/// eigenvalues `d` with `c = b * diag(d) * b^T`.
///
/// Returns `None` when the input contains non-finite entries or the sweep
/// produces them, which callers treat as numerical degeneracy.
pub(crate) fn symmetric_eigen(c: &Array2<f64>) -> Option<(Array2<f64>, Array1<f64>)> {
    let n = c.nrows();
    debug_assert_eq!(n, c.ncols());

    if c.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let mut a = c.clone();
    let mut v: Array2<f64> = Array2::eye(n);
    let max_sweeps = 64;

    for _ in 0..max_sweeps {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        let scale: f64 = a.diag().iter().map(|d| d * d).sum::<f64>().max(1e-300);
        if off <= 1e-28 * scale {
            break;
        }

        for p in 0..n - 1 {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                // smaller-magnitude root of t^2 + 2 t theta - 1 = 0
                let t = theta.signum() / (theta.abs() + (1.0 + theta * theta).sqrt());
                let cos = 1.0 / (1.0 + t * t).sqrt();
                let sin = t * cos;

                // A <- J^T A J applied as column then row rotations
                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = cos * akp - sin * akq;
                    a[[k, q]] = sin * akp + cos * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = cos * apk - sin * aqk;
                    a[[q, k]] = sin * apk + cos * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = cos * vkp - sin * vkq;
                    v[[k, q]] = sin * vkp + cos * vkq;
                }
            }
        }
    }

    let d = Array1::from_iter((0..n).map(|i| a[[i, i]]));
    if d.iter().any(|e| !e.is_finite()) || v.iter().any(|e| !e.is_finite()) {
        return None;
    }
    Some((v, d))
}

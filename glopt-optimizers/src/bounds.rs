//! The feasible box and its sampling/repair operations.

use ndarray::{Array1, Zip};
use rand::Rng;

use crate::error::{OptError, Result};

/// A hyperrectangle `[lower, upper]` in R^n with `lower[i] < upper[i]`.
///
/// Immutable once constructed; every optimizer run borrows one.
#[derive(Debug, Clone)]
pub struct Bounds {
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl Bounds {
    /// Creates bounds from explicit lower/upper vectors.
    ///
    /// # Errors
    ///
    /// `BoundsMismatch` if the vectors differ in length, `InvalidBounds` if
    /// any `lower[i] >= upper[i]` or a bound is not finite.
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(OptError::BoundsMismatch {
                lower_len: lower.len(),
                upper_len: upper.len(),
            });
        }
        for i in 0..lower.len() {
            if !(lower[i] < upper[i]) || !lower[i].is_finite() || !upper[i].is_finite() {
                return Err(OptError::InvalidBounds {
                    index: i,
                    lower: lower[i],
                    upper: upper[i],
                });
            }
        }
        Ok(Self { lower, upper })
    }

    /// Creates bounds from `(min, max)` pairs.
    pub fn of_pairs(pairs: &[(f64, f64)]) -> Result<Self> {
        let lower = Array1::from_iter(pairs.iter().map(|&(lo, _)| lo));
        let upper = Array1::from_iter(pairs.iter().map(|&(_, hi)| hi));
        Self::new(lower, upper)
    }

    /// Creates the symmetric box `[-half_width, half_width]^n`.
    pub fn symmetric(half_width: f64, n: usize) -> Result<Self> {
        Self::new(
            Array1::from_elem(n, -half_width),
            Array1::from_elem(n, half_width),
        )
    }

    /// Problem dimension.
    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    /// Lower bound vector.
    pub fn lower(&self) -> &Array1<f64> {
        &self.lower
    }

    /// Upper bound vector.
    pub fn upper(&self) -> &Array1<f64> {
        &self.upper
    }

    /// Box midpoint `0.5 * (lower + upper)`.
    pub fn center(&self) -> Array1<f64> {
        (&self.lower + &self.upper) * 0.5
    }

    /// Box half-width `0.5 * (upper - lower)`.
    pub fn scale(&self) -> Array1<f64> {
        (&self.upper - &self.lower) * 0.5
    }

    /// Default initial step size, `0.3 * scale`.
    pub fn default_sigma(&self) -> Array1<f64> {
        self.scale() * 0.3
    }

    /// Whether every coordinate of `x` lies inside the box.
    pub fn contains(&self, x: &Array1<f64>) -> bool {
        x.len() == self.dim()
            && x.iter()
                .zip(self.lower.iter())
                .zip(self.upper.iter())
                .all(|((&xi, &lo), &hi)| xi >= lo && xi <= hi)
    }

    /// Clamps `x` into the box, coordinate-wise.
    pub fn clip(&self, x: &mut Array1<f64>) {
        Zip::from(x)
            .and(&self.lower)
            .and(&self.upper)
            .for_each(|xi, &lo, &hi| *xi = xi.clamp(lo, hi));
    }

    /// Repairs `x` by reflecting out-of-bounds coordinates against the
    /// violated face. Coordinates still outside after a few mirror steps
    /// (possible for points several box widths away) collapse to the
    /// nearest boundary.
    pub fn reflect(&self, x: &mut Array1<f64>) {
        Zip::from(x)
            .and(&self.lower)
            .and(&self.upper)
            .for_each(|xi, &lo, &hi| {
                let mut v = *xi;
                let mut steps = 0;
                while (v < lo || v > hi) && steps < 4 {
                    if v < lo {
                        v = 2.0 * lo - v;
                    } else {
                        v = 2.0 * hi - v;
                    }
                    steps += 1;
                }
                *xi = v.clamp(lo, hi);
            });
    }

    /// A feasible point uniformly distributed inside the box.
    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        Zip::from(&self.lower)
            .and(&self.upper)
            .map_collect(|&lo, &hi| lo + rng.random::<f64>() * (hi - lo))
    }

    /// Maps `x` into normalized coordinates `(x - center) / scale`, so that
    /// the box becomes `[-1, 1]^n`. Used for scale-free distances.
    pub fn normalize(&self, x: &Array1<f64>) -> Array1<f64> {
        let center = self.center();
        let scale = self.scale();
        Zip::from(x)
            .and(&center)
            .and(&scale)
            .map_collect(|&xi, &c, &s| (xi - c) / s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rejects_inverted_bounds() {
        let err = Bounds::new(array![0.0, 5.0], array![1.0, 4.0]).unwrap_err();
        assert!(err.is_bounds_error());
    }

    #[test]
    fn test_rejects_length_mismatch() {
        assert!(Bounds::new(array![0.0], array![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_center_and_scale() {
        let b = Bounds::new(array![-2.0, 0.0], array![2.0, 10.0]).unwrap();
        assert_eq!(b.center(), array![0.0, 5.0]);
        assert_eq!(b.scale(), array![2.0, 5.0]);
    }

    #[test]
    fn test_reflect_mirrors_into_box() {
        let b = Bounds::symmetric(1.0, 3).unwrap();
        let mut x = array![1.3, -1.7, 0.5];
        b.reflect(&mut x);
        assert!(b.contains(&x));
        assert!((x[0] - 0.7).abs() < 1e-12);
        assert!((x[1] - (-0.3)).abs() < 1e-12);
        assert_eq!(x[2], 0.5);
    }

    #[test]
    fn test_reflect_collapses_far_points_to_boundary() {
        let b = Bounds::symmetric(1.0, 1).unwrap();
        let mut x = array![250.0];
        b.reflect(&mut x);
        assert!(b.contains(&x));
    }

    #[test]
    fn test_uniform_samples_feasible() {
        let b = Bounds::of_pairs(&[(-5.0, 5.0), (0.0, 1.0)]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert!(b.contains(&b.sample_uniform(&mut rng)));
        }
    }

    #[test]
    fn test_normalize_maps_corners() {
        let b = Bounds::of_pairs(&[(2.0, 4.0)]).unwrap();
        assert_eq!(b.normalize(&array![4.0]), array![1.0]);
        assert_eq!(b.normalize(&array![2.0]), array![-1.0]);
        assert_eq!(b.normalize(&array![3.0]), array![0.0]);
    }
}

//! Bounded, sorted, deduplicated store of elite solutions.
//!
//! The store is the only state shared between coordinated-retry workers; the
//! engine wraps it in a single mutex and keeps the critical section to the
//! admission protocol and parent selection. Entries stay sorted ascending by
//! objective value; near-duplicates (close in normalized coordinates with
//! similar objective) are collapsed onto the better of the two.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use glopt_optimizers::Bounds;
use ndarray::Array1;
use rand::Rng;

use crate::error::{Result, RetryError};

/// One elite solution.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    /// The solution point.
    pub x: Array1<f64>,
    /// Objective value; always finite.
    pub f: f64,
    /// Objective value mapped onto `[0, 1]` over the current store spread;
    /// refreshed on every admission and used to bias parent selection.
    pub y: f64,
    /// Admission order; also the identity used for parent bookkeeping.
    pub generation: u64,
    /// Seeds produced from this entry since it was admitted or last improved.
    pub count: u32,
}

/// Store tuning knobs.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of entries; the worst is evicted on overflow.
    pub capacity: usize,
    /// Normalized-distance radius below which entries are deduplication
    /// candidates; `None` uses `0.15 * sqrt(n)`.
    pub dedup_radius: Option<f64>,
    /// Relative objective tolerance for deduplication: two nearby entries
    /// whose values differ by less than `tol * max(1, |f|)` collapse.
    pub dedup_tolerance: f64,
    /// Seeds an entry may parent before it becomes ineligible.
    pub count_max: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            dedup_radius: None,
            dedup_tolerance: 0.05,
            count_max: 50,
        }
    }
}

/// Starting point and step size derived from two store entries.
#[derive(Debug, Clone)]
pub struct CrossoverSeed {
    /// Recombined starting point, inside the box.
    pub x0: Array1<f64>,
    /// Step size from the parent separation, clamped to `[1e-6 s, s]`.
    pub sigma0: Array1<f64>,
    /// Generation ids of the two parents, for count bookkeeping.
    pub parents: (u64, u64),
}

/// The retry store. Not internally synchronized; the owning engine guards it.
pub struct Store {
    bounds: Bounds,
    scale: Array1<f64>,
    config: StoreConfig,
    dedup_radius: f64,
    entries: Vec<StoreEntry>,
    admissions: u64,
    best_x: Option<Array1<f64>>,
    best_f: f64,
}

impl Store {
    /// Creates an empty store over `bounds`.
    ///
    /// # Errors
    ///
    /// `InvalidCapacity` when the configured capacity is zero.
    pub fn new(bounds: Bounds, config: StoreConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(RetryError::InvalidCapacity);
        }
        let dedup_radius = config
            .dedup_radius
            .unwrap_or(0.15 * (bounds.dim() as f64).sqrt());
        let scale = bounds.scale();
        Ok(Self {
            bounds,
            scale,
            config,
            dedup_radius,
            entries: Vec::new(),
            admissions: 0,
            best_x: None,
            best_f: f64::INFINITY,
        })
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Whether the store is still in its cold-start phase (fewer than a
    /// fifth of capacity admitted); cold runs start from uniform samples.
    pub fn is_cold(&self) -> bool {
        self.entries.len() < self.config.capacity.div_ceil(5)
    }

    /// Sorted view of the entries, best first.
    pub fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    /// Best admitted result ever, which may since have been evicted.
    pub fn best(&self) -> Option<(&Array1<f64>, f64)> {
        self.best_x.as_ref().map(|x| (x, self.best_f))
    }

    /// Objective value of the worst stored entry (`+inf` when empty).
    pub fn worst_f(&self) -> f64 {
        self.entries.last().map_or(f64::INFINITY, |e| e.f)
    }

    /// The `k` best stored objective values.
    pub fn top_values(&self, k: usize) -> Vec<f64> {
        self.entries.iter().take(k).map(|e| e.f).collect()
    }

    /// Runs the admission protocol for a finished run's result. Returns
    /// `true` when the result survived as (or improved) a store entry.
    ///
    /// Parent counts for `parents` are incremented regardless of the
    /// admission outcome; the seed was produced either way.
    pub fn admit(&mut self, x: Array1<f64>, f: f64, parents: Option<(u64, u64)>) -> bool {
        if let Some((a, b)) = parents {
            for e in self.entries.iter_mut() {
                if e.generation == a || e.generation == b {
                    e.count += 1;
                }
            }
        }
        if !f.is_finite() {
            return false;
        }

        let mut x = x;
        self.bounds.clip(&mut x);
        if f < self.best_f {
            self.best_f = f;
            self.best_x = Some(x.clone());
        }

        self.admissions += 1;
        let generation = self.admissions;

        // near-twins: entries inside the dedup radius (normalized coordinates)
        // with a comparable objective value; only the best of a twin group
        // survives
        let mut worse_twins: Vec<usize> = Vec::new();
        for (i, e) in self.entries.iter().enumerate() {
            if self.normalized_distance(&x, &e.x) >= self.dedup_radius {
                continue;
            }
            let tol = self.config.dedup_tolerance * e.f.abs().max(1.0);
            if (f - e.f).abs() < tol {
                if e.f <= f {
                    return false;
                }
                worse_twins.push(i);
            }
        }
        for &i in worse_twins.iter().rev() {
            self.entries.remove(i);
        }

        let entry = StoreEntry {
            y: 0.0,
            x,
            f,
            generation,
            count: 0,
        };
        self.insert_sorted(entry);
        if self.entries.len() > self.config.capacity {
            self.entries.pop();
        }
        self.refresh_normalized_values();
        // the new entry itself may have been the one evicted
        self.entries.iter().any(|e| e.generation == generation)
    }

    /// Draws two distinct eligible parents with rank-decreasing probability,
    /// damped by the normalized objective `y`, and recombines them into a
    /// starting point and step size. Returns `None` while fewer than two
    /// entries are eligible.
    pub fn crossover_seed<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<CrossoverSeed> {
        let eligible: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.count <= self.config.count_max)
            .map(|(i, _)| i)
            .collect();
        if eligible.len() < 2 {
            return None;
        }

        let first = weighted_pick(&self.entries, &eligible, None, rng);
        let second = weighted_pick(&self.entries, &eligible, Some(first), rng);
        let a = &self.entries[eligible[first]];
        let b = &self.entries[eligible[second]];

        // segment recombination with slight extrapolation past both ends
        let mut x0 = Array1::from_shape_fn(a.x.len(), |j| {
            let u = -0.1 + 1.2 * rng.random::<f64>();
            a.x[j] + u * (b.x[j] - a.x[j])
        });
        self.bounds.clip(&mut x0);

        let sigma0 = Array1::from_shape_fn(a.x.len(), |j| {
            let spread = 0.5 * (a.x[j] - b.x[j]).abs();
            spread.clamp(1e-6 * self.scale[j], self.scale[j])
        });

        Some(CrossoverSeed {
            x0,
            sigma0,
            parents: (a.generation, b.generation),
        })
    }

    /// Writes the entries, best first, as flat `f, x0, ..., x(n-1)` records.
    ///
    /// # Errors
    ///
    /// Propagates file i/o failures.
    pub fn checkpoint<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        for e in &self.entries {
            let coords: Vec<String> = e.x.iter().map(|v| format!("{v:.17e}")).collect();
            writeln!(writer, "{:.17e},{}", e.f, coords.join(","))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Re-admits checkpointed records through the normal admission protocol.
    /// Returns the number of records read.
    ///
    /// # Errors
    ///
    /// `MalformedCheckpoint` for unparsable lines, `Io` for file failures.
    pub fn restore<P: AsRef<Path>>(&mut self, path: P) -> Result<usize> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut records = 0usize;
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<f64> = line
                .split(',')
                .map(|s| s.trim().parse::<f64>())
                .collect::<std::result::Result<_, _>>()
                .map_err(|_| RetryError::MalformedCheckpoint { line: lineno + 1 })?;
            if fields.len() != self.bounds.dim() + 1 {
                return Err(RetryError::MalformedCheckpoint { line: lineno + 1 });
            }
            let f = fields[0];
            let x = Array1::from_vec(fields[1..].to_vec());
            self.admit(x, f, None);
            records += 1;
        }
        Ok(records)
    }

    fn insert_sorted(&mut self, entry: StoreEntry) {
        let pos = self.entries.partition_point(|e| e.f <= entry.f);
        self.entries.insert(pos, entry);
    }

    fn normalized_distance(&self, a: &Array1<f64>, b: &Array1<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .zip(self.scale.iter())
            .map(|((&ai, &bi), &si)| {
                let d = (ai - bi) / si;
                d * d
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Recomputes every entry's `y` against the current best/worst spread.
    /// Entries are sorted by `f`, so the refreshed values are nondecreasing
    /// from the best entry (0) to the worst (1).
    fn refresh_normalized_values(&mut self) {
        let (best, worst) = match (self.entries.first(), self.entries.last()) {
            (Some(b), Some(w)) => (b.f, w.f),
            _ => return,
        };
        let span = worst - best;
        for e in &mut self.entries {
            e.y = if span > 0.0 { (e.f - best) / span } else { 0.0 };
        }
    }
}

/// Selection weight of the eligible entry at `rank`: the rank bias
/// `1 / (rank + 1)` damped by the normalized objective, so entries deep in
/// the store spread contribute less than their rank alone would grant.
/// Strictly decreasing in rank (`y` is nondecreasing in rank) with nonzero
/// mass on the worst entry.
fn selection_weight(rank: usize, y: f64) -> f64 {
    (1.0 - 0.5 * y.clamp(0.0, 1.0)) / (rank as f64 + 1.0)
}

/// Position in `eligible` drawn with probability proportional to
/// [`selection_weight`], optionally excluding one position.
fn weighted_pick<R: Rng + ?Sized>(
    entries: &[StoreEntry],
    eligible: &[usize],
    exclude: Option<usize>,
    rng: &mut R,
) -> usize {
    let mut total = 0.0;
    for (k, &idx) in eligible.iter().enumerate() {
        if Some(k) != exclude {
            total += selection_weight(k, entries[idx].y);
        }
    }
    let mut u = rng.random::<f64>() * total;
    for (k, &idx) in eligible.iter().enumerate() {
        if Some(k) == exclude {
            continue;
        }
        let w = selection_weight(k, entries[idx].y);
        if u < w {
            return k;
        }
        u -= w;
    }
    // numerical fallthrough lands on the last admissible position
    if exclude == Some(eligible.len() - 1) {
        eligible.len() - 2
    } else {
        eligible.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn store_with_capacity(capacity: usize) -> Store {
        Store::new(
            Bounds::symmetric(10.0, 2).unwrap(),
            StoreConfig {
                capacity,
                ..StoreConfig::default()
            },
        )
        .unwrap()
    }

    fn assert_sorted(store: &Store) {
        let values: Vec<f64> = store.entries().iter().map(|e| e.f).collect();
        for w in values.windows(2) {
            assert!(w[0] <= w[1], "store out of order: {values:?}");
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = Store::new(
            Bounds::symmetric(1.0, 2).unwrap(),
            StoreConfig {
                capacity: 0,
                ..StoreConfig::default()
            },
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_admission_keeps_sorted_and_bounded() {
        let mut store = store_with_capacity(5);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..60 {
            let x = array![
                20.0 * rng.random::<f64>() - 10.0,
                20.0 * rng.random::<f64>() - 10.0
            ];
            let f = x[0] * x[0] + x[1] * x[1];
            store.admit(x, f, None);
            assert!(store.len() <= 5);
            assert_sorted(&store);
        }
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_non_finite_discarded() {
        let mut store = store_with_capacity(5);
        assert!(!store.admit(array![0.0, 0.0], f64::NAN, None));
        assert!(!store.admit(array![0.0, 0.0], f64::INFINITY, None));
        assert!(store.is_empty());
    }

    #[test]
    fn test_dedup_keeps_better_of_near_pair() {
        let mut store = store_with_capacity(10);
        store.admit(array![1.0, 1.0], 2.0, None);
        // same basin, marginally different point, better value
        assert!(store.admit(array![1.01, 1.0], 1.99, None));
        assert_eq!(store.len(), 1);
        assert!((store.entries()[0].f - 1.99).abs() < 1e-12);
        assert_eq!(store.entries()[0].count, 0);

        // worse twin is dropped
        assert!(!store.admit(array![1.0, 1.01], 2.0, None));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_distant_points_both_kept() {
        let mut store = store_with_capacity(10);
        store.admit(array![-8.0, -8.0], 2.0, None);
        store.admit(array![8.0, 8.0], 2.0, None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_near_points_with_different_values_both_kept() {
        let mut store = store_with_capacity(10);
        store.admit(array![1.0, 1.0], 2.0, None);
        // close in space but objectives differ beyond tolerance
        store.admit(array![1.01, 1.0], 50.0, None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_worst_evicted_on_overflow() {
        let mut store = store_with_capacity(3);
        store.admit(array![-9.0, 0.0], 4.0, None);
        store.admit(array![9.0, 0.0], 3.0, None);
        store.admit(array![0.0, 9.0], 2.0, None);
        store.admit(array![0.0, -9.0], 1.0, None);
        assert_eq!(store.len(), 3);
        assert!((store.worst_f() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_global_best_survives_eviction() {
        let mut store = store_with_capacity(2);
        store.admit(array![1.0, 0.0], 1.0, None);
        store.admit(array![-3.0, 2.0], 2.0, None);
        store.admit(array![4.0, 4.0], 3.0, None);
        let (_x, f) = store.best().unwrap();
        assert_eq!(f, 1.0);
    }

    #[test]
    fn test_crossover_seed_feasible_and_clamped() {
        let mut store = store_with_capacity(10);
        store.admit(array![-5.0, 2.0], 1.0, None);
        store.admit(array![5.0, -2.0], 2.0, None);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let seed = store.crossover_seed(&mut rng).unwrap();
            assert!(seed.x0.iter().all(|&v| (-10.0..=10.0).contains(&v)));
            for j in 0..2 {
                assert!(seed.sigma0[j] > 0.0);
                assert!(seed.sigma0[j] <= 10.0);
            }
        }
    }

    #[test]
    fn test_coincident_parents_get_floor_sigma() {
        let mut store = store_with_capacity(10);
        store.admit(array![1.0, 1.0], 1.0, None);
        store.admit(array![1.0, 1.0], 100.0, None); // distinct by value, same point
        let mut rng = StdRng::seed_from_u64(5);
        let seed = store.crossover_seed(&mut rng).unwrap();
        for j in 0..2 {
            assert!((seed.sigma0[j] - 1e-6 * 10.0).abs() < 1e-18);
        }
    }

    #[test]
    fn test_count_backpressure_blocks_parents() {
        let mut store = Store::new(
            Bounds::symmetric(10.0, 2).unwrap(),
            StoreConfig {
                capacity: 10,
                count_max: 2,
                ..StoreConfig::default()
            },
        )
        .unwrap();
        store.admit(array![-5.0, 0.0], 1.0, None);
        store.admit(array![5.0, 0.0], 2.0, None);
        let gens = (
            store.entries()[0].generation,
            store.entries()[1].generation,
        );

        // exhaust the count budget of both entries
        for _ in 0..3 {
            store.admit(array![0.0, 9.0], f64::NAN, Some(gens));
        }
        let mut rng = StdRng::seed_from_u64(8);
        assert!(store.crossover_seed(&mut rng).is_none());
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let mut store = store_with_capacity(10);
        store.admit(array![-5.0, 2.0], 1.5, None);
        store.admit(array![5.0, -2.0], 2.5, None);
        store.admit(array![0.0, 8.0], 0.5, None);

        let path = std::env::temp_dir().join("glopt_store_roundtrip.csv");
        store.checkpoint(&path).unwrap();

        let mut restored = store_with_capacity(10);
        let records = restored.restore(&path).unwrap();
        assert_eq!(records, 3);
        assert_eq!(restored.len(), 3);
        assert_sorted(&restored);
        assert!((restored.entries()[0].f - 0.5).abs() < 1e-12);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_restore_rejects_malformed_records() {
        let path = std::env::temp_dir().join("glopt_store_malformed.csv");
        std::fs::write(&path, "1.0,2.0,not-a-number\n").unwrap();
        let mut store = store_with_capacity(10);
        assert!(matches!(
            store.restore(&path),
            Err(RetryError::MalformedCheckpoint { line: 1 })
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_normalized_values_track_current_spread() {
        let mut store = store_with_capacity(10);
        store.admit(array![-9.0, 0.0], 4.0, None);
        store.admit(array![9.0, 0.0], 2.0, None);
        store.admit(array![0.0, 9.0], 8.0, None);

        let ys: Vec<f64> = store.entries().iter().map(|e| e.y).collect();
        assert_eq!(ys[0], 0.0);
        assert!((ys[1] - 2.0 / 6.0).abs() < 1e-12);
        assert_eq!(ys[2], 1.0);

        // a new best rescales every entry
        store.admit(array![0.0, -9.0], 0.0, None);
        let ys: Vec<f64> = store.entries().iter().map(|e| e.y).collect();
        assert_eq!(ys[0], 0.0);
        assert!((ys[1] - 0.25).abs() < 1e-12);
        assert_eq!(ys[3], 1.0);
    }

    #[test]
    fn test_selection_weight_decreases_in_rank() {
        // y nondecreasing with rank, as the sorted store guarantees
        let ys = [0.0, 0.2, 0.7, 1.0];
        for k in 0..3 {
            assert!(selection_weight(k, ys[k]) > selection_weight(k + 1, ys[k + 1]));
        }
        assert!(selection_weight(3, 1.0) > 0.0);
    }

    #[test]
    fn test_weighted_pick_prefers_best() {
        let entries: Vec<StoreEntry> = (0..4)
            .map(|i| StoreEntry {
                x: array![i as f64, 0.0],
                f: i as f64,
                y: i as f64 / 3.0,
                generation: i as u64 + 1,
                count: 0,
            })
            .collect();
        let eligible = vec![0, 1, 2, 3];
        let mut rng = StdRng::seed_from_u64(1);
        let mut hits = [0usize; 4];
        for _ in 0..4000 {
            hits[weighted_pick(&entries, &eligible, None, &mut rng)] += 1;
        }
        assert!(hits[0] > hits[1] && hits[1] > hits[2] && hits[2] > hits[3]);
        assert!(hits[3] > 0);
    }
}

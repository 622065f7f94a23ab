//! Banded locality-sensitive hashing over MinHash signatures.
//!
//! Signatures are cut into `bands` bands of `rows` values; two signatures
//! land in the same bucket for a band when that band hashes identically.
//! The band/row split is chosen to minimize the weighted false-positive and
//! false-negative probability integrals at the configured Jaccard threshold.

use ahash::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};

/// Band/row split of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LshParams {
    pub bands: usize,
    pub rows: usize,
}

impl LshParams {
    /// Probability that two sets with Jaccard similarity `s` collide in at
    /// least one band: `1 - (1 - s^rows)^bands`.
    fn collision_probability(&self, s: f64) -> f64 {
        1.0 - (1.0 - s.powi(self.rows as i32)).powi(self.bands as i32)
    }

    fn false_positive_weight(&self, threshold: f64) -> f64 {
        integrate(|s| self.collision_probability(s), 0.0, threshold)
    }

    fn false_negative_weight(&self, threshold: f64) -> f64 {
        integrate(|s| 1.0 - self.collision_probability(s), threshold, 1.0)
    }

    /// Picks the band/row split minimizing the equally-weighted sum of the
    /// false-positive and false-negative integrals at `threshold`.
    pub fn optimal(threshold: f64, num_perm: usize) -> Self {
        let mut best = LshParams {
            bands: 1,
            rows: num_perm,
        };
        let mut best_error = f64::INFINITY;
        for bands in 1..=num_perm {
            let max_rows = num_perm / bands;
            for rows in 1..=max_rows {
                let candidate = LshParams { bands, rows };
                let error = 0.5 * candidate.false_positive_weight(threshold)
                    + 0.5 * candidate.false_negative_weight(threshold);
                if error < best_error {
                    best_error = error;
                    best = candidate;
                }
            }
        }
        best
    }
}

fn integrate(f: impl Fn(f64) -> f64, a: f64, b: f64) -> f64 {
    const STEP: f64 = 0.001;
    let mut area = 0.0;
    let mut x = a + STEP / 2.0;
    while x < b {
        area += f(x) * STEP;
        x += STEP;
    }
    area
}

// ============================================================================
// Bucket store
// ============================================================================

/// Per-band hash buckets mapping band digests to member ids.
#[derive(Debug, Clone)]
pub struct LshBuckets<K: Copy + Eq + Hash> {
    params: LshParams,
    state: RandomState,
    tables: Vec<HashMap<u64, Vec<K>>>,
}

impl<K: Copy + Eq + Hash> LshBuckets<K> {
    pub fn new(params: LshParams) -> Self {
        Self {
            params,
            // Fixed seeds so bucket layout is reproducible.
            state: RandomState::with_seeds(11, 13, 17, 19),
            tables: (0..params.bands).map(|_| HashMap::new()).collect(),
        }
    }

    pub fn params(&self) -> LshParams {
        self.params
    }

    pub fn insert(&mut self, key: K, signature: &[u64]) {
        for (band, table) in self.tables.iter_mut().enumerate() {
            let digest = band_digest(&self.state, band, signature, self.params.rows);
            table.entry(digest).or_default().push(key);
        }
    }

    /// All keys sharing at least one band bucket with `signature`.
    /// Duplicates are removed; insertion order of first sighting is kept.
    pub fn query(&self, signature: &[u64]) -> Vec<K> {
        let mut seen = Vec::new();
        for (band, table) in self.tables.iter().enumerate() {
            let digest = band_digest(&self.state, band, signature, self.params.rows);
            if let Some(members) = table.get(&digest) {
                for key in members {
                    if !seen.contains(key) {
                        seen.push(*key);
                    }
                }
            }
        }
        seen
    }

    pub fn clear(&mut self) {
        for table in &mut self.tables {
            table.clear();
        }
    }
}

fn band_digest(state: &RandomState, band: usize, signature: &[u64], rows: usize) -> u64 {
    let start = band * rows;
    let end = (start + rows).min(signature.len());
    let mut hasher = state.build_hasher();
    band.hash(&mut hasher);
    signature[start..end].hash(&mut hasher);
    hasher.finish()
}

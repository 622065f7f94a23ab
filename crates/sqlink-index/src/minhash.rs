//! Character shingling and MinHash signatures.
//!
//! Column sample values are decomposed into overlapping lowercased k-grams
//! and hashed through a fixed family of universal-hash permutations, so the
//! same value always produces the same signature across processes and
//! rebuilds. Signature agreement estimates the Jaccard similarity of the
//! underlying shingle sets.

use ahash::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

pub const DEFAULT_SHINGLE_LEN: usize = 4;
pub const DEFAULT_NUM_PERM: usize = 128;

/// Mersenne prime modulus for the permutation family.
const MERSENNE_PRIME: u128 = (1 << 61) - 1;

/// Fixed seeds: signatures must be stable across processes.
const HASH_SEEDS: (u64, u64, u64, u64) = (
    0x9e37_79b9_7f4a_7c15,
    0xbf58_476d_1ce4_e5b9,
    0x94d0_49bb_1331_11eb,
    0x2545_f491_4f6c_dd1d,
);

/// Overlapping k-length character shingles of a value, lowercased and
/// whitespace-trimmed. A value shorter than `k` yields the whole lowercased
/// string as its single shingle.
pub fn shingles(value: &str, k: usize) -> Vec<String> {
    let normalized = value.trim().to_lowercase();
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() < k {
        return vec![normalized];
    }
    chars.windows(k).map(|w| w.iter().collect()).collect()
}

/// A fixed family of `num_perm` hash permutations.
#[derive(Debug, Clone)]
pub struct MinHasher {
    shingle_len: usize,
    base: RandomState,
    perms: Vec<(u64, u64)>,
}

impl MinHasher {
    pub fn new(num_perm: usize, shingle_len: usize) -> Self {
        let perms = (0..num_perm as u64)
            .map(|i| {
                // SplitMix64 over the permutation index; `a` must be odd so
                // the multiplicative part never collapses.
                let a = splitmix64(2 * i + 1) | 1;
                let b = splitmix64(2 * i + 2);
                (a, b)
            })
            .collect();
        Self {
            shingle_len,
            base: RandomState::with_seeds(HASH_SEEDS.0, HASH_SEEDS.1, HASH_SEEDS.2, HASH_SEEDS.3),
            perms,
        }
    }

    pub fn num_perm(&self) -> usize {
        self.perms.len()
    }

    pub fn shingle_len(&self) -> usize {
        self.shingle_len
    }

    /// MinHash signature over the shingle bags of every given value.
    pub fn signature<'a, I>(&self, values: I) -> Vec<u64>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut sig = vec![u64::MAX; self.perms.len()];
        for value in values {
            for shingle in shingles(value, self.shingle_len) {
                let h = self.hash_shingle(&shingle);
                for (slot, &(a, b)) in sig.iter_mut().zip(&self.perms) {
                    let permuted =
                        ((a as u128 * h as u128 + b as u128) % MERSENNE_PRIME) as u64;
                    if permuted < *slot {
                        *slot = permuted;
                    }
                }
            }
        }
        sig
    }

    /// Signature of a single literal, matching the build-side transform.
    pub fn signature_for_literal(&self, literal: &str) -> Vec<u64> {
        self.signature(std::iter::once(literal))
    }

    fn hash_shingle(&self, shingle: &str) -> u64 {
        let mut hasher = self.base.build_hasher();
        shingle.hash(&mut hasher);
        hasher.finish()
    }
}

/// Estimated Jaccard similarity from two equal-length signatures.
pub fn estimate_jaccard(a: &[u64], b: &[u64]) -> f64 {
    assert_eq!(a.len(), b.len(), "signature lengths differ");
    if a.is_empty() {
        return 0.0;
    }
    let equal = a.iter().zip(b).filter(|(x, y)| x == y).count();
    equal as f64 / a.len() as f64
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

//! Value similarity index: MinHash + LSH over column sample values.
//!
//! Answers "which `(table, column)` pairs plausibly contain this literal?"
//! for the schema-linking orchestrator. Per-column MinHash signatures are
//! derived from sampled values and banded into an LSH structure tuned for a
//! fixed Jaccard threshold; a literal is hashed with the same transform and
//! matched against the bands.
//!
//! Build is a one-time (or periodically refreshed) exclusive operation;
//! lookups are read-only and safe to share. Refreshes build a fresh
//! [`ValueLshIndex`] and swap it in through [`SharedValueIndex`] rather than
//! mutating an index readers may hold.

pub mod index;
pub mod lsh;
pub mod minhash;

pub use index::{IndexConfig, IndexStats, ProfileId, ValueLshIndex};
pub use lsh::LshParams;
pub use minhash::{estimate_jaccard, shingles, MinHasher};

use parking_lot::RwLock;
use std::sync::Arc;

/// Swappable handle to the current value index.
///
/// Readers take a cheap [`snapshot`](Self::snapshot) and keep using it for
/// the duration of one request; a rebuild constructs a new index offline and
/// [`swap`](Self::swap)s it in atomically.
pub struct SharedValueIndex {
    current: RwLock<Arc<ValueLshIndex>>,
}

impl SharedValueIndex {
    pub fn new(index: ValueLshIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    /// An empty, unbuilt index; lookups return no candidates until the
    /// first swap.
    pub fn empty(config: IndexConfig) -> Self {
        Self::new(ValueLshIndex::new(config))
    }

    pub fn snapshot(&self) -> Arc<ValueLshIndex> {
        self.current.read().clone()
    }

    /// Replaces the current index. Existing snapshots keep the old index
    /// alive until dropped.
    pub fn swap(&self, index: ValueLshIndex) {
        *self.current.write() = Arc::new(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_survive_a_swap() {
        let shared = SharedValueIndex::empty(IndexConfig::default());
        let before = shared.snapshot();
        assert!(!before.is_built());

        let mut rebuilt = ValueLshIndex::new(IndexConfig::default());
        rebuilt.build(&[]);
        shared.swap(rebuilt);

        // The old snapshot is unchanged; a fresh one sees the new index.
        assert!(!before.is_built());
        assert!(shared.snapshot().is_built());
    }
}

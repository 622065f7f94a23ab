//! The value similarity index: which columns plausibly contain a literal?
//!
//! Built once from every column profile that carries sample values, then
//! queried many times. Build and lookup must not be interleaved from
//! multiple threads; rebuilds should go through
//! [`SharedValueIndex`](crate::SharedValueIndex) instead of mutating a live
//! index.

use crate::lsh::{LshBuckets, LshParams};
use crate::minhash::{MinHasher, DEFAULT_NUM_PERM, DEFAULT_SHINGLE_LEN};
use serde::{Deserialize, Serialize};
use sqlink_profile::{ColumnProfile, Field};
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub type ProfileId = i64;

/// Tuning knobs for the value index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Jaccard similarity threshold the LSH bands are tuned for.
    pub threshold: f64,
    /// Number of MinHash permutations per signature.
    pub num_perm: usize,
    /// Character shingle length.
    pub shingle_len: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            num_perm: DEFAULT_NUM_PERM,
            shingle_len: DEFAULT_SHINGLE_LEN,
        }
    }
}

/// Index statistics for diagnostics endpoints and logs.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub is_built: bool,
    pub indexed_columns: usize,
    pub threshold: f64,
    pub num_perm: usize,
    pub shingle_len: usize,
    pub bands: usize,
    pub rows: usize,
}

/// In-memory LSH over per-column MinHash signatures built from sample
/// values. Lookup maps a literal to candidate `(table, column)` fields.
pub struct ValueLshIndex {
    config: IndexConfig,
    hasher: MinHasher,
    buckets: LshBuckets<ProfileId>,
    signatures: HashMap<ProfileId, Vec<u64>>,
    fields: HashMap<ProfileId, Field>,
    built: bool,
}

impl ValueLshIndex {
    pub fn new(config: IndexConfig) -> Self {
        let params = LshParams::optimal(config.threshold, config.num_perm);
        let hasher = MinHasher::new(config.num_perm, config.shingle_len);
        Self {
            config,
            hasher,
            buckets: LshBuckets::new(params),
            signatures: HashMap::new(),
            fields: HashMap::new(),
            built: false,
        }
    }

    /// Builds the index from column profiles. Profiles without any usable
    /// sample value are skipped, not an error. Any previous contents are
    /// cleared first, so rebuilding from the same profiles is idempotent.
    pub fn build(&mut self, profiles: &[ColumnProfile]) {
        self.clear();
        let mut indexed = 0usize;
        for profile in profiles {
            let samples = profile.sample_values();
            if samples.is_empty() {
                continue;
            }
            let signature = self.hasher.signature(samples.iter().copied());
            self.buckets.insert(profile.id, &signature);
            self.signatures.insert(profile.id, signature);
            self.fields.insert(profile.id, profile.field());
            indexed += 1;
        }
        self.built = true;
        info!(
            indexed,
            skipped = profiles.len() - indexed,
            "value LSH index built"
        );
    }

    /// Candidate fields whose sampled values look similar to `literal`.
    ///
    /// Returns empty (never errors) for a blank literal or when the index
    /// has not been built yet; similarity hints are best-effort.
    pub fn lookup(&self, literal: &str) -> Vec<Field> {
        if !self.built {
            warn!("value index queried before build; returning no candidates");
            return Vec::new();
        }
        if literal.trim().is_empty() {
            return Vec::new();
        }
        let signature = self.hasher.signature_for_literal(literal);
        let ids = self.buckets.query(&signature);
        let mut candidates: Vec<Field> = ids
            .iter()
            .filter_map(|id| self.fields.get(id).cloned())
            .collect();
        candidates.sort();
        candidates.dedup();
        debug!(literal, candidates = candidates.len(), "value index lookup");
        candidates
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn stats(&self) -> IndexStats {
        let params = self.buckets.params();
        IndexStats {
            is_built: self.built,
            indexed_columns: self.fields.len(),
            threshold: self.config.threshold,
            num_perm: self.config.num_perm,
            shingle_len: self.config.shingle_len,
            bands: params.bands,
            rows: params.rows,
        }
    }

    /// Indexed column names for one table.
    pub fn candidate_columns_for_table(&self, table: &str) -> Vec<String> {
        let mut columns: Vec<String> = self
            .fields
            .values()
            .filter(|f| f.table == table)
            .map(|f| f.column.clone())
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.signatures.clear();
        self.fields.clear();
        self.built = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlink_profile::TopKValue;

    fn profile(id: i64, table: &str, column: &str, samples: &[&str]) -> ColumnProfile {
        ColumnProfile {
            id,
            database_name: "app".into(),
            table_name: table.into(),
            column_name: column.into(),
            data_type: "text".into(),
            table_row_count: samples.len() as i64,
            null_count: 0,
            non_null_count: samples.len() as i64,
            distinct_count: None,
            min_value: None,
            max_value: None,
            length_min: None,
            length_max: None,
            char_classes: None,
            common_prefixes: None,
            top_k_values: samples
                .iter()
                .map(|v| TopKValue {
                    value: v.to_string(),
                    count: 1,
                })
                .collect(),
            distinct_sample: Vec::new(),
            minhash_signature: Vec::new(),
            english_description: None,
            short_summary: None,
            long_summary: None,
            embedding: None,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn lookup_before_build_returns_empty() {
        let index = ValueLshIndex::new(IndexConfig::default());
        assert!(index.lookup("anything").is_empty());
        assert!(!index.is_built());
    }

    #[test]
    fn build_from_zero_profiles_yields_empty_lookups() {
        let mut index = ValueLshIndex::new(IndexConfig::default());
        index.build(&[]);
        assert!(index.is_built());
        assert!(index.lookup("anything").is_empty());
        assert_eq!(index.stats().indexed_columns, 0);
    }

    #[test]
    fn indexed_sample_value_returns_its_field() {
        let mut index = ValueLshIndex::new(IndexConfig::default());
        index.build(&[
            profile(1, "projects", "academic_year", &["2020-2021", "2021-2022"]),
            profile(2, "documents", "status", &["open", "closed", "archived"]),
        ]);
        let candidates = index.lookup("2020-2021");
        assert!(candidates.contains(&Field::new("projects", "academic_year")));
        assert!(!candidates.contains(&Field::new("documents", "status")));
    }

    #[test]
    fn unsampled_profiles_are_skipped() {
        let mut index = ValueLshIndex::new(IndexConfig::default());
        index.build(&[profile(1, "documents", "id", &[])]);
        assert!(index.is_built());
        assert_eq!(index.stats().indexed_columns, 0);
    }

    #[test]
    fn blank_literal_short_circuits() {
        let mut index = ValueLshIndex::new(IndexConfig::default());
        index.build(&[profile(1, "documents", "status", &["open"])]);
        assert!(index.lookup("").is_empty());
        assert!(index.lookup("   ").is_empty());
    }

    #[test]
    fn rebuild_clears_previous_state() {
        let mut index = ValueLshIndex::new(IndexConfig::default());
        index.build(&[profile(1, "documents", "status", &["open", "closed"])]);
        assert!(!index.lookup("open").is_empty());

        index.build(&[profile(2, "projects", "name", &["apollo", "hermes"])]);
        assert!(index.lookup("open").is_empty());
        assert!(index
            .lookup("apollo")
            .contains(&Field::new("projects", "name")));
    }

    #[test]
    fn candidate_columns_grouped_by_table() {
        let mut index = ValueLshIndex::new(IndexConfig::default());
        index.build(&[
            profile(1, "documents", "status", &["open"]),
            profile(2, "documents", "name", &["report.pdf"]),
            profile(3, "projects", "name", &["apollo"]),
        ]);
        assert_eq!(
            index.candidate_columns_for_table("documents"),
            vec!["name".to_string(), "status".to_string()]
        );
        assert!(index.candidate_columns_for_table("missing").is_empty());
    }
}

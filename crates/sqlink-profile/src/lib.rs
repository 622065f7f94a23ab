//! Column profile data model for the schema-linking pipeline.
//!
//! A [`ColumnProfile`] is the read-only statistical portrait of one
//! `(database, table, column)` triple, produced by an offline profiling run:
//! row/null/distinct counts, value-shape statistics, sampled values, a
//! precomputed MinHash signature, and the LLM-authored summaries used when
//! rendering prompt context. The pipeline only ever reads profiles; writes
//! belong to the profiler.
//!
//! [`Field`] is the `(table, column)` pair that generated SQL references and
//! that similarity lookups return. Sets of fields compare by value, never by
//! insertion order.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use store::{MemoryProfileStore, PgProfileStore, ProfileStore};

// ============================================================================
// Field
// ============================================================================

/// A `(table, column)` pair identifying a schema element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Field {
    pub table: String,
    pub column: String,
}

impl Field {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

// ============================================================================
// Column Profile
// ============================================================================

/// One of the top-K most frequent values in a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopKValue {
    pub value: String,
    #[serde(default)]
    pub count: i64,
}

/// Statistical profile of a single column, keyed by
/// `(database_name, table_name, column_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub id: i64,
    pub database_name: String,
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,

    // Counts. Invariant: non_null_count + null_count == table_row_count.
    pub table_row_count: i64,
    pub null_count: i64,
    pub non_null_count: i64,
    #[serde(default)]
    pub distinct_count: Option<i64>,

    // Value shape
    #[serde(default)]
    pub min_value: Option<String>,
    #[serde(default)]
    pub max_value: Option<String>,
    #[serde(default)]
    pub length_min: Option<i32>,
    #[serde(default)]
    pub length_max: Option<i32>,
    /// Character-class histogram, e.g. `{"digit": 0.8, "alpha": 0.2}`.
    #[serde(default)]
    pub char_classes: Option<serde_json::Value>,
    #[serde(default)]
    pub common_prefixes: Option<serde_json::Value>,

    // Value samples
    #[serde(default)]
    pub top_k_values: Vec<TopKValue>,
    #[serde(default)]
    pub distinct_sample: Vec<String>,
    /// Precomputed MinHash bands from the profiler, when present.
    #[serde(default)]
    pub minhash_signature: Vec<u64>,

    // LLM-authored descriptions
    #[serde(default)]
    pub english_description: Option<String>,
    #[serde(default)]
    pub short_summary: Option<String>,
    #[serde(default)]
    pub long_summary: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,

    pub generated_at: DateTime<Utc>,
}

impl ColumnProfile {
    /// The field this profile describes.
    pub fn field(&self) -> Field {
        Field::new(self.table_name.clone(), self.column_name.clone())
    }

    /// Fully qualified `table.column` name for logs and previews.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table_name, self.column_name)
    }

    /// All sampled values known for this column: top-K frequent values
    /// followed by the distinct-value sample. Empty when the profiler
    /// captured neither.
    pub fn sample_values(&self) -> Vec<&str> {
        self.top_k_values
            .iter()
            .map(|kv| kv.value.as_str())
            .chain(self.distinct_sample.iter().map(|s| s.as_str()))
            .collect()
    }

    pub fn has_samples(&self) -> bool {
        !self.top_k_values.is_empty() || !self.distinct_sample.is_empty()
    }

    /// Checks the profiler's count invariant.
    pub fn counts_consistent(&self) -> bool {
        self.non_null_count + self.null_count == self.table_row_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn profile(id: i64, table: &str, column: &str, samples: &[&str]) -> ColumnProfile {
        ColumnProfile {
            id,
            database_name: "app".to_string(),
            table_name: table.to_string(),
            column_name: column.to_string(),
            data_type: "text".to_string(),
            table_row_count: 10,
            null_count: 2,
            non_null_count: 8,
            distinct_count: Some(samples.len() as i64),
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
            short_summary: Some(format!("{column} of {table}")),
            long_summary: None,
            embedding: None,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn field_compares_by_value() {
        let a = Field::new("documents", "id");
        let b = Field::new("documents".to_string(), "id".to_string());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "documents.id");
    }

    #[test]
    fn sample_values_unions_both_sources() {
        let mut p = profile(1, "documents", "status", &["open", "closed"]);
        p.distinct_sample = vec!["archived".to_string()];
        assert_eq!(p.sample_values(), vec!["open", "closed", "archived"]);
        assert!(p.has_samples());
    }

    #[test]
    fn counts_invariant() {
        let p = profile(1, "documents", "status", &[]);
        assert!(p.counts_consistent());
        let mut broken = p;
        broken.null_count += 1;
        assert!(!broken.counts_consistent());
    }
}

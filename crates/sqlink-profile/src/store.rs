//! Profile stores: how the pipeline reads `column_profiles`.
//!
//! The pipeline consumes profiles through the [`ProfileStore`] seam so the
//! prompt builder and value index can be exercised with an in-memory store
//! in tests while production reads Postgres.

use crate::{ColumnProfile, Field, TopKValue};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Client;
use tracing::debug;

/// Read-only access to column profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Every profile known to the store.
    async fn load_all(&self) -> Result<Vec<ColumnProfile>>;

    /// Profiles carrying at least one sample source (top-K values or a
    /// distinct-value sample); these are the only profiles the value index
    /// can use.
    async fn load_sampled(&self) -> Result<Vec<ColumnProfile>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|p| p.has_samples())
            .collect())
    }

    /// Profiles for an explicit set of fields, in store order. Fields with
    /// no profile are silently absent from the result.
    async fn load_for_fields(&self, fields: &[Field]) -> Result<Vec<ColumnProfile>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|p| fields.iter().any(|f| *f == p.field()))
            .collect())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Profile store backed by a plain vector. Used by tests and tooling.
#[derive(Debug, Default, Clone)]
pub struct MemoryProfileStore {
    profiles: Vec<ColumnProfile>,
}

impl MemoryProfileStore {
    pub fn new(profiles: Vec<ColumnProfile>) -> Self {
        Self { profiles }
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load_all(&self) -> Result<Vec<ColumnProfile>> {
        Ok(self.profiles.clone())
    }
}

// ============================================================================
// Postgres store
// ============================================================================

const PROFILE_COLUMNS: &str = "id::bigint, database_name, table_name, column_name, data_type, \
     table_row_count::bigint, null_count::bigint, non_null_count::bigint, distinct_count::bigint, \
     min_value, max_value, length_min, length_max, char_classes, common_prefixes, \
     top_k_values, distinct_sample, minhash_signature, \
     english_description, short_summary, long_summary, vector_embedding::text, \
     generated_at";

/// Profile store reading the `column_profiles` table.
pub struct PgProfileStore {
    client: Client,
}

impl PgProfileStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn row_to_profile(row: &tokio_postgres::Row) -> Result<ColumnProfile> {
        let id: i64 = row.try_get(0)?;
        let generated_at: DateTime<Utc> = row.try_get(22)?;
        Ok(ColumnProfile {
            id,
            database_name: row.try_get(1)?,
            table_name: row.try_get(2)?,
            column_name: row.try_get(3)?,
            data_type: row.try_get(4)?,
            table_row_count: row.try_get(5)?,
            null_count: row.try_get(6)?,
            non_null_count: row.try_get(7)?,
            distinct_count: row.try_get(8)?,
            min_value: row.try_get(9)?,
            max_value: row.try_get(10)?,
            length_min: row.try_get(11)?,
            length_max: row.try_get(12)?,
            char_classes: row.try_get(13)?,
            common_prefixes: row.try_get(14)?,
            top_k_values: top_k_from_json(row.try_get(15)?),
            distinct_sample: strings_from_json(row.try_get(16)?),
            minhash_signature: signature_from_json(row.try_get(17)?),
            english_description: row.try_get(18)?,
            short_summary: row.try_get(19)?,
            long_summary: row.try_get(20)?,
            embedding: row
                .try_get::<_, Option<String>>(21)?
                .and_then(|t| parse_vector_text(&t)),
            generated_at,
        })
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn load_all(&self) -> Result<Vec<ColumnProfile>> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM column_profiles \
             ORDER BY database_name, table_name, column_name"
        );
        let rows = self
            .client
            .query(&sql, &[])
            .await
            .context("loading column_profiles")?;
        debug!(count = rows.len(), "loaded column profiles");
        rows.iter().map(Self::row_to_profile).collect()
    }

    async fn load_sampled(&self) -> Result<Vec<ColumnProfile>> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM column_profiles \
             WHERE top_k_values IS NOT NULL OR distinct_sample IS NOT NULL"
        );
        let rows = self
            .client
            .query(&sql, &[])
            .await
            .context("loading sampled column_profiles")?;
        rows.iter().map(Self::row_to_profile).collect()
    }

    async fn load_for_fields(&self, fields: &[Field]) -> Result<Vec<ColumnProfile>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let tables: Vec<&str> = fields.iter().map(|f| f.table.as_str()).collect();
        let columns: Vec<&str> = fields.iter().map(|f| f.column.as_str()).collect();
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM column_profiles \
             WHERE (table_name, column_name) IN \
               (SELECT unnest($1::text[]), unnest($2::text[]))"
        );
        let rows = self
            .client
            .query(&sql, &[&tables, &columns])
            .await
            .context("loading column_profiles for fields")?;
        rows.iter().map(Self::row_to_profile).collect()
    }
}

// ============================================================================
// JSONB decoding
// ============================================================================

/// `top_k_values` arrives either as `[{"value": .., "count": ..}, ..]` or as
/// a bare array of scalars, depending on profiler version.
fn top_k_from_json(value: Option<serde_json::Value>) -> Vec<TopKValue> {
    let Some(serde_json::Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            serde_json::Value::Object(map) => {
                let value = map.get("value").map(json_scalar_to_string)?;
                let count = map.get("count").and_then(|c| c.as_i64()).unwrap_or(0);
                Some(TopKValue { value, count })
            }
            other => Some(TopKValue {
                value: json_scalar_to_string(&other),
                count: 0,
            }),
        })
        .collect()
}

fn strings_from_json(value: Option<serde_json::Value>) -> Vec<String> {
    let Some(serde_json::Value::Array(items)) = value else {
        return Vec::new();
    };
    items.iter().map(json_scalar_to_string).collect()
}

fn signature_from_json(value: Option<serde_json::Value>) -> Vec<u64> {
    let Some(serde_json::Value::Array(items)) = value else {
        return Vec::new();
    };
    items.iter().filter_map(|v| v.as_u64()).collect()
}

fn json_scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parses pgvector's text rendering, `[0.1,0.2,...]`.
fn parse_vector_text(text: &str) -> Option<Vec<f32>> {
    let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(',')
        .map(|part| part.trim().parse::<f32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_k_handles_both_encodings() {
        let dicts = top_k_from_json(Some(json!([
            {"value": "open", "count": 7},
            {"value": 2024, "count": 1},
        ])));
        assert_eq!(dicts[0].value, "open");
        assert_eq!(dicts[0].count, 7);
        assert_eq!(dicts[1].value, "2024");

        let scalars = top_k_from_json(Some(json!(["a", 3])));
        assert_eq!(scalars[0].value, "a");
        assert_eq!(scalars[1].value, "3");

        assert!(top_k_from_json(None).is_empty());
        assert!(top_k_from_json(Some(json!("not-an-array"))).is_empty());
    }

    #[test]
    fn vector_text_roundtrip() {
        assert_eq!(
            parse_vector_text("[0.5, -1.25,3]"),
            Some(vec![0.5, -1.25, 3.0])
        );
        assert_eq!(parse_vector_text("[]"), Some(vec![]));
        assert_eq!(parse_vector_text("garbage"), None);
    }

    #[tokio::test]
    async fn memory_store_filters_sampled_and_fields() {
        let with = crate::tests::profile(1, "documents", "status", &["open"]);
        let without = crate::tests::profile(2, "documents", "id", &[]);
        let store = MemoryProfileStore::new(vec![with, without]);

        let sampled = store.load_sampled().await.unwrap();
        assert_eq!(sampled.len(), 1);
        assert_eq!(sampled[0].column_name, "status");

        let picked = store
            .load_for_fields(&[Field::new("documents", "id")])
            .await
            .unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].column_name, "id");
    }
}

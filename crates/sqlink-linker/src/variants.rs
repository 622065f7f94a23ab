//! Prompt variant construction.
//!
//! Five variants cross two schema scopes (focused top-ranked columns vs the
//! full catalog) with three profile depths (short summaries only, plus long
//! summaries, plus SME descriptions). They are ordered cheapest-first so
//! the orchestrator can climb the ladder on retries.
//!
//! Focused selection ranks column profiles by cosine similarity between the
//! question embedding and the profile embedding, then bumps columns whose
//! sampled values contain a literal mentioned in the question.

use crate::{ChatMessage, Embedder};
use anyhow::Context as _;
use regex::Regex;
use serde::Serialize;
use sqlink_profile::{ColumnProfile, ProfileStore, TopKValue};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Focused,
    Full,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::Focused => "focused",
            SchemaKind::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    Minimal,
    Maximal,
    FullProfile,
}

impl ProfileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Minimal => "minimal",
            ProfileKind::Maximal => "maximal",
            ProfileKind::FullProfile => "full_profile",
        }
    }
}

/// Selection knobs: `top_m` columns from the embedding ranking, capped to
/// `max_tables` tables and `max_columns_per_table` columns each.
#[derive(Debug, Clone)]
pub struct VariantKnobs {
    pub top_m: usize,
    pub max_columns_per_table: usize,
    pub max_tables: usize,
    /// Optional table cap for the full-schema variants.
    pub full_schema_cap: Option<usize>,
    /// Trim long summaries to the format line plus a few example values.
    pub trim_long_to_examples: bool,
}

impl Default for VariantKnobs {
    fn default() -> Self {
        Self {
            top_m: 50,
            max_columns_per_table: 3,
            max_tables: 6,
            full_schema_cap: None,
            trim_long_to_examples: true,
        }
    }
}

#[derive(Debug, Clone)]
struct ColumnCtx {
    name: String,
    short_summary: Option<String>,
    long_summary: Option<String>,
    english_description: Option<String>,
}

#[derive(Debug, Clone)]
struct TableCtx {
    name: String,
    alias: String,
    columns: Vec<ColumnCtx>,
}

/// Tables/aliases/columns that went into one variant, for logs and
/// diagnostics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct VariantPreview {
    pub table_count: usize,
    pub tables: Vec<TablePreview>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TablePreview {
    pub name: String,
    pub alias: String,
    pub columns: Vec<String>,
}

/// One ready-to-send prompt. Immutable once built; the orchestrator only
/// appends correction messages to a clone of `messages`.
#[derive(Debug, Clone)]
pub struct PromptVariant {
    pub name: String,
    pub schema_kind: SchemaKind,
    pub profile_kind: ProfileKind,
    pub messages: Vec<ChatMessage>,
    pub preview: VariantPreview,
}

// ============================================================================
// Builder
// ============================================================================

pub struct PromptVariantBuilder {
    store: Arc<dyn ProfileStore>,
    embedder: Arc<dyn Embedder>,
    knobs: VariantKnobs,
    tenant_column: String,
    tenant_param: String,
}

impl PromptVariantBuilder {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        embedder: Arc<dyn Embedder>,
        knobs: VariantKnobs,
        tenant_column: impl Into<String>,
        tenant_param: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            knobs,
            tenant_column: tenant_column.into(),
            tenant_param: tenant_param.into(),
        }
    }

    /// Builds the five variants, cheapest context first.
    pub async fn build(&self, question: &str) -> anyhow::Result<Vec<PromptVariant>> {
        let profiles = self
            .store
            .load_all()
            .await
            .context("loading column profiles")?;
        let focused = self.focused_tables(question, &profiles).await;
        let full = self.full_tables(&profiles);

        let combos = [
            (SchemaKind::Focused, ProfileKind::Minimal),
            (SchemaKind::Focused, ProfileKind::Maximal),
            (SchemaKind::Focused, ProfileKind::FullProfile),
            (SchemaKind::Full, ProfileKind::Minimal),
            (SchemaKind::Full, ProfileKind::Maximal),
        ];

        let rules = system_rules(&self.tenant_column, &self.tenant_param);
        let variants = combos
            .into_iter()
            .map(|(schema_kind, profile_kind)| {
                let tables = match schema_kind {
                    SchemaKind::Focused => &focused,
                    SchemaKind::Full => &full,
                };
                let context = render_context(tables, profile_kind);
                let preview = VariantPreview {
                    table_count: tables.len(),
                    tables: tables
                        .iter()
                        .map(|t| TablePreview {
                            name: t.name.clone(),
                            alias: t.alias.clone(),
                            columns: t.columns.iter().map(|c| c.name.clone()).collect(),
                        })
                        .collect(),
                };
                PromptVariant {
                    name: format!("{}_{}", schema_kind.as_str(), profile_kind.as_str()),
                    schema_kind,
                    profile_kind,
                    messages: vec![
                        ChatMessage::system(rules.clone()),
                        ChatMessage::assistant(context),
                        ChatMessage::user(format!("Question:\n{question}")),
                    ],
                    preview,
                }
            })
            .collect();
        Ok(variants)
    }

    /// Focused schema: top-M cosine matches plus literal-aware bumps,
    /// capped to T tables and P columns per table.
    async fn focused_tables(&self, question: &str, profiles: &[ColumnProfile]) -> Vec<TableCtx> {
        // rank, literal_hit, profile index
        struct Scored {
            rank: usize,
            literal_hit: bool,
            idx: usize,
        }

        let ranked_indices: Vec<usize> = match self.embedder.embed(question).await {
            Ok(question_embedding) if !question_embedding.is_empty() => {
                let mut with_scores: Vec<(usize, f32)> = profiles
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, p)| {
                        p.embedding
                            .as_ref()
                            .map(|e| (idx, cosine(&question_embedding, e)))
                    })
                    .collect();
                with_scores
                    .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                with_scores.into_iter().map(|(idx, _)| idx).collect()
            }
            Ok(_) => {
                warn!("empty question embedding; using static profile order");
                (0..profiles.len()).collect()
            }
            Err(error) => {
                warn!(%error, "question embedding failed; using static profile order");
                (0..profiles.len()).collect()
            }
        };

        let mut by_table: BTreeMap<(String, String), Vec<Scored>> = BTreeMap::new();
        for (rank, &idx) in ranked_indices.iter().take(self.knobs.top_m).enumerate() {
            let p = &profiles[idx];
            by_table
                .entry((p.database_name.clone(), p.table_name.clone()))
                .or_default()
                .push(Scored {
                    rank,
                    literal_hit: false,
                    idx,
                });
        }

        // Literal bump: any column whose sampled values contain a literal
        // from the question joins its table, outranking cosine picks.
        let literals = question_literals(question);
        let mut literal_tables: HashSet<(String, String)> = HashSet::new();
        if !literals.is_empty() {
            for (idx, p) in profiles.iter().enumerate() {
                if profile_contains_literal(p, &literals) {
                    let key = (p.database_name.clone(), p.table_name.clone());
                    literal_tables.insert(key.clone());
                    by_table.entry(key).or_default().push(Scored {
                        rank: usize::MAX,
                        literal_hit: true,
                        idx,
                    });
                }
            }
        }

        // Table order: literal-hit tables first, then best cosine rank.
        let mut keys: Vec<&(String, String)> = by_table.keys().collect();
        keys.sort_by_key(|k| {
            let best = by_table[*k].iter().map(|s| s.rank).min().unwrap_or(usize::MAX);
            (!literal_tables.contains(*k), best)
        });
        let keys: Vec<(String, String)> = keys
            .into_iter()
            .take(self.knobs.max_tables)
            .cloned()
            .collect();

        let mut tables = Vec::new();
        let mut used_aliases = HashSet::new();
        for key in keys {
            let mut scored = by_table.remove(&key).unwrap_or_default();
            scored.sort_by_key(|s| (!s.literal_hit, s.rank));

            let mut seen = HashSet::new();
            let mut columns = Vec::new();
            for s in scored {
                let p = &profiles[s.idx];
                if !seen.insert(p.column_name.clone()) {
                    continue;
                }
                columns.push(self.column_ctx(p));
                if columns.len() >= self.knobs.max_columns_per_table {
                    break;
                }
            }

            let alias = make_alias(&key.1, &used_aliases);
            used_aliases.insert(alias.clone());
            tables.push(TableCtx {
                name: key.1,
                alias,
                columns,
            });
        }
        debug!(tables = tables.len(), "focused schema assembled");
        tables
    }

    fn full_tables(&self, profiles: &[ColumnProfile]) -> Vec<TableCtx> {
        let mut by_table: BTreeMap<(String, String), Vec<&ColumnProfile>> = BTreeMap::new();
        for p in profiles {
            by_table
                .entry((p.database_name.clone(), p.table_name.clone()))
                .or_default()
                .push(p);
        }

        let mut tables = Vec::new();
        let mut used_aliases = HashSet::new();
        for ((_, name), mut columns) in by_table {
            if let Some(cap) = self.knobs.full_schema_cap {
                if tables.len() >= cap {
                    break;
                }
            }
            columns.sort_by(|a, b| a.column_name.cmp(&b.column_name));
            let alias = make_alias(&name, &used_aliases);
            used_aliases.insert(alias.clone());
            tables.push(TableCtx {
                name,
                alias,
                columns: columns.into_iter().map(|p| self.column_ctx(p)).collect(),
            });
        }
        tables
    }

    fn column_ctx(&self, profile: &ColumnProfile) -> ColumnCtx {
        let long_summary = if self.knobs.trim_long_to_examples {
            maybe_trim_long(profile.long_summary.as_deref(), &profile.top_k_values)
        } else {
            profile.long_summary.clone()
        };
        ColumnCtx {
            name: profile.column_name.clone(),
            short_summary: profile.short_summary.clone(),
            long_summary,
            english_description: profile.english_description.clone(),
        }
    }
}

// ============================================================================
// Rules, rendering, helpers
// ============================================================================

/// System message pinning the output contract.
pub fn system_rules(tenant_column: &str, tenant_param: &str) -> String {
    format!(
        "You are an expert data analyst who writes safe, correct PostgreSQL.\n\
         Rules:\n\
         - Read-only: SELECT queries only. Never write DDL/DML (no CREATE/INSERT/UPDATE/DELETE/TRUNCATE).\n\
         - Use only the tables and columns provided in CONTEXT. If something is not in CONTEXT, do not use it.\n\
         - Qualify columns with table aliases. Use explicit JOINs.\n\
         - Every tenant-owned table must be filtered with `{tenant_column} = {tenant_param}`.\n\
         - Choose literals that match the column formats/examples in LONG SUMMARIES (e.g., 'YYYY-YYYY', ISO dates).\n\
         - Prefer standard SQL; avoid vendor-specific functions unless necessary for PostgreSQL.\n\
         - If multiple interpretations are possible, choose the most likely reading from the given CONTEXT.\n\
         - Output SQL only. No explanations, comments, or markdown."
    )
}

fn render_context(tables: &[TableCtx], profile_kind: ProfileKind) -> String {
    let mut lines = vec![
        "CONTEXT START\n".to_string(),
        "DATABASE DIALECT: PostgreSQL\n".to_string(),
        "TABLES & COLUMNS".to_string(),
    ];
    for t in tables {
        lines.push(format!("Table {} AS {}", t.name, t.alias));
        for c in &t.columns {
            let short = c.short_summary.as_deref().unwrap_or("");
            lines.push(format!("  - {}.{}: {short}", t.alias, c.name));
        }
    }

    match profile_kind {
        ProfileKind::Minimal => {}
        ProfileKind::Maximal => {
            lines.push("\nLONG SUMMARIES".to_string());
            for t in tables {
                for c in &t.columns {
                    let long = c.long_summary.as_deref().unwrap_or("");
                    lines.push(format!("- {}.{}:\n  {long}", t.alias, c.name));
                }
            }
        }
        ProfileKind::FullProfile => {
            lines.push("\nFULL PROFILE (SME + long)".to_string());
            for t in tables {
                for c in &t.columns {
                    let mut parts = Vec::new();
                    if let Some(e) = c.english_description.as_deref() {
                        parts.push(e);
                    }
                    if let Some(l) = c.long_summary.as_deref() {
                        parts.push(l);
                    }
                    lines.push(format!("- {}.{}:\n  {}", t.alias, c.name, parts.join("\n  ")));
                }
            }
        }
    }

    lines.extend([
        "\nHINTS".to_string(),
        "- Use only the tables/columns above.".to_string(),
        "- Literal formats must match LONG SUMMARIES (e.g., 'YYYY-YYYY' for academic years)."
            .to_string(),
        "- If a filter literal is needed, prefer values that appear in the examples.".to_string(),
        "\nCONTEXT END".to_string(),
    ]);
    lines.join("\n")
}

/// Long summary trimmed to the format line plus up to three example values.
fn maybe_trim_long(long_summary: Option<&str>, top_k: &[TopKValue]) -> Option<String> {
    let long_summary = long_summary?;
    let examples: Vec<&str> = top_k.iter().take(3).map(|kv| kv.value.as_str()).collect();
    if examples.is_empty() {
        Some(long_summary.to_string())
    } else {
        Some(format!(
            "{long_summary}\nCommon values include: {}.",
            examples.join(", ")
        ))
    }
}

/// Short unique alias: first two alphanumeric characters, numbered on
/// collision (`do`, `do1`, `do2`).
fn make_alias(table_name: &str, used: &HashSet<String>) -> String {
    let base: String = table_name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(2)
        .collect::<String>()
        .to_lowercase();
    let base = if base.is_empty() { "t".to_string() } else { base };
    if !used.contains(&base) {
        return base;
    }
    let mut i = 1;
    loop {
        let candidate = format!("{base}{i}");
        if !used.contains(&candidate) {
            return candidate;
        }
        i += 1;
    }
}

/// Literal candidates mined from the question text: year ranges, ISO
/// dates, short numbers, quoted strings. Sorted for determinism.
pub fn question_literals(question: &str) -> Vec<String> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"\b\d{4}-\d{4}\b",
            r"\b\d{4}-\d{2}-\d{2}\b",
            r"\b\d{1,3}(?:,\d{3})*(?:\.\d+)?\b",
            r#"['‘“"]([^'’”"]+)['’”"]"#,
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    });

    let mut literals = BTreeSet::new();
    for (i, pattern) in patterns.iter().enumerate() {
        for captures in pattern.captures_iter(question) {
            let m = if i == 3 {
                captures.get(1)
            } else {
                captures.get(0)
            };
            if let Some(m) = m {
                let value = m.as_str().trim();
                if !value.is_empty() {
                    literals.insert(value.to_string());
                }
            }
        }
    }
    literals.into_iter().collect()
}

fn profile_contains_literal(profile: &ColumnProfile, literals: &[String]) -> bool {
    literals.iter().any(|lit| {
        let needle = lit.to_lowercase();
        profile
            .sample_values()
            .iter()
            .any(|v| v.to_lowercase().contains(&needle))
    })
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use sqlink_profile::MemoryProfileStore;

    fn profile(
        id: i64,
        table: &str,
        column: &str,
        samples: &[&str],
        embedding: Option<Vec<f32>>,
    ) -> ColumnProfile {
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
            english_description: Some(format!("{table} {column}")),
            short_summary: Some(format!("short {column}")),
            long_summary: Some(format!("long {column}")),
            embedding,
            generated_at: Utc::now(),
        }
    }

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("embedding service unavailable")
        }
    }

    fn builder(embedder: Arc<dyn Embedder>, profiles: Vec<ColumnProfile>) -> PromptVariantBuilder {
        PromptVariantBuilder::new(
            Arc::new(MemoryProfileStore::new(profiles)),
            embedder,
            VariantKnobs::default(),
            "business_id",
            "$1",
        )
    }

    #[test]
    fn question_literal_patterns() {
        let lits = question_literals(
            "How many projects ran in 2020-2021, started after 2020-09-01, with 'fine arts' focus and 3 phases?",
        );
        assert!(lits.contains(&"2020-2021".to_string()));
        assert!(lits.contains(&"2020-09-01".to_string()));
        assert!(lits.contains(&"fine arts".to_string()));
        assert!(lits.contains(&"3".to_string()));
        // Four-digit standalone numbers are not treated as literals.
        assert!(!lits.contains(&"2020".to_string()));
    }

    #[test]
    fn aliases_are_short_and_unique() {
        let mut used = HashSet::new();
        for expected in ["do", "do1", "do2"] {
            let alias = make_alias("documents", &used);
            assert_eq!(alias, expected);
            used.insert(alias);
        }
        assert_eq!(make_alias("__", &used), "t");
    }

    #[test]
    fn long_summaries_gain_example_values() {
        let top_k: Vec<TopKValue> = ["a", "b", "c", "d"]
            .iter()
            .map(|v| TopKValue {
                value: v.to_string(),
                count: 1,
            })
            .collect();
        assert_eq!(
            maybe_trim_long(Some("format: text"), &top_k).unwrap(),
            "format: text\nCommon values include: a, b, c."
        );
        assert_eq!(
            maybe_trim_long(Some("format: text"), &[]).unwrap(),
            "format: text"
        );
        assert_eq!(maybe_trim_long(None, &top_k), None);
    }

    #[test]
    fn cosine_basics() {
        assert_eq!(cosine(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn five_variants_cheapest_first() {
        let b = builder(
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            vec![profile(1, "documents", "name", &["a"], Some(vec![1.0, 0.0]))],
        );
        let variants = b.build("list documents").await.unwrap();
        let names: Vec<&str> = variants.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "focused_minimal",
                "focused_maximal",
                "focused_full_profile",
                "full_minimal",
                "full_maximal",
            ]
        );
        for v in &variants {
            assert_eq!(v.messages.len(), 3);
            assert!(v.messages[1].content.contains("CONTEXT START"));
            assert!(v.messages[1].content.contains("CONTEXT END"));
            assert!(v.messages[2].content.starts_with("Question:"));
        }
    }

    #[tokio::test]
    async fn focused_ranking_follows_the_embedding() {
        let profiles = vec![
            profile(1, "documents", "name", &["report"], Some(vec![1.0, 0.0])),
            profile(2, "projects", "name", &["apollo"], Some(vec![0.0, 1.0])),
        ];
        let b = builder(Arc::new(FixedEmbedder(vec![0.0, 1.0])), profiles);
        let variants = b.build("which projects exist?").await.unwrap();
        let focused = &variants[0].preview;
        assert_eq!(focused.tables[0].name, "projects");
    }

    #[tokio::test]
    async fn literal_bump_pulls_in_matching_columns() {
        let profiles = vec![
            profile(1, "documents", "name", &["report"], Some(vec![1.0, 0.0])),
            profile(
                2,
                "projects",
                "academic_year",
                &["2020-2021", "2021-2022"],
                None, // no embedding; only reachable through the literal bump
            ),
        ];
        let b = builder(Arc::new(FixedEmbedder(vec![1.0, 0.0])), profiles);
        let variants = b.build("documents from 2020-2021").await.unwrap();
        let focused = &variants[0].preview;
        // Literal-hit tables are ordered first.
        assert_eq!(focused.tables[0].name, "projects");
        assert_eq!(focused.tables[0].columns, vec!["academic_year".to_string()]);
    }

    #[tokio::test]
    async fn caps_apply_to_tables_and_columns() {
        let mut profiles = Vec::new();
        let mut id = 0;
        for table in ["t1", "t2", "t3", "t4", "t5", "t6", "t7", "t8"] {
            for column in ["c1", "c2", "c3", "c4", "c5"] {
                id += 1;
                profiles.push(profile(id, table, column, &["v"], Some(vec![1.0])));
            }
        }
        let b = builder(Arc::new(FixedEmbedder(vec![1.0])), profiles);
        let variants = b.build("anything").await.unwrap();
        let focused = &variants[0].preview;
        assert!(focused.table_count <= 6);
        for t in &focused.tables {
            assert!(t.columns.len() <= 3);
        }
        // Full variants carry every table.
        assert_eq!(variants[3].preview.table_count, 8);
        assert_eq!(variants[3].preview.tables[0].columns.len(), 5);
    }

    #[tokio::test]
    async fn embedder_failure_degrades_to_static_order() {
        let profiles = vec![
            profile(1, "documents", "name", &["report"], Some(vec![1.0, 0.0])),
            profile(2, "projects", "name", &["apollo"], Some(vec![0.0, 1.0])),
        ];
        let b = builder(Arc::new(FailingEmbedder), profiles);
        let variants = b.build("projects").await.unwrap();
        assert_eq!(variants.len(), 5);
        assert!(variants[0].preview.table_count > 0);
    }

    #[test]
    fn maximal_context_renders_long_section() {
        let tables = vec![TableCtx {
            name: "documents".into(),
            alias: "do".into(),
            columns: vec![ColumnCtx {
                name: "name".into(),
                short_summary: Some("file name".into()),
                long_summary: Some("free text".into()),
                english_description: Some("the file's name".into()),
            }],
        }];
        let minimal = render_context(&tables, ProfileKind::Minimal);
        assert!(minimal.contains("Table documents AS do"));
        assert!(minimal.contains("  - do.name: file name"));
        assert!(!minimal.contains("LONG SUMMARIES"));

        let maximal = render_context(&tables, ProfileKind::Maximal);
        assert!(maximal.contains("LONG SUMMARIES"));
        assert!(maximal.contains("free text"));

        let full = render_context(&tables, ProfileKind::FullProfile);
        assert!(full.contains("FULL PROFILE (SME + long)"));
        assert!(full.contains("the file's name"));
    }

    #[test]
    fn rules_pin_the_tenant_contract() {
        let rules = system_rules("business_id", "$1");
        assert!(rules.contains("business_id = $1"));
        assert!(rules.contains("SELECT queries only"));
        assert!(rules.contains("Output SQL only"));
    }
}

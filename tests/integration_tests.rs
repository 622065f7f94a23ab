//! End-to-end run of the schema-linking pipeline with fake collaborators:
//! profiles feed the value index and the prompt variants, a scripted model
//! first produces a write statement and then a correct tenant-scoped
//! SELECT, and a fake executor returns rows. Exercises the whole
//! build-index → variants → guard → execute loop without a database or a
//! network.

use async_trait::async_trait;
use chrono::Utc;
use sqlink_exec::{ExecError, QueryOutput, SqlExecutor};
use sqlink_guard::{GuardPolicy, SchemaCatalog, SqlGuard};
use sqlink_index::{IndexConfig, SharedValueIndex, ValueLshIndex};
use sqlink_linker::{
    ChatMessage, Embedder, LinkError, LinkerConfig, LlmClient, PromptVariantBuilder,
    SchemaLinker, VariantKnobs,
};
use sqlink_profile::{ColumnProfile, Field, MemoryProfileStore, TopKValue};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

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
        english_description: Some(format!("The {column} of a {table} row.")),
        short_summary: Some(format!("{table} {column}")),
        long_summary: Some(format!("Free-form {column} values.")),
        embedding: Some(vec![1.0, 0.0, 0.0]),
        generated_at: Utc::now(),
    }
}

struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, _messages: &[ChatMessage]) -> anyhow::Result<String> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

struct StaticEmbedder;

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0])
    }
}

struct FakeExecutor {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SqlExecutor for FakeExecutor {
    async fn run(&self, sql: &str, _tenant_id: i64) -> Result<QueryOutput, ExecError> {
        self.calls.lock().unwrap().push(sql.to_string());
        Ok(QueryOutput {
            columns: vec!["name".into()],
            rows: vec![vec![serde_json::json!("annual-report.pdf")]],
            row_count: 1,
            truncated: false,
            execution_ms: 3,
            description: QueryOutput::describe(1, false),
        })
    }
}

fn pipeline(responses: &[&str]) -> (SchemaLinker, Arc<FakeExecutor>) {
    let profiles = vec![
        profile(1, "documents", "name", &["annual-report.pdf", "minutes.docx"]),
        profile(2, "documents", "status", &["open", "closed"]),
        profile(3, "projects", "academic_year", &["2020-2021", "2021-2022"]),
    ];

    let mut index = ValueLshIndex::new(IndexConfig::default());
    index.build(&profiles);
    let value_index = Arc::new(SharedValueIndex::new(index));

    let builder = PromptVariantBuilder::new(
        Arc::new(MemoryProfileStore::new(profiles)),
        Arc::new(StaticEmbedder),
        VariantKnobs::default(),
        "business_id",
        "$1",
    );

    let policy = GuardPolicy {
        allowed_tables: vec!["public.documents".into(), "public.projects".into()],
        tenant_required_tables: vec!["public.documents".into(), "public.projects".into()],
        ..GuardPolicy::default()
    };
    let catalog = SchemaCatalog::new().with_table(
        "public.documents",
        &[("id", "integer"), ("business_id", "integer"), ("name", "text")],
    );
    let guard = SqlGuard::new(policy, catalog).unwrap();

    let executor = Arc::new(FakeExecutor {
        calls: Mutex::new(Vec::new()),
    });
    let linker = SchemaLinker::new(
        Arc::new(ScriptedLlm::new(responses)),
        builder,
        guard,
        executor.clone(),
        value_index,
        LinkerConfig::default(),
    );
    (linker, executor)
}

#[tokio::test]
async fn rejected_write_is_retried_into_a_guarded_select() {
    init_tracing();
    let (linker, executor) = pipeline(&[
        "INSERT INTO documents (name) VALUES ('x')",
        "SELECT d.name FROM documents d WHERE d.business_id = $1 AND d.status = 'open'",
    ]);

    let outcome = linker.link("Which documents are open?", 42).await.unwrap();
    assert_eq!(outcome.attempts, 2);
    assert!(outcome.linked_fields.contains(&Field::new("documents", "name")));
    assert!(outcome
        .linked_fields
        .contains(&Field::new("documents", "status")));
    assert_eq!(outcome.result.rows[0][0], serde_json::json!("annual-report.pdf"));

    // Only the guarded statement reached the executor.
    let calls = executor.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains("business_id = $1"));
}

#[tokio::test]
async fn select_star_reaches_the_executor_expanded() {
    init_tracing();
    let (linker, executor) = pipeline(&["SELECT * FROM documents WHERE business_id = $1"]);

    let outcome = linker.link("Show everything about documents", 42).await.unwrap();
    assert_eq!(outcome.attempts, 1);
    let calls = executor.calls.lock().unwrap();
    assert!(!calls[0].contains('*'));
    assert!(calls[0].contains("documents.name"));
    drop(calls);
    assert!(outcome.final_sql.contains("documents.id"));
}

#[tokio::test]
async fn unguardable_answers_exhaust_without_executing() {
    init_tracing();
    let (linker, executor) = pipeline(&[
        "DROP TABLE documents",
        "DELETE FROM documents WHERE business_id = $1",
        "UPDATE documents SET name = 'x' WHERE business_id = $1",
    ]);

    let err = linker.link("Remove everything", 42).await.unwrap_err();
    assert!(matches!(err, LinkError::RetriesExhausted { attempts: 3, .. }));
    assert!(executor.calls.lock().unwrap().is_empty());
}

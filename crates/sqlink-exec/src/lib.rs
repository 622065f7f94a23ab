//! Guarded execution of already-validated SQL.
//!
//! The guard decides *what* may run; this crate decides *how*: every
//! statement runs inside its own read-only transaction hardened with
//! `SET LOCAL` timeouts and a pinned `search_path`, rows are streamed and
//! capped, and the transaction is rolled back on every exit path. The
//! tenant id is only ever bound as a parameter, never interpolated into
//! the SQL text.

use async_trait::async_trait;
use futures_util::{pin_mut, TryStreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Row, Transaction};
use tracing::{debug, warn};

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "default_statement_timeout_s")]
    pub statement_timeout_s: u64,
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
    /// Session `work_mem` override, e.g. `"64MB"`.
    #[serde(default)]
    pub work_mem: Option<String>,
    #[serde(default = "default_lock_timeout_s")]
    pub lock_timeout_s: u64,
    #[serde(default = "default_idle_timeout_s")]
    pub idle_in_transaction_timeout_s: u64,
}

fn default_statement_timeout_s() -> u64 {
    5
}

fn default_row_limit() -> usize {
    500
}

fn default_lock_timeout_s() -> u64 {
    1
}

fn default_idle_timeout_s() -> u64 {
    5
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            statement_timeout_s: default_statement_timeout_s(),
            row_limit: default_row_limit(),
            work_mem: None,
            lock_timeout_s: default_lock_timeout_s(),
            idle_in_transaction_timeout_s: default_idle_timeout_s(),
        }
    }
}

impl ExecConfig {
    pub fn statement_timeout_ms(&self) -> u64 {
        self.statement_timeout_s * 1000
    }
}

/// `SET LOCAL` batch applied at the start of every transaction. `LOCAL`
/// scopes everything to the transaction, so nothing leaks into the pooled
/// connection.
pub fn session_setup(config: &ExecConfig) -> String {
    let mut statements = vec![
        "SET LOCAL search_path = public".to_string(),
        format!(
            "SET LOCAL statement_timeout = {}",
            config.statement_timeout_ms()
        ),
        format!("SET LOCAL lock_timeout = '{}s'", config.lock_timeout_s),
        format!(
            "SET LOCAL idle_in_transaction_session_timeout = '{}s'",
            config.idle_in_transaction_timeout_s
        ),
    ];
    if let Some(work_mem) = &config.work_mem {
        statements.push(format!(
            "SET LOCAL work_mem = '{}'",
            work_mem.replace('\'', "''")
        ));
    }
    statements.join("; ")
}

/// Highest positional parameter referenced by the statement (`$n`).
pub fn placeholder_count(sql: &str) -> usize {
    // Static pattern, cannot fail to compile.
    let re = Regex::new(r"\$(\d+)").unwrap();
    re.captures_iter(sql)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}

// ============================================================================
// Output & errors
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    pub truncated: bool,
    pub execution_ms: u64,
    pub description: String,
}

impl QueryOutput {
    pub fn describe(row_count: usize, truncated: bool) -> String {
        if truncated {
            format!("{row_count} row(s), truncated at limit")
        } else {
            format!("{row_count} row(s)")
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("statement timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("statement attempted a write in a read-only transaction")]
    ReadOnlyViolation,
    #[error("database error: {0}")]
    Database(#[source] tokio_postgres::Error),
}

/// Maps driver errors onto the kinds the orchestrator reacts to.
/// 57014 is what a `statement_timeout` cancellation raises; 25006 is a
/// write rejected by the read-only transaction.
fn classify(error: tokio_postgres::Error, timeout_ms: u64) -> ExecError {
    match error.code() {
        Some(code) if *code == SqlState::QUERY_CANCELED => ExecError::Timeout { timeout_ms },
        Some(code) if *code == SqlState::READ_ONLY_SQL_TRANSACTION => {
            ExecError::ReadOnlyViolation
        }
        _ => ExecError::Database(error),
    }
}

/// Row cap bookkeeping for the streaming loop: admits up to `limit` rows,
/// records that a further row existed.
#[derive(Debug)]
struct RowBudget {
    limit: usize,
    admitted: usize,
    truncated: bool,
}

impl RowBudget {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            admitted: 0,
            truncated: false,
        }
    }

    /// Whether the next row may be kept. The first refusal marks the
    /// output truncated.
    fn admit(&mut self) -> bool {
        if self.admitted < self.limit {
            self.admitted += 1;
            true
        } else {
            self.truncated = true;
            false
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Executor seam the orchestrator depends on; tests substitute fakes.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn run(&self, sql: &str, tenant_id: i64) -> Result<QueryOutput, ExecError>;
}

/// Real executor over a tokio-postgres client.
pub struct PgExecutor {
    client: Mutex<Client>,
    config: ExecConfig,
}

impl PgExecutor {
    pub fn new(client: Client, config: ExecConfig) -> Self {
        Self {
            client: Mutex::new(client),
            config,
        }
    }

    async fn run_in_transaction(
        transaction: &Transaction<'_>,
        config: &ExecConfig,
        sql: &str,
        tenant_id: i64,
    ) -> Result<QueryOutput, ExecError> {
        let timeout_ms = config.statement_timeout_ms();
        let started = Instant::now();
        transaction
            .batch_execute(&session_setup(config))
            .await
            .map_err(|e| classify(e, timeout_ms))?;

        let statement = transaction
            .prepare(sql)
            .await
            .map_err(|e| classify(e, timeout_ms))?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let params: Vec<&(dyn ToSql + Sync)> = if placeholder_count(sql) > 0 {
            vec![&tenant_id]
        } else {
            Vec::new()
        };
        let stream = transaction
            .query_raw(&statement, params)
            .await
            .map_err(|e| classify(e, timeout_ms))?;
        pin_mut!(stream);

        let mut budget = RowBudget::new(config.row_limit);
        let mut rows = Vec::new();
        while let Some(row) = stream.try_next().await.map_err(|e| classify(e, timeout_ms))? {
            if !budget.admit() {
                break;
            }
            rows.push(decode_row(&row));
        }
        if budget.truncated {
            warn!(limit = config.row_limit, "result truncated at row limit");
        }

        let row_count = rows.len();
        let truncated = budget.truncated;
        Ok(QueryOutput {
            description: QueryOutput::describe(row_count, truncated),
            columns,
            rows,
            row_count,
            truncated,
            execution_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn run(&self, sql: &str, tenant_id: i64) -> Result<QueryOutput, ExecError> {
        let timeout_ms = self.config.statement_timeout_ms();
        let mut client = self.client.lock().await;
        let transaction = client
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(|e| classify(e, timeout_ms))?;

        let outcome =
            Self::run_in_transaction(&transaction, &self.config, sql, tenant_id).await;

        // Read-only, so there is never anything to commit; an explicit
        // rollback releases locks promptly even on the success path.
        if let Err(rollback_err) = transaction.rollback().await {
            debug!(error = %rollback_err, "rollback after guarded statement failed");
        }
        outcome
    }
}

fn decode_row(row: &Row) -> Vec<serde_json::Value> {
    (0..row.len())
        .map(|idx| decode_cell(row, idx, row.columns()[idx].type_()))
        .collect()
}

fn decode_cell(row: &Row, idx: usize, ty: &Type) -> serde_json::Value {
    use serde_json::{json, Value};

    fn get<'a, T>(row: &'a Row, idx: usize) -> Option<T>
    where
        T: tokio_postgres::types::FromSql<'a>,
    {
        row.try_get::<_, Option<T>>(idx).ok().flatten()
    }

    let value = if *ty == Type::BOOL {
        get::<bool>(row, idx).map(Value::from)
    } else if *ty == Type::INT2 {
        get::<i16>(row, idx).map(Value::from)
    } else if *ty == Type::INT4 {
        get::<i32>(row, idx).map(Value::from)
    } else if *ty == Type::INT8 {
        get::<i64>(row, idx).map(Value::from)
    } else if *ty == Type::FLOAT4 {
        get::<f32>(row, idx).map(|v| json!(v))
    } else if *ty == Type::FLOAT8 {
        get::<f64>(row, idx).map(|v| json!(v))
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        get::<String>(row, idx).map(Value::from)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        get::<serde_json::Value>(row, idx)
    } else if *ty == Type::TIMESTAMP {
        get::<chrono::NaiveDateTime>(row, idx).map(|v| Value::from(v.to_string()))
    } else if *ty == Type::TIMESTAMPTZ {
        get::<chrono::DateTime<chrono::Utc>>(row, idx).map(|v| Value::from(v.to_rfc3339()))
    } else if *ty == Type::DATE {
        get::<chrono::NaiveDate>(row, idx).map(|v| Value::from(v.to_string()))
    } else {
        // Anything else (numeric, uuid, arrays) falls back to text when
        // the driver allows it.
        get::<String>(row, idx).map(Value::from)
    };
    value.unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_conservative() {
        let config = ExecConfig::default();
        assert_eq!(config.statement_timeout_s, 5);
        assert_eq!(config.statement_timeout_ms(), 5000);
        assert_eq!(config.row_limit, 500);
        assert_eq!(config.lock_timeout_s, 1);
        assert_eq!(config.idle_in_transaction_timeout_s, 5);
        assert!(config.work_mem.is_none());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ExecConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.row_limit, 500);
        let config: ExecConfig =
            serde_json::from_str(r#"{"row_limit": 10, "work_mem": "64MB"}"#).unwrap();
        assert_eq!(config.row_limit, 10);
        assert_eq!(config.work_mem.as_deref(), Some("64MB"));
    }

    #[test]
    fn session_setup_pins_the_transaction() {
        let setup = session_setup(&ExecConfig::default());
        assert!(setup.contains("SET LOCAL search_path = public"));
        assert!(setup.contains("SET LOCAL statement_timeout = 5000"));
        assert!(setup.contains("SET LOCAL lock_timeout = '1s'"));
        assert!(setup.contains("SET LOCAL idle_in_transaction_session_timeout = '5s'"));
        assert!(!setup.contains("work_mem"));
    }

    #[test]
    fn session_setup_quotes_work_mem() {
        let config = ExecConfig {
            work_mem: Some("64MB".into()),
            ..ExecConfig::default()
        };
        assert!(session_setup(&config).contains("SET LOCAL work_mem = '64MB'"));

        let hostile = ExecConfig {
            work_mem: Some("1'; DROP TABLE x; --".into()),
            ..ExecConfig::default()
        };
        assert!(session_setup(&hostile).contains("'1''; DROP TABLE x; --'"));
    }

    #[test]
    fn placeholder_scan_finds_the_highest_reference() {
        assert_eq!(placeholder_count("SELECT 1"), 0);
        assert_eq!(
            placeholder_count("SELECT * FROM d WHERE business_id = $1"),
            1
        );
        assert_eq!(
            placeholder_count("SELECT * FROM d WHERE a = $1 AND b = $2 AND c = $1"),
            2
        );
        assert_eq!(placeholder_count("SELECT '$not_a_param'"), 0);
    }

    #[test]
    fn row_budget_caps_and_flags() {
        let mut budget = RowBudget::new(2);
        assert!(budget.admit());
        assert!(budget.admit());
        assert!(!budget.truncated);
        assert!(!budget.admit());
        assert!(budget.truncated);
    }

    #[test]
    fn zero_row_limit_truncates_immediately() {
        let mut budget = RowBudget::new(0);
        assert!(!budget.admit());
        assert!(budget.truncated);
    }

    #[test]
    fn output_description_names_truncation() {
        assert_eq!(QueryOutput::describe(3, false), "3 row(s)");
        assert_eq!(QueryOutput::describe(500, true), "500 row(s), truncated at limit");
    }

    #[test]
    fn timeout_error_reports_the_budget() {
        let err = ExecError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "statement timed out after 5000 ms");
    }
}

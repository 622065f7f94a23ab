//! Static SQL guard and rewriter for model-generated queries.
//!
//! Generated SQL is never trusted: it is parsed, checked against an
//! allow-list of tables and schemas, required to carry tenant scoping on
//! every tenant-owned table, screened for denied functions, and rewritten
//! (tenant predicate injection, `SELECT *` expansion) before anything
//! reaches a database. Every rejection maps to a stable machine-readable
//! error kind so the orchestrator can feed it back to the model verbatim.
//!
//! The same parse also powers [`extract::extract_fields_and_literals`],
//! which pulls the `(table, column)` fields and scalar literals out of a
//! statement for schema-linking agreement checks.

mod ast;
pub mod extract;
pub mod guard;

pub use extract::extract_fields_and_literals;
pub use guard::SqlGuard;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Why a statement was rejected. The `Display` form is the stable error
/// kind string surfaced to callers and echoed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("failed_to_parse_sql")]
    EmptySql,
    #[error("sql_parse_error: {0}")]
    ParseError(String),
    #[error("non_select_statement")]
    NonSelect,
    #[error("set_operations_disallowed")]
    SetOperation,
    #[error("with_recursive_disallowed")]
    RecursiveCte,
    #[error("lateral_joins_disallowed")]
    LateralJoin,
    #[error("cross_schema_join")]
    CrossSchemaJoin,
    #[error("schema_not_allowed:{0}")]
    SchemaNotAllowed(String),
    #[error("table_not_allowed:{0}")]
    TableNotAllowed(String),
    #[error("missing_tenant_scope")]
    MissingTenantScope,
    #[error("missing_tenant_scope_for_alias:{0}")]
    MissingTenantScopeForAlias(String),
    #[error("function_denied:{0}")]
    FunctionDenied(String),
}

impl GuardError {
    /// Kind without the per-instance detail suffix.
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::EmptySql => "failed_to_parse_sql",
            GuardError::ParseError(_) => "sql_parse_error",
            GuardError::NonSelect => "non_select_statement",
            GuardError::SetOperation => "set_operations_disallowed",
            GuardError::RecursiveCte => "with_recursive_disallowed",
            GuardError::LateralJoin => "lateral_joins_disallowed",
            GuardError::CrossSchemaJoin => "cross_schema_join",
            GuardError::SchemaNotAllowed(_) => "schema_not_allowed",
            GuardError::TableNotAllowed(_) => "table_not_allowed",
            GuardError::MissingTenantScope => "missing_tenant_scope",
            GuardError::MissingTenantScopeForAlias(_) => "missing_tenant_scope_for_alias",
            GuardError::FunctionDenied(_) => "function_denied",
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Everything the guard enforces, in config form.
///
/// Tables are named fully qualified (`schema.table`); unqualified
/// references in SQL resolve against the first allowed schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardPolicy {
    #[serde(default = "default_allowed_schemas")]
    pub allowed_schemas: Vec<String>,
    /// Fully qualified tables the model may read.
    #[serde(default)]
    pub allowed_tables: Vec<String>,
    /// Column carrying tenant ownership on tenant-scoped tables.
    #[serde(default = "default_tenant_column")]
    pub tenant_column: String,
    /// Positional parameter the tenant id is bound to at execution time.
    #[serde(default = "default_tenant_param")]
    pub tenant_param: String,
    /// Fully qualified tables that must be tenant-scoped.
    #[serde(default)]
    pub tenant_required_tables: Vec<String>,
    /// Inject `alias.tenant_column = $param` into the top-level WHERE when
    /// a required table lacks it, instead of rejecting outright.
    #[serde(default = "default_true")]
    pub inject_tenant_predicate: bool,
    /// Case-insensitive regexes matched against called function names.
    #[serde(default = "default_function_denylist")]
    pub function_denylist: Vec<String>,
    #[serde(default = "default_true")]
    pub expand_select_star: bool,
    /// Column types dropped during `SELECT *` expansion.
    #[serde(default = "default_expand_exclude_types")]
    pub expand_exclude_types: Vec<String>,
    /// Case-insensitive regexes; matching column names are dropped during
    /// expansion.
    #[serde(default = "default_expand_exclude_name_patterns")]
    pub expand_exclude_name_patterns: Vec<String>,
    /// Specific `table.column` pairs dropped during expansion.
    #[serde(default)]
    pub expand_exclude_columns: Vec<String>,
}

fn default_allowed_schemas() -> Vec<String> {
    vec!["public".to_string()]
}

fn default_tenant_column() -> String {
    "business_id".to_string()
}

fn default_tenant_param() -> String {
    "$1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_function_denylist() -> Vec<String> {
    [
        "^pg_sleep",
        "^pg_read_file$",
        "^pg_ls_dir$",
        "^pg_terminate_backend$",
        "^pg_cancel_backend$",
        "^pg_reload_conf$",
        "^dblink",
        "^lo_(import|export)$",
        "^set_config$",
        "^current_setting$",
        "^pg_advisory_",
        "^copy$",
        "^query_to_xml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_expand_exclude_types() -> Vec<String> {
    vec!["bytea".to_string()]
}

fn default_expand_exclude_name_patterns() -> Vec<String> {
    ["password", "secret", "token", "api_key", "private_key"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            allowed_schemas: default_allowed_schemas(),
            allowed_tables: Vec::new(),
            tenant_column: default_tenant_column(),
            tenant_param: default_tenant_param(),
            tenant_required_tables: Vec::new(),
            inject_tenant_predicate: true,
            function_denylist: default_function_denylist(),
            expand_select_star: true,
            expand_exclude_types: default_expand_exclude_types(),
            expand_exclude_name_patterns: default_expand_exclude_name_patterns(),
            expand_exclude_columns: Vec::new(),
        }
    }
}

impl GuardPolicy {
    /// Schema an unqualified table reference resolves to.
    pub fn default_schema(&self) -> &str {
        self.allowed_schemas
            .first()
            .map(String::as_str)
            .unwrap_or("public")
    }
}

// ============================================================================
// Schema catalog
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    pub data_type: String,
}

/// Column lists per fully qualified table, used to expand `SELECT *` into
/// an explicit projection. Tables absent from the catalog keep their
/// wildcard untouched.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: HashMap<String, Vec<CatalogColumn>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table<S: Into<String>>(mut self, table: S, columns: &[(&str, &str)]) -> Self {
        self.insert(table, columns);
        self
    }

    pub fn insert<S: Into<String>>(&mut self, table: S, columns: &[(&str, &str)]) {
        self.tables.insert(
            table.into(),
            columns
                .iter()
                .map(|(name, data_type)| CatalogColumn {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                })
                .collect(),
        );
    }

    pub fn columns(&self, qualified_table: &str) -> Option<&[CatalogColumn]> {
        self.tables.get(qualified_table).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

// ============================================================================
// Result
// ============================================================================

/// Rewrites the guard applied, reported so callers can log them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardFlag {
    TenantPredicateInjected,
    SelectStarExpanded,
}

/// A statement that passed every check, in its rewritten form.
#[derive(Debug, Clone)]
pub struct GuardResult {
    pub final_sql: String,
    pub flags: Vec<GuardFlag>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

//! Shared parsing and statement analysis for the guard and the extractor.
//!
//! The structural walk collects every base-table reference (with its alias)
//! and the shape facts the guard needs: set operations, recursive CTEs,
//! lateral joins. Expression-level subqueries are discovered through the
//! parser's visitor so the walk itself only has to follow FROM clauses.

use crate::GuardError;
use sqlparser::ast::{
    visit_expressions, Expr, Join, ObjectName, Query, Select, SetExpr, Statement, TableFactor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::ControlFlow;

/// A base-table reference as written, before allow-list resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableRef {
    pub schema: Option<String>,
    pub table: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// Name a column qualifier would use for this table.
    pub fn effective_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    pub fn qualified(&self, default_schema: &str) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.table),
            None => format!("{default_schema}.{}", self.table),
        }
    }
}

/// Everything one pass over a statement learns about its shape.
#[derive(Debug, Default)]
pub(crate) struct SqlFacts {
    pub tables: Vec<TableRef>,
    pub cte_names: HashSet<String>,
    pub has_set_operation: bool,
    pub has_recursive_cte: bool,
    pub has_lateral: bool,
}

impl SqlFacts {
    /// Table references that are not CTE self-references.
    pub fn base_tables(&self) -> impl Iterator<Item = &TableRef> {
        self.tables
            .iter()
            .filter(|t| t.schema.is_some() || !self.cte_names.contains(&t.table))
    }
}

/// Parses exactly one statement. Empty input and multi-statement input are
/// policy violations, not parser errors.
pub(crate) fn parse_single(sql: &str) -> Result<Statement, GuardError> {
    if sql.trim().is_empty() {
        return Err(GuardError::EmptySql);
    }
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| GuardError::ParseError(e.to_string()))?;
    match statements.len() {
        0 => Err(GuardError::EmptySql),
        1 => Ok(statements.remove(0)),
        _ => Err(GuardError::NonSelect),
    }
}

/// Requires a plain SELECT at the root: set operations and non-query
/// statements are rejected here, nested shapes later via [`analyze`].
pub(crate) fn require_plain_select(statement: &Statement) -> Result<(), GuardError> {
    let query = match statement {
        Statement::Query(query) => query,
        _ => return Err(GuardError::NonSelect),
    };
    fn check_body(body: &SetExpr) -> Result<(), GuardError> {
        match body {
            SetExpr::Select(_) => Ok(()),
            SetExpr::Query(inner) => check_body(&inner.body),
            SetExpr::SetOperation { .. } => Err(GuardError::SetOperation),
            _ => Err(GuardError::NonSelect),
        }
    }
    check_body(&query.body)
}

pub(crate) fn analyze(statement: &Statement) -> SqlFacts {
    let mut facts = SqlFacts::default();
    if let Statement::Query(query) = statement {
        walk_query(query, &mut facts);
    }
    // Subqueries nested in expressions (WHERE, projections, join
    // constraints). The visitor reaches every depth in one pass, so each
    // subquery's FROM clause only needs the structural walk.
    let _ = visit_expressions(statement, |expr: &Expr| {
        match expr {
            Expr::Subquery(query) => walk_query(query, &mut facts),
            Expr::InSubquery { subquery, .. } => walk_query(subquery, &mut facts),
            Expr::Exists { subquery, .. } => walk_query(subquery, &mut facts),
            _ => {}
        }
        ControlFlow::<()>::Continue(())
    });
    facts
}

fn walk_query(query: &Query, facts: &mut SqlFacts) {
    if let Some(with) = &query.with {
        if with.recursive {
            facts.has_recursive_cte = true;
        }
        for cte in &with.cte_tables {
            facts.cte_names.insert(cte.alias.name.value.to_lowercase());
            walk_query(&cte.query, facts);
        }
    }
    walk_set_expr(&query.body, facts);
}

fn walk_set_expr(body: &SetExpr, facts: &mut SqlFacts) {
    match body {
        SetExpr::Select(select) => walk_select(select, facts),
        SetExpr::Query(inner) => walk_query(inner, facts),
        SetExpr::SetOperation { left, right, .. } => {
            facts.has_set_operation = true;
            walk_set_expr(left, facts);
            walk_set_expr(right, facts);
        }
        _ => {}
    }
}

fn walk_select(select: &Select, facts: &mut SqlFacts) {
    for table_with_joins in &select.from {
        walk_table_factor(&table_with_joins.relation, facts);
        for join in &table_with_joins.joins {
            walk_join(join, facts);
        }
    }
}

fn walk_join(join: &Join, facts: &mut SqlFacts) {
    // Join constraint expressions are covered by the expression visitor.
    walk_table_factor(&join.relation, facts);
}

fn walk_table_factor(factor: &TableFactor, facts: &mut SqlFacts) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            facts.tables.push(table_ref(name, alias.as_ref()));
        }
        TableFactor::Derived {
            lateral, subquery, ..
        } => {
            if *lateral {
                facts.has_lateral = true;
            }
            walk_query(subquery, facts);
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            walk_table_factor(&table_with_joins.relation, facts);
            for join in &table_with_joins.joins {
                walk_join(join, facts);
            }
        }
        _ => {}
    }
}

fn table_ref(name: &ObjectName, alias: Option<&sqlparser::ast::TableAlias>) -> TableRef {
    let parts = &name.0;
    let table = parts
        .last()
        .map(|i| i.value.to_lowercase())
        .unwrap_or_default();
    let schema = if parts.len() >= 2 {
        Some(parts[parts.len() - 2].value.to_lowercase())
    } else {
        None
    };
    TableRef {
        schema,
        table,
        alias: alias.map(|a| a.name.value.to_lowercase()),
    }
}

/// Base tables in one select's own FROM clause, in source order. Derived
/// tables are skipped; rewrites only target real tables.
pub(crate) fn select_tables(select: &Select) -> Vec<TableRef> {
    fn from_factor(factor: &TableFactor, out: &mut Vec<TableRef>) {
        match factor {
            TableFactor::Table { name, alias, .. } => out.push(table_ref(name, alias.as_ref())),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                from_factor(&table_with_joins.relation, out);
                for join in &table_with_joins.joins {
                    from_factor(&join.relation, out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    for table_with_joins in &select.from {
        from_factor(&table_with_joins.relation, &mut out);
        for join in &table_with_joins.joins {
            from_factor(&join.relation, &mut out);
        }
    }
    out
}

/// Mutable handle to the outermost SELECT, for predicate injection and
/// projection rewrites. `None` for set operations (rejected earlier).
pub(crate) fn top_select_mut(statement: &mut Statement) -> Option<&mut Select> {
    fn from_body(body: &mut SetExpr) -> Option<&mut Select> {
        match body {
            SetExpr::Select(select) => Some(select),
            SetExpr::Query(inner) => from_body(&mut inner.body),
            _ => None,
        }
    }
    match statement {
        Statement::Query(query) => from_body(&mut query.body),
        _ => None,
    }
}

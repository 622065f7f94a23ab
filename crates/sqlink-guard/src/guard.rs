//! The guard pipeline: parse, check, rewrite, render.
//!
//! Check order is fixed so callers see the most fundamental violation
//! first: statement shape, then the table allow-list, then denied
//! functions, then tenant scoping. Rewrites (tenant predicate injection,
//! `SELECT *` expansion) run only after every check has passed.

use crate::ast::{
    analyze, parse_single, require_plain_select, select_tables, top_select_mut, SqlFacts,
};
use crate::{GuardError, GuardFlag, GuardPolicy, GuardResult, SchemaCatalog};
use anyhow::Context;
use regex::RegexBuilder;
use sqlparser::ast::{
    visit_expressions, BinaryOperator, Expr, Ident, SelectItem, Statement, Value,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::ControlFlow;
use tracing::debug;

/// Compiled form of a [`GuardPolicy`], plus the catalog used for
/// projection expansion.
pub struct SqlGuard {
    policy: GuardPolicy,
    catalog: SchemaCatalog,
    denied_functions: Vec<regex::Regex>,
    excluded_names: Vec<regex::Regex>,
}

impl SqlGuard {
    pub fn new(policy: GuardPolicy, catalog: SchemaCatalog) -> anyhow::Result<Self> {
        let denied_functions = compile_all(&policy.function_denylist)
            .context("invalid function denylist pattern")?;
        let excluded_names = compile_all(&policy.expand_exclude_name_patterns)
            .context("invalid column exclusion pattern")?;
        Ok(Self {
            policy,
            catalog,
            denied_functions,
            excluded_names,
        })
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Validates one statement for tenant `tenant_id` and returns the
    /// rewritten SQL. The output is a fixed point: guarding it again
    /// yields the same string.
    pub fn guard_and_rewrite(
        &self,
        sql: &str,
        tenant_id: i64,
    ) -> Result<GuardResult, GuardError> {
        let mut statement = parse_single(sql)?;
        require_plain_select(&statement)?;

        let facts = analyze(&statement);
        if facts.has_set_operation {
            return Err(GuardError::SetOperation);
        }
        if facts.has_recursive_cte {
            return Err(GuardError::RecursiveCte);
        }
        if facts.has_lateral {
            return Err(GuardError::LateralJoin);
        }

        self.check_allow_list(&facts)?;
        let functions = self.check_functions(&statement)?;

        let mut flags = Vec::new();
        if self.enforce_tenant_scope(&mut statement, &facts, tenant_id)? {
            flags.push(GuardFlag::TenantPredicateInjected);
        }
        if self.policy.expand_select_star && self.expand_projection(&mut statement) {
            flags.push(GuardFlag::SelectStarExpanded);
        }

        let tables: BTreeSet<String> = facts
            .base_tables()
            .map(|t| t.qualified(self.policy.default_schema()))
            .collect();
        let mut metadata = BTreeMap::new();
        metadata.insert("tables".to_string(), serde_json::json!(tables));
        metadata.insert("functions".to_string(), serde_json::json!(functions));

        let final_sql = statement.to_string();
        debug!(?flags, %final_sql, "statement passed guard");
        Ok(GuardResult {
            final_sql,
            flags,
            metadata,
        })
    }

    // ------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------

    fn check_allow_list(&self, facts: &SqlFacts) -> Result<(), GuardError> {
        let default_schema = self.policy.default_schema().to_string();
        let mut schemas_seen: BTreeSet<String> = BTreeSet::new();
        for table in facts.base_tables() {
            let schema = table.schema.clone().unwrap_or_else(|| default_schema.clone());
            if !self.policy.allowed_schemas.iter().any(|s| s == &schema) {
                return Err(GuardError::SchemaNotAllowed(schema));
            }
            schemas_seen.insert(schema);
        }
        if schemas_seen.len() > 1 {
            return Err(GuardError::CrossSchemaJoin);
        }
        if !self.policy.allowed_tables.is_empty() {
            for table in facts.base_tables() {
                let qualified = table.qualified(&default_schema);
                if !self.policy.allowed_tables.iter().any(|t| t == &qualified) {
                    return Err(GuardError::TableNotAllowed(qualified));
                }
            }
        }
        Ok(())
    }

    /// Screens every called function against the denylist; returns the
    /// sorted set of function names seen.
    fn check_functions(&self, statement: &Statement) -> Result<Vec<String>, GuardError> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut denied: Option<String> = None;
        let _ = visit_expressions(statement, |expr: &Expr| {
            if let Expr::Function(func) = expr {
                if let Some(name) = func.name.0.last() {
                    let name = name.value.to_lowercase();
                    if denied.is_none()
                        && self.denied_functions.iter().any(|re| re.is_match(&name))
                    {
                        denied = Some(name.clone());
                    }
                    seen.insert(name);
                }
            }
            ControlFlow::<()>::Continue(())
        });
        match denied {
            Some(name) => Err(GuardError::FunctionDenied(name)),
            None => Ok(seen.into_iter().collect()),
        }
    }

    // ------------------------------------------------------------------
    // Tenant scoping
    // ------------------------------------------------------------------

    /// Every tenant-required table must carry an equality predicate binding
    /// its tenant column to the tenant parameter (or the tenant id itself).
    /// Returns whether a predicate was injected.
    fn enforce_tenant_scope(
        &self,
        statement: &mut Statement,
        facts: &SqlFacts,
        tenant_id: i64,
    ) -> Result<bool, GuardError> {
        let required: Vec<(String, String)> = facts
            .base_tables()
            .filter(|t| {
                let qualified = t.qualified(self.policy.default_schema());
                self.policy
                    .tenant_required_tables
                    .iter()
                    .any(|r| r == &qualified)
            })
            .map(|t| (t.effective_alias().to_string(), t.table.clone()))
            .collect();
        if required.is_empty() {
            return Ok(false);
        }

        let scoped = self.tenant_scoped_qualifiers(statement, tenant_id);
        let single_table = facts.base_tables().count() == 1;
        let missing: Vec<String> = required
            .iter()
            .filter(|(alias, table)| {
                let covered = scoped.contains(&Some(alias.clone()))
                    || scoped.contains(&Some(table.clone()))
                    || (single_table && scoped.contains(&None));
                !covered
            })
            .map(|(alias, _)| alias.clone())
            .collect();
        if missing.is_empty() {
            return Ok(false);
        }
        if !self.policy.inject_tenant_predicate {
            return Err(if scoped.is_empty() {
                GuardError::MissingTenantScope
            } else {
                GuardError::MissingTenantScopeForAlias(missing[0].clone())
            });
        }

        // Injection only reaches the outermost WHERE; a required table
        // referenced solely inside a subquery cannot be fixed up here.
        let select = top_select_mut(statement).ok_or(GuardError::MissingTenantScope)?;
        let top_aliases: HashSet<String> = select_tables(select)
            .iter()
            .map(|t| t.effective_alias().to_string())
            .collect();
        for alias in &missing {
            if !top_aliases.contains(alias) {
                return Err(GuardError::MissingTenantScopeForAlias(alias.clone()));
            }
        }
        for alias in &missing {
            let predicate = self.tenant_predicate(alias);
            select.selection = Some(match select.selection.take() {
                Some(existing) => Expr::BinaryOp {
                    left: Box::new(existing),
                    op: BinaryOperator::And,
                    right: Box::new(predicate),
                },
                None => predicate,
            });
        }
        Ok(true)
    }

    /// Qualifiers (None for unqualified) whose tenant column is bound to
    /// the tenant parameter or the tenant id literal by an `=` predicate.
    fn tenant_scoped_qualifiers(
        &self,
        statement: &Statement,
        tenant_id: i64,
    ) -> HashSet<Option<String>> {
        let tenant_column = self.policy.tenant_column.to_lowercase();
        let tenant_literal = tenant_id.to_string();
        let mut scoped = HashSet::new();
        let _ = visit_expressions(statement, |expr: &Expr| {
            if let Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } = expr
            {
                for (column_expr, bound_expr) in
                    [(left.as_ref(), right.as_ref()), (right.as_ref(), left.as_ref())]
                {
                    if let Some((qualifier, column)) = column_reference(column_expr) {
                        if column == tenant_column && binds_tenant(bound_expr, &tenant_literal)
                        {
                            scoped.insert(qualifier);
                        }
                    }
                }
            }
            ControlFlow::<()>::Continue(())
        });
        scoped
    }

    fn tenant_predicate(&self, alias: &str) -> Expr {
        Expr::BinaryOp {
            left: Box::new(Expr::CompoundIdentifier(vec![
                Ident::new(alias),
                Ident::new(self.policy.tenant_column.as_str()),
            ])),
            op: BinaryOperator::Eq,
            right: Box::new(Expr::Value(Value::Placeholder(
                self.policy.tenant_param.clone(),
            ))),
        }
    }

    // ------------------------------------------------------------------
    // SELECT * expansion
    // ------------------------------------------------------------------

    /// Rewrites wildcards in the outermost projection into explicit column
    /// lists from the catalog. Tables missing from the catalog keep their
    /// wildcard. Returns whether anything was expanded.
    fn expand_projection(&self, statement: &mut Statement) -> bool {
        let select = match top_select_mut(statement) {
            Some(select) => select,
            None => return false,
        };
        let tables = select_tables(select);
        if tables.is_empty() {
            return false;
        }
        let qualify_columns = tables.len() > 1;
        let default_schema = self.policy.default_schema().to_string();

        let mut expanded = false;
        let mut projection = Vec::with_capacity(select.projection.len());
        for item in select.projection.drain(..) {
            match &item {
                SelectItem::Wildcard(_) => {
                    let mut items = Vec::new();
                    let mut all_known = true;
                    for table in &tables {
                        match self.catalog.columns(&table.qualified(&default_schema)) {
                            Some(columns) => self.push_columns(
                                &mut items,
                                table.effective_alias(),
                                &table.table,
                                columns,
                                qualify_columns,
                            ),
                            None => {
                                all_known = false;
                                break;
                            }
                        }
                    }
                    if all_known && !items.is_empty() {
                        projection.extend(items);
                        expanded = true;
                    } else {
                        projection.push(item);
                    }
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = name
                        .0
                        .last()
                        .map(|i| i.value.to_lowercase())
                        .unwrap_or_default();
                    let target = tables
                        .iter()
                        .find(|t| t.effective_alias() == qualifier || t.table == qualifier);
                    let columns = target
                        .and_then(|t| self.catalog.columns(&t.qualified(&default_schema)));
                    match (target, columns) {
                        (Some(table), Some(columns)) => {
                            let before = projection.len();
                            self.push_columns(
                                &mut projection,
                                table.effective_alias(),
                                &table.table,
                                columns,
                                qualify_columns,
                            );
                            if projection.len() > before {
                                expanded = true;
                            } else {
                                projection.push(item);
                            }
                        }
                        _ => projection.push(item),
                    }
                }
                _ => projection.push(item),
            }
        }
        select.projection = projection;
        expanded
    }

    fn push_columns(
        &self,
        out: &mut Vec<SelectItem>,
        alias: &str,
        table: &str,
        columns: &[crate::CatalogColumn],
        qualify: bool,
    ) {
        for column in columns {
            if self.column_excluded(table, column) {
                continue;
            }
            let expr = Expr::CompoundIdentifier(vec![
                Ident::new(alias),
                Ident::new(column.name.as_str()),
            ]);
            if qualify {
                // Disambiguate identical column names across joined tables.
                out.push(SelectItem::ExprWithAlias {
                    expr,
                    alias: Ident::new(format!("{alias}__{}", column.name)),
                });
            } else {
                out.push(SelectItem::UnnamedExpr(expr));
            }
        }
    }

    fn column_excluded(&self, table: &str, column: &crate::CatalogColumn) -> bool {
        let data_type = column.data_type.to_lowercase();
        if self
            .policy
            .expand_exclude_types
            .iter()
            .any(|t| t.to_lowercase() == data_type)
        {
            return true;
        }
        if self.excluded_names.iter().any(|re| re.is_match(&column.name)) {
            return true;
        }
        let qualified = format!("{table}.{}", column.name);
        self.policy
            .expand_exclude_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&qualified))
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<regex::Regex>, regex::Error> {
    patterns
        .iter()
        .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
        .collect()
}

/// `(qualifier, column)` of a column reference, seen through parentheses.
fn column_reference(expr: &Expr) -> Option<(Option<String>, String)> {
    match expr {
        Expr::Identifier(ident) => Some((None, ident.value.to_lowercase())),
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => Some((
            Some(parts[parts.len() - 2].value.to_lowercase()),
            parts[parts.len() - 1].value.to_lowercase(),
        )),
        Expr::Nested(inner) => column_reference(inner),
        _ => None,
    }
}

/// Whether an expression binds the tenant: any placeholder, or a literal
/// equal to the tenant id.
fn binds_tenant(expr: &Expr, tenant_literal: &str) -> bool {
    match expr {
        Expr::Value(Value::Placeholder(_)) => true,
        Expr::Value(Value::Number(n, _)) => n == tenant_literal,
        Expr::Value(Value::SingleQuotedString(s)) => s == tenant_literal,
        Expr::Nested(inner) => binds_tenant(inner, tenant_literal),
        Expr::Cast { expr, .. } => binds_tenant(expr, tenant_literal),
        _ => false,
    }
}

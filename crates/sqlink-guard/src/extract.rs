//! Field and literal extraction from parsed SQL.
//!
//! Resolves qualified column references through the statement's alias map
//! down to base `(table, column)` fields, and collects every scalar
//! literal in normalized form. The orchestrator compares these against the
//! question's literals and the value index to catch queries that filter on
//! the wrong column.

use crate::ast::{analyze, parse_single};
use crate::GuardError;
use sqlink_profile::Field;
use sqlparser::ast::{visit_expressions, Expr, Value};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

/// `(table, column)` fields and normalized literals of one statement.
///
/// Only qualified column references (`alias.column`) resolve to fields;
/// an unqualified name cannot be attributed to a table without a catalog.
/// References through CTE aliases are dropped for the same reason.
pub fn extract_fields_and_literals(
    sql: &str,
) -> Result<(HashSet<Field>, HashSet<String>), GuardError> {
    let statement = parse_single(sql)?;
    let facts = analyze(&statement);

    // alias -> base table; a table's own name is also a valid qualifier.
    let mut alias_map: HashMap<String, String> = HashMap::new();
    for table in facts.base_tables() {
        if let Some(alias) = &table.alias {
            alias_map.insert(alias.clone(), table.table.clone());
        }
        alias_map
            .entry(table.table.clone())
            .or_insert_with(|| table.table.clone());
    }

    let mut fields = HashSet::new();
    let mut literals = HashSet::new();
    let _ = visit_expressions(&statement, |expr: &Expr| {
        match expr {
            Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                let qualifier = parts[parts.len() - 2].value.to_lowercase();
                let column = parts[parts.len() - 1].value.to_lowercase();
                if let Some(table) = alias_map.get(&qualifier) {
                    fields.insert(Field::new(table.as_str(), column));
                }
            }
            Expr::Value(value) => {
                if let Some(literal) = value_literal(value) {
                    literals.insert(literal);
                }
            }
            Expr::TypedString { value, .. } => {
                if let Some(literal) = normalize_literal(value) {
                    literals.insert(literal);
                }
            }
            _ => {}
        }
        ControlFlow::<()>::Continue(())
    });

    Ok((fields, literals))
}

fn value_literal(value: &Value) -> Option<String> {
    match value {
        Value::Number(n, _) => normalize_literal(n),
        Value::SingleQuotedString(s)
        | Value::DoubleQuotedString(s)
        | Value::EscapedStringLiteral(s) => normalize_literal(s),
        _ => None,
    }
}

/// Trims whitespace and stray quotes and repairs en/em dashes that models
/// substitute for plain hyphens (`2020–2021` vs `2020-2021`). Returns
/// `None` when nothing is left.
pub fn normalize_literal(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('\'').trim_matches('"').trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.replace(['\u{2013}', '\u{2014}'], "-"))
}

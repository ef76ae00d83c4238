use std::fmt;

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::changeset::{Attributes, ChangeSet};
use crate::error::EncError;
use crate::schema::{quote_ident, TableSchema};
use crate::store::{Statement, StatementBatch};

/// The three mutating actions a change-set can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Add,
    Change,
    Delete,
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Change => f.write_str("change"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Translates a [`ChangeSet`] into the statements for one [`Mutation`].
///
/// Nodes are matched by exact primary-key value. A `change` or `delete`
/// naming an unknown node plans a statement that simply affects no rows.
pub struct MutationPlanner<'a> {
    schema: &'a TableSchema,
}

impl<'a> MutationPlanner<'a> {
    pub fn new(schema: &'a TableSchema) -> Self {
        Self { schema }
    }

    pub fn plan(&self, action: Mutation, changes: &ChangeSet) -> Result<StatementBatch, EncError> {
        let table = quote_ident(&self.schema.name);
        let pk = self.schema.primary_key()?;
        let mut batch = StatementBatch::default();

        for (node, attrs) in changes.iter() {
            let stmt = match action {
                Mutation::Add => insert(&table, pk, node, attrs),
                Mutation::Change => update(&table, pk, node, attrs),
                Mutation::Delete => Some(Statement::new(
                    format!("DELETE FROM {table} WHERE {} = ?", quote_ident(pk)),
                    vec![SqlValue::Text(node.clone())],
                )),
            };
            if let Some(stmt) = stmt {
                batch.push(stmt);
            }
        }
        Ok(batch)
    }
}

/// The node identifier doubles as the primary-key value when the mapping
/// does not set that column itself. `None` for an empty mapping.
fn insert(table: &str, pk: &str, node: &str, attrs: &Attributes) -> Option<Statement> {
    if attrs.is_empty() {
        return None;
    }
    let mut cols = Vec::with_capacity(attrs.len() + 1);
    let mut params = Vec::with_capacity(attrs.len() + 1);
    if !attrs.contains_key(pk) {
        cols.push(quote_ident(pk));
        params.push(SqlValue::Text(node.to_string()));
    }
    for (col, val) in attrs {
        cols.push(quote_ident(col));
        params.push(to_sql_value(val));
    }
    let placeholders = vec!["?"; cols.len()].join(", ");
    Some(Statement::new(
        format!("INSERT INTO {table} ({}) VALUES ({placeholders})", cols.join(", ")),
        params,
    ))
}

/// `None` when there is nothing to set.
fn update(table: &str, pk: &str, node: &str, attrs: &Attributes) -> Option<Statement> {
    if attrs.is_empty() {
        return None;
    }
    let assignments: Vec<String> =
        attrs.keys().map(|col| format!("{} = ?", quote_ident(col))).collect();
    let mut params: Vec<SqlValue> = attrs.values().map(to_sql_value).collect();
    params.push(SqlValue::Text(node.to_string()));
    Some(Statement::new(
        format!("UPDATE {table} SET {} WHERE {} = ?", assignments.join(", "), quote_ident(pk)),
        params,
    ))
}

/// Converts a scalar change-set value into a bindable SQLite value.
pub fn to_sql_value(val: &Value) -> SqlValue {
    match val {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                SqlValue::Real(f)
            } else {
                SqlValue::Text(n.to_string())
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(val.to_string()),
    }
}

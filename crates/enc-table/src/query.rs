use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use tracing::debug;

use crate::changeset::ENVIRONMENT_COLUMN;
use crate::config::RoleModel;
use crate::error::EncError;
use crate::schema::{quote_ident, TableSchema};
use crate::store::TableStore;

/// Environment reported for a known node that has none stored.
pub const DEFAULT_ENVIRONMENT: &str = "production";
/// Column holding the node's role.
pub const ROLE_COLUMN: &str = "role";
/// Parameter that always carries the looked-up identifier.
pub const HOSTNAME_PARAMETER: &str = "enc_hostname";

const ROLE_NOT_FOUND: &str = "role::role_not_found";
const HOSTNAME_NOT_FOUND: &str = "role::hostname_not_found";

/// A row of the node table, fields in projection order.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    fields: Vec<(String, SqlValue)>,
}

impl NodeRecord {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.fields.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Non-NULL fields rendered as text.
    pub fn populated(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .filter_map(|(c, v)| display_value(v).map(|s| (c.clone(), s)))
            .collect()
    }
}

/// Classification document handed to the configuration-management system.
///
/// Fields serialize in key order: `classes`, `environment`, `parameters`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub parameters: BTreeMap<String, String>,
}

impl Classification {
    /// True when the node was unknown to the registry.
    pub fn is_not_found(&self) -> bool {
        matches!(self.classes.as_deref(), Some([class]) if class == HOSTNAME_NOT_FOUND)
    }
}

/// Read-only access to the node table.
pub struct QueryEngine<'a> {
    schema: &'a TableSchema,
    store: &'a TableStore,
    role_model: RoleModel,
}

impl<'a> QueryEngine<'a> {
    pub fn new(schema: &'a TableSchema, store: &'a TableStore, role_model: RoleModel) -> Self {
        Self { schema, store, role_model }
    }

    /// Rows whose primary key contains any of `patterns` (case-sensitive),
    /// or every row when no pattern is given. Ordered by primary key.
    pub fn list(&self, patterns: &[String]) -> Result<Vec<NodeRecord>, EncError> {
        let pk = quote_ident(self.schema.primary_key()?);
        let cols: Vec<String> =
            self.schema.list_projection()?.into_iter().map(quote_ident).collect();

        let mut sql = format!("SELECT {} FROM {}", cols.join(", "), quote_ident(&self.schema.name));
        if !patterns.is_empty() {
            let filters = vec![format!("instr({pk}, ?) > 0"); patterns.len()];
            sql.push_str(&format!(" WHERE ({})", filters.join(" OR ")));
        }
        sql.push_str(&format!(" ORDER BY {pk} ASC"));

        let params: Vec<SqlValue> = patterns.iter().map(|p| SqlValue::Text(p.clone())).collect();
        let rows = self.store.query(&sql, &params)?;
        Ok(into_records(rows.columns, rows.rows))
    }

    /// Classifies exactly one node.
    pub fn lookup(&self, nodes: &[String]) -> Result<Classification, EncError> {
        match nodes {
            [node] => self.classify(node),
            _ => Err(EncError::Usage("missing or ill-formatted nodename".into())),
        }
    }

    pub fn classify(&self, node: &str) -> Result<Classification, EncError> {
        debug!("Role model: '{}'", self.role_model);
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(&self.schema.name),
            quote_ident(self.schema.primary_key()?)
        );
        let rows = self.store.query(&sql, &[SqlValue::Text(node.to_string())])?;
        let mut data = into_records(rows.columns, rows.rows)
            .into_iter()
            .next()
            .map(|r| r.populated())
            .unwrap_or_default();

        let mut parameters = BTreeMap::from([(HOSTNAME_PARAMETER.to_string(), node.to_string())]);
        if data.len() <= 1 {
            return Ok(Classification {
                classes: Some(vec![HOSTNAME_NOT_FOUND.to_string()]),
                environment: None,
                parameters,
            });
        }

        let environment = data
            .remove(ENVIRONMENT_COLUMN)
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
        let classes = match self.role_model {
            RoleModel::Module => Some(vec![data
                .get(ROLE_COLUMN)
                .map_or_else(|| ROLE_NOT_FOUND.to_string(), |role| format!("role::{role}"))]),
            RoleModel::Hiera => None,
        };
        parameters.extend(data);

        Ok(Classification { classes, environment: Some(environment), parameters })
    }
}

fn into_records(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Vec<NodeRecord> {
    rows.into_iter()
        .map(|row| NodeRecord { fields: columns.iter().cloned().zip(row).collect() })
        .collect()
}

/// Text form of a stored scalar; `None` for NULL.
pub fn display_value(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Integer(i) => Some(i.to_string()),
        SqlValue::Real(f) if f.fract() == 0.0 && f.is_finite() => Some(format!("{f:.1}")),
        SqlValue::Real(f) => Some(f.to_string()),
        SqlValue::Text(s) => Some(s.clone()),
        SqlValue::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}

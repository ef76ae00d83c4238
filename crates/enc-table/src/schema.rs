use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::EncError;

/// Token that marks the primary-key column in a descriptor.
pub const PRIMARY_KEY_TOKEN: &str = "PRIMARY KEY";

/// Defines the node table: its name and the ordered column definitions taken
/// verbatim from the schema descriptor.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// The name of the table.
    pub name: String,
    /// Ordered list of column definitions.
    pub columns: Vec<ColumnDef>,
    primary_key: Option<usize>,
}

/// A single column: its name and the free-form constraint tokens appended to
/// it in the table DDL (`TEXT`, `PRIMARY KEY`, `DEFAULT 'production'`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub constraints: Vec<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, constraints: &[&str]) -> Self {
        Self {
            name: name.into(),
            constraints: constraints.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn is_primary_key(&self) -> bool {
        self.constraints
            .iter()
            .any(|t| t.trim().eq_ignore_ascii_case(PRIMARY_KEY_TOKEN))
    }
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(rename = "Nodes")]
    nodes: NodesSection,
}

#[derive(Debug, Deserialize)]
struct NodesSection {
    table_name: String,
    columns: Mapping,
}

impl TableSchema {
    /// Builds a schema, rejecting empty or duplicate column sets.
    ///
    /// A missing primary key is not rejected here; it surfaces as
    /// [`EncError::MissingPrimaryKey`] from [`TableSchema::primary_key`].
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Result<Self, EncError> {
        let name = name.into();
        if columns.is_empty() {
            return Err(EncError::Config(format!("Table '{name}' must have at least one column")));
        }
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(EncError::Config(format!("Duplicate column name: {}", col.name)));
            }
        }
        let primary_key = columns.iter().position(ColumnDef::is_primary_key);
        Ok(Self { name, columns, primary_key })
    }

    /// Loads the `Nodes` table from a YAML schema descriptor file.
    pub fn from_descriptor_file(path: &Path) -> Result<Self, EncError> {
        let text = std::fs::read_to_string(path).map_err(|e| EncError::io(path, e))?;
        Self::from_descriptor_str(&text).map_err(|e| match e {
            EncError::InputParse { reason, .. } => EncError::parse(path, reason),
            other => other,
        })
    }

    /// Parses a YAML schema descriptor, preserving column order.
    pub fn from_descriptor_str(text: &str) -> Result<Self, EncError> {
        let descriptor: Descriptor = serde_yaml::from_str(text)
            .map_err(|e| EncError::parse("<schema descriptor>", e))?;

        let mut columns = Vec::with_capacity(descriptor.nodes.columns.len());
        for (key, tokens) in descriptor.nodes.columns {
            let name = scalar_to_string(&key).ok_or_else(|| {
                EncError::Config(format!("Column names must be scalars, got {key:?}"))
            })?;
            let constraints = match tokens {
                Value::Null => Vec::new(),
                Value::Sequence(seq) => seq
                    .iter()
                    .map(|t| {
                        scalar_to_string(t).ok_or_else(|| {
                            EncError::Config(format!("Column '{name}' has a non-scalar token"))
                        })
                    })
                    .collect::<Result<_, _>>()?,
                other => vec![scalar_to_string(&other).ok_or_else(|| {
                    EncError::Config(format!("Column '{name}' tokens must be a list"))
                })?],
            };
            columns.push(ColumnDef { name, constraints });
        }

        Self::new(descriptor.nodes.table_name, columns)
    }

    /// Name of the primary-key column.
    pub fn primary_key(&self) -> Result<&str, EncError> {
        self.primary_key
            .map(|i| self.columns[i].name.as_str())
            .ok_or_else(|| EncError::MissingPrimaryKey(self.name.clone()))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Listing projection: primary key first, the remaining columns sorted.
    pub fn list_projection(&self) -> Result<Vec<&str>, EncError> {
        let pk = self.primary_key()?;
        let mut rest: Vec<&str> = self.column_names().filter(|c| *c != pk).collect();
        rest.sort_unstable();
        let mut cols = Vec::with_capacity(self.columns.len());
        cols.push(pk);
        cols.extend(rest);
        Ok(cols)
    }

    /// `CREATE TABLE` statement: every column name followed by its tokens,
    /// comma-joined.
    pub fn create_sql(&self) -> Result<String, EncError> {
        self.primary_key()?;
        let col_defs: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let mut def = quote_ident(&col.name);
                for token in &col.constraints {
                    def.push(' ');
                    def.push_str(token);
                }
                def
            })
            .collect();
        Ok(format!("CREATE TABLE {} ( {} );", quote_ident(&self.name), col_defs.join(", ")))
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {};", quote_ident(&self.name))
    }
}

/// Quotes a trusted identifier from configuration for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

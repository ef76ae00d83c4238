use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::error::EncError;
use crate::schema::TableSchema;

/// Column whose values must be valid r10k branch names.
pub const ENVIRONMENT_COLUMN: &str = "environment";

/// New column values for one node.
pub type Attributes = BTreeMap<String, Value>;

/// Canonical mutation request: node identifier -> column -> new value.
///
/// Column names are not checked against the schema here; unknown columns are
/// rejected by the store when the planned statements execute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    nodes: BTreeMap<String, Attributes>,
}

impl ChangeSet {
    pub fn insert(&mut self, node: impl Into<String>, attrs: Attributes) {
        self.nodes.insert(node.into(), attrs);
    }

    pub fn get(&self, node: &str) -> Option<&Attributes> {
        self.nodes.get(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Attributes)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Rewrites every `environment` value so it only contains `[A-Za-z0-9_]`.
    pub fn normalize(&mut self) {
        for attrs in self.nodes.values_mut() {
            if let Some(value) = attrs.get_mut(ENVIRONMENT_COLUMN) {
                let raw = match value {
                    Value::String(s) => std::mem::take(s),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                *value = Value::String(sanitize_branch_name(&raw));
            }
        }
    }
}

/// Replaces every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_branch_name(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Raw mutation input as supplied by the operator.
///
/// At most one source is honored: a structured file wins over a tabular file,
/// which wins over the command-line node list and column values.
#[derive(Debug, Clone, Default)]
pub struct ChangeInput {
    /// YAML mapping of node -> column -> value.
    pub structured: Option<PathBuf>,
    /// CSV with a header row naming the columns.
    pub tabular: Option<PathBuf>,
    /// Node identifiers given on the command line.
    pub nodes: Vec<String>,
    /// Column values given on the command line, applied to every node.
    pub values: BTreeMap<String, String>,
}

/// Turns a [`ChangeInput`] into a normalized [`ChangeSet`].
pub struct ChangeSetBuilder<'a> {
    schema: &'a TableSchema,
}

impl<'a> ChangeSetBuilder<'a> {
    pub fn new(schema: &'a TableSchema) -> Self {
        Self { schema }
    }

    pub fn build(&self, input: &ChangeInput) -> Result<ChangeSet, EncError> {
        let mut changes = if let Some(path) = &input.structured {
            load_structured(path)?
        } else if let Some(path) = &input.tabular {
            load_tabular(path, self.schema.primary_key()?)?
        } else {
            self.from_command_line(&input.nodes, &input.values)
        };
        changes.normalize();
        debug!("Change data: {:?}", changes);
        Ok(changes)
    }

    fn from_command_line(&self, nodes: &[String], values: &BTreeMap<String, String>) -> ChangeSet {
        let mut attrs = Attributes::new();
        for col in self.schema.column_names() {
            if let Some(v) = values.get(col).filter(|v| !v.is_empty()) {
                attrs.insert(col.to_string(), Value::String(v.clone()));
            }
        }
        let mut changes = ChangeSet::default();
        for node in nodes {
            changes.insert(node.clone(), attrs.clone());
        }
        changes
    }
}

fn load_structured(path: &Path) -> Result<ChangeSet, EncError> {
    let text = std::fs::read_to_string(path).map_err(|e| EncError::io(path, e))?;
    let raw: BTreeMap<String, Option<Attributes>> =
        serde_yaml::from_str(&text).map_err(|e| EncError::parse(path, e))?;

    let mut changes = ChangeSet::default();
    for (node, attrs) in raw {
        let attrs = attrs.unwrap_or_default();
        if let Some((col, _)) = attrs.iter().find(|(_, v)| v.is_array() || v.is_object()) {
            return Err(EncError::parse(
                path,
                format!("value of '{col}' for node '{node}' must be a scalar"),
            ));
        }
        changes.insert(node, attrs);
    }
    Ok(changes)
}

fn load_tabular(path: &Path, primary_key: &str) -> Result<ChangeSet, EncError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| EncError::parse(path, e))?;
    let headers = reader.headers().map_err(|e| EncError::parse(path, e))?.clone();
    let key_index = headers
        .iter()
        .position(|h| h == primary_key)
        .ok_or_else(|| EncError::parse(path, format!("missing '{primary_key}' column")))?;

    let mut changes = ChangeSet::default();
    for record in reader.records() {
        let record = record.map_err(|e| EncError::parse(path, e))?;
        let node = record.get(key_index).unwrap_or_default().to_string();
        let attrs: Attributes = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
            .collect();
        changes.insert(node, attrs);
    }
    Ok(changes)
}

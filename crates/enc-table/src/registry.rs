//! The registry's application context.
//!
//! [`NodeRegistry`] is built once per invocation and owns the schema, the
//! store connection and the backup manager. Every mutating action (add,
//! change, delete, init, restore) ends with a fresh snapshot, so the state
//! before any destructive operation is always recoverable from the previous
//! action's snapshot.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::backup::BackupManager;
use crate::changeset::{ChangeInput, ChangeSet, ChangeSetBuilder, ENVIRONMENT_COLUMN};
use crate::config::{EncConfig, RoleModel};
use crate::error::EncError;
use crate::planner::{Mutation, MutationPlanner};
use crate::query::{Classification, NodeRecord, QueryEngine};
use crate::schema::TableSchema;
use crate::store::TableStore;

/// Outcome of a committed add/change/delete.
#[derive(Debug, Clone)]
pub struct MutationReport {
    pub action: Mutation,
    /// Statements applied in the transaction.
    pub statements: usize,
    /// Rows inserted, updated or deleted. Zero is not an error.
    pub rows_changed: usize,
    /// Snapshot taken after the commit.
    pub backup: PathBuf,
}

pub struct NodeRegistry {
    schema: TableSchema,
    store: TableStore,
    backups: BackupManager,
    role_model: RoleModel,
}

impl NodeRegistry {
    /// Opens the database named by `config` for an already loaded schema.
    ///
    /// Fails before touching the database if the schema has no primary key.
    pub fn open_with_schema(config: &EncConfig, schema: TableSchema) -> Result<Self, EncError> {
        schema.primary_key()?;
        let store = TableStore::open(&config.db_file)?;
        Ok(Self::new(schema, store, BackupManager::new(&config.bkup_dir), config.role_model))
    }

    pub fn new(
        schema: TableSchema,
        store: TableStore,
        backups: BackupManager,
        role_model: RoleModel,
    ) -> Self {
        Self { schema, store, backups, role_model }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Inserts the nodes described by `input`.
    ///
    /// When the input names no node at all but sets the primary-key column,
    /// that value becomes the single node, so a bare node can be added with
    /// only store defaults.
    pub fn add(&self, input: &ChangeInput) -> Result<MutationReport, EncError> {
        let builder = ChangeSetBuilder::new(&self.schema);
        let mut changes = builder.build(input)?;
        if changes.is_empty() {
            let pk = self.schema.primary_key()?;
            let Some(value) = input.values.get(pk).filter(|v| !v.is_empty()) else {
                return Err(EncError::Usage(format!("Missing {pk}")));
            };
            let fallback = ChangeInput {
                nodes: vec![value.clone()],
                values: input.values.clone(),
                ..ChangeInput::default()
            };
            changes = builder.build(&fallback)?;
        }
        self.apply(Mutation::Add, &changes)
    }

    /// Updates existing nodes; nodes that do not exist are left alone.
    pub fn change(&self, input: &ChangeInput) -> Result<MutationReport, EncError> {
        let changes = ChangeSetBuilder::new(&self.schema).build(input)?;
        self.apply(Mutation::Change, &changes)
    }

    /// Moves the command-line nodes to `environment`.
    pub fn change_environment(
        &self,
        input: &ChangeInput,
        environment: &str,
    ) -> Result<MutationReport, EncError> {
        let mut input = input.clone();
        input.values.insert(ENVIRONMENT_COLUMN.to_string(), environment.to_string());
        self.change(&input)
    }

    /// Deletes nodes by exact primary key. Deleting twice is harmless.
    pub fn delete(&self, input: &ChangeInput) -> Result<MutationReport, EncError> {
        let changes = ChangeSetBuilder::new(&self.schema).build(input)?;
        self.apply(Mutation::Delete, &changes)
    }

    #[instrument(skip_all, fields(action = %action, nodes = changes.len()))]
    fn apply(&self, action: Mutation, changes: &ChangeSet) -> Result<MutationReport, EncError> {
        let batch = MutationPlanner::new(&self.schema).plan(action, changes)?;
        let rows_changed = self.store.execute_batch(&batch)?;
        let backup = self.backups.snapshot(&self.store)?;
        info!("{action}: {} statements, {rows_changed} rows changed", batch.len());
        Ok(MutationReport { action, statements: batch.len(), rows_changed, backup })
    }

    /// Drops and recreates the node table, then snapshots the empty table.
    #[instrument(skip_all, fields(table = %self.schema.name))]
    pub fn init(&self) -> Result<PathBuf, EncError> {
        self.store.drop_table(&self.schema)?;
        self.store.create_table(&self.schema)?;
        self.backups.snapshot(&self.store)
    }

    pub fn backup(&self) -> Result<PathBuf, EncError> {
        self.backups.snapshot(&self.store)
    }

    /// Replaces the store with the single snapshot named in `sources`.
    pub fn restore(&self, sources: &[String]) -> Result<PathBuf, EncError> {
        match sources {
            [source] => self.backups.restore(&self.store, &self.schema, Path::new(source)),
            [] => Err(EncError::Usage("Missing restore filename for action \"restore\"".into())),
            _ => Err(EncError::Usage("Expecting just one file as restore source".into())),
        }
    }

    pub fn list(&self, patterns: &[String]) -> Result<Vec<NodeRecord>, EncError> {
        self.query().list(patterns)
    }

    pub fn lookup(&self, nodes: &[String]) -> Result<Classification, EncError> {
        self.query().lookup(nodes)
    }

    fn query(&self) -> QueryEngine<'_> {
        QueryEngine::new(&self.schema, &self.store, self.role_model)
    }
}

//! # enc-table
//!
//! Schema-driven node registry backed by SQLite.
//!
//! The node table is declared in a YAML descriptor rather than at build
//! time. Operators describe mutations as a structured file, a CSV file or
//! command-line values; all three become one [`ChangeSet`], which the
//! [`MutationPlanner`] turns into parameterized statements applied in a
//! single transaction. Every mutation is followed by a gzip snapshot that
//! [`BackupManager::restore`] can replay.
//!
//! ## Quick start
//!
//! ```no_run
//! use enc_table::{BackupManager, ChangeInput, NodeRegistry, RoleModel, TableSchema, TableStore};
//!
//! let schema = TableSchema::from_descriptor_str(
//!     "Nodes:\n  table_name: nodes\n  columns:\n    fqdn: [TEXT, PRIMARY KEY]\n    role: [TEXT]\n",
//! )
//! .unwrap();
//! let registry = NodeRegistry::new(
//!     schema,
//!     TableStore::open_memory().unwrap(),
//!     BackupManager::new("/var/backups/puppet_enc"),
//!     RoleModel::Module,
//! );
//! registry.init().unwrap();
//!
//! let mut input = ChangeInput::default();
//! input.nodes.push("host1.example.com".into());
//! input.values.insert("role".into(), "web".into());
//! registry.add(&input).unwrap();
//!
//! let enc = registry.lookup(&["host1.example.com".to_string()]).unwrap();
//! assert_eq!(enc.classes, Some(vec!["role::web".to_string()]));
//! ```

pub mod backup;
pub mod changeset;
pub mod config;
pub mod error;
pub mod planner;
pub mod query;
pub mod registry;
pub mod schema;
pub mod store;

// Re-exports for convenience.
pub use backup::BackupManager;
pub use changeset::{sanitize_branch_name, Attributes, ChangeInput, ChangeSet, ChangeSetBuilder};
pub use config::{EncConfig, RoleModel};
pub use error::EncError;
pub use planner::{Mutation, MutationPlanner};
pub use query::{Classification, NodeRecord, QueryEngine};
pub use registry::{MutationReport, NodeRegistry};
pub use schema::{ColumnDef, TableSchema};
pub use store::{Rows, Statement, StatementBatch, TableStore};

#[cfg(test)]
mod tests;

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while managing the node registry.
#[derive(Debug, Error)]
pub enum EncError {
    /// An error originating from the underlying SQLite database.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem error while reading input, config or backups.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration or schema descriptor is unusable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No column of the schema descriptor carries a `PRIMARY KEY` token.
    #[error("Failed to find DB primary key in table '{0}'")]
    MissingPrimaryKey(String),

    /// The operator invoked an action with the wrong arguments.
    #[error("Usage error: {0}")]
    Usage(String),

    /// A structured or tabular change-set source could not be parsed.
    #[error("Failed to parse {path}: {reason}")]
    InputParse { path: PathBuf, reason: String },

    /// The restore source does not exist.
    #[error("Backup file not found: {0}")]
    BackupNotFound(PathBuf),
}

impl EncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EncError::Io { path: path.into(), source }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        EncError::InputParse { path: path.into(), reason: reason.to_string() }
    }
}

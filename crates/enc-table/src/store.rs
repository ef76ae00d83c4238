use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info, instrument};

use crate::error::EncError;
use crate::schema::TableSchema;

/// One SQL statement plus the values bound to its positional placeholders.
///
/// Only identifiers from configuration are ever interpolated into `sql`;
/// operator-supplied values always travel in `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self { sql: sql.into(), params }
    }
}

/// Ordered statements applied as a single all-or-nothing transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementBatch {
    statements: Vec<Statement>,
}

impl StatementBatch {
    pub fn push(&mut self, stmt: Statement) {
        self.statements.push(stmt);
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }
}

/// Result set of a read-only query, columns in projection order.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// The node registry's SQLite store.
///
/// One connection is opened per invocation and reused for every statement.
pub struct TableStore {
    conn: Connection,
}

impl TableStore {
    /// Opens (or creates) a SQLite database at the given file path.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self, EncError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        debug!("Opened TableStore at {}", path.display());
        Ok(Self { conn })
    }

    /// Opens an in-memory SQLite database (useful for testing).
    pub fn open_memory() -> Result<Self, EncError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        debug!("Opened in-memory TableStore");
        Ok(Self { conn })
    }

    /// Drops the node table if it exists. Dropping an absent table is not an error.
    #[instrument(skip_all, fields(table = %schema.name))]
    pub fn drop_table(&self, schema: &TableSchema) -> Result<(), EncError> {
        let sql = schema.drop_sql();
        info!("{sql}");
        self.conn.execute(&sql, [])?;
        Ok(())
    }

    /// Creates the node table from the schema descriptor.
    ///
    /// Fails with [`EncError::MissingPrimaryKey`] if no column is marked as
    /// primary key.
    #[instrument(skip_all, fields(table = %schema.name))]
    pub fn create_table(&self, schema: &TableSchema) -> Result<(), EncError> {
        let sql = schema.create_sql()?;
        info!("{sql}");
        self.conn.execute(&sql, [])?;
        Ok(())
    }

    /// Checks whether a table exists.
    pub fn table_exists(&self, name: &str) -> Result<bool, EncError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            rusqlite::params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Applies every statement of `batch` in order inside one transaction.
    ///
    /// The first failing statement rolls back the whole batch and its error is
    /// returned. Returns the total number of rows changed.
    #[instrument(skip_all, fields(statements = batch.len()))]
    pub fn execute_batch(&self, batch: &StatementBatch) -> Result<usize, EncError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut changed = 0;
        for stmt in batch.iter() {
            info!("{} + {:?}", stmt.sql, stmt.params);
            changed += tx.execute(&stmt.sql, params_from_iter(stmt.params.iter()))?;
        }
        tx.commit()?;
        debug!("Committed {} statements, {} rows changed", batch.len(), changed);
        Ok(changed)
    }

    /// Runs a single read-only statement outside any transaction.
    #[instrument(skip_all)]
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Rows, EncError> {
        info!("{} + {:?}", sql, params);
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<Result<Vec<Vec<SqlValue>>, _>>()?;

        debug!("Queried {} rows", rows.len());
        Ok(Rows { columns, rows })
    }

    /// Executes a multi-statement SQL script, as produced by a logical dump.
    #[instrument(skip_all, fields(bytes = script.len()))]
    pub fn execute_script(&self, script: &str) -> Result<(), EncError> {
        self.conn.execute_batch(script)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

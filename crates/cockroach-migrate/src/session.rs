//! DDL session: statement buffer, compiler, connection and catalog.
//!
//! Dialect roles append statements to the session and then execute the
//! buffer. Statements run one at a time in the order they were appended;
//! each one is confirmed by the connection before the next is sent, and
//! only confirmed statements reach the catalog. When a confirmed statement
//! does not fit the catalog, the catalog is wrong: the table is marked stale
//! and reflected again the next time its definition is needed.

use tracing::{debug, warn};

use crate::catalog::SchemaState;
use crate::compiler::DdlCompiler;
use crate::connection::{ReflectedIndex, SchemaConnection};
use crate::ddl::DdlStatement;
use crate::error::{MigrateError, Result};
use crate::schema::{ForeignKeySchema, TableSchema};

/// An ordered DDL session bound to one connection.
pub struct DdlSession<C> {
    connection: C,
    compiler: Box<dyn DdlCompiler>,
    catalog: SchemaState,
    buffer: Vec<DdlStatement>,
    executed: Vec<String>,
}

impl<C: SchemaConnection> DdlSession<C> {
    /// Creates a session with an empty catalog.
    pub fn new(connection: C, compiler: Box<dyn DdlCompiler>) -> Self {
        Self {
            connection,
            compiler,
            catalog: SchemaState::new(),
            buffer: Vec::new(),
            executed: Vec::new(),
        }
    }

    /// Replaces the session catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: SchemaState) -> Self {
        self.catalog = catalog;
        self
    }

    /// Returns the compiler statements are rendered with.
    #[must_use]
    pub fn compiler(&self) -> &dyn DdlCompiler {
        self.compiler.as_ref()
    }

    /// Returns the catalog.
    #[must_use]
    pub fn catalog(&self) -> &SchemaState {
        &self.catalog
    }

    /// Returns the connection.
    #[must_use]
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Consumes the session and returns its connection.
    pub fn into_connection(self) -> C {
        self.connection
    }

    /// Returns the SQL of every confirmed statement, in execution order.
    #[must_use]
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Returns the statements appended but not yet executed.
    #[must_use]
    pub fn pending(&self) -> &[DdlStatement] {
        &self.buffer
    }

    /// Appends a statement to the buffer.
    pub fn append(&mut self, statement: DdlStatement) {
        self.buffer.push(statement);
    }

    /// Executes the buffered statements in order.
    ///
    /// Stops at the first failure. The failed statement and everything
    /// after it are discarded; earlier statements stay applied.
    pub async fn execute(&mut self) -> Result<()> {
        let statements = std::mem::take(&mut self.buffer);
        for statement in statements {
            let sql = self.compiler.compile(&statement);
            debug!(sql = %sql, "Executing SQL");
            self.connection.execute(&sql).await?;
            self.executed.push(sql);

            if self.catalog.tracks(&statement) {
                if let Err(err) = self.catalog.apply(&statement) {
                    warn!(error = %err, "Catalog out of step with the database");
                    match statement.table() {
                        Some(table) => self.catalog.invalidate(table),
                        None => self.catalog.invalidate_all(),
                    }
                }
            }
        }
        Ok(())
    }

    /// Appends one statement and executes the buffer.
    pub async fn run(&mut self, statement: DdlStatement) -> Result<()> {
        self.append(statement);
        self.execute().await
    }

    /// Returns the definition of `name`.
    ///
    /// Tables the catalog does not track yet, or tracks as stale, are
    /// reflected from the connection and tracked from then on. A stale table
    /// the connection cannot see keeps its last known definition.
    pub async fn table(&mut self, name: &str) -> Result<TableSchema> {
        if let Some(table) = self.catalog.table(name) {
            if !self.catalog.is_stale(name) {
                return Ok(table.clone());
            }
        }

        let columns = self.connection.get_columns(name).await?;
        if columns.is_empty() {
            return match self.catalog.table(name) {
                Some(table) => {
                    warn!(table = %name, "Table not reflected, using last known definition");
                    Ok(table.clone())
                }
                None => Err(MigrateError::UnknownTable(name.to_string())),
            };
        }
        let table = columns
            .into_iter()
            .fold(TableSchema::new(name), TableSchema::column);
        debug!(table = %name, "Reflected table definition");
        self.catalog.track(table.clone());
        Ok(table)
    }

    /// Returns true if `name` exists in the database.
    pub async fn table_exists(&mut self, name: &str) -> Result<bool> {
        self.connection.table_exists(name).await
    }

    /// Returns the live indexes of `table`.
    pub async fn indexes(&mut self, table: &str) -> Result<Vec<ReflectedIndex>> {
        self.connection.get_indexes(table).await
    }

    /// Returns the live foreign keys of `table`.
    pub async fn foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeySchema>> {
        self.connection.get_foreign_keys(table).await
    }
}

//! Migration executor.
//!
//! This module handles applying and rolling back migrations through a
//! dialect on one connection.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::connection::{RecordingConnection, SchemaConnection};
use crate::dialect::MigrationDialect;
use crate::error::{MigrateError, Result};
use crate::operations::MigrationOperation;
use crate::session::DdlSession;

/// A migration ready to be executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableMigration {
    /// Migration name.
    pub name: String,
    /// Migration operations.
    #[serde(default)]
    pub operations: Vec<MigrationOperation>,
}

impl ExecutableMigration {
    /// Creates a new executable migration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: Vec::new(),
        }
    }

    /// Adds an operation to this migration.
    #[must_use]
    pub fn operation(mut self, op: MigrationOperation) -> Self {
        self.operations.push(op);
        self
    }

    /// Adds operations to this migration.
    #[must_use]
    pub fn operations(mut self, ops: Vec<MigrationOperation>) -> Self {
        self.operations.extend(ops);
        self
    }

    /// Loads a migration plan from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| MigrateError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Returns whether this migration is reversible.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.operations.iter().all(MigrationOperation::is_reversible)
    }

    /// Returns the reverse operations for rollback.
    #[must_use]
    pub fn reverse_operations(&self) -> Option<Vec<MigrationOperation>> {
        self.operations
            .iter()
            .rev()
            .map(MigrationOperation::reverse)
            .collect()
    }

    /// Returns the migration that undoes this one.
    pub fn reversed(&self) -> Result<Self> {
        let operations = self
            .reverse_operations()
            .ok_or_else(|| MigrateError::NotReversible(self.name.clone()))?;
        Ok(Self {
            name: format!("{} (reverse)", self.name),
            operations,
        })
    }
}

/// Executes migrations against a database.
pub struct MigrationExecutor<C, D> {
    session: DdlSession<C>,
    dialect: D,
}

impl<C: SchemaConnection, D: MigrationDialect> MigrationExecutor<C, D> {
    /// Creates a new migration executor.
    pub fn new(connection: C, dialect: D) -> Self {
        let session = DdlSession::new(connection, dialect.compiler());
        Self { session, dialect }
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    /// Returns the session.
    #[must_use]
    pub fn session(&self) -> &DdlSession<C> {
        &self.session
    }

    /// Returns the session, so dialect helpers can run on it.
    pub fn session_mut(&mut self) -> &mut DdlSession<C> {
        &mut self.session
    }

    /// Consumes the executor and returns its session.
    pub fn into_session(self) -> DdlSession<C> {
        self.session
    }

    /// Applies a single migration.
    ///
    /// Operations run in order; the first failure stops the migration and
    /// leaves the statements that already ran in place.
    pub async fn apply(&mut self, migration: &ExecutableMigration) -> Result<()> {
        info!(
            name = %migration.name,
            dialect = self.dialect.name(),
            "Applying migration"
        );

        for operation in &migration.operations {
            self.dialect.apply(&mut self.session, operation).await?;
        }

        info!(name = %migration.name, "Migration applied successfully");
        Ok(())
    }

    /// Rolls back a single migration.
    pub async fn rollback(&mut self, migration: &ExecutableMigration) -> Result<()> {
        info!(name = %migration.name, "Rolling back migration");

        let reverse = migration.reversed()?;
        for operation in &reverse.operations {
            self.dialect.apply(&mut self.session, operation).await?;
        }

        info!(name = %migration.name, "Migration rolled back successfully");
        Ok(())
    }

    /// Applies multiple migrations in order.
    pub async fn apply_all(&mut self, migrations: &[ExecutableMigration]) -> Result<()> {
        for migration in migrations {
            self.apply(migration).await?;
        }
        Ok(())
    }
}

/// Generates the SQL for a migration without a database.
///
/// Reflection finds no tables, so operations that need an existing table's
/// definition only work on tables created earlier in the same migration.
pub async fn sql_for<D: MigrationDialect>(
    dialect: D,
    migration: &ExecutableMigration,
) -> Result<Vec<String>> {
    let mut executor = MigrationExecutor::new(RecordingConnection::new(), dialect);
    executor.apply(migration).await?;
    Ok(executor.into_session().into_connection().into_statements())
}

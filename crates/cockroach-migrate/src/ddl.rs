//! Typed DDL statements.
//!
//! Dialect roles append these to a session; a [`DdlCompiler`](crate::compiler::DdlCompiler)
//! renders them to SQL and the catalog replays their effect once the
//! statement has been confirmed by the database.

use crate::schema::{ColumnSchema, DefaultValue, ForeignKeySchema, IndexSchema, SqlType, TableSchema};

/// One DDL (or data-copy) statement.
#[derive(Debug, Clone, PartialEq)]
pub enum DdlStatement {
    /// `CREATE TABLE`.
    CreateTable {
        /// Table definition.
        table: TableSchema,
        /// Whether to use IF NOT EXISTS.
        if_not_exists: bool,
    },
    /// `DROP TABLE`.
    DropTable {
        /// Table name.
        name: String,
        /// Whether to use IF EXISTS.
        if_exists: bool,
        /// Whether to drop dependent objects.
        cascade: bool,
    },
    /// `ALTER TABLE ... RENAME TO`.
    RenameTable {
        /// Current name.
        old_name: String,
        /// New name.
        new_name: String,
    },
    /// `ALTER TABLE ... ADD COLUMN`.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnSchema,
    },
    /// `ALTER TABLE ... DROP COLUMN`.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// `ALTER TABLE ... RENAME COLUMN`.
    RenameColumn {
        /// Table name.
        table: String,
        /// Current name.
        old_name: String,
        /// New name.
        new_name: String,
    },
    /// `ALTER TABLE ... ALTER COLUMN`.
    AlterColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// The single change to apply.
        change: AlterColumnChange,
    },
    /// `CREATE INDEX`.
    CreateIndex {
        /// Table name.
        table: String,
        /// Index definition.
        index: IndexSchema,
    },
    /// `DROP INDEX`.
    DropIndex {
        /// Table owning the index, when known.
        table: Option<String>,
        /// Index name.
        name: String,
        /// Whether to use IF EXISTS.
        if_exists: bool,
    },
    /// `ALTER TABLE ... ADD PRIMARY KEY`.
    AddPrimaryKey {
        /// Table name.
        table: String,
        /// Key columns.
        columns: Vec<String>,
    },
    /// `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY`.
    AddForeignKey {
        /// Referencing table.
        table: String,
        /// Foreign key definition.
        foreign_key: ForeignKeySchema,
    },
    /// `ALTER TABLE ... ADD CONSTRAINT ... UNIQUE`.
    AddUnique {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
        /// Constrained columns.
        columns: Vec<String>,
    },
    /// `ALTER TABLE ... DROP CONSTRAINT`.
    DropConstraint {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
        /// Whether to drop dependent objects.
        cascade: bool,
    },
    /// `ALTER TABLE ... VALIDATE CONSTRAINT`.
    ValidateConstraint {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
    },
    /// `INSERT INTO target (cols) SELECT cols FROM source`.
    CopyRows {
        /// Destination table.
        target: String,
        /// Source table.
        source: String,
        /// Columns projected by name on both sides.
        columns: Vec<String>,
    },
    /// Raw SQL.
    Raw(String),
}

/// A single change to a column's properties.
#[derive(Debug, Clone, PartialEq)]
pub enum AlterColumnChange {
    /// Change the data type.
    SetType(SqlType),
    /// Set or drop NOT NULL.
    SetNullable(bool),
    /// Set the default value.
    SetDefault(DefaultValue),
    /// Drop the default value.
    DropDefault,
}

impl DdlStatement {
    /// Returns the table whose tracked schema this statement changes.
    ///
    /// `None` for raw SQL and for index drops without a table.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::CreateTable { table, .. } => Some(&table.name),
            Self::DropTable { name, .. } => Some(name),
            Self::RenameTable { old_name, .. } => Some(old_name),
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::AlterColumn { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::AddPrimaryKey { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::AddUnique { table, .. }
            | Self::DropConstraint { table, .. }
            | Self::ValidateConstraint { table, .. } => Some(table),
            Self::CopyRows { target, .. } => Some(target),
            Self::DropIndex { table, .. } => table.as_deref(),
            Self::Raw(_) => None,
        }
    }
}

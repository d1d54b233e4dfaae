//! Migration operations.
//!
//! This module defines the schema changes a migration can express. Each
//! operation is dispatched to one role of the selected dialect.

use serde::{Deserialize, Serialize};

use crate::constraint::Constraint;
use crate::schema::{ColumnSchema, DefaultValue, ForeignKeySchema, SqlType};

/// Changes to apply to an existing column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ColumnChanges {
    /// New data type (if changing).
    pub sql_type: Option<SqlType>,
    /// New nullability (if changing).
    pub nullable: Option<bool>,
    /// New default value (if changing).
    pub default: Option<DefaultValue>,
}

impl ColumnChanges {
    /// Creates empty column changes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a new type.
    #[must_use]
    pub fn set_type(mut self, sql_type: SqlType) -> Self {
        self.sql_type = Some(sql_type);
        self
    }

    /// Sets nullability.
    #[must_use]
    pub fn set_nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    /// Sets default value.
    #[must_use]
    pub fn set_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Returns true if no changes are specified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sql_type.is_none() && self.nullable.is_none() && self.default.is_none()
    }
}

/// Dialect role an operation is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// `ALTER TABLE ... ADD COLUMN`.
    ColumnGenerator,
    /// `ALTER TABLE ... DROP COLUMN`.
    ColumnDropper,
    /// Table, index and column changes that are not additions or drops.
    SchemaChanger,
    /// `ALTER TABLE ... ADD CONSTRAINT`.
    ConstraintGenerator,
    /// `ALTER TABLE ... DROP CONSTRAINT`.
    ConstraintDropper,
}

/// A single migration operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MigrationOperation {
    /// Create a new table.
    CreateTable {
        /// Table name.
        name: String,
        /// Column definitions.
        columns: Vec<ColumnSchema>,
        /// Primary key column(s).
        primary_key: Vec<String>,
        /// Whether to use IF NOT EXISTS.
        if_not_exists: bool,
    },

    /// Drop a table.
    DropTable {
        /// Table name.
        name: String,
        /// Whether to use IF EXISTS.
        if_exists: bool,
        /// Whether to drop dependent objects too.
        cascade: bool,
    },

    /// Rename a table.
    RenameTable {
        /// Old table name.
        old_name: String,
        /// New table name.
        new_name: String,
    },

    /// Add a column to a table.
    AddColumn {
        /// Table name.
        table: String,
        /// Column definition.
        column: ColumnSchema,
    },

    /// Drop a column from a table.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column_name: String,
    },

    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Old column name.
        old_name: String,
        /// New column name.
        new_name: String,
    },

    /// Alter a column's properties.
    AlterColumn {
        /// Table name.
        table: String,
        /// Column name.
        column_name: String,
        /// Changes to apply.
        changes: ColumnChanges,
    },

    /// Create an index.
    CreateIndex {
        /// Index name.
        name: String,
        /// Table name.
        table: String,
        /// Columns to index.
        columns: Vec<String>,
        /// Whether this is a unique index.
        unique: bool,
        /// Partial index condition.
        condition: Option<String>,
    },

    /// Drop an index.
    DropIndex {
        /// Index name.
        name: String,
        /// Table name (CockroachDB addresses indexes as `table@index`).
        table: Option<String>,
        /// Whether to use IF EXISTS.
        if_exists: bool,
    },

    /// Add a primary key, foreign key or unique constraint.
    AddConstraint(Constraint),

    /// Drop a primary key, foreign key or unique constraint.
    DropConstraint(Constraint),

    /// Run raw SQL (for custom migrations).
    RunSql {
        /// Forward SQL statement.
        forward: String,
        /// Backward SQL statement for rollback.
        backward: Option<String>,
    },
}

impl MigrationOperation {
    /// Creates a CreateTable operation.
    #[must_use]
    pub fn create_table(
        name: impl Into<String>,
        columns: Vec<ColumnSchema>,
        primary_key: Vec<String>,
    ) -> Self {
        Self::CreateTable {
            name: name.into(),
            columns,
            primary_key,
            if_not_exists: false,
        }
    }

    /// Creates a DropTable operation.
    #[must_use]
    pub fn drop_table(name: impl Into<String>) -> Self {
        Self::DropTable {
            name: name.into(),
            if_exists: false,
            cascade: false,
        }
    }

    /// Creates a RenameTable operation.
    #[must_use]
    pub fn rename_table(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self::RenameTable {
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    /// Creates an AddColumn operation.
    #[must_use]
    pub fn add_column(table: impl Into<String>, column: ColumnSchema) -> Self {
        Self::AddColumn {
            table: table.into(),
            column,
        }
    }

    /// Creates a DropColumn operation.
    #[must_use]
    pub fn drop_column(table: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self::DropColumn {
            table: table.into(),
            column_name: column_name.into(),
        }
    }

    /// Creates a RenameColumn operation.
    #[must_use]
    pub fn rename_column(
        table: impl Into<String>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self::RenameColumn {
            table: table.into(),
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    /// Creates an AlterColumn operation.
    #[must_use]
    pub fn alter_column(
        table: impl Into<String>,
        column_name: impl Into<String>,
        changes: ColumnChanges,
    ) -> Self {
        Self::AlterColumn {
            table: table.into(),
            column_name: column_name.into(),
            changes,
        }
    }

    /// Creates a CreateIndex operation.
    #[must_use]
    pub fn create_index(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<String>,
        unique: bool,
    ) -> Self {
        Self::CreateIndex {
            name: name.into(),
            table: table.into(),
            columns,
            unique,
            condition: None,
        }
    }

    /// Creates a DropIndex operation on `table`.
    #[must_use]
    pub fn drop_index(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DropIndex {
            name: name.into(),
            table: Some(table.into()),
            if_exists: false,
        }
    }

    /// Creates an AddConstraint operation for a primary key.
    #[must_use]
    pub fn add_primary_key(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self::AddConstraint(Constraint::primary_key(table, columns))
    }

    /// Creates an AddConstraint operation for a foreign key.
    #[must_use]
    pub fn add_foreign_key(table: impl Into<String>, foreign_key: ForeignKeySchema) -> Self {
        Self::AddConstraint(Constraint::foreign_key(table, foreign_key))
    }

    /// Creates a DropConstraint operation for a foreign key.
    #[must_use]
    pub fn drop_foreign_key(table: impl Into<String>, foreign_key: ForeignKeySchema) -> Self {
        Self::DropConstraint(Constraint::foreign_key(table, foreign_key))
    }

    /// Creates an AddConstraint operation for a unique constraint.
    #[must_use]
    pub fn add_unique_constraint(
        table: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self::AddConstraint(Constraint::unique(table, name, columns))
    }

    /// Creates a RunSql operation.
    #[must_use]
    pub fn run_sql(forward: impl Into<String>, backward: Option<String>) -> Self {
        Self::RunSql {
            forward: forward.into(),
            backward,
        }
    }

    /// Returns the dialect role that handles this operation.
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::AddColumn { .. } => Role::ColumnGenerator,
            Self::DropColumn { .. } => Role::ColumnDropper,
            Self::AddConstraint(_) => Role::ConstraintGenerator,
            Self::DropConstraint(_) => Role::ConstraintDropper,
            Self::CreateTable { .. }
            | Self::DropTable { .. }
            | Self::RenameTable { .. }
            | Self::RenameColumn { .. }
            | Self::AlterColumn { .. }
            | Self::CreateIndex { .. }
            | Self::DropIndex { .. }
            | Self::RunSql { .. } => Role::SchemaChanger,
        }
    }

    /// Returns the reverse operation for rollback.
    ///
    /// Returns `None` if the operation is not reversible. Adding a primary key
    /// rebuilds the table and cannot be undone, since dropping a primary key
    /// does nothing on CockroachDB.
    #[must_use]
    pub fn reverse(&self) -> Option<Self> {
        match self {
            Self::CreateTable { name, .. } => Some(Self::drop_table(name.clone())),

            Self::RenameTable { old_name, new_name } => {
                Some(Self::rename_table(new_name.clone(), old_name.clone()))
            }

            Self::AddColumn { table, column } => {
                Some(Self::drop_column(table.clone(), column.name.clone()))
            }

            Self::RenameColumn {
                table,
                old_name,
                new_name,
            } => Some(Self::rename_column(
                table.clone(),
                new_name.clone(),
                old_name.clone(),
            )),

            Self::CreateIndex { name, table, .. } => {
                Some(Self::drop_index(table.clone(), name.clone()))
            }

            Self::AddConstraint(constraint @ Constraint::ForeignKey { .. })
            | Self::AddConstraint(constraint @ Constraint::Unique { .. }) => {
                Some(Self::DropConstraint(constraint.clone()))
            }

            Self::RunSql { backward, forward } => backward.as_ref().map(|bwd| Self::RunSql {
                forward: bwd.clone(),
                backward: Some(forward.clone()),
            }),

            // Cannot reverse without knowing the original definition
            Self::DropTable { .. }
            | Self::DropColumn { .. }
            | Self::AlterColumn { .. }
            | Self::DropIndex { .. }
            | Self::AddConstraint(Constraint::PrimaryKey { .. })
            | Self::DropConstraint(_) => None,
        }
    }

    /// Returns true if this operation can be reversed.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.reverse().is_some()
    }

    /// Returns a human-readable description of this operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable { name, .. } => format!("Create table '{}'", name),
            Self::DropTable { name, .. } => format!("Drop table '{}'", name),
            Self::RenameTable { old_name, new_name } => {
                format!("Rename table '{}' to '{}'", old_name, new_name)
            }
            Self::AddColumn { table, column } => {
                format!("Add column '{}' to table '{}'", column.name, table)
            }
            Self::DropColumn { table, column_name } => {
                format!("Drop column '{}' from table '{}'", column_name, table)
            }
            Self::RenameColumn {
                table,
                old_name,
                new_name,
            } => format!(
                "Rename column '{}' to '{}' in table '{}'",
                old_name, new_name, table
            ),
            Self::AlterColumn {
                table, column_name, ..
            } => format!("Alter column '{}' in table '{}'", column_name, table),
            Self::CreateIndex { name, table, .. } => {
                format!("Create index '{}' on table '{}'", name, table)
            }
            Self::DropIndex { name, .. } => format!("Drop index '{}'", name),
            Self::AddConstraint(c) => format!(
                "Add {} constraint on ({}) to table '{}'",
                c.kind(),
                c.columns().join(", "),
                c.table()
            ),
            Self::DropConstraint(c) => format!(
                "Drop {} constraint on ({}) from table '{}'",
                c.kind(),
                c.columns().join(", "),
                c.table()
            ),
            Self::RunSql { .. } => "Run custom SQL".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ForeignKeyBuilder;

    fn org_fk() -> ForeignKeySchema {
        ForeignKeyBuilder::new("users_org_id_fkey")
            .columns(vec!["org_id".to_string()])
            .references("orgs", vec!["id".to_string()])
            .build()
    }

    #[test]
    fn test_create_table_reverse() {
        let op = MigrationOperation::create_table(
            "users",
            vec![ColumnSchema::new("id", SqlType::BigInt).primary_key()],
            vec!["id".to_string()],
        );

        match op.reverse().unwrap() {
            MigrationOperation::DropTable { name, .. } => assert_eq!(name, "users"),
            _ => panic!("Expected DropTable"),
        }
    }

    #[test]
    fn test_add_foreign_key_reverse() {
        let op = MigrationOperation::add_foreign_key("users", org_fk());

        match op.reverse().unwrap() {
            MigrationOperation::DropConstraint(Constraint::ForeignKey { table, foreign_key }) => {
                assert_eq!(table, "users");
                assert_eq!(foreign_key.name, "users_org_id_fkey");
            }
            _ => panic!("Expected DropConstraint"),
        }
    }

    #[test]
    fn test_add_primary_key_not_reversible() {
        let op = MigrationOperation::add_primary_key("users", vec!["id".to_string()]);
        assert!(op.reverse().is_none());
        assert!(!op.is_reversible());
    }

    #[test]
    fn test_run_sql_reversible() {
        let op = MigrationOperation::run_sql(
            "INSERT INTO config VALUES ('key', 'value')",
            Some("DELETE FROM config WHERE key = 'key'".to_string()),
        );

        assert!(op.is_reversible());
        match op.reverse().unwrap() {
            MigrationOperation::RunSql { forward, backward } => {
                assert_eq!(forward, "DELETE FROM config WHERE key = 'key'");
                assert!(backward.is_some());
            }
            _ => panic!("Expected RunSql"),
        }
    }

    #[test]
    fn test_roles() {
        assert_eq!(
            MigrationOperation::add_column("t", ColumnSchema::new("c", SqlType::Text)).role(),
            Role::ColumnGenerator
        );
        assert_eq!(
            MigrationOperation::drop_column("t", "c").role(),
            Role::ColumnDropper
        );
        assert_eq!(
            MigrationOperation::add_foreign_key("users", org_fk()).role(),
            Role::ConstraintGenerator
        );
        assert_eq!(
            MigrationOperation::drop_foreign_key("users", org_fk()).role(),
            Role::ConstraintDropper
        );
        assert_eq!(
            MigrationOperation::rename_table("a", "b").role(),
            Role::SchemaChanger
        );
    }

    #[test]
    fn test_description() {
        let op = MigrationOperation::add_unique_constraint("users", "users_email_key", vec![
            "email".to_string(),
        ]);
        assert_eq!(
            op.description(),
            "Add unique constraint on (email) to table 'users'"
        );
    }

    #[test]
    fn test_column_changes() {
        let changes = ColumnChanges::new()
            .set_type(SqlType::Text)
            .set_nullable(false);

        assert!(!changes.is_empty());
        assert_eq!(changes.sql_type, Some(SqlType::Text));
        assert_eq!(changes.nullable, Some(false));
    }
}

//! Table constraints handled by the constraint generator and dropper.
//!
//! The naming helpers here are shared by the add and drop paths: an index
//! created next to a foreign key is found again on drop only through
//! [`foreign_key_index_name`].

use serde::{Deserialize, Serialize};

use crate::schema::{ForeignKeyAction, ForeignKeySchema, UniqueConstraint};

/// Suffix of the temporary table used while rebuilding a primary key.
pub const REBUILD_SUFFIX: &str = "_migrate_tmp";

/// Prefix of the companion index created before a foreign key.
pub const FOREIGN_KEY_INDEX_PREFIX: &str = "cockroach_fk_";

/// Kind of a [`Constraint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Primary key.
    PrimaryKey,
    /// Foreign key.
    ForeignKey,
    /// Unique constraint.
    Unique,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::PrimaryKey => "primary key",
            Self::ForeignKey => "foreign key",
            Self::Unique => "unique",
        })
    }
}

/// A constraint attached to a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constraint {
    /// Primary key over `columns`.
    PrimaryKey {
        /// Table name.
        table: String,
        /// Key columns, in declaration order.
        columns: Vec<String>,
    },
    /// Foreign key from `table`.
    ForeignKey {
        /// Referencing table.
        table: String,
        /// Foreign key definition.
        foreign_key: ForeignKeySchema,
    },
    /// Unique constraint.
    Unique {
        /// Table name.
        table: String,
        /// Constraint definition.
        constraint: UniqueConstraint,
    },
}

impl Constraint {
    /// Creates a primary key constraint.
    #[must_use]
    pub fn primary_key(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self::PrimaryKey {
            table: table.into(),
            columns,
        }
    }

    /// Creates a foreign key constraint.
    #[must_use]
    pub fn foreign_key(table: impl Into<String>, foreign_key: ForeignKeySchema) -> Self {
        Self::ForeignKey {
            table: table.into(),
            foreign_key,
        }
    }

    /// Creates a unique constraint.
    #[must_use]
    pub fn unique(table: impl Into<String>, name: impl Into<String>, columns: Vec<String>) -> Self {
        Self::Unique {
            table: table.into(),
            constraint: UniqueConstraint {
                name: name.into(),
                columns,
            },
        }
    }

    /// Returns the constraint kind.
    #[must_use]
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Self::PrimaryKey { .. } => ConstraintKind::PrimaryKey,
            Self::ForeignKey { .. } => ConstraintKind::ForeignKey,
            Self::Unique { .. } => ConstraintKind::Unique,
        }
    }

    /// Returns the constrained table.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::PrimaryKey { table, .. }
            | Self::ForeignKey { table, .. }
            | Self::Unique { table, .. } => table,
        }
    }

    /// Returns the constrained columns.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        match self {
            Self::PrimaryKey { columns, .. } => columns,
            Self::ForeignKey { foreign_key, .. } => &foreign_key.columns,
            Self::Unique { constraint, .. } => &constraint.columns,
        }
    }

    /// Returns the constraint name, if it has one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::PrimaryKey { .. } => None,
            Self::ForeignKey { foreign_key, .. } => Some(&foreign_key.name),
            Self::Unique { constraint, .. } => Some(&constraint.name),
        }
    }
}

/// Returns a copy of `foreign_key` whose specified actions are `RESTRICT`.
///
/// CockroachDB only honours `RESTRICT`. Unspecified actions stay unspecified.
#[must_use]
pub fn normalize_foreign_key(foreign_key: &ForeignKeySchema) -> ForeignKeySchema {
    ForeignKeySchema {
        on_delete: foreign_key.on_delete.map(|_| ForeignKeyAction::Restrict),
        on_update: foreign_key.on_update.map(|_| ForeignKeyAction::Restrict),
        ..foreign_key.clone()
    }
}

/// Name of the index created to back a foreign key on `columns`.
///
/// The table is not part of the name; CockroachDB scopes index names to
/// their table. Two foreign keys over the same columns of one table get the
/// same index name, so the second `CREATE INDEX` fails.
#[must_use]
pub fn foreign_key_index_name(columns: &[String]) -> String {
    format!("{}{}", FOREIGN_KEY_INDEX_PREFIX, columns.join("_"))
}

/// Name given to a foreign key declared inline on `table.column`.
#[must_use]
pub fn column_foreign_key_name(table: &str, column: &str) -> String {
    format!("{}_{}_fkey", table, column)
}

/// Returns the constraint name of `foreign_key` on `table`.
///
/// An unnamed foreign key gets the name PostgreSQL would pick,
/// `<table>_<col1>_<col2>..._fkey`.
#[must_use]
pub fn foreign_key_name(table: &str, foreign_key: &ForeignKeySchema) -> String {
    if foreign_key.name.is_empty() {
        column_foreign_key_name(table, &foreign_key.columns.join("_"))
    } else {
        foreign_key.name.clone()
    }
}

/// Name of the temporary table used to rebuild `table`.
#[must_use]
pub fn rebuild_table_name(table: &str) -> String {
    format!("{}{}", table, REBUILD_SUFFIX)
}

/// Builder for foreign key schema.
pub struct ForeignKeyBuilder {
    schema: ForeignKeySchema,
}

impl ForeignKeyBuilder {
    /// Creates a new foreign key builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: ForeignKeySchema {
                name: name.into(),
                columns: Vec::new(),
                references_table: String::new(),
                references_columns: Vec::new(),
                on_delete: None,
                on_update: None,
            },
        }
    }

    /// Sets the local columns.
    #[must_use]
    pub fn columns(mut self, columns: Vec<String>) -> Self {
        self.schema.columns = columns;
        self
    }

    /// Sets the referenced table and columns.
    #[must_use]
    pub fn references(mut self, table: impl Into<String>, columns: Vec<String>) -> Self {
        self.schema.references_table = table.into();
        self.schema.references_columns = columns;
        self
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.schema.on_delete = Some(action);
        self
    }

    /// Sets the ON UPDATE action.
    #[must_use]
    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.schema.on_update = Some(action);
        self
    }

    /// Builds the foreign key schema.
    #[must_use]
    pub fn build(self) -> ForeignKeySchema {
        self.schema
    }
}

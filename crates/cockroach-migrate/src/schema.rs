//! Schema representation types.
//!
//! These types describe tables as the migration operations see them and as
//! the catalog tracks them while a session runs.

use serde::{Deserialize, Serialize};

/// SQL data types supported by the migration dialects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// Integer (32-bit).
    Integer,
    /// Big integer (64-bit).
    BigInt,
    /// Small integer (16-bit).
    SmallInt,
    /// Unbounded text.
    Text,
    /// Variable-length character string.
    Varchar(usize),
    /// Fixed-length character string.
    Char(usize),
    /// Boolean.
    Boolean,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Timestamp without time zone.
    Timestamp,
    /// Floating point (single precision).
    Real,
    /// Floating point (double precision).
    Double,
    /// Decimal with precision and scale.
    Decimal(u8, u8),
    /// Binary large object.
    Blob,
    /// JSON data.
    Json,
    /// UUID.
    Uuid,
    /// A type name passed through verbatim.
    Custom(String),
}

impl SqlType {
    /// Returns the PostgreSQL type name, which CockroachDB also accepts.
    #[must_use]
    pub fn postgres_name(&self) -> String {
        match self {
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::SmallInt => "SMALLINT".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::Varchar(len) => format!("VARCHAR({})", len),
            Self::Char(len) => format!("CHAR({})", len),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Date => "DATE".to_string(),
            Self::Time => "TIME".to_string(),
            Self::Timestamp => "TIMESTAMP".to_string(),
            Self::Real => "REAL".to_string(),
            Self::Double => "DOUBLE PRECISION".to_string(),
            Self::Decimal(p, s) => format!("DECIMAL({}, {})", p, s),
            Self::Blob => "BYTEA".to_string(),
            Self::Json => "JSONB".to_string(),
            Self::Uuid => "UUID".to_string(),
            Self::Custom(name) => name.clone(),
        }
    }

    /// Parses a type name as reported by CockroachDB's `SHOW COLUMNS`.
    ///
    /// CockroachDB reports booleans as `BOOL`, which plain PostgreSQL type
    /// maps do not know; it is accepted here next to `BOOLEAN`. Unknown names
    /// become [`SqlType::Custom`].
    #[must_use]
    pub fn from_cockroach_name(name: &str) -> Self {
        let trimmed = name.trim();
        let upper = trimmed.to_ascii_uppercase();
        let (base, args) = match upper.split_once('(') {
            Some((base, rest)) => (base.trim(), Some(rest.trim_end_matches(')'))),
            None => (upper.as_str(), None),
        };

        match (base, args) {
            ("BOOL" | "BOOLEAN", None) => Self::Boolean,
            ("INT2" | "SMALLINT", None) => Self::SmallInt,
            ("INT4" | "INTEGER", None) => Self::Integer,
            // INT is 64-bit in CockroachDB.
            ("INT" | "INT8" | "BIGINT", None) => Self::BigInt,
            ("STRING" | "TEXT", None) => Self::Text,
            ("STRING" | "VARCHAR" | "CHARACTER VARYING", Some(len)) => len
                .parse()
                .map_or_else(|_| Self::Custom(trimmed.to_string()), Self::Varchar),
            ("CHAR" | "CHARACTER", Some(len)) => len
                .parse()
                .map_or_else(|_| Self::Custom(trimmed.to_string()), Self::Char),
            ("FLOAT4" | "REAL", None) => Self::Real,
            ("FLOAT" | "FLOAT8" | "DOUBLE PRECISION", None) => Self::Double,
            ("DECIMAL" | "NUMERIC", Some(args)) => {
                let mut parts = args.split(',').map(|p| p.trim().parse::<u8>());
                match (parts.next(), parts.next()) {
                    (Some(Ok(p)), Some(Ok(s))) => Self::Decimal(p, s),
                    _ => Self::Custom(trimmed.to_string()),
                }
            }
            ("DATE", None) => Self::Date,
            ("TIME", None) => Self::Time,
            ("TIMESTAMP", None) => Self::Timestamp,
            ("BYTES" | "BYTEA", None) => Self::Blob,
            ("JSON" | "JSONB", None) => Self::Json,
            ("UUID", None) => Self::Uuid,
            _ => Self::Custom(trimmed.to_string()),
        }
    }
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// No default value.
    None,
    /// NULL default.
    Null,
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// SQL expression (e.g., "now()").
    Expression(String),
}

impl DefaultValue {
    /// Returns the SQL representation of this default value.
    #[must_use]
    pub fn to_sql(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Null => Some("NULL".to_string()),
            Self::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
            Self::Expression(expr) => Some(expr.clone()),
        }
    }
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted/updated).
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// A foreign key declared inline on a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnReference {
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub column: String,
    /// Action on delete, if specified.
    pub on_delete: Option<ForeignKeyAction>,
    /// Action on update, if specified.
    pub on_update: Option<ForeignKeyAction>,
}

impl ColumnReference {
    /// Creates a reference to `table.column` without actions.
    #[must_use]
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            on_delete: None,
            on_update: None,
        }
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    /// Sets the ON UPDATE action.
    #[must_use]
    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = Some(action);
        self
    }

    /// Returns a copy whose specified actions are all `RESTRICT`.
    #[must_use]
    pub fn restricted(&self) -> Self {
        Self {
            on_delete: self.on_delete.map(|_| ForeignKeyAction::Restrict),
            on_update: self.on_update.map(|_| ForeignKeyAction::Restrict),
            ..self.clone()
        }
    }

    /// Expands this reference into a named foreign key on `column`.
    #[must_use]
    pub fn to_foreign_key(&self, name: impl Into<String>, column: &str) -> ForeignKeySchema {
        ForeignKeySchema {
            name: name.into(),
            columns: vec![column.to_string()],
            references_table: self.table.clone(),
            references_columns: vec![self.column.clone()],
            on_delete: self.on_delete,
            on_update: self.on_update,
        }
    }
}

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// SQL data type.
    pub sql_type: SqlType,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Default value.
    pub default: DefaultValue,
    /// Whether this column is the primary key.
    pub primary_key: bool,
    /// Whether this column auto-increments.
    pub auto_increment: bool,
    /// Whether this column has a UNIQUE constraint.
    pub unique: bool,
    /// Check constraint expression (if any).
    pub check: Option<String>,
    /// Inline foreign key (if any).
    #[serde(default)]
    pub references: Option<ColumnReference>,
}

impl ColumnSchema {
    /// Creates a new column schema.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            default: DefaultValue::None,
            primary_key: false,
            auto_increment: false,
            unique: false,
            check: None,
            references: None,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = value;
        self
    }

    /// Sets the column as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false; // Primary keys are always NOT NULL
        self
    }

    /// Sets the column to auto-increment.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Sets the column as unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets a check constraint.
    #[must_use]
    pub fn check(mut self, expr: impl Into<String>) -> Self {
        self.check = Some(expr.into());
        self
    }

    /// Declares an inline foreign key.
    #[must_use]
    pub fn references(mut self, reference: ColumnReference) -> Self {
        self.references = Some(reference);
        self
    }
}

/// Schema definition for a foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeySchema {
    /// Constraint name.
    pub name: String,
    /// Column(s) in the referencing table.
    pub columns: Vec<String>,
    /// Referenced table name.
    pub references_table: String,
    /// Referenced column(s).
    pub references_columns: Vec<String>,
    /// Action on delete, if specified.
    pub on_delete: Option<ForeignKeyAction>,
    /// Action on update, if specified.
    pub on_update: Option<ForeignKeyAction>,
}

/// Schema definition for an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Index name.
    pub name: String,
    /// Columns included in the index.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    pub unique: bool,
    /// Partial index condition (WHERE clause).
    pub condition: Option<String>,
}

impl IndexSchema {
    /// Creates a non-unique index over `columns`.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
            condition: None,
        }
    }
}

/// Schema definition for a unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueConstraint {
    /// Constraint name.
    pub name: String,
    /// Columns that form the unique constraint.
    pub columns: Vec<String>,
}

/// Complete schema definition for a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Column definitions.
    pub columns: Vec<ColumnSchema>,
    /// Primary key column(s).
    pub primary_key: Vec<String>,
    /// Index definitions.
    pub indexes: Vec<IndexSchema>,
    /// Foreign key definitions.
    pub foreign_keys: Vec<ForeignKeySchema>,
    /// Unique constraint definitions.
    pub unique_constraints: Vec<UniqueConstraint>,
}

impl TableSchema {
    /// Creates a new table schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    /// Adds a column to the table.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        if column.primary_key && !self.primary_key.contains(&column.name) {
            self.primary_key.push(column.name.clone());
        }
        self.columns.push(column);
        self
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Gets a mutable column by name.
    #[must_use]
    pub fn get_column_mut(&mut self, name: &str) -> Option<&mut ColumnSchema> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Gets an index by name.
    #[must_use]
    pub fn get_index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Gets a foreign key by constraint name.
    #[must_use]
    pub fn get_foreign_key(&self, name: &str) -> Option<&ForeignKeySchema> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }

    /// Returns the foreign keys that include `column`.
    pub fn foreign_keys_on<'a>(
        &'a self,
        column: &'a str,
    ) -> impl Iterator<Item = &'a ForeignKeySchema> + 'a {
        self.foreign_keys
            .iter()
            .filter(move |fk| fk.columns.iter().any(|c| c == column))
    }
}

/// The complete database schema (all tables).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// All tables in the database.
    pub tables: Vec<TableSchema>,
}

impl DatabaseSchema {
    /// Creates a new empty database schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Gets a mutable table by name.
    #[must_use]
    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut TableSchema> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    /// Returns table names.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}

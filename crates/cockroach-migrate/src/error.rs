//! Error types for the migration dialects.

use std::path::PathBuf;

/// Errors that can occur while generating or executing DDL.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Database error while executing a statement or reflecting the schema.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error (reading migration plans).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a migration plan file.
    #[error("Failed to parse migration plan '{path}': {message}")]
    ParseError {
        /// Path to the plan file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// The catalog cannot apply a statement to its tracked schema.
    #[error("Invalid schema state: {0}")]
    InvalidState(String),

    /// A table is neither tracked by the catalog nor present in the database.
    #[error("Table '{0}' does not exist")]
    UnknownTable(String),

    /// A primary or foreign key was given without columns.
    #[error("Constraint on table '{table}' has no columns")]
    EmptyConstraint {
        /// Table the constraint belongs to.
        table: String,
    },

    /// No dialect is registered under the requested tag.
    #[error("Unknown dialect: {0}")]
    UnknownDialect(String),

    /// A migration is not reversible.
    #[error("Migration '{0}' is not reversible")]
    NotReversible(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

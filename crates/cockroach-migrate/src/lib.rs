//! CockroachDB dialect for schema migrations.
//!
//! `cockroach-migrate` runs schema migrations written against a
//! PostgreSQL-style model on CockroachDB, which:
//! - cannot add a primary key to an existing table
//! - only honours `RESTRICT` foreign key actions
//! - wants foreign key columns indexed before the constraint is added
//!
//! # Architecture
//!
//! - **Operations** - Schema changes like `CreateTable`, `AddColumn`, `AddConstraint`, etc.
//! - **Dialect** - Five roles (column generator, column dropper, schema changer,
//!   constraint generator, constraint dropper); PostgreSQL is the base and
//!   CockroachDB overrides what it must
//! - **Compiler** - Renders typed DDL statements to SQL
//! - **Session** - Executes statements in order on one connection and keeps
//!   the catalog in step with what the database confirmed
//! - **Executor** - Applies and rolls back migration plans
//!
//! # Example
//!
//! ```rust,ignore
//! use cockroach_migrate::prelude::*;
//!
//! let pool = sqlx::PgPool::connect("postgresql://root@localhost:26257/defaultdb").await?;
//! let dialect = DialectRegistry::with_defaults().resolve("cockroachdb")?;
//! let mut executor = MigrationExecutor::new(pool, dialect);
//!
//! let migration = ExecutableMigration::new("0002_primary_key")
//!     .operation(MigrationOperation::add_primary_key("t", vec!["email".to_string()]));
//! executor.apply(&migration).await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Print the SQL for a plan
//! cockroach-migrate sql plan.json
//!
//! # Apply a plan
//! cockroach-migrate --database cockroachdb://root@localhost:26257/app apply plan.json
//! ```

pub mod catalog;
pub mod compiler;
pub mod connection;
pub mod constraint;
pub mod ddl;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod operations;
pub mod schema;
pub mod session;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::catalog::SchemaState;
    pub use crate::compiler::{CockroachCompiler, DdlCompiler, PostgresCompiler};
    pub use crate::connection::{RecordingConnection, ReflectedIndex, SchemaConnection};
    pub use crate::constraint::{Constraint, ConstraintKind, ForeignKeyBuilder};
    pub use crate::ddl::{AlterColumnChange, DdlStatement};
    pub use crate::dialect::{
        resume_primary_key_rebuild, CockroachDialect, Dialect, DialectOptions, DialectRegistry,
        MigrationDialect, PostgresDialect, RebuildPhase,
    };
    pub use crate::error::{MigrateError, Result};
    pub use crate::executor::{ExecutableMigration, MigrationExecutor};
    pub use crate::operations::{ColumnChanges, MigrationOperation};
    pub use crate::schema::{
        ColumnReference, ColumnSchema, DatabaseSchema, DefaultValue, ForeignKeyAction,
        ForeignKeySchema, IndexSchema, SqlType, TableSchema, UniqueConstraint,
    };
    pub use crate::session::DdlSession;
}

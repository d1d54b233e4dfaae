//! Database dialects.
//!
//! A dialect bundles a DDL compiler with five roles: column generator,
//! column dropper, schema changer, constraint generator and constraint
//! dropper. The provided methods of [`MigrationDialect`] are the PostgreSQL
//! behaviour from [`postgres`]; [`CockroachDialect`] overrides the roles
//! CockroachDB needs and calls back into the base functions where it only
//! adds steps around them.

mod cockroach;
pub mod postgres;

pub use cockroach::{rebuild_phase, resume_primary_key_rebuild, CockroachDialect, RebuildPhase};
pub use postgres::PostgresDialect;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::compiler::DdlCompiler;
use crate::connection::SchemaConnection;
use crate::constraint::Constraint;
use crate::error::{MigrateError, Result};
use crate::operations::MigrationOperation;
use crate::schema::ColumnSchema;
use crate::session::DdlSession;

/// Options shared by the dialects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialectOptions {
    /// Drop the `cockroach_fk_*` index created with a foreign key when the
    /// foreign key is dropped.
    pub drop_foreign_key_indexes: bool,
}

impl Default for DialectOptions {
    fn default() -> Self {
        Self {
            drop_foreign_key_indexes: true,
        }
    }
}

/// Database-specific behaviour of the five migration roles.
#[allow(async_fn_in_trait)]
pub trait MigrationDialect {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns a compiler for this dialect's SQL.
    fn compiler(&self) -> Box<dyn DdlCompiler>;

    /// Column generator: adds `column` to `table`.
    async fn add_column<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        table: &str,
        column: &ColumnSchema,
    ) -> Result<()> {
        postgres::add_column(session, table, column).await
    }

    /// Column dropper: drops `column` from `table`.
    async fn drop_column<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        table: &str,
        column: &str,
    ) -> Result<()> {
        postgres::drop_column(session, table, column).await
    }

    /// Schema changer: table, index and column changes and raw SQL.
    async fn change_schema<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        operation: &MigrationOperation,
    ) -> Result<()> {
        postgres::change_schema(session, operation).await
    }

    /// Constraint generator.
    async fn add_constraint<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        constraint: &Constraint,
    ) -> Result<()> {
        postgres::add_constraint(session, constraint).await
    }

    /// Constraint dropper.
    async fn drop_constraint<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        constraint: &Constraint,
    ) -> Result<()> {
        postgres::drop_constraint(session, constraint).await
    }

    /// Dispatches `operation` to the role that handles it.
    async fn apply<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        operation: &MigrationOperation,
    ) -> Result<()> {
        info!(
            dialect = self.name(),
            role = ?operation.role(),
            "{}",
            operation.description()
        );

        match operation {
            MigrationOperation::AddColumn { table, column } => {
                self.add_column(session, table, column).await
            }
            MigrationOperation::DropColumn { table, column_name } => {
                self.drop_column(session, table, column_name).await
            }
            MigrationOperation::AddConstraint(constraint) => {
                self.add_constraint(session, constraint).await
            }
            MigrationOperation::DropConstraint(constraint) => {
                self.drop_constraint(session, constraint).await
            }
            other => self.change_schema(session, other).await,
        }
    }
}

/// A dialect selected at runtime.
#[derive(Debug, Clone)]
pub enum Dialect {
    /// PostgreSQL.
    Postgres(PostgresDialect),
    /// CockroachDB.
    Cockroach(CockroachDialect),
}

impl MigrationDialect for Dialect {
    fn name(&self) -> &'static str {
        match self {
            Self::Postgres(d) => d.name(),
            Self::Cockroach(d) => d.name(),
        }
    }

    fn compiler(&self) -> Box<dyn DdlCompiler> {
        match self {
            Self::Postgres(d) => d.compiler(),
            Self::Cockroach(d) => d.compiler(),
        }
    }

    async fn add_column<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        table: &str,
        column: &ColumnSchema,
    ) -> Result<()> {
        match self {
            Self::Postgres(d) => d.add_column(session, table, column).await,
            Self::Cockroach(d) => d.add_column(session, table, column).await,
        }
    }

    async fn drop_column<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        table: &str,
        column: &str,
    ) -> Result<()> {
        match self {
            Self::Postgres(d) => d.drop_column(session, table, column).await,
            Self::Cockroach(d) => d.drop_column(session, table, column).await,
        }
    }

    async fn change_schema<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        operation: &MigrationOperation,
    ) -> Result<()> {
        match self {
            Self::Postgres(d) => d.change_schema(session, operation).await,
            Self::Cockroach(d) => d.change_schema(session, operation).await,
        }
    }

    async fn add_constraint<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        constraint: &Constraint,
    ) -> Result<()> {
        match self {
            Self::Postgres(d) => d.add_constraint(session, constraint).await,
            Self::Cockroach(d) => d.add_constraint(session, constraint).await,
        }
    }

    async fn drop_constraint<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        constraint: &Constraint,
    ) -> Result<()> {
        match self {
            Self::Postgres(d) => d.drop_constraint(session, constraint).await,
            Self::Cockroach(d) => d.drop_constraint(session, constraint).await,
        }
    }
}

/// Builds a dialect from the registry options.
pub type DialectFactory = fn(&DialectOptions) -> Dialect;

fn cockroach_factory(options: &DialectOptions) -> Dialect {
    Dialect::Cockroach(CockroachDialect::new(options.clone()))
}

fn postgres_factory(_: &DialectOptions) -> Dialect {
    Dialect::Postgres(PostgresDialect::new())
}

/// Maps dialect tags to dialects.
#[derive(Clone)]
pub struct DialectRegistry {
    factories: BTreeMap<String, DialectFactory>,
    options: DialectOptions,
}

impl std::fmt::Debug for DialectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialectRegistry")
            .field("tags", &self.factories.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl DialectRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            options: DialectOptions::default(),
        }
    }

    /// Creates a registry with the CockroachDB and PostgreSQL tags.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new()
            .register("cockroachdb", cockroach_factory)
            .register("cockroach", cockroach_factory)
            .register("postgresql", postgres_factory)
            .register("postgres", postgres_factory)
    }

    /// Registers a dialect under `tag`. Tags are case-insensitive.
    #[must_use]
    pub fn register(mut self, tag: &str, factory: DialectFactory) -> Self {
        self.factories.insert(tag.to_ascii_lowercase(), factory);
        self
    }

    /// Sets the options handed to the dialects this registry creates.
    #[must_use]
    pub fn with_options(mut self, options: DialectOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the registered tags.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Returns the dialect registered under `tag`.
    pub fn resolve(&self, tag: &str) -> Result<Dialect> {
        self.factories
            .get(&tag.to_ascii_lowercase())
            .map(|factory| factory(&self.options))
            .ok_or_else(|| MigrateError::UnknownDialect(tag.to_string()))
    }

    /// Returns the dialect named by the scheme of a database URL.
    pub fn resolve_url(&self, url: &str) -> Result<Dialect> {
        let scheme = url_scheme(url).ok_or_else(|| MigrateError::UnknownDialect(url.to_string()))?;
        // `cockroachdb+psycopg2://` style drivers share the dialect.
        let tag = scheme.split('+').next().unwrap_or(scheme);
        self.resolve(tag)
    }
}

fn url_scheme(url: &str) -> Option<&str> {
    url.split_once("://").map(|(scheme, _)| scheme)
}

/// Rewrites a CockroachDB URL into one the PostgreSQL driver accepts.
#[must_use]
pub fn connection_url(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) if scheme.to_ascii_lowercase().starts_with("cockroach") => {
            format!("postgresql://{}", rest)
        }
        _ => url.to_string(),
    }
}

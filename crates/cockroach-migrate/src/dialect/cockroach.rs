//! CockroachDB dialect.
//!
//! CockroachDB differs from PostgreSQL in the places handled here:
//!
//! - a primary key cannot be added in place, so the table is rebuilt under
//!   `<table>_migrate_tmp` and renamed back;
//! - foreign key columns must be indexed before the constraint is added, and
//!   the constraint is added unvalidated, so an index `cockroach_fk_<cols>`
//!   is created first and the constraint is validated afterwards;
//! - unique constraints live on as unique indexes, which are dropped with
//!   `DROP INDEX table@index`;
//! - dropping a primary key does nothing.
//!
//! The rebuild is not atomic. [`rebuild_phase`] tells which state an
//! interrupted rebuild left behind and [`resume_primary_key_rebuild`] moves
//! it back to a clean state.

use tracing::{info, warn};

use crate::compiler::{CockroachCompiler, DdlCompiler};
use crate::connection::SchemaConnection;
use crate::constraint::{
    column_foreign_key_name, foreign_key_index_name, foreign_key_name, normalize_foreign_key,
    rebuild_table_name, Constraint,
};
use crate::ddl::DdlStatement;
use crate::error::{MigrateError, Result};
use crate::schema::{ColumnSchema, ForeignKeySchema, IndexSchema, TableSchema, UniqueConstraint};
use crate::session::DdlSession;

use super::{postgres, DialectOptions, MigrationDialect};

/// CockroachDB dialect.
#[derive(Debug, Clone, Default)]
pub struct CockroachDialect {
    options: DialectOptions,
}

impl CockroachDialect {
    /// Creates a CockroachDB dialect.
    #[must_use]
    pub fn new(options: DialectOptions) -> Self {
        Self { options }
    }

    /// Returns the dialect options.
    #[must_use]
    pub fn options(&self) -> &DialectOptions {
        &self.options
    }

    /// Replaces the primary key of `table` by rebuilding it.
    ///
    /// Only the last listed column becomes the key.
    async fn rebuild_primary_key<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        table: &str,
        columns: &[String],
    ) -> Result<()> {
        let Some(key) = columns.last() else {
            return Err(MigrateError::EmptyConstraint {
                table: table.to_string(),
            });
        };
        if columns.len() > 1 {
            warn!(
                table = %table,
                columns = %columns.join(", "),
                key = %key,
                "Composite primary key narrowed to its last column"
            );
        }

        let source = session.table(table).await?;
        if source.get_column(key).is_none() {
            return Err(MigrateError::InvalidState(format!(
                "Column '{}' does not exist in table '{}'",
                key, table
            )));
        }

        let temp = rebuild_table_name(table);
        let rebuilt = source
            .columns
            .iter()
            .map(|column| {
                let is_key = column.name == *key;
                ColumnSchema {
                    primary_key: is_key,
                    nullable: column.nullable && !is_key,
                    ..column.clone()
                }
            })
            .fold(TableSchema::new(temp.clone()), TableSchema::column);
        let copied: Vec<String> = source.columns.iter().map(|c| c.name.clone()).collect();

        info!(table = %table, key = %key, "Rebuilding table for new primary key");
        session.append(DdlStatement::CreateTable {
            table: rebuilt,
            if_not_exists: false,
        });
        session.append(DdlStatement::CopyRows {
            target: temp.clone(),
            source: table.to_string(),
            columns: copied,
        });
        session.append(DdlStatement::DropTable {
            name: table.to_string(),
            if_exists: false,
            cascade: true,
        });
        session.append(DdlStatement::RenameTable {
            old_name: temp,
            new_name: table.to_string(),
        });
        session.execute().await
    }

    /// Indexes the foreign key columns, adds the constraint and validates it.
    async fn add_foreign_key<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        table: &str,
        foreign_key: &ForeignKeySchema,
    ) -> Result<()> {
        if foreign_key.columns.is_empty() {
            return Err(MigrateError::EmptyConstraint {
                table: table.to_string(),
            });
        }

        let mut foreign_key = normalize_foreign_key(foreign_key);
        foreign_key.name = foreign_key_name(table, &foreign_key);

        session
            .run(DdlStatement::CreateIndex {
                table: table.to_string(),
                index: IndexSchema::new(
                    foreign_key_index_name(&foreign_key.columns),
                    foreign_key.columns.clone(),
                ),
            })
            .await?;
        postgres::add_constraint(session, &Constraint::foreign_key(table, foreign_key.clone()))
            .await?;
        session
            .run(DdlStatement::ValidateConstraint {
                table: table.to_string(),
                name: foreign_key.name,
            })
            .await
    }

    /// Drops the constraint, then the index created with it.
    async fn drop_foreign_key<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        table: &str,
        foreign_key: &ForeignKeySchema,
    ) -> Result<()> {
        postgres::drop_constraint(session, &Constraint::foreign_key(table, foreign_key.clone()))
            .await?;

        if !self.options.drop_foreign_key_indexes {
            return Ok(());
        }

        let index = foreign_key_index_name(&foreign_key.columns);
        let catalog = session.catalog();
        if catalog.knows_indexes(table)
            && catalog
                .table(table)
                .is_some_and(|t| t.get_index(&index).is_none())
        {
            warn!(table = %table, index = %index, "No foreign key index to drop");
            return Ok(());
        }

        session
            .run(DdlStatement::DropIndex {
                table: Some(table.to_string()),
                name: index,
                if_exists: false,
            })
            .await
    }

    /// Drops the unique indexes over the constraint columns, or the
    /// constraint itself when there are none.
    async fn drop_unique<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        table: &str,
        constraint: &UniqueConstraint,
    ) -> Result<()> {
        let mut names: Vec<String> = session
            .indexes(table)
            .await?
            .into_iter()
            .filter(|i| i.unique && !i.primary)
            .filter(|i| i.columns.iter().any(|c| constraint.columns.contains(c)))
            .map(|i| i.name)
            .collect();
        names.sort();
        names.dedup();

        if names.is_empty() {
            return postgres::drop_constraint(
                session,
                &Constraint::Unique {
                    table: table.to_string(),
                    constraint: constraint.clone(),
                },
            )
            .await;
        }

        for name in names {
            session.append(DdlStatement::DropIndex {
                table: Some(table.to_string()),
                name,
                if_exists: false,
            });
        }
        session.execute().await
    }
}

impl MigrationDialect for CockroachDialect {
    fn name(&self) -> &'static str {
        "cockroachdb"
    }

    fn compiler(&self) -> Box<dyn DdlCompiler> {
        Box::new(CockroachCompiler)
    }

    async fn add_column<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        table: &str,
        column: &ColumnSchema,
    ) -> Result<()> {
        let Some(ref reference) = column.references else {
            return postgres::add_column(session, table, column).await;
        };

        // The reference goes through the foreign key path so it gets its index.
        let plain = ColumnSchema {
            references: None,
            ..column.clone()
        };
        postgres::add_column(session, table, &plain).await?;

        let foreign_key =
            reference.to_foreign_key(column_foreign_key_name(table, &column.name), &column.name);
        self.add_foreign_key(session, table, &foreign_key).await
    }

    async fn drop_column<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        table: &str,
        column: &str,
    ) -> Result<()> {
        // Tables the session built itself have a complete foreign key list;
        // anything else is asked of the database.
        let foreign_keys: Vec<ForeignKeySchema> = if session.catalog().knows_indexes(table) {
            session
                .catalog()
                .table(table)
                .map(|t| t.foreign_keys_on(column).cloned().collect())
                .unwrap_or_default()
        } else {
            session
                .foreign_keys(table)
                .await?
                .into_iter()
                .filter(|fk| fk.columns.iter().any(|c| c == column))
                .collect()
        };
        let primary_key = match session.table(table).await {
            Ok(known) => known.primary_key,
            Err(MigrateError::UnknownTable(_)) => Vec::new(),
            Err(err) => return Err(err),
        };

        for foreign_key in &foreign_keys {
            self.drop_foreign_key(session, table, foreign_key).await?;
        }
        if primary_key.iter().any(|c| c == column) {
            self.drop_constraint(session, &Constraint::primary_key(table, primary_key))
                .await?;
        }

        postgres::drop_column(session, table, column).await
    }

    async fn add_constraint<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        constraint: &Constraint,
    ) -> Result<()> {
        match constraint {
            Constraint::PrimaryKey { table, columns } => {
                self.rebuild_primary_key(session, table, columns).await
            }
            Constraint::ForeignKey { table, foreign_key } => {
                self.add_foreign_key(session, table, foreign_key).await
            }
            Constraint::Unique { .. } => postgres::add_constraint(session, constraint).await,
        }
    }

    async fn drop_constraint<C: SchemaConnection>(
        &self,
        session: &mut DdlSession<C>,
        constraint: &Constraint,
    ) -> Result<()> {
        match constraint {
            Constraint::PrimaryKey { table, .. } => {
                info!(table = %table, "Primary key left in place, CockroachDB cannot drop it");
                Ok(())
            }
            Constraint::ForeignKey { table, foreign_key } => {
                self.drop_foreign_key(session, table, foreign_key).await
            }
            Constraint::Unique { table, constraint } => {
                self.drop_unique(session, table, constraint).await
            }
        }
    }
}

/// State of a primary key rebuild of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    /// No rebuild in progress.
    Clean,
    /// Both tables exist; the copy may be partial.
    CopyInterrupted,
    /// The original is gone; only the rename is left.
    RenamePending,
}

/// Returns the rebuild state of `table`, probing the live database.
pub async fn rebuild_phase<C: SchemaConnection>(
    session: &mut DdlSession<C>,
    table: &str,
) -> Result<RebuildPhase> {
    let temp = rebuild_table_name(table);
    if !session.table_exists(&temp).await? {
        return Ok(RebuildPhase::Clean);
    }
    if session.table_exists(table).await? {
        Ok(RebuildPhase::CopyInterrupted)
    } else {
        Ok(RebuildPhase::RenamePending)
    }
}

/// Brings an interrupted rebuild of `table` back to a clean state.
///
/// An interrupted copy is discarded, leaving the original table as it was;
/// a pending rename is completed. Returns the phase that was found.
pub async fn resume_primary_key_rebuild<C: SchemaConnection>(
    session: &mut DdlSession<C>,
    table: &str,
) -> Result<RebuildPhase> {
    let phase = rebuild_phase(session, table).await?;
    let temp = rebuild_table_name(table);

    match phase {
        RebuildPhase::Clean => {}
        RebuildPhase::CopyInterrupted => {
            warn!(table = %table, "Discarding interrupted primary key rebuild");
            session
                .run(DdlStatement::DropTable {
                    name: temp,
                    if_exists: true,
                    cascade: false,
                })
                .await?;
        }
        RebuildPhase::RenamePending => {
            warn!(table = %table, "Completing interrupted primary key rebuild");
            session
                .run(DdlStatement::RenameTable {
                    old_name: temp,
                    new_name: table.to_string(),
                })
                .await?;
        }
    }
    Ok(phase)
}

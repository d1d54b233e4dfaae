//! PostgreSQL dialect and the base role implementations.
//!
//! The free functions in this module are what [`MigrationDialect`]'s
//! provided methods call. Dialects that only add steps around the base
//! behaviour call them directly.

use crate::compiler::{DdlCompiler, PostgresCompiler};
use crate::connection::SchemaConnection;
use crate::constraint::{foreign_key_name, Constraint};
use crate::ddl::{AlterColumnChange, DdlStatement};
use crate::error::{MigrateError, Result};
use crate::operations::MigrationOperation;
use crate::schema::{ColumnSchema, IndexSchema, TableSchema};
use crate::session::DdlSession;

use super::MigrationDialect;

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MigrationDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn compiler(&self) -> Box<dyn DdlCompiler> {
        Box::new(PostgresCompiler)
    }
}

/// `ALTER TABLE ... ADD COLUMN`.
pub async fn add_column<C: SchemaConnection>(
    session: &mut DdlSession<C>,
    table: &str,
    column: &ColumnSchema,
) -> Result<()> {
    session
        .run(DdlStatement::AddColumn {
            table: table.to_string(),
            column: column.clone(),
        })
        .await
}

/// `ALTER TABLE ... DROP COLUMN`.
pub async fn drop_column<C: SchemaConnection>(
    session: &mut DdlSession<C>,
    table: &str,
    column: &str,
) -> Result<()> {
    session
        .run(DdlStatement::DropColumn {
            table: table.to_string(),
            column: column.to_string(),
        })
        .await
}

/// Table, index and column changes, and raw SQL.
pub async fn change_schema<C: SchemaConnection>(
    session: &mut DdlSession<C>,
    operation: &MigrationOperation,
) -> Result<()> {
    match operation {
        MigrationOperation::CreateTable {
            name,
            columns,
            primary_key,
            if_not_exists,
        } => {
            let mut table = columns
                .iter()
                .cloned()
                .fold(TableSchema::new(name.clone()), TableSchema::column);
            if !primary_key.is_empty() {
                table.primary_key = primary_key.clone();
            }
            session.append(DdlStatement::CreateTable {
                table,
                if_not_exists: *if_not_exists,
            });
        }

        MigrationOperation::DropTable {
            name,
            if_exists,
            cascade,
        } => session.append(DdlStatement::DropTable {
            name: name.clone(),
            if_exists: *if_exists,
            cascade: *cascade,
        }),

        MigrationOperation::RenameTable { old_name, new_name } => {
            session.append(DdlStatement::RenameTable {
                old_name: old_name.clone(),
                new_name: new_name.clone(),
            });
        }

        MigrationOperation::RenameColumn {
            table,
            old_name,
            new_name,
        } => session.append(DdlStatement::RenameColumn {
            table: table.clone(),
            old_name: old_name.clone(),
            new_name: new_name.clone(),
        }),

        MigrationOperation::AlterColumn {
            table,
            column_name,
            changes,
        } => {
            // One statement per changed property.
            let mut alter = |change: AlterColumnChange| {
                session.append(DdlStatement::AlterColumn {
                    table: table.clone(),
                    column: column_name.clone(),
                    change,
                });
            };
            if let Some(ref sql_type) = changes.sql_type {
                alter(AlterColumnChange::SetType(sql_type.clone()));
            }
            if let Some(nullable) = changes.nullable {
                alter(AlterColumnChange::SetNullable(nullable));
            }
            if let Some(ref default) = changes.default {
                alter(AlterColumnChange::SetDefault(default.clone()));
            }
        }

        MigrationOperation::CreateIndex {
            name,
            table,
            columns,
            unique,
            condition,
        } => session.append(DdlStatement::CreateIndex {
            table: table.clone(),
            index: IndexSchema {
                name: name.clone(),
                columns: columns.clone(),
                unique: *unique,
                condition: condition.clone(),
            },
        }),

        MigrationOperation::DropIndex {
            name,
            table,
            if_exists,
        } => session.append(DdlStatement::DropIndex {
            table: table.clone(),
            name: name.clone(),
            if_exists: *if_exists,
        }),

        MigrationOperation::RunSql { forward, .. } => {
            session.append(DdlStatement::Raw(forward.clone()));
        }

        other => {
            return Err(MigrateError::InvalidState(format!(
                "{} is not a schema change",
                other.description()
            )));
        }
    }

    session.execute().await
}

/// `ALTER TABLE ... ADD PRIMARY KEY / CONSTRAINT ...`.
pub async fn add_constraint<C: SchemaConnection>(
    session: &mut DdlSession<C>,
    constraint: &Constraint,
) -> Result<()> {
    if constraint.columns().is_empty() {
        return Err(MigrateError::EmptyConstraint {
            table: constraint.table().to_string(),
        });
    }

    let statement = match constraint {
        Constraint::PrimaryKey { table, columns } => DdlStatement::AddPrimaryKey {
            table: table.clone(),
            columns: columns.clone(),
        },
        Constraint::ForeignKey { table, foreign_key } => {
            let mut foreign_key = foreign_key.clone();
            foreign_key.name = foreign_key_name(table, &foreign_key);
            DdlStatement::AddForeignKey {
                table: table.clone(),
                foreign_key,
            }
        }
        Constraint::Unique { table, constraint } => DdlStatement::AddUnique {
            table: table.clone(),
            name: constraint.name.clone(),
            columns: constraint.columns.clone(),
        },
    };
    session.run(statement).await
}

/// `ALTER TABLE ... DROP CONSTRAINT`, without `CASCADE`.
pub async fn drop_constraint<C: SchemaConnection>(
    session: &mut DdlSession<C>,
    constraint: &Constraint,
) -> Result<()> {
    let table = constraint.table().to_string();
    let name = match constraint {
        Constraint::PrimaryKey { .. } => format!("{}_pkey", table),
        Constraint::ForeignKey { foreign_key, .. } => foreign_key_name(&table, foreign_key),
        Constraint::Unique { constraint, .. } => constraint.name.clone(),
    };
    session
        .run(DdlStatement::DropConstraint {
            table,
            name,
            cascade: false,
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RecordingConnection;
    use crate::constraint::ForeignKeyBuilder;
    use crate::operations::ColumnChanges;
    use crate::schema::{DefaultValue, ForeignKeyAction, SqlType};

    fn session() -> DdlSession<RecordingConnection> {
        DdlSession::new(RecordingConnection::new(), PostgresDialect.compiler())
    }

    fn sql(session: DdlSession<RecordingConnection>) -> Vec<String> {
        session.into_connection().into_statements()
    }

    #[tokio::test]
    async fn test_create_table_and_add_column() {
        let mut s = session();
        let dialect = PostgresDialect::new();
        dialect
            .apply(
                &mut s,
                &MigrationOperation::create_table(
                    "users",
                    vec![ColumnSchema::new("id", SqlType::BigInt).primary_key().auto_increment()],
                    vec!["id".to_string()],
                ),
            )
            .await
            .unwrap();
        dialect
            .apply(
                &mut s,
                &MigrationOperation::add_column("users", ColumnSchema::new("bio", SqlType::Text)),
            )
            .await
            .unwrap();

        assert!(s.catalog().table("users").unwrap().get_column("bio").is_some());
        assert_eq!(
            sql(s),
            vec![
                "CREATE TABLE \"users\" (\n  \"id\" BIGSERIAL PRIMARY KEY\n)".to_string(),
                "ALTER TABLE \"users\" ADD COLUMN \"bio\" TEXT".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_alter_column_emits_one_statement_per_change() {
        let mut s = session();
        PostgresDialect
            .apply(
                &mut s,
                &MigrationOperation::alter_column(
                    "users",
                    "active",
                    ColumnChanges::new()
                        .set_type(SqlType::Boolean)
                        .set_nullable(false)
                        .set_default(DefaultValue::Bool(false)),
                ),
            )
            .await
            .unwrap();

        assert_eq!(
            sql(s),
            vec![
                "ALTER TABLE \"users\" ALTER COLUMN \"active\" TYPE BOOLEAN",
                "ALTER TABLE \"users\" ALTER COLUMN \"active\" SET NOT NULL",
                "ALTER TABLE \"users\" ALTER COLUMN \"active\" SET DEFAULT FALSE",
            ]
        );
    }

    #[tokio::test]
    async fn test_base_constraints() {
        let mut s = session();
        let fk = ForeignKeyBuilder::new("")
            .columns(vec!["org_id".to_string()])
            .references("orgs", vec!["id".to_string()])
            .on_delete(ForeignKeyAction::Cascade)
            .build();

        add_constraint(&mut s, &Constraint::primary_key("users", vec!["id".to_string()]))
            .await
            .unwrap();
        add_constraint(&mut s, &Constraint::foreign_key("users", fk.clone()))
            .await
            .unwrap();
        drop_constraint(&mut s, &Constraint::foreign_key("users", fk))
            .await
            .unwrap();
        drop_constraint(&mut s, &Constraint::primary_key("users", vec!["id".to_string()]))
            .await
            .unwrap();

        assert_eq!(
            sql(s),
            vec![
                "ALTER TABLE \"users\" ADD PRIMARY KEY (\"id\")",
                "ALTER TABLE \"users\" ADD CONSTRAINT \"users_org_id_fkey\" FOREIGN KEY (\"org_id\") \
                 REFERENCES \"orgs\" (\"id\") ON DELETE CASCADE",
                "ALTER TABLE \"users\" DROP CONSTRAINT \"users_org_id_fkey\"",
                "ALTER TABLE \"users\" DROP CONSTRAINT \"users_pkey\"",
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let mut s = session();
        let result = add_constraint(&mut s, &Constraint::primary_key("users", vec![])).await;
        assert!(matches!(
            result,
            Err(MigrateError::EmptyConstraint { table }) if table == "users"
        ));
        assert!(sql(s).is_empty());
    }

    #[tokio::test]
    async fn test_change_schema_rejects_role_operations() {
        let mut s = session();
        let result = change_schema(&mut s, &MigrationOperation::drop_column("users", "bio")).await;
        assert!(matches!(result, Err(MigrateError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_run_sql_and_indexes() {
        let mut s = session();
        let dialect = PostgresDialect;
        dialect
            .apply(
                &mut s,
                &MigrationOperation::create_index("users_email_idx", "users", vec!["email".to_string()], true),
            )
            .await
            .unwrap();
        dialect
            .apply(&mut s, &MigrationOperation::drop_index("users", "users_email_idx"))
            .await
            .unwrap();
        dialect
            .apply(&mut s, &MigrationOperation::run_sql("SET sql_safe_updates = false", None))
            .await
            .unwrap();

        assert_eq!(
            sql(s),
            vec![
                "CREATE UNIQUE INDEX \"users_email_idx\" ON \"users\" (\"email\")",
                "DROP INDEX \"users_email_idx\"",
                "SET sql_safe_updates = false",
            ]
        );
    }
}

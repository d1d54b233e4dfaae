//! DDL compilers: render [`DdlStatement`]s to SQL text.
//!
//! The provided methods of [`DdlCompiler`] produce PostgreSQL syntax.
//! [`CockroachCompiler`] overrides the few places where CockroachDB differs.

use crate::constraint::normalize_foreign_key;
use crate::ddl::{AlterColumnChange, DdlStatement};
use crate::schema::{ColumnReference, ColumnSchema, ForeignKeySchema, SqlType, TableSchema};

/// Renders typed DDL statements to SQL.
pub trait DdlCompiler: Send + Sync {
    /// Returns the compiler name.
    fn name(&self) -> &'static str;

    /// Returns the foreign key as this database will accept it.
    fn supported_foreign_key(&self, foreign_key: &ForeignKeySchema) -> ForeignKeySchema {
        foreign_key.clone()
    }

    /// Returns the inline reference as this database will accept it.
    fn supported_reference(&self, reference: &ColumnReference) -> ColumnReference {
        reference.clone()
    }

    /// Generates SQL for dropping an index.
    fn drop_index_sql(&self, table: Option<&str>, name: &str, if_exists: bool) -> String {
        let _ = table;
        let mut sql = String::from("DROP INDEX ");
        if if_exists {
            sql.push_str("IF EXISTS ");
        }
        sql.push_str(&self.quote_identifier(name));
        sql
    }

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Returns the SQL type name for the given type.
    fn type_name(&self, sql_type: &SqlType) -> String {
        sql_type.postgres_name()
    }

    /// Renders one statement.
    fn compile(&self, statement: &DdlStatement) -> String {
        match statement {
            DdlStatement::CreateTable {
                table,
                if_not_exists,
            } => self.create_table_sql(table, *if_not_exists),

            DdlStatement::DropTable {
                name,
                if_exists,
                cascade,
            } => {
                let mut sql = String::from("DROP TABLE ");
                if *if_exists {
                    sql.push_str("IF EXISTS ");
                }
                sql.push_str(&self.quote_identifier(name));
                if *cascade {
                    sql.push_str(" CASCADE");
                }
                sql
            }

            DdlStatement::RenameTable { old_name, new_name } => format!(
                "ALTER TABLE {} RENAME TO {}",
                self.quote_identifier(old_name),
                self.quote_identifier(new_name)
            ),

            DdlStatement::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.quote_identifier(table),
                self.column_definition(column)
            ),

            DdlStatement::DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.quote_identifier(table),
                self.quote_identifier(column)
            ),

            DdlStatement::RenameColumn {
                table,
                old_name,
                new_name,
            } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                self.quote_identifier(table),
                self.quote_identifier(old_name),
                self.quote_identifier(new_name)
            ),

            DdlStatement::AlterColumn {
                table,
                column,
                change,
            } => self.alter_column_sql(table, column, change),

            DdlStatement::CreateIndex { table, index } => {
                let mut sql = String::from("CREATE ");
                if index.unique {
                    sql.push_str("UNIQUE ");
                }
                sql.push_str("INDEX ");
                sql.push_str(&self.quote_identifier(&index.name));
                sql.push_str(" ON ");
                sql.push_str(&self.quote_identifier(table));
                sql.push_str(" (");
                sql.push_str(&self.column_list(&index.columns));
                sql.push(')');
                if let Some(ref cond) = index.condition {
                    sql.push_str(" WHERE ");
                    sql.push_str(cond);
                }
                sql
            }

            DdlStatement::DropIndex {
                table,
                name,
                if_exists,
            } => self.drop_index_sql(table.as_deref(), name, *if_exists),

            DdlStatement::AddPrimaryKey { table, columns } => format!(
                "ALTER TABLE {} ADD PRIMARY KEY ({})",
                self.quote_identifier(table),
                self.column_list(columns)
            ),

            DdlStatement::AddForeignKey { table, foreign_key } => format!(
                "ALTER TABLE {} ADD {}",
                self.quote_identifier(table),
                self.foreign_key_constraint(foreign_key)
            ),

            DdlStatement::AddUnique {
                table,
                name,
                columns,
            } => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
                self.quote_identifier(table),
                self.quote_identifier(name),
                self.column_list(columns)
            ),

            DdlStatement::DropConstraint {
                table,
                name,
                cascade,
            } => {
                let mut sql = format!(
                    "ALTER TABLE {} DROP CONSTRAINT {}",
                    self.quote_identifier(table),
                    self.quote_identifier(name)
                );
                if *cascade {
                    sql.push_str(" CASCADE");
                }
                sql
            }

            DdlStatement::ValidateConstraint { table, name } => format!(
                "ALTER TABLE {} VALIDATE CONSTRAINT {}",
                self.quote_identifier(table),
                self.quote_identifier(name)
            ),

            DdlStatement::CopyRows {
                target,
                source,
                columns,
            } => {
                let cols = self.column_list(columns);
                format!(
                    "INSERT INTO {} ({}) SELECT {} FROM {}",
                    self.quote_identifier(target),
                    cols,
                    cols,
                    self.quote_identifier(source)
                )
            }

            DdlStatement::Raw(sql) => sql.clone(),
        }
    }

    /// Generates SQL for creating a table.
    fn create_table_sql(&self, table: &TableSchema, if_not_exists: bool) -> String {
        let mut sql = String::from("CREATE TABLE ");
        if if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&self.quote_identifier(&table.name));
        sql.push_str(" (\n");

        // A composite key cannot be declared inline.
        let composite = table.primary_key.len() > 1;
        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                let inline_pk = !composite && table.primary_key.contains(&c.name);
                if c.primary_key == inline_pk {
                    self.column_definition(c)
                } else {
                    self.column_definition(&ColumnSchema {
                        primary_key: inline_pk,
                        nullable: c.nullable && !inline_pk,
                        ..c.clone()
                    })
                }
            })
            .collect();

        if composite {
            defs.push(format!(
                "PRIMARY KEY ({})",
                self.column_list(&table.primary_key)
            ));
        }
        for uc in &table.unique_constraints {
            defs.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                self.quote_identifier(&uc.name),
                self.column_list(&uc.columns)
            ));
        }
        for fk in &table.foreign_keys {
            defs.push(self.foreign_key_constraint(fk));
        }

        sql.push_str("  ");
        sql.push_str(&defs.join(",\n  "));
        sql.push_str("\n)");
        sql
    }

    /// Generates column definition SQL.
    fn column_definition(&self, column: &ColumnSchema) -> String {
        let data_type = if column.auto_increment && column.primary_key {
            match column.sql_type {
                SqlType::Integer | SqlType::SmallInt => "SERIAL".to_string(),
                SqlType::BigInt => "BIGSERIAL".to_string(),
                _ => self.type_name(&column.sql_type),
            }
        } else {
            self.type_name(&column.sql_type)
        };

        let mut parts = vec![self.quote_identifier(&column.name), data_type];

        if column.primary_key {
            parts.push("PRIMARY KEY".to_string());
        } else {
            if !column.nullable {
                parts.push("NOT NULL".to_string());
            }
            if column.unique {
                parts.push("UNIQUE".to_string());
            }
        }

        if let Some(default_sql) = column.default.to_sql() {
            parts.push(format!("DEFAULT {}", default_sql));
        }

        if let Some(ref reference) = column.references {
            let reference = self.supported_reference(reference);
            let mut clause = format!(
                "REFERENCES {} ({})",
                self.quote_identifier(&reference.table),
                self.quote_identifier(&reference.column)
            );
            push_actions(&mut clause, reference.on_delete, reference.on_update);
            parts.push(clause);
        }

        if let Some(ref check) = column.check {
            parts.push(format!("CHECK ({})", check));
        }

        parts.join(" ")
    }

    /// Generates `CONSTRAINT name FOREIGN KEY (...) REFERENCES ...`.
    fn foreign_key_constraint(&self, foreign_key: &ForeignKeySchema) -> String {
        let fk = self.supported_foreign_key(foreign_key);
        let mut sql = String::new();
        if !fk.name.is_empty() {
            sql.push_str(&format!("CONSTRAINT {} ", self.quote_identifier(&fk.name)));
        }
        sql.push_str(&format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.column_list(&fk.columns),
            self.quote_identifier(&fk.references_table),
            self.column_list(&fk.references_columns)
        ));
        push_actions(&mut sql, fk.on_delete, fk.on_update);
        sql
    }

    /// Generates SQL for one column change.
    fn alter_column_sql(&self, table: &str, column: &str, change: &AlterColumnChange) -> String {
        let table = self.quote_identifier(table);
        let column = self.quote_identifier(column);

        match change {
            AlterColumnChange::SetType(sql_type) => format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
                table,
                column,
                self.type_name(sql_type)
            ),
            AlterColumnChange::SetNullable(true) => {
                format!("ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL", table, column)
            }
            AlterColumnChange::SetNullable(false) => {
                format!("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL", table, column)
            }
            AlterColumnChange::SetDefault(default) => match default.to_sql() {
                Some(value) => format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    table, column, value
                ),
                None => format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT", table, column),
            },
            AlterColumnChange::DropDefault => {
                format!("ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT", table, column)
            }
        }
    }

    /// Quotes and joins column names.
    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn push_actions(
    sql: &mut String,
    on_delete: Option<crate::schema::ForeignKeyAction>,
    on_update: Option<crate::schema::ForeignKeyAction>,
) {
    if let Some(action) = on_delete {
        sql.push_str(" ON DELETE ");
        sql.push_str(action.to_sql());
    }
    if let Some(action) = on_update {
        sql.push_str(" ON UPDATE ");
        sql.push_str(action.to_sql());
    }
}

/// PostgreSQL DDL compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresCompiler;

impl DdlCompiler for PostgresCompiler {
    fn name(&self) -> &'static str {
        "postgresql"
    }
}

/// CockroachDB DDL compiler.
///
/// Forces foreign key actions to `RESTRICT` wherever a foreign key is
/// rendered, and addresses indexes as `table@index`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CockroachCompiler;

impl DdlCompiler for CockroachCompiler {
    fn name(&self) -> &'static str {
        "cockroachdb"
    }

    fn supported_foreign_key(&self, foreign_key: &ForeignKeySchema) -> ForeignKeySchema {
        normalize_foreign_key(foreign_key)
    }

    fn supported_reference(&self, reference: &ColumnReference) -> ColumnReference {
        reference.restricted()
    }

    fn drop_index_sql(&self, table: Option<&str>, name: &str, if_exists: bool) -> String {
        let mut sql = String::from("DROP INDEX ");
        if if_exists {
            sql.push_str("IF EXISTS ");
        }
        if let Some(table) = table {
            sql.push_str(&self.quote_identifier(table));
            sql.push('@');
        }
        sql.push_str(&self.quote_identifier(name));
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ForeignKeyBuilder;
    use crate::schema::{DefaultValue, ForeignKeyAction, IndexSchema};

    fn fk() -> ForeignKeySchema {
        ForeignKeyBuilder::new("t_ref_id_fkey")
            .columns(vec!["ref_id".to_string()])
            .references("other", vec!["id".to_string()])
            .on_delete(ForeignKeyAction::Cascade)
            .on_update(ForeignKeyAction::SetNull)
            .build()
    }

    #[test]
    fn test_postgres_keeps_foreign_key_actions() {
        let sql = PostgresCompiler.compile(&DdlStatement::AddForeignKey {
            table: "t".to_string(),
            foreign_key: fk(),
        });
        assert_eq!(
            sql,
            "ALTER TABLE \"t\" ADD CONSTRAINT \"t_ref_id_fkey\" FOREIGN KEY (\"ref_id\") \
             REFERENCES \"other\" (\"id\") ON DELETE CASCADE ON UPDATE SET NULL"
        );
    }

    #[test]
    fn test_cockroach_forces_restrict() {
        let sql = CockroachCompiler.compile(&DdlStatement::AddForeignKey {
            table: "t".to_string(),
            foreign_key: fk(),
        });
        assert_eq!(
            sql,
            "ALTER TABLE \"t\" ADD CONSTRAINT \"t_ref_id_fkey\" FOREIGN KEY (\"ref_id\") \
             REFERENCES \"other\" (\"id\") ON DELETE RESTRICT ON UPDATE RESTRICT"
        );
    }

    #[test]
    fn test_cockroach_leaves_unset_actions_unset() {
        let mut plain = fk();
        plain.on_delete = None;
        plain.on_update = None;
        let sql = CockroachCompiler.foreign_key_constraint(&plain);
        assert!(!sql.contains("ON DELETE"));
        assert!(!sql.contains("ON UPDATE"));
    }

    #[test]
    fn test_cockroach_inline_reference_restricted() {
        let column = ColumnSchema::new("org_id", SqlType::BigInt).references(
            ColumnReference::new("orgs", "id").on_delete(ForeignKeyAction::Cascade),
        );
        assert_eq!(
            CockroachCompiler.column_definition(&column),
            "\"org_id\" BIGINT REFERENCES \"orgs\" (\"id\") ON DELETE RESTRICT"
        );
    }

    #[test]
    fn test_drop_index_forms() {
        let stmt = DdlStatement::DropIndex {
            table: Some("t".to_string()),
            name: "cockroach_fk_ref_id".to_string(),
            if_exists: false,
        };
        assert_eq!(
            CockroachCompiler.compile(&stmt),
            "DROP INDEX \"t\"@\"cockroach_fk_ref_id\""
        );
        assert_eq!(
            PostgresCompiler.compile(&stmt),
            "DROP INDEX \"cockroach_fk_ref_id\""
        );
    }

    #[test]
    fn test_create_index() {
        let sql = CockroachCompiler.compile(&DdlStatement::CreateIndex {
            table: "t".to_string(),
            index: IndexSchema::new("cockroach_fk_ref_id", vec!["ref_id".to_string()]),
        });
        assert_eq!(sql, "CREATE INDEX \"cockroach_fk_ref_id\" ON \"t\" (\"ref_id\")");
    }

    #[test]
    fn test_validate_and_rebuild_statements() {
        let c = CockroachCompiler;
        assert_eq!(
            c.compile(&DdlStatement::ValidateConstraint {
                table: "t".to_string(),
                name: "t_ref_id_fkey".to_string(),
            }),
            "ALTER TABLE \"t\" VALIDATE CONSTRAINT \"t_ref_id_fkey\""
        );
        assert_eq!(
            c.compile(&DdlStatement::DropTable {
                name: "t".to_string(),
                if_exists: false,
                cascade: true,
            }),
            "DROP TABLE \"t\" CASCADE"
        );
        assert_eq!(
            c.compile(&DdlStatement::RenameTable {
                old_name: "t_migrate_tmp".to_string(),
                new_name: "t".to_string(),
            }),
            "ALTER TABLE \"t_migrate_tmp\" RENAME TO \"t\""
        );
        assert_eq!(
            c.compile(&DdlStatement::CopyRows {
                target: "t_migrate_tmp".to_string(),
                source: "t".to_string(),
                columns: vec!["id".to_string(), "email".to_string()],
            }),
            "INSERT INTO \"t_migrate_tmp\" (\"id\", \"email\") SELECT \"id\", \"email\" FROM \"t\""
        );
    }

    #[test]
    fn test_create_table_single_key() {
        let table = TableSchema::new("t")
            .column(ColumnSchema::new("id", SqlType::Integer).primary_key())
            .column(ColumnSchema::new("email", SqlType::Varchar(255)).not_null());

        let sql = PostgresCompiler.create_table_sql(&table, false);
        assert_eq!(
            sql,
            "CREATE TABLE \"t\" (\n  \"id\" INTEGER PRIMARY KEY,\n  \"email\" VARCHAR(255) NOT NULL\n)"
        );
    }

    #[test]
    fn test_create_table_composite_key() {
        let mut table = TableSchema::new("memberships")
            .column(ColumnSchema::new("org_id", SqlType::BigInt).primary_key())
            .column(ColumnSchema::new("user_id", SqlType::BigInt).primary_key());
        table.primary_key = vec!["org_id".to_string(), "user_id".to_string()];

        let sql = PostgresCompiler.create_table_sql(&table, true);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"memberships\""));
        assert!(sql.contains("\"org_id\" BIGINT NOT NULL,"));
        assert!(sql.contains("PRIMARY KEY (\"org_id\", \"user_id\")"));
        assert!(!sql.contains("BIGINT PRIMARY KEY"));
    }

    #[test]
    fn test_alter_column() {
        let c = PostgresCompiler;
        assert_eq!(
            c.alter_column_sql("users", "email", &AlterColumnChange::SetNullable(false)),
            "ALTER TABLE \"users\" ALTER COLUMN \"email\" SET NOT NULL"
        );
        assert_eq!(
            c.alter_column_sql("users", "age", &AlterColumnChange::SetType(SqlType::BigInt)),
            "ALTER TABLE \"users\" ALTER COLUMN \"age\" TYPE BIGINT"
        );
        assert_eq!(
            c.alter_column_sql(
                "users",
                "active",
                &AlterColumnChange::SetDefault(DefaultValue::Bool(true))
            ),
            "ALTER TABLE \"users\" ALTER COLUMN \"active\" SET DEFAULT TRUE"
        );
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(PostgresCompiler.quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}

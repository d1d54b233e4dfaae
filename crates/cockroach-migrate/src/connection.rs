//! Connections DDL is executed on.
//!
//! [`SchemaConnection`] is what the dialects need from a database: run one
//! statement, and reflect the few catalog facts the CockroachDB paths depend
//! on. It is implemented for [`sqlx::PgPool`] (CockroachDB speaks the
//! PostgreSQL wire protocol) and for [`RecordingConnection`], which runs
//! nothing and is used for dry runs and tests.

use std::collections::HashMap;

use sqlx::postgres::PgPool;

use crate::error::{MigrateError, Result};
use crate::schema::{ColumnSchema, DefaultValue, ForeignKeyAction, ForeignKeySchema, SqlType};

/// An index as reported by the live database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedIndex {
    /// Index name.
    pub name: String,
    /// Key columns, in index order. Storing and implicit columns are excluded.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    pub unique: bool,
    /// Whether this is the table's primary index.
    pub primary: bool,
}

/// Returns true if `index` is the primary index of `table`.
///
/// CockroachDB names it `primary` (older releases) or `<table>_pkey`.
#[must_use]
pub fn is_primary_index_name(table: &str, index: &str) -> bool {
    index == "primary" || index == format!("{}_pkey", table)
}

/// A database connection that DDL can be executed on.
#[allow(async_fn_in_trait)]
pub trait SchemaConnection {
    /// Executes one statement and waits for it to complete.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Returns the indexes of `table`.
    async fn get_indexes(&mut self, table: &str) -> Result<Vec<ReflectedIndex>>;

    /// Returns the visible columns of `table`, with primary key flags set.
    ///
    /// An empty list means the table does not exist.
    async fn get_columns(&mut self, table: &str) -> Result<Vec<ColumnSchema>>;

    /// Returns the foreign keys declared on `table`.
    async fn get_foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeySchema>>;

    /// Returns true if `table` exists.
    async fn table_exists(&mut self, table: &str) -> Result<bool>;
}

/// Maps a `pg_constraint` action code to a foreign key action.
///
/// `a` (no action) is the default and maps to `None`.
#[must_use]
pub fn action_from_code(code: &str) -> Option<ForeignKeyAction> {
    match code {
        "r" => Some(ForeignKeyAction::Restrict),
        "c" => Some(ForeignKeyAction::Cascade),
        "n" => Some(ForeignKeyAction::SetNull),
        "d" => Some(ForeignKeyAction::SetDefault),
        _ => None,
    }
}

const INDEXES_SQL: &str = r#"
SELECT index_name, non_unique, column_name, storing, implicit
FROM information_schema.statistics
WHERE table_name = $1 AND table_schema = current_schema()
ORDER BY index_name, seq_in_index
"#;

const COLUMNS_SQL: &str = r#"
SELECT column_name, crdb_sql_type, is_nullable, column_default
FROM information_schema.columns
WHERE table_name = $1 AND table_schema = current_schema() AND is_hidden = 'NO'
ORDER BY ordinal_position
"#;

const PRIMARY_KEY_SQL: &str = r#"
SELECT kcu.column_name
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_name = tc.constraint_name
 AND kcu.table_name = tc.table_name
 AND kcu.table_schema = tc.table_schema
WHERE tc.table_name = $1
  AND tc.table_schema = current_schema()
  AND tc.constraint_type = 'PRIMARY KEY'
ORDER BY kcu.ordinal_position
"#;

const FOREIGN_KEYS_SQL: &str = r#"
SELECT
    con.conname::TEXT,
    array_agg(src.attname::TEXT ORDER BY s.ord),
    tbl_to.relname::TEXT,
    array_agg(dst.attname::TEXT ORDER BY s.ord),
    con.confupdtype::TEXT,
    con.confdeltype::TEXT
FROM pg_constraint con
JOIN pg_class tbl ON tbl.oid = con.conrelid
JOIN pg_namespace ns ON ns.oid = tbl.relnamespace
JOIN pg_class tbl_to ON tbl_to.oid = con.confrelid
JOIN unnest(con.conkey) WITH ORDINALITY AS s(attnum, ord) ON TRUE
JOIN pg_attribute src ON src.attrelid = tbl.oid AND src.attnum = s.attnum
JOIN unnest(con.confkey) WITH ORDINALITY AS r(attnum, ord) ON r.ord = s.ord
JOIN pg_attribute dst ON dst.attrelid = tbl_to.oid AND dst.attnum = r.attnum
WHERE con.contype = 'f' AND tbl.relname = $1 AND ns.nspname = current_schema()
GROUP BY con.conname, tbl_to.relname, con.confupdtype, con.confdeltype
ORDER BY con.conname
"#;

const TABLE_EXISTS_SQL: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM information_schema.tables
    WHERE table_name = $1 AND table_schema = current_schema()
)
"#;

impl SchemaConnection for PgPool {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&*self).await?;
        Ok(())
    }

    async fn get_indexes(&mut self, table: &str) -> Result<Vec<ReflectedIndex>> {
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(INDEXES_SQL)
            .bind(table)
            .fetch_all(&*self)
            .await?;

        let mut indexes: Vec<ReflectedIndex> = Vec::new();
        for (name, non_unique, column, storing, implicit) in rows {
            let pos = match indexes.iter().position(|i| i.name == name) {
                Some(pos) => pos,
                None => {
                    indexes.push(ReflectedIndex {
                        primary: is_primary_index_name(table, &name),
                        unique: non_unique == "NO",
                        name,
                        columns: Vec::new(),
                    });
                    indexes.len() - 1
                }
            };
            if storing == "NO" && implicit == "NO" {
                indexes[pos].columns.push(column);
            }
        }
        Ok(indexes)
    }

    async fn get_columns(&mut self, table: &str) -> Result<Vec<ColumnSchema>> {
        let rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(COLUMNS_SQL)
            .bind(table)
            .fetch_all(&*self)
            .await?;
        let primary_key: Vec<(String,)> = sqlx::query_as(PRIMARY_KEY_SQL)
            .bind(table)
            .fetch_all(&*self)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(name, type_name, is_nullable, default)| {
                let mut column = ColumnSchema::new(name, SqlType::from_cockroach_name(&type_name));
                column.nullable = is_nullable == "YES";
                if let Some(expr) = default {
                    column.default = DefaultValue::Expression(expr);
                }
                if primary_key.iter().any(|(pk,)| *pk == column.name) {
                    column = column.primary_key();
                }
                column
            })
            .collect())
    }

    async fn get_foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeySchema>> {
        let rows: Vec<(String, Vec<String>, String, Vec<String>, String, String)> =
            sqlx::query_as(FOREIGN_KEYS_SQL)
                .bind(table)
                .fetch_all(&*self)
                .await?;

        Ok(rows
            .into_iter()
            .map(
                |(name, columns, references_table, references_columns, on_update, on_delete)| {
                    ForeignKeySchema {
                        name,
                        columns,
                        references_table,
                        references_columns,
                        on_delete: action_from_code(&on_delete),
                        on_update: action_from_code(&on_update),
                    }
                },
            )
            .collect())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(TABLE_EXISTS_SQL)
            .bind(table)
            .fetch_one(&*self)
            .await?;
        Ok(exists)
    }
}

/// A connection that records statements instead of running them.
///
/// Reflection answers come from the tables, indexes and foreign keys
/// registered with [`with_table`](Self::with_table),
/// [`with_indexes`](Self::with_indexes) and
/// [`with_foreign_keys`](Self::with_foreign_keys).
#[derive(Debug, Default)]
pub struct RecordingConnection {
    statements: Vec<String>,
    tables: HashMap<String, Vec<ColumnSchema>>,
    indexes: HashMap<String, Vec<ReflectedIndex>>,
    foreign_keys: HashMap<String, Vec<ForeignKeySchema>>,
    reject: Option<String>,
}

impl RecordingConnection {
    /// Creates an empty recording connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table reported by reflection.
    #[must_use]
    pub fn with_table(mut self, name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        self.tables.insert(name.into(), columns);
        self
    }

    /// Registers the indexes reported for `table`.
    #[must_use]
    pub fn with_indexes(mut self, table: impl Into<String>, indexes: Vec<ReflectedIndex>) -> Self {
        self.indexes.insert(table.into(), indexes);
        self
    }

    /// Registers the foreign keys reported for `table`.
    #[must_use]
    pub fn with_foreign_keys(
        mut self,
        table: impl Into<String>,
        foreign_keys: Vec<ForeignKeySchema>,
    ) -> Self {
        self.foreign_keys.insert(table.into(), foreign_keys);
        self
    }

    /// Rejects the first statement containing `fragment`, as a database would
    /// reject an invalid statement.
    #[must_use]
    pub fn reject(mut self, fragment: impl Into<String>) -> Self {
        self.reject = Some(fragment.into());
        self
    }

    /// Returns the statements executed so far, in order.
    #[must_use]
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Consumes the connection and returns the executed statements.
    #[must_use]
    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }
}

impl SchemaConnection for RecordingConnection {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        if let Some(fragment) = &self.reject {
            if sql.contains(fragment.as_str()) {
                let message = format!("statement rejected: {}", sql);
                self.reject = None;
                return Err(MigrateError::Database(sqlx::Error::Protocol(message)));
            }
        }
        self.statements.push(sql.to_string());
        Ok(())
    }

    async fn get_indexes(&mut self, table: &str) -> Result<Vec<ReflectedIndex>> {
        Ok(self.indexes.get(table).cloned().unwrap_or_default())
    }

    async fn get_columns(&mut self, table: &str) -> Result<Vec<ColumnSchema>> {
        Ok(self.tables.get(table).cloned().unwrap_or_default())
    }

    async fn get_foreign_keys(&mut self, table: &str) -> Result<Vec<ForeignKeySchema>> {
        Ok(self.foreign_keys.get(table).cloned().unwrap_or_default())
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.tables.contains_key(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_index_names() {
        assert!(is_primary_index_name("users", "primary"));
        assert!(is_primary_index_name("users", "users_pkey"));
        assert!(!is_primary_index_name("users", "users_email_key"));
    }

    #[test]
    fn test_action_codes() {
        assert_eq!(action_from_code("a"), None);
        assert_eq!(action_from_code("r"), Some(ForeignKeyAction::Restrict));
        assert_eq!(action_from_code("c"), Some(ForeignKeyAction::Cascade));
        assert_eq!(action_from_code("n"), Some(ForeignKeyAction::SetNull));
        assert_eq!(action_from_code("d"), Some(ForeignKeyAction::SetDefault));
    }

    #[tokio::test]
    async fn test_recording_connection_records_in_order() {
        let mut conn = RecordingConnection::new();
        conn.execute("CREATE TABLE a (id INT)").await.unwrap();
        conn.execute("DROP TABLE a").await.unwrap();

        assert_eq!(conn.statements(), ["CREATE TABLE a (id INT)", "DROP TABLE a"]);
    }

    #[tokio::test]
    async fn test_recording_connection_rejects_once() {
        let mut conn = RecordingConnection::new().reject("DROP");

        let result = conn.execute("DROP TABLE a").await;
        assert!(matches!(result, Err(MigrateError::Database(_))));
        assert!(conn.statements().is_empty());

        conn.execute("DROP TABLE a").await.unwrap();
        assert_eq!(conn.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_recording_connection_reflection() {
        let mut conn = RecordingConnection::new()
            .with_table("t", vec![ColumnSchema::new("id", SqlType::BigInt)])
            .with_indexes(
                "t",
                vec![ReflectedIndex {
                    name: "t_pkey".to_string(),
                    columns: vec!["id".to_string()],
                    unique: true,
                    primary: true,
                }],
            );

        assert!(conn.table_exists("t").await.unwrap());
        assert!(!conn.table_exists("u").await.unwrap());
        assert_eq!(conn.get_columns("t").await.unwrap().len(), 1);
        assert_eq!(conn.get_indexes("t").await.unwrap().len(), 1);
        assert!(conn.get_indexes("u").await.unwrap().is_empty());
        assert!(conn.get_foreign_keys("t").await.unwrap().is_empty());
    }
}

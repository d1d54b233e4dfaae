//! Runs the CockroachDB dialect against a live cluster.
//!
//! Skipped unless `COCKROACH_URL` is set, e.g.
//! `COCKROACH_URL=postgresql://root@localhost:26257/defaultdb?sslmode=disable`.

use cockroach_migrate::connection::SchemaConnection;
use cockroach_migrate::dialect::connection_url;
use cockroach_migrate::prelude::*;
use sqlx::postgres::{PgPool, PgPoolOptions};

async fn connect() -> Option<PgPool> {
    let Ok(url) = std::env::var("COCKROACH_URL") else {
        eprintln!("COCKROACH_URL not set, skipping");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&connection_url(&url))
        .await
        .expect("Failed to connect to CockroachDB");
    Some(pool)
}

async fn reset(pool: &mut PgPool, tables: &[&str]) {
    for table in tables {
        pool.execute(&format!("DROP TABLE IF EXISTS \"{}\" CASCADE", table))
            .await
            .unwrap();
    }
}

fn executor(pool: PgPool) -> MigrationExecutor<PgPool, CockroachDialect> {
    MigrationExecutor::new(pool, CockroachDialect::default())
}

#[tokio::test]
async fn test_live_primary_key_rebuild() {
    let Some(mut pool) = connect().await else {
        return;
    };
    reset(&mut pool, &["live_pk", "live_pk_migrate_tmp"]).await;

    let mut executor = executor(pool.clone());
    executor
        .apply(
            &ExecutableMigration::new("0001")
                .operation(MigrationOperation::create_table(
                    "live_pk",
                    vec![
                        ColumnSchema::new("id", SqlType::BigInt).primary_key(),
                        ColumnSchema::new("email", SqlType::Varchar(255)).not_null(),
                    ],
                    vec!["id".to_string()],
                ))
                .operation(MigrationOperation::run_sql(
                    "INSERT INTO live_pk (id, email) VALUES (1, 'a@example.com'), (2, 'b@example.com')",
                    None,
                ))
                .operation(MigrationOperation::add_primary_key(
                    "live_pk",
                    vec!["id".to_string(), "email".to_string()],
                )),
        )
        .await
        .unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM live_pk")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 2);

    let columns = pool.get_columns("live_pk").await.unwrap();
    let key: Vec<&str> = columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(key, vec!["email"]);
    assert!(!pool.table_exists("live_pk_migrate_tmp").await.unwrap());

    reset(&mut pool, &["live_pk"]).await;
}

#[tokio::test]
async fn test_live_foreign_key_round_trip() {
    let Some(mut pool) = connect().await else {
        return;
    };
    reset(&mut pool, &["live_posts", "live_users"]).await;

    let fk = ForeignKeyBuilder::new("live_posts_author_fkey")
        .columns(vec!["author_id".to_string()])
        .references("live_users", vec!["id".to_string()])
        .on_delete(ForeignKeyAction::Cascade)
        .build();

    let mut executor = executor(pool.clone());
    executor
        .apply(
            &ExecutableMigration::new("0001")
                .operation(MigrationOperation::create_table(
                    "live_users",
                    vec![ColumnSchema::new("id", SqlType::BigInt).primary_key()],
                    vec!["id".to_string()],
                ))
                .operation(MigrationOperation::create_table(
                    "live_posts",
                    vec![
                        ColumnSchema::new("id", SqlType::BigInt).primary_key(),
                        ColumnSchema::new("author_id", SqlType::BigInt),
                    ],
                    vec!["id".to_string()],
                ))
                .operation(MigrationOperation::add_foreign_key("live_posts", fk.clone())),
        )
        .await
        .unwrap();

    let indexes = pool.get_indexes("live_posts").await.unwrap();
    assert!(indexes
        .iter()
        .any(|i| i.name == "cockroach_fk_author_id" && i.columns == ["author_id"]));

    executor
        .apply(
            &ExecutableMigration::new("0002")
                .operation(MigrationOperation::drop_foreign_key("live_posts", fk)),
        )
        .await
        .unwrap();

    let indexes = pool.get_indexes("live_posts").await.unwrap();
    assert!(!indexes.iter().any(|i| i.name == "cockroach_fk_author_id"));

    reset(&mut pool, &["live_posts", "live_users"]).await;
}

#[tokio::test]
async fn test_live_unique_drop() {
    let Some(mut pool) = connect().await else {
        return;
    };
    reset(&mut pool, &["live_accounts"]).await;

    let mut executor = executor(pool.clone());
    executor
        .apply(
            &ExecutableMigration::new("0001")
                .operation(MigrationOperation::create_table(
                    "live_accounts",
                    vec![
                        ColumnSchema::new("id", SqlType::BigInt).primary_key(),
                        ColumnSchema::new("handle", SqlType::Text),
                    ],
                    vec!["id".to_string()],
                ))
                .operation(MigrationOperation::add_unique_constraint(
                    "live_accounts",
                    "live_accounts_handle_key",
                    vec!["handle".to_string()],
                ))
                .operation(MigrationOperation::DropConstraint(Constraint::unique(
                    "live_accounts",
                    "live_accounts_handle_key",
                    vec!["handle".to_string()],
                ))),
        )
        .await
        .unwrap();

    let indexes = pool.get_indexes("live_accounts").await.unwrap();
    assert!(indexes.iter().all(|i| !i.unique || i.primary));

    reset(&mut pool, &["live_accounts"]).await;
}

//! cockroach-migrate CLI
//!
//! Command-line tool for running migration plans on CockroachDB.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cockroach_migrate::connection::RecordingConnection;
use cockroach_migrate::dialect::connection_url;
use cockroach_migrate::executor::sql_for;
use cockroach_migrate::prelude::*;

/// Run schema migrations on CockroachDB.
#[derive(Parser)]
#[command(name = "cockroach-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (`cockroachdb://` or `postgresql://`).
    #[arg(short, long, env = "DATABASE_URL")]
    database: Option<String>,

    /// Dialect tag (defaults to the URL scheme, then `cockroachdb`).
    #[arg(long, env = "MIGRATE_DIALECT")]
    dialect: Option<String>,

    /// Keep the index created with a foreign key when dropping it.
    #[arg(long)]
    keep_fk_indexes: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SQL for a migration plan without a database.
    Sql {
        /// Migration plan (JSON).
        plan: PathBuf,

        /// Show rollback SQL instead of forward SQL.
        #[arg(short, long)]
        reverse: bool,
    },

    /// Apply a migration plan.
    Apply {
        /// Migration plan (JSON).
        plan: PathBuf,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },
}

fn select_dialect(cli: &Cli) -> Result<Dialect> {
    let registry = DialectRegistry::with_defaults().with_options(DialectOptions {
        drop_foreign_key_indexes: !cli.keep_fk_indexes,
    });

    match (&cli.dialect, &cli.database) {
        (Some(tag), _) => registry.resolve(tag),
        (None, Some(url)) => registry.resolve_url(url),
        (None, None) => registry.resolve("cockroachdb"),
    }
}

fn print_sql(statements: &[String]) {
    for sql in statements {
        println!("{};", sql);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let dialect = select_dialect(&cli)?;

    match &cli.command {
        Commands::Sql { plan, reverse } => {
            let mut migration = ExecutableMigration::from_file(plan)?;
            if *reverse {
                migration = migration.reversed()?;
            }
            print_sql(&sql_for(dialect, &migration).await?);
        }

        Commands::Apply { plan, dry_run } => {
            let migration = ExecutableMigration::from_file(plan)?;

            if *dry_run {
                info!("Dry run mode - SQL will be printed but not executed.");
                let mut executor = MigrationExecutor::new(RecordingConnection::new(), dialect);
                executor.apply(&migration).await?;
                print_sql(executor.session().executed());
                return Ok(());
            }

            let url = cli
                .database
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("--database or DATABASE_URL is required"))?;
            // One connection, so every statement sees the previous one.
            let pool = PgPoolOptions::new()
                .max_connections(1)
                .connect(&connection_url(url))
                .await?;

            let mut executor = MigrationExecutor::new(pool, dialect);
            executor.apply(&migration).await?;
            info!(
                statements = executor.session().executed().len(),
                "Done."
            );
        }
    }

    Ok(())
}

//! Database initialization and ledger schema migrations.
//!
//! Snapshot tables are not created here; the snapshot store owns and lazily creates them.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};

/// Initialize the SQLite database with schema and pragmas.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_pragmas_conn(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully at {}", db_path);
    Ok(pool)
}

const LEDGER_SCHEMA: &str = include_str!("schema.sql");

/// Pragmas applied to every new connection, in order.
const CONNECTION_PRAGMAS: &[&str] = &[
    "PRAGMA foreign_keys = ON",
    "PRAGMA busy_timeout = 5000",
    "PRAGMA synchronous = NORMAL",
];

/// Split a schema script into executable statements.
///
/// `--` line comments are dropped before splitting on `;`, so a semicolon inside a
/// comment never produces a fragment. The schema holds no string literals with `;`.
fn schema_statements(script: &str) -> Vec<String> {
    let uncommented: String = script
        .lines()
        .map(|line| match line.find("--") {
            Some(at) => &line[..at],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n");

    uncommented
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Apply the ledger schema in one transaction. Every statement is `IF NOT EXISTS`,
/// so reruns are no-ops.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = schema_statements(LEDGER_SCHEMA);
    info!(statements = statements.len(), "Applying ledger schema");

    let mut tx = pool.begin().await?;
    for statement in &statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    info!("Ledger schema ready");
    Ok(())
}

async fn configure_pragmas_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for pragma in CONNECTION_PRAGMAS {
        sqlx::query(pragma).execute(&mut *conn).await?;
    }

    // WAL can be refused (e.g. some network filesystems); the reply names the mode in effect.
    let (journal_mode,): (String,) = sqlx::query_as("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    debug!(journal_mode = %journal_mode, "SQLite connection configured");
    Ok(())
}

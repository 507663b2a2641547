//! `SQLite` pool setup and schema bootstrap.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::{str::FromStr, time::Duration};
use tracing::{Instrument, debug};

const SCHEMA: &str = include_str!("../sql/schema.sql");

/// Open (creating if needed) the database behind `dsn` and apply the schema.
///
/// # Errors
/// Returns an error if the DSN is invalid, the file cannot be opened, or the schema fails.
pub async fn connect(dsn: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(dsn)
        .with_context(|| format!("Invalid database DSN: {dsn}"))?
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(max_connections.max(1))
        .test_before_acquire(true)
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    migrate(&pool).await?;

    Ok(pool)
}

/// Private in-memory database with the schema applied.
///
/// `SQLite` gives every connection its own memory database, so the pool is
/// pinned to a single connection that is never recycled.
///
/// # Errors
/// Returns an error if the connection or the schema fails.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("Failed to open in-memory database")?;

    migrate(&pool).await?;

    Ok(pool)
}

/// Apply `sql/schema.sql`; every statement is idempotent.
///
/// # Errors
/// Returns an error if any statement fails.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    let span = tracing::info_span!("db.query", db.system = "sqlite", db.operation = "MIGRATE");
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to apply database schema")?;

    debug!("Database schema applied");

    Ok(())
}

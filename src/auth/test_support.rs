//! Shared fixtures for auth tests.

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

pub(crate) async fn pool() -> Result<SqlitePool> {
    crate::db::connect_in_memory().await
}

/// Fixed clock: `minutes` after 2026-01-01T00:00:00Z.
pub(crate) fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
        + Duration::minutes(minutes)
}

/// Insert a bare user row; the hash is not derived from any password.
pub(crate) async fn insert_user(pool: &SqlitePool, email: &str) -> Result<Uuid> {
    let user_id = Uuid::new_v4();
    sqlx::query(
        r"
        INSERT INTO users
            (id, name, email, password_hash, salt, kdf_memory_kib, kdf_iterations,
             kdf_parallelism, created_at, updated_at)
        VALUES (?, 'Test User', ?, ?, ?, 8, 1, 1, 0, 0)
        ",
    )
    .bind(user_id.to_string())
    .bind(email)
    .bind(vec![0u8; 32])
    .bind(vec![0u8; 16])
    .execute(pool)
    .await?;
    Ok(user_id)
}

/// Make every later `UPDATE` on `sessions` abort, to simulate a store
/// failure partway through a transaction.
pub(crate) async fn fail_session_updates(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TRIGGER fail_session_updates BEFORE UPDATE ON sessions
        BEGIN
            SELECT RAISE(ABORT, 'sessions are read-only');
        END
        ",
    )
    .execute(pool)
    .await?;
    Ok(())
}

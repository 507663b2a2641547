//! Session Manager.
//!
//! Flow Overview:
//! 1) `create` rotates: every active session of the user is revoked and the new
//!    row is inserted in the same transaction.
//! 2) The raw bearer token goes to the client once; only its SHA-256 is stored.
//! 3) `validate` checks absolute expiry, then idle time, at every access. A
//!    failing row is moved out of `active` so it stays dead even if the clock
//!    or the policy changes later.
//! 4) Ended rows linger until the periodic purge removes them.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool, sqlite::SqliteRow};
use tracing::Instrument;
use uuid::Uuid;

use super::config::SessionPolicy;
use super::utils::{from_unix, generate_token, hash_token, is_unique_violation, parse_id};

const STATE_ACTIVE: &str = "active";
const STATE_REVOKED: &str = "revoked";
const STATE_EXPIRED: &str = "expired";
const STATE_IDLE: &str = "idle";

/// A session that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Why a presented token was not accepted. Only ever logged; clients see a
/// uniform 401.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionRejection {
    #[error("no session for token")]
    Absent,
    #[error("session revoked")]
    Revoked,
    #[error("session expired")]
    Expired,
    #[error("session idle timeout")]
    Idle,
}

impl SessionRejection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
            Self::Idle => "idle",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCheck {
    Valid(Session),
    Rejected(SessionRejection),
}

#[derive(Clone, Debug)]
pub struct SessionManager {
    pool: SqlitePool,
    policy: SessionPolicy,
}

impl SessionManager {
    #[must_use]
    pub fn new(pool: SqlitePool, policy: SessionPolicy) -> Self {
        Self { pool, policy }
    }

    #[must_use]
    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Issue a session for `user_id`, revoking all of the user's other sessions.
    ///
    /// Returns the session id and the raw token for the cookie.
    ///
    /// # Errors
    /// Returns an error if the token cannot be generated or the transaction fails.
    pub async fn create(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(Uuid, String)> {
        let mut tx = self.pool.begin().await.context("begin session rotation")?;

        revoke_user_sessions(&mut tx, user_id, now).await?;

        let query = r"
            INSERT INTO sessions
                (id, user_id, token_hash, created_at, expires_at, last_activity_at, state)
            VALUES (?, ?, ?, ?, ?, ?, 'active')
        ";
        let expires_at = now + self.policy.lifetime;

        for _ in 0..3 {
            let session_id = Uuid::new_v4();
            let token = generate_token()?;
            let span = tracing::info_span!(
                "db.query",
                db.system = "sqlite",
                db.operation = "INSERT",
                db.statement = query
            );
            let result = sqlx::query(query)
                .bind(session_id.to_string())
                .bind(user_id.to_string())
                .bind(hash_token(&token))
                .bind(now.timestamp())
                .bind(expires_at.timestamp())
                .bind(now.timestamp())
                .execute(&mut *tx)
                .instrument(span)
                .await;

            match result {
                Ok(_) => {
                    tx.commit().await.context("commit session rotation")?;
                    return Ok((session_id, token));
                }
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err).context("failed to insert session"),
            }
        }

        Err(anyhow::anyhow!("failed to allocate a unique session token"))
    }

    /// Resolve a raw token into a live session.
    ///
    /// # Errors
    /// Returns an error only when storage fails; an unusable token is a
    /// [`SessionCheck::Rejected`].
    pub async fn validate(&self, raw_token: &str, now: DateTime<Utc>) -> Result<SessionCheck> {
        let query = r"
            SELECT id, user_id, created_at, expires_at, last_activity_at, state
            FROM sessions
            WHERE token_hash = ?
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(hash_token(raw_token))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        let Some(row) = row else {
            return Ok(SessionCheck::Rejected(SessionRejection::Absent));
        };

        let state: String = row.get("state");
        match state.as_str() {
            STATE_ACTIVE => {}
            STATE_IDLE => return Ok(SessionCheck::Rejected(SessionRejection::Idle)),
            STATE_EXPIRED => return Ok(SessionCheck::Rejected(SessionRejection::Expired)),
            _ => return Ok(SessionCheck::Rejected(SessionRejection::Revoked)),
        }

        let session = session_from_row(&row)?;

        // Absolute expiry wins regardless of the idle setting.
        if now >= session.expires_at {
            self.end(session.id, STATE_EXPIRED, now).await?;
            return Ok(SessionCheck::Rejected(SessionRejection::Expired));
        }

        if let Some(idle_timeout) = self.policy.idle_timeout {
            if now - session.last_activity_at >= idle_timeout {
                self.end(session.id, STATE_IDLE, now).await?;
                return Ok(SessionCheck::Rejected(SessionRejection::Idle));
            }
        }

        Ok(SessionCheck::Valid(session))
    }

    /// Record activity on an active session.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn touch(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let query = r"
            UPDATE sessions
            SET last_activity_at = MAX(last_activity_at, ?)
            WHERE id = ? AND state = 'active'
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(now.timestamp())
            .bind(session_id.to_string())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to touch session")?;
        Ok(())
    }

    /// Revoke one session. Revoking an ended or unknown session is a no-op.
    ///
    /// Returns whether an active session was revoked.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn revoke(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.end(session_id, STATE_REVOKED, now).await
    }

    /// Revoke every active session of `user_id`.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn revoke_all(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        revoke_user_sessions(&mut conn, user_id, now).await
    }

    /// Delete ended sessions and sessions that expired more than `retention` ago.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn purge(&self, now: DateTime<Utc>, retention: Duration) -> Result<u64> {
        let query = r"
            DELETE FROM sessions
            WHERE (state != 'active' AND COALESCE(ended_at, 0) < ?1)
               OR expires_at < ?1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind((now - retention).timestamp())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge sessions")?;
        Ok(result.rows_affected())
    }

    async fn end(&self, session_id: Uuid, state: &str, now: DateTime<Utc>) -> Result<bool> {
        let query = r"
            UPDATE sessions
            SET state = ?, ended_at = ?
            WHERE id = ? AND state = 'active'
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(state)
            .bind(now.timestamp())
            .bind(session_id.to_string())
            .execute(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to mark session {state}"))?;
        Ok(result.rows_affected() > 0)
    }
}

/// Revoke all active sessions of a user on an existing connection, so callers
/// can include it in their own transaction.
pub(crate) async fn revoke_user_sessions(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64> {
    let query = r"
        UPDATE sessions
        SET state = 'revoked', ended_at = ?
        WHERE user_id = ? AND state = 'active'
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "sqlite",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(now.timestamp())
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .instrument(span)
        .await
        .context("failed to revoke user sessions")?;
    Ok(result.rows_affected())
}

fn session_from_row(row: &SqliteRow) -> Result<Session> {
    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    Ok(Session {
        id: parse_id(&id)?,
        user_id: parse_id(&user_id)?,
        created_at: from_unix(row.get("created_at"))?,
        expires_at: from_unix(row.get("expires_at"))?,
        last_activity_at: from_unix(row.get("last_activity_at"))?,
    })
}

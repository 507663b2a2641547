//! CSRF Binder.
//!
//! Each session carries a second random secret. The raw value travels in a
//! cookie that page scripts can read and must come back in `X-CSRF-Token` on
//! every mutating request; the session row keeps only its SHA-256. The token is
//! drawn independently of the session token, so knowing one says nothing about
//! the other.

use anyhow::{Context, Result};
use axum::http::Method;
use sqlx::{Row, SqlitePool};
use subtle::ConstantTimeEq;
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{generate_token, hash_token};

pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CsrfCheck {
    Ok,
    Rejected,
}

/// Read-only methods never need a CSRF token.
#[must_use]
pub fn requires_csrf(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

#[derive(Clone, Debug)]
pub struct CsrfBinder {
    pool: SqlitePool,
}

impl CsrfBinder {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Bind a fresh token to an active session, replacing any previous one.
    ///
    /// Returns `None` when the session is no longer active.
    ///
    /// # Errors
    /// Returns an error if token generation or the update fails.
    pub async fn issue(&self, session_id: Uuid) -> Result<Option<String>> {
        let token = generate_token()?;
        let query = "UPDATE sessions SET csrf_hash = ? WHERE id = ? AND state = 'active'";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(hash_token(&token))
            .bind(session_id.to_string())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to store CSRF binding")?;

        Ok((result.rows_affected() > 0).then_some(token))
    }

    /// Compare a presented token with the one bound to the session.
    ///
    /// # Errors
    /// Returns an error if the lookup fails.
    pub async fn verify(&self, session_id: Uuid, presented: Option<&str>) -> Result<CsrfCheck> {
        let Some(presented) = presented.map(str::trim).filter(|token| !token.is_empty()) else {
            return Ok(CsrfCheck::Rejected);
        };

        let query = "SELECT csrf_hash FROM sessions WHERE id = ? AND state = 'active'";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup CSRF binding")?;

        let Some(expected) = row.and_then(|row| row.get::<Option<Vec<u8>>, _>("csrf_hash")) else {
            return Ok(CsrfCheck::Rejected);
        };

        let presented = hash_token(presented);
        if bool::from(presented.as_slice().ct_eq(expected.as_slice())) {
            Ok(CsrfCheck::Ok)
        } else {
            Ok(CsrfCheck::Rejected)
        }
    }
}

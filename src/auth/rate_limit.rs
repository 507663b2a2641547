//! Database-backed login rate limiting.
//!
//! Flow Overview:
//! 1) Failures are tracked per `address|email` pair in `login_rate_limits`.
//! 2) Reaching the threshold inside the window locks the pair for a fixed
//!    duration measured from the triggering failure.
//! 3) A locked pair is refused before the password is looked at; further
//!    failures never push the lockout out.
//! 4) Success deletes the row; a periodic purge drops rows past retention.
//!
//! The counter update is a single upsert so two concurrent failures for the
//! same key can never both observe "under threshold".

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::Instrument;

use super::config::RateLimitPolicy;
use super::utils::{from_unix, normalize_email};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Locked { until: DateTime<Utc> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Failure counted; the key is still allowed.
    Counted { attempts: i64 },
    /// The key is locked (by this failure or an earlier one).
    LockedOut { until: DateTime<Utc> },
}

/// Whole seconds until `until`, rounded up and never below one.
#[must_use]
pub fn retry_after_seconds(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds().max(0);
    u64::try_from((millis + 999) / 1000).unwrap_or(0).max(1)
}

/// Key for one (client address, attempted email) pair.
#[must_use]
pub fn limiter_key(client_ip: &str, email: &str) -> String {
    format!("{client_ip}|{}", normalize_email(email))
}

#[derive(Clone, Debug)]
pub struct LoginRateLimiter {
    pool: SqlitePool,
    policy: RateLimitPolicy,
}

impl LoginRateLimiter {
    #[must_use]
    pub fn new(pool: SqlitePool, policy: RateLimitPolicy) -> Self {
        Self { pool, policy }
    }

    #[must_use]
    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// # Errors
    /// Returns an error if the lookup fails.
    pub async fn check_allowed(&self, key: &str, now: DateTime<Utc>) -> Result<RateLimitDecision> {
        let query = "SELECT locked_until FROM login_rate_limits WHERE limiter_key = ?";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup rate limit entry")?;

        let locked_until: Option<i64> = row.and_then(|row| row.get("locked_until"));
        match locked_until {
            Some(until) if until > now.timestamp() => Ok(RateLimitDecision::Locked {
                until: from_unix(until)?,
            }),
            _ => Ok(RateLimitDecision::Allowed),
        }
    }

    /// Count a failed attempt for `key`.
    ///
    /// A fresh window starts when there is no entry, the window has run out,
    /// or an earlier lockout has lapsed. An active lockout is left untouched.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn record_failure(&self, key: &str, now: DateTime<Utc>) -> Result<FailureOutcome> {
        let query = r"
            INSERT INTO login_rate_limits
                (limiter_key, failed_attempts, first_failed_at, last_failed_at, locked_until)
            VALUES (?1, 1, ?2, ?2, CASE WHEN ?4 <= 1 THEN ?5 END)
            ON CONFLICT (limiter_key) DO UPDATE SET
                failed_attempts = CASE
                    WHEN locked_until > ?2 THEN failed_attempts
                    WHEN first_failed_at < ?3 OR locked_until <= ?2 THEN 1
                    ELSE failed_attempts + 1
                END,
                first_failed_at = CASE
                    WHEN locked_until > ?2 THEN first_failed_at
                    WHEN first_failed_at < ?3 OR locked_until <= ?2 THEN ?2
                    ELSE first_failed_at
                END,
                last_failed_at = ?2,
                locked_until = CASE
                    WHEN locked_until > ?2 THEN locked_until
                    WHEN first_failed_at < ?3 OR locked_until <= ?2
                        THEN CASE WHEN ?4 <= 1 THEN ?5 END
                    WHEN failed_attempts + 1 >= ?4 THEN ?5
                END
            RETURNING failed_attempts, locked_until
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "UPSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .bind(now.timestamp())
            .bind((now - self.policy.window).timestamp())
            .bind(self.policy.threshold)
            .bind((now + self.policy.lockout).timestamp())
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to record login failure")?;

        let attempts: i64 = row.get("failed_attempts");
        let locked_until: Option<i64> = row.get("locked_until");
        match locked_until {
            Some(until) if until > now.timestamp() => Ok(FailureOutcome::LockedOut {
                until: from_unix(until)?,
            }),
            _ => Ok(FailureOutcome::Counted { attempts }),
        }
    }

    /// Forget all failures for `key`.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn record_success(&self, key: &str) -> Result<()> {
        let query = "DELETE FROM login_rate_limits WHERE limiter_key = ?";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear rate limit entry")?;
        Ok(())
    }

    /// Delete entries whose last failure and lockout both ended more than
    /// the retention horizon ago. Active lockouts are never removed.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn purge_stale(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = r"
            DELETE FROM login_rate_limits
            WHERE MAX(last_failed_at, COALESCE(locked_until, 0)) < ?
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind((now - self.policy.retention).timestamp())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge rate limit entries")?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{at, pool};
    use chrono::Duration;
    use std::collections::HashMap;

    fn limiter(pool: SqlitePool) -> LoginRateLimiter {
        LoginRateLimiter::new(pool, RateLimitPolicy::default())
    }

    async fn fail_times(
        limiter: &LoginRateLimiter,
        key: &str,
        times: i64,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let mut last = FailureOutcome::Counted { attempts: 0 };
        for _ in 0..times {
            last = limiter.record_failure(key, now).await?;
        }
        Ok(last)
    }

    #[test]
    fn key_pairs_address_with_normalized_email() {
        assert_eq!(limiter_key("1.2.3.4", " A@X.com "), "1.2.3.4|a@x.com");
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_seconds(at(15), at(0)), 900);
        assert_eq!(
            retry_after_seconds(at(0) + Duration::milliseconds(1500), at(0)),
            2
        );
        assert_eq!(retry_after_seconds(at(0), at(1)), 1);
    }

    #[tokio::test]
    async fn fifth_failure_locks_the_key() -> Result<()> {
        let limiter = limiter(pool().await?);
        let key = limiter_key("1.2.3.4", "a@x.com");

        for attempt in 1..=4 {
            assert_eq!(
                limiter.record_failure(&key, at(attempt)).await?,
                FailureOutcome::Counted { attempts: attempt }
            );
        }
        assert_eq!(
            limiter.record_failure(&key, at(5)).await?,
            FailureOutcome::LockedOut { until: at(20) }
        );

        // Sixth attempt is refused before any password check.
        assert_eq!(
            limiter.check_allowed(&key, at(6)).await?,
            RateLimitDecision::Locked { until: at(20) }
        );
        // Another email from the same address is unaffected.
        let other = limiter_key("1.2.3.4", "b@x.com");
        assert_eq!(
            limiter.check_allowed(&other, at(6)).await?,
            RateLimitDecision::Allowed
        );
        Ok(())
    }

    #[tokio::test]
    async fn lock_lifts_only_after_until() -> Result<()> {
        let limiter = limiter(pool().await?);
        let key = limiter_key("1.2.3.4", "a@x.com");
        fail_times(&limiter, &key, 5, at(0)).await?;

        let just_before = at(15) - Duration::seconds(1);
        assert_eq!(
            limiter.check_allowed(&key, just_before).await?,
            RateLimitDecision::Locked { until: at(15) }
        );
        assert_eq!(
            limiter.check_allowed(&key, at(15)).await?,
            RateLimitDecision::Allowed
        );
        // The next failure after a lapsed lockout opens a new window.
        assert_eq!(
            limiter.record_failure(&key, at(16)).await?,
            FailureOutcome::Counted { attempts: 1 }
        );
        Ok(())
    }

    #[tokio::test]
    async fn probing_does_not_extend_lockout() -> Result<()> {
        let pool = pool().await?;
        let limiter = limiter(pool.clone());
        let key = limiter_key("1.2.3.4", "a@x.com");
        fail_times(&limiter, &key, 5, at(0)).await?;

        assert_eq!(
            limiter.record_failure(&key, at(10)).await?,
            FailureOutcome::LockedOut { until: at(15) }
        );
        let row = sqlx::query("SELECT failed_attempts FROM login_rate_limits WHERE limiter_key = ?")
            .bind(&key)
            .fetch_one(&pool)
            .await?;
        assert_eq!(row.get::<i64, _>("failed_attempts"), 5);
        Ok(())
    }

    #[tokio::test]
    async fn failures_outside_window_start_over() -> Result<()> {
        let limiter = limiter(pool().await?);
        let key = limiter_key("1.2.3.4", "a@x.com");

        fail_times(&limiter, &key, 4, at(0)).await?;
        assert_eq!(
            limiter.record_failure(&key, at(11)).await?,
            FailureOutcome::Counted { attempts: 1 }
        );
        // Window boundary is inclusive: exactly W later still counts.
        fail_times(&limiter, &key, 3, at(11)).await?;
        assert_eq!(
            limiter.record_failure(&key, at(21)).await?,
            FailureOutcome::LockedOut { until: at(36) }
        );
        Ok(())
    }

    #[tokio::test]
    async fn success_clears_the_entry() -> Result<()> {
        let limiter = limiter(pool().await?);
        let key = limiter_key("1.2.3.4", "a@x.com");

        fail_times(&limiter, &key, 4, at(0)).await?;
        limiter.record_success(&key).await?;
        assert_eq!(
            limiter.record_failure(&key, at(1)).await?,
            FailureOutcome::Counted { attempts: 1 }
        );
        Ok(())
    }

    #[tokio::test]
    async fn keys_are_independent() -> Result<()> {
        let limiter = limiter(pool().await?);
        let locked = limiter_key("1.2.3.4", "a@x.com");
        let same_email_other_ip = limiter_key("5.6.7.8", "a@x.com");

        fail_times(&limiter, &locked, 5, at(0)).await?;
        assert_eq!(
            limiter.record_failure(&same_email_other_ip, at(1)).await?,
            FailureOutcome::Counted { attempts: 1 }
        );
        assert_eq!(
            limiter.check_allowed(&same_email_other_ip, at(1)).await?,
            RateLimitDecision::Allowed
        );
        Ok(())
    }

    #[tokio::test]
    async fn purge_respects_retention_and_active_locks() -> Result<()> {
        let pool = pool().await?;
        let limiter = LoginRateLimiter::new(
            pool.clone(),
            RateLimitPolicy {
                lockout: Duration::days(5),
                ..RateLimitPolicy::default()
            },
        );
        let now = at(0) + Duration::days(4);

        limiter.record_failure("old-attempts", at(0)).await?;
        limiter.record_failure("recent-attempts", now - Duration::hours(47)).await?;
        // Locked at day 0 for 5 days: still active at day 4.
        fail_times(&limiter, "active-lock", 5, at(0)).await?;
        sqlx::query(
            "INSERT INTO login_rate_limits VALUES ('expired-lock', 5, ?1, ?1, ?2)",
        )
        .bind(at(0).timestamp())
        .bind((at(0) + Duration::hours(1)).timestamp())
        .execute(&pool)
        .await?;

        assert_eq!(limiter.purge_stale(now).await?, 2);

        let keys: Vec<String> =
            sqlx::query("SELECT limiter_key FROM login_rate_limits ORDER BY limiter_key")
                .fetch_all(&pool)
                .await?
                .iter()
                .map(|row| row.get("limiter_key"))
                .collect();
        assert_eq!(keys, vec!["active-lock", "recent-attempts"]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_lock_exactly_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dsn = format!("sqlite://{}", dir.path().join("limits.db").display());
        let pool = crate::db::connect(&dsn, 8).await?;
        let limiter = limiter(pool);
        let key = limiter_key("1.2.3.4", "a@x.com");

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                limiter.record_failure(&key, at(1)).await
            }));
        }

        let mut counted: HashMap<i64, usize> = HashMap::new();
        let mut locked = 0;
        for handle in handles {
            match handle.await?? {
                FailureOutcome::Counted { attempts } => {
                    *counted.entry(attempts).or_default() += 1;
                }
                FailureOutcome::LockedOut { until } => {
                    assert_eq!(until, at(16));
                    locked += 1;
                }
            }
        }

        // Every count below the threshold was observed exactly once.
        assert_eq!(counted.len(), 4);
        assert!(counted.values().all(|seen| *seen == 1));
        assert_eq!(locked, 16);
        Ok(())
    }
}

//! Credential Store.
//!
//! Passwords are run through Argon2id with a per-user random salt and,
//! optionally, a server-side pepper. The cost parameters used for each hash are
//! stored next to it. Verification of an unknown email still pays for one full
//! derivation so both failure paths take the same time.

use anyhow::{Context, Result, anyhow};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{Row, SqlitePool};
use subtle::ConstantTimeEq;
use tracing::Instrument;
use uuid::Uuid;

use super::config::{AuthConfig, KdfParams};
use super::error::AuthError;
use super::sessions::revoke_user_sessions;
use super::utils::{from_unix, is_unique_violation, normalize_email, parse_id, valid_email};

pub const SALT_LEN: usize = 16;
pub const HASH_LEN: usize = 32;
pub const MIN_NAME_CHARS: usize = 2;
pub const MIN_PASSWORD_CHARS: usize = 8;
/// Bounds hashing work per request; not a strength rule.
pub const MAX_PASSWORD_BYTES: usize = 1024;

const DUMMY_SALT: [u8; SALT_LEN] = *b"subtracker-dummy";

/// Public profile of a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

struct StoredCredential {
    user_id: Uuid,
    hash: Vec<u8>,
    salt: Vec<u8>,
    params: KdfParams,
}

#[derive(Clone, Debug)]
pub struct CredentialStore {
    pool: SqlitePool,
    kdf: KdfParams,
    pepper: Option<SecretString>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(pool: SqlitePool, config: &AuthConfig) -> Self {
        Self {
            pool,
            kdf: config.kdf(),
            pepper: config.password_pepper().cloned(),
        }
    }

    /// Register a user. Returns `Conflict` if the email is taken (any case).
    ///
    /// # Errors
    /// `Validation` for malformed input, `Conflict` for a taken email,
    /// `Unavailable` if hashing or storage fails.
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password: SecretString,
        now: DateTime<Utc>,
    ) -> Result<Uuid, AuthError> {
        let name = name.trim();
        if name.chars().count() < MIN_NAME_CHARS {
            return Err(AuthError::Validation(
                "Name must be at least 2 characters".to_string(),
            ));
        }
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::Validation("Invalid email address".to_string()));
        }
        check_password_policy(&password)?;

        let salt = generate_salt()?;
        let hash = self.derive(password, salt.to_vec(), self.kdf).await?;

        let user_id = Uuid::new_v4();
        let query = r"
            INSERT INTO users
                (id, name, email, password_hash, salt, kdf_memory_kib, kdf_iterations,
                 kdf_parallelism, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id.to_string())
            .bind(name)
            .bind(&email)
            .bind(hash.as_slice())
            .bind(salt.as_slice())
            .bind(i64::from(self.kdf.memory_kib))
            .bind(i64::from(self.kdf.iterations))
            .bind(i64::from(self.kdf.parallelism))
            .bind(now.timestamp())
            .bind(now.timestamp())
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(user_id),
            Err(err) if is_unique_violation(&err) => Err(AuthError::Conflict),
            Err(err) => Err(AuthError::Unavailable(
                anyhow::Error::new(err).context("failed to insert user"),
            )),
        }
    }

    /// Check a password. Unknown email and wrong password are the same error.
    ///
    /// # Errors
    /// `AuthFailed` on any credential mismatch, `Unavailable` if storage fails.
    pub async fn verify(&self, email: &str, password: SecretString) -> Result<Uuid, AuthError> {
        let email = normalize_email(email);
        let stored = self.lookup_credential(&email).await?;

        let Some(stored) = stored.filter(|_| password.expose_secret().len() <= MAX_PASSWORD_BYTES)
        else {
            // Same cost as a real check so response time does not reveal the account.
            let _ = self.derive(password, DUMMY_SALT.to_vec(), self.kdf).await;
            return Err(AuthError::AuthFailed);
        };

        let computed = self
            .derive(password, stored.salt.clone(), stored.params)
            .await?;

        if bool::from(computed.as_slice().ct_eq(stored.hash.as_slice())) {
            Ok(stored.user_id)
        } else {
            Err(AuthError::AuthFailed)
        }
    }

    /// Replace the password after checking the current one, then revoke every
    /// session of the user. Both writes commit together.
    ///
    /// Returns the user id and the number of sessions revoked.
    ///
    /// # Errors
    /// `AuthFailed` if the current password is wrong (nothing changes),
    /// `Validation` if the new password is unacceptable, `Unavailable` on
    /// storage failure.
    pub async fn reset_password(
        &self,
        email: &str,
        current: SecretString,
        new: SecretString,
        now: DateTime<Utc>,
    ) -> Result<(Uuid, u64), AuthError> {
        check_password_policy(&new)?;
        let user_id = self.verify(email, current).await?;

        let salt = generate_salt()?;
        let hash = self.derive(new, salt.to_vec(), self.kdf).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin password reset transaction")?;

        let query = r"
            UPDATE users
            SET password_hash = ?, salt = ?, kdf_memory_kib = ?, kdf_iterations = ?,
                kdf_parallelism = ?, updated_at = ?
            WHERE id = ?
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(hash.as_slice())
            .bind(salt.as_slice())
            .bind(i64::from(self.kdf.memory_kib))
            .bind(i64::from(self.kdf.iterations))
            .bind(i64::from(self.kdf.parallelism))
            .bind(now.timestamp())
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to update password")?;

        let revoked = revoke_user_sessions(&mut tx, user_id, now).await?;

        tx.commit()
            .await
            .context("commit password reset transaction")?;

        Ok((user_id, revoked))
    }

    /// # Errors
    /// Returns an error if the lookup fails.
    pub async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        let query = "SELECT id, name, email, created_at FROM users WHERE id = ?";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user")?;

        row.map(|row| {
            let id: String = row.get("id");
            Ok(UserRecord {
                id: parse_id(&id)?,
                name: row.get("name"),
                email: row.get("email"),
                created_at: from_unix(row.get("created_at"))?,
            })
        })
        .transpose()
    }

    async fn lookup_credential(&self, email: &str) -> Result<Option<StoredCredential>> {
        let query = r"
            SELECT id, password_hash, salt, kdf_memory_kib, kdf_iterations, kdf_parallelism
            FROM users
            WHERE email = ?
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup credentials")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.get("id");
        let params = KdfParams {
            memory_kib: u32::try_from(row.get::<i64, _>("kdf_memory_kib"))
                .context("invalid stored memory cost")?,
            iterations: u32::try_from(row.get::<i64, _>("kdf_iterations"))
                .context("invalid stored iteration count")?,
            parallelism: u32::try_from(row.get::<i64, _>("kdf_parallelism"))
                .context("invalid stored parallelism")?,
        };
        Ok(Some(StoredCredential {
            user_id: parse_id(&id)?,
            hash: row.get("password_hash"),
            salt: row.get("salt"),
            params,
        }))
    }

    /// Argon2 is CPU and memory bound, so it runs on the blocking pool.
    async fn derive(
        &self,
        password: SecretString,
        salt: Vec<u8>,
        params: KdfParams,
    ) -> Result<[u8; HASH_LEN]> {
        let pepper = self.pepper.clone();
        tokio::task::spawn_blocking(move || derive_hash(&password, &salt, params, pepper.as_ref()))
            .await
            .context("password hashing task failed")?
    }
}

fn check_password_policy(password: &SecretString) -> Result<(), AuthError> {
    let password = password.expose_secret();
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AuthError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(AuthError::Validation("Password is too long".to_string()));
    }
    Ok(())
}

fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .context("failed to generate salt")?;
    Ok(salt)
}

fn derive_hash(
    password: &SecretString,
    salt: &[u8],
    params: KdfParams,
    pepper: Option<&SecretString>,
) -> Result<[u8; HASH_LEN]> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(HASH_LEN),
    )
    .map_err(|err| anyhow!("invalid Argon2 parameters: {err}"))?;

    let argon2 = match pepper {
        Some(pepper) => Argon2::new_with_secret(
            pepper.expose_secret().as_bytes(),
            Algorithm::Argon2id,
            Version::V0x13,
            params,
        )
        .map_err(|err| anyhow!("invalid password pepper: {err}"))?,
        None => Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
    };

    let mut output = [0u8; HASH_LEN];
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut output)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(output)
}

//! Shared auth state handed to handlers and middleware.

use sqlx::SqlitePool;

use super::{
    config::AuthConfig, credentials::CredentialStore, csrf::CsrfBinder, events::SecurityLog,
    rate_limit::LoginRateLimiter, sessions::SessionManager,
};

#[derive(Clone, Debug)]
pub struct AuthState {
    config: AuthConfig,
    credentials: CredentialStore,
    sessions: SessionManager,
    csrf: CsrfBinder,
    rate_limiter: LoginRateLimiter,
    events: SecurityLog,
}

impl AuthState {
    #[must_use]
    pub fn new(pool: SqlitePool, config: AuthConfig, events: SecurityLog) -> Self {
        Self {
            credentials: CredentialStore::new(pool.clone(), &config),
            sessions: SessionManager::new(pool.clone(), config.session_policy()),
            csrf: CsrfBinder::new(pool.clone()),
            rate_limiter: LoginRateLimiter::new(pool, config.rate_limit()),
            config,
            events,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfBinder {
        &self.csrf
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &LoginRateLimiter {
        &self.rate_limiter
    }

    #[must_use]
    pub fn events(&self) -> &SecurityLog {
        &self.events
    }
}

use crate::{
    api,
    auth::{
        AuthConfig, AuthState, Environment, JsonLinesSink, KdfParams, RateLimitPolicy, SameSite,
        SecurityLog,
    },
    db,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub max_connections: u32,
    pub environment: Environment,
    pub session_duration_days: Option<i64>,
    pub session_idle_timeout_minutes: i64,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
    pub trust_proxy_headers: bool,
    pub security_log_path: Option<String>,
    pub purge_interval_seconds: u64,
    pub rate_limit: RateLimitPolicy,
    pub kdf: KdfParams,
    pub password_pepper: Option<SecretString>,
}

impl Args {
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.environment)
            .with_session_duration_days(self.session_duration_days)
            .with_session_idle_timeout_minutes(self.session_idle_timeout_minutes)
            .with_cookie_secure(self.cookie_secure)
            .with_cookie_same_site(self.cookie_same_site)
            .with_trust_proxy_headers(self.trust_proxy_headers)
            .with_rate_limit(self.rate_limit)
            .with_kdf(self.kdf)
            .with_password_pepper(self.password_pepper.clone())
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database or security log cannot be opened, or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    let config = args.auth_config();
    debug!(
        "environment: {}, session lifetime: {} days, cookie secure: {}",
        config.environment(),
        config.session_policy().lifetime.num_days(),
        config.cookie_secure()
    );

    let pool = db::connect(&args.dsn, args.max_connections).await?;

    let mut events = SecurityLog::new();
    if let Some(path) = &args.security_log_path {
        let (sink, _writer) = JsonLinesSink::spawn(path)
            .with_context(|| format!("Failed to open security log: {path}"))?;
        events = events.with_sink(Arc::new(sink));
        info!("Security events appended to {path}");
    }

    let auth_state = Arc::new(AuthState::new(pool.clone(), config, events));

    api::new(
        args.port,
        pool,
        auth_state,
        Duration::from_secs(args.purge_interval_seconds),
    )
    .await
}

//! Auth configuration and the policies derived from it.

use chrono::Duration;
use secrecy::SecretString;
use std::{fmt, str::FromStr};

const DEV_SESSION_DAYS: i64 = 30;
const PRODUCTION_SESSION_DAYS: i64 = 7;

pub const DEFAULT_ATTEMPT_THRESHOLD: i64 = 5;
pub const DEFAULT_ATTEMPT_WINDOW_SECONDS: i64 = 10 * 60;
pub const DEFAULT_LOCKOUT_SECONDS: i64 = 15 * 60;
pub const DEFAULT_RETENTION_SECONDS: i64 = 48 * 60 * 60;

// OWASP baseline for Argon2id.
pub const DEFAULT_KDF_MEMORY_KIB: u32 = 19_456;
pub const DEFAULT_KDF_ITERATIONS: u32 = 2;
pub const DEFAULT_KDF_PARALLELISM: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    const fn default_session_days(self) -> i64 {
        match self {
            Self::Development => DEV_SESSION_DAYS,
            Self::Production => PRODUCTION_SESSION_DAYS,
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

impl SameSite {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lax => "Lax",
            Self::Strict => "Strict",
            Self::None => "None",
        }
    }
}

impl FromStr for SameSite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lax" => Ok(Self::Lax),
            "strict" => Ok(Self::Strict),
            "none" => Ok(Self::None),
            other => Err(format!("invalid SameSite value: {other}")),
        }
    }
}

/// Lifetime rules applied when a session is created and validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionPolicy {
    pub lifetime: Duration,
    /// `None` disables the idle check.
    pub idle_timeout: Option<Duration>,
}

/// Thresholds for the login rate limiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub threshold: i64,
    pub window: Duration,
    pub lockout: Duration,
    pub retention: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_ATTEMPT_THRESHOLD,
            window: Duration::seconds(DEFAULT_ATTEMPT_WINDOW_SECONDS),
            lockout: Duration::seconds(DEFAULT_LOCKOUT_SECONDS),
            retention: Duration::seconds(DEFAULT_RETENTION_SECONDS),
        }
    }
}

/// Argon2id cost parameters. Stored per user so they can be raised later
/// without invalidating existing hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_KDF_MEMORY_KIB,
            iterations: DEFAULT_KDF_ITERATIONS,
            parallelism: DEFAULT_KDF_PARALLELISM,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    environment: Environment,
    session_duration_days: Option<i64>,
    session_idle_timeout_minutes: i64,
    cookie_secure: bool,
    cookie_same_site: SameSite,
    rate_limit: RateLimitPolicy,
    kdf: KdfParams,
    password_pepper: Option<SecretString>,
    trust_proxy_headers: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(Environment::Development)
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            session_duration_days: None,
            session_idle_timeout_minutes: 0,
            cookie_secure: false,
            cookie_same_site: SameSite::Lax,
            rate_limit: RateLimitPolicy::default(),
            kdf: KdfParams::default(),
            password_pepper: None,
            trust_proxy_headers: false,
        }
    }

    #[must_use]
    pub fn with_session_duration_days(mut self, days: Option<i64>) -> Self {
        self.session_duration_days = days.filter(|days| *days > 0);
        self
    }

    #[must_use]
    pub fn with_session_idle_timeout_minutes(mut self, minutes: i64) -> Self {
        self.session_idle_timeout_minutes = minutes.max(0);
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_cookie_same_site(mut self, same_site: SameSite) -> Self {
        self.cookie_same_site = same_site;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = policy;
        self
    }

    #[must_use]
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    #[must_use]
    pub fn with_password_pepper(mut self, pepper: Option<SecretString>) -> Self {
        self.password_pepper = pepper;
        self
    }

    #[must_use]
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub fn session_policy(&self) -> SessionPolicy {
        let days = self
            .session_duration_days
            .unwrap_or_else(|| self.environment.default_session_days());
        let idle_timeout = (self.session_idle_timeout_minutes > 0)
            .then(|| Duration::minutes(self.session_idle_timeout_minutes));
        SessionPolicy {
            lifetime: Duration::days(days),
            idle_timeout,
        }
    }

    /// Cookies are marked `Secure` when asked to, and always in production.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure || self.environment == Environment::Production
    }

    #[must_use]
    pub fn cookie_same_site(&self) -> SameSite {
        self.cookie_same_site
    }

    #[must_use]
    pub fn rate_limit(&self) -> RateLimitPolicy {
        self.rate_limit
    }

    #[must_use]
    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    #[must_use]
    pub fn password_pepper(&self) -> Option<&SecretString> {
        self.password_pepper.as_ref()
    }

    #[must_use]
    pub fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_defaults() {
        let config = AuthConfig::default();
        let policy = config.session_policy();
        assert_eq!(policy.lifetime, Duration::days(30));
        assert_eq!(policy.idle_timeout, None);
        assert!(!config.cookie_secure());
        assert_eq!(config.cookie_same_site(), SameSite::Lax);
        assert_eq!(config.rate_limit(), RateLimitPolicy::default());
    }

    #[test]
    fn production_shortens_sessions_and_secures_cookies() {
        let config = AuthConfig::new(Environment::Production);
        assert_eq!(config.session_policy().lifetime, Duration::days(7));
        assert!(config.cookie_secure());
    }

    #[test]
    fn overrides_apply() {
        let config = AuthConfig::new(Environment::Production)
            .with_session_duration_days(Some(2))
            .with_session_idle_timeout_minutes(10);
        let policy = config.session_policy();
        assert_eq!(policy.lifetime, Duration::days(2));
        assert_eq!(policy.idle_timeout, Some(Duration::minutes(10)));
    }

    #[test]
    fn zero_or_negative_overrides_fall_back() {
        let config = AuthConfig::default()
            .with_session_duration_days(Some(0))
            .with_session_idle_timeout_minutes(-5);
        let policy = config.session_policy();
        assert_eq!(policy.lifetime, Duration::days(30));
        assert_eq!(policy.idle_timeout, None);
    }

    #[test]
    fn parse_environment_and_same_site() {
        assert_eq!("PROD".parse(), Ok(Environment::Production));
        assert_eq!("development".parse(), Ok(Environment::Development));
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!("strict".parse(), Ok(SameSite::Strict));
        assert_eq!(SameSite::None.as_str(), "None");
        assert!("sometimes".parse::<SameSite>().is_err());
    }
}

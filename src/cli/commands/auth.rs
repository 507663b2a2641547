use crate::auth::{Environment, SameSite};
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_ENVIRONMENT: &str = "environment";
pub const ARG_SESSION_DURATION_DAYS: &str = "session-duration-days";
pub const ARG_SESSION_IDLE_TIMEOUT_MINUTES: &str = "session-idle-timeout-minutes";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_COOKIE_SAMESITE: &str = "cookie-samesite";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";
pub const ARG_SECURITY_LOG_PATH: &str = "security-log-path";
pub const ARG_PURGE_INTERVAL_SECONDS: &str = "purge-interval-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub environment: Environment,
    /// `None` keeps the environment's default lifetime.
    pub session_duration_days: Option<i64>,
    pub session_idle_timeout_minutes: i64,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
    pub trust_proxy_headers: bool,
    pub security_log_path: Option<String>,
    pub purge_interval_seconds: u64,
}

impl Options {
    /// Parse session, cookie and audit arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a numeric argument is out of range.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let session_idle_timeout_minutes = matches
            .get_one::<i64>(ARG_SESSION_IDLE_TIMEOUT_MINUTES)
            .copied()
            .unwrap_or(0);
        if session_idle_timeout_minutes < 0 {
            anyhow::bail!("--{ARG_SESSION_IDLE_TIMEOUT_MINUTES} must not be negative");
        }

        let purge_interval_seconds = matches
            .get_one::<u64>(ARG_PURGE_INTERVAL_SECONDS)
            .copied()
            .unwrap_or(3600);
        if purge_interval_seconds == 0 {
            anyhow::bail!("--{ARG_PURGE_INTERVAL_SECONDS} must be greater than zero");
        }

        Ok(Self {
            environment: matches
                .get_one::<Environment>(ARG_ENVIRONMENT)
                .copied()
                .unwrap_or_default(),
            session_duration_days: matches.get_one::<i64>(ARG_SESSION_DURATION_DAYS).copied(),
            session_idle_timeout_minutes,
            cookie_secure: matches.get_flag(ARG_COOKIE_SECURE),
            cookie_same_site: matches
                .get_one::<SameSite>(ARG_COOKIE_SAMESITE)
                .copied()
                .unwrap_or_default(),
            trust_proxy_headers: matches.get_flag(ARG_TRUST_PROXY_HEADERS),
            security_log_path: matches
                .get_one::<String>(ARG_SECURITY_LOG_PATH)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
            purge_interval_seconds,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    let command = with_cookie_args(command);
    with_audit_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ENVIRONMENT)
                .long(ARG_ENVIRONMENT)
                .help("Deployment mode: development or production")
                .long_help(
                    "Deployment mode. Production shortens the default session lifetime to 7 days and always marks cookies Secure.",
                )
                .env("SUBTRACKER_ENV")
                .default_value("development")
                .value_parser(str::parse::<Environment>),
        )
        .arg(
            Arg::new(ARG_SESSION_DURATION_DAYS)
                .long(ARG_SESSION_DURATION_DAYS)
                .help("Absolute session lifetime in days (default: 30 in development, 7 in production)")
                .env("SUBTRACKER_SESSION_DURATION_DAYS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_IDLE_TIMEOUT_MINUTES)
                .long(ARG_SESSION_IDLE_TIMEOUT_MINUTES)
                .help("End sessions after this many minutes without activity (0 disables)")
                .env("SUBTRACKER_SESSION_IDLE_TIMEOUT_MINUTES")
                .default_value("0")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_cookie_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark cookies Secure (always on in production)")
                .env("SUBTRACKER_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_COOKIE_SAMESITE)
                .long(ARG_COOKIE_SAMESITE)
                .help("SameSite attribute for session and CSRF cookies: Lax, Strict or None")
                .env("SUBTRACKER_COOKIE_SAMESITE")
                .default_value("Lax")
                .value_parser(str::parse::<SameSite>),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long(ARG_TRUST_PROXY_HEADERS)
                .help("Take the client address from X-Forwarded-For / X-Real-IP")
                .long_help(
                    "Take the client address from X-Forwarded-For / X-Real-IP. Only enable behind a reverse proxy that overwrites these headers.",
                )
                .env("SUBTRACKER_TRUST_PROXY_HEADERS")
                .action(ArgAction::SetTrue),
        )
}

fn with_audit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SECURITY_LOG_PATH)
                .long(ARG_SECURITY_LOG_PATH)
                .help("Append security events as JSON lines to this file")
                .env("SUBTRACKER_SECURITY_LOG_PATH"),
        )
        .arg(
            Arg::new(ARG_PURGE_INTERVAL_SECONDS)
                .long(ARG_PURGE_INTERVAL_SECONDS)
                .help("Seconds between sweeps of stale rate-limit entries and ended sessions")
                .env("SUBTRACKER_PURGE_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}

//! Map validated CLI arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_MAX_CONNECTIONS, ARG_PORT, auth, limits, password};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .filter(|v| !v.trim().is_empty())
        .context("missing required argument: --dsn")?;
    let max_connections = matches
        .get_one::<u32>(ARG_MAX_CONNECTIONS)
        .copied()
        .unwrap_or(5);

    let auth_opts = auth::Options::parse(matches)?;
    let limit_opts = limits::Options::parse(matches)?;
    let password_opts = password::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        max_connections,
        environment: auth_opts.environment,
        session_duration_days: auth_opts.session_duration_days,
        session_idle_timeout_minutes: auth_opts.session_idle_timeout_minutes,
        cookie_secure: auth_opts.cookie_secure,
        cookie_same_site: auth_opts.cookie_same_site,
        trust_proxy_headers: auth_opts.trust_proxy_headers,
        security_log_path: auth_opts.security_log_path,
        purge_interval_seconds: auth_opts.purge_interval_seconds,
        rate_limit: limit_opts.policy(),
        kdf: password_opts.kdf,
        password_pepper: password_opts.pepper,
    }))
}

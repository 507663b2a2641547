use crate::auth::{
    RateLimitPolicy,
    config::{
        DEFAULT_ATTEMPT_THRESHOLD, DEFAULT_ATTEMPT_WINDOW_SECONDS, DEFAULT_LOCKOUT_SECONDS,
        DEFAULT_RETENTION_SECONDS,
    },
};
use chrono::Duration;
use clap::{Arg, ArgMatches, Command};

pub const ARG_LOGIN_ATTEMPT_THRESHOLD: &str = "login-attempt-threshold";
pub const ARG_LOGIN_ATTEMPT_WINDOW_SECONDS: &str = "login-attempt-window-seconds";
pub const ARG_LOGIN_LOCKOUT_SECONDS: &str = "login-lockout-seconds";
pub const ARG_LOGIN_RETENTION_SECONDS: &str = "login-retention-seconds";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub threshold: i64,
    pub window_seconds: i64,
    pub lockout_seconds: i64,
    pub retention_seconds: i64,
}

impl Options {
    /// Parse login rate-limit arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the retention horizon is shorter than the window or lockout.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read = |id: &str, default: i64| matches.get_one::<i64>(id).copied().unwrap_or(default);

        let options = Self {
            threshold: read(ARG_LOGIN_ATTEMPT_THRESHOLD, DEFAULT_ATTEMPT_THRESHOLD),
            window_seconds: read(ARG_LOGIN_ATTEMPT_WINDOW_SECONDS, DEFAULT_ATTEMPT_WINDOW_SECONDS),
            lockout_seconds: read(ARG_LOGIN_LOCKOUT_SECONDS, DEFAULT_LOCKOUT_SECONDS),
            retention_seconds: read(ARG_LOGIN_RETENTION_SECONDS, DEFAULT_RETENTION_SECONDS),
        };

        // A purge must never drop an entry that still counts or still locks.
        if options.retention_seconds < options.window_seconds.max(options.lockout_seconds) {
            anyhow::bail!(
                "--{ARG_LOGIN_RETENTION_SECONDS} must be at least the attempt window and the lockout"
            );
        }

        Ok(options)
    }

    #[must_use]
    pub fn policy(self) -> RateLimitPolicy {
        RateLimitPolicy {
            threshold: self.threshold,
            window: Duration::seconds(self.window_seconds),
            lockout: Duration::seconds(self.lockout_seconds),
            retention: Duration::seconds(self.retention_seconds),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOGIN_ATTEMPT_THRESHOLD)
                .long(ARG_LOGIN_ATTEMPT_THRESHOLD)
                .help("Failed logins per address and email that trigger a lockout")
                .env("SUBTRACKER_LOGIN_ATTEMPT_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_ATTEMPT_WINDOW_SECONDS)
                .long(ARG_LOGIN_ATTEMPT_WINDOW_SECONDS)
                .help("Window in seconds in which failures are counted")
                .env("SUBTRACKER_LOGIN_ATTEMPT_WINDOW_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_LOCKOUT_SECONDS)
                .long(ARG_LOGIN_LOCKOUT_SECONDS)
                .help("Lockout duration in seconds")
                .env("SUBTRACKER_LOGIN_LOCKOUT_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOGIN_RETENTION_SECONDS)
                .long(ARG_LOGIN_RETENTION_SECONDS)
                .help("Idle limiter entries and ended sessions older than this are purged")
                .env("SUBTRACKER_LOGIN_RETENTION_SECONDS")
                .default_value("172800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

pub mod auth;
pub mod limits;
pub mod logging;
pub mod password;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_MAX_CONNECTIONS: &str = "max-connections";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("subtracker")
        .about("Subscription tracker: authentication and request security")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("SUBTRACKER_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("SQLite database connection string")
                .long_help(
                    "SQLite database connection string. The file is created and the schema applied on startup.",
                )
                .default_value("sqlite://subtracker.db")
                .env("SUBTRACKER_DSN"),
        )
        .arg(
            Arg::new(ARG_MAX_CONNECTIONS)
                .long(ARG_MAX_CONNECTIONS)
                .help("Maximum database connections in the pool")
                .default_value("5")
                .env("SUBTRACKER_MAX_CONNECTIONS")
                .value_parser(clap::value_parser!(u32).range(1..)),
        );

    let command = auth::with_args(command);
    let command = limits::with_args(command);
    let command = password::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Environment, SameSite};

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "subtracker");
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_defaults() {
        temp_env::with_vars(
            [
                ("SUBTRACKER_PORT", None::<&str>),
                ("SUBTRACKER_DSN", None::<&str>),
                ("SUBTRACKER_ENV", None::<&str>),
                ("SUBTRACKER_COOKIE_SAMESITE", None::<&str>),
                ("SUBTRACKER_LOG_LEVEL", None::<&str>),
            ],
            || {
                let matches = new().get_matches_from(vec!["subtracker"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(8080));
                assert_eq!(
                    matches.get_one::<String>(ARG_DSN).cloned(),
                    Some("sqlite://subtracker.db".to_string())
                );
                assert_eq!(
                    matches.get_one::<Environment>(auth::ARG_ENVIRONMENT).copied(),
                    Some(Environment::Development)
                );
                assert_eq!(
                    matches.get_one::<SameSite>(auth::ARG_COOKIE_SAMESITE).copied(),
                    Some(SameSite::Lax)
                );
                assert!(!matches.get_flag(auth::ARG_TRUST_PROXY_HEADERS));
                assert_eq!(matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(), Some(0));
            },
        );
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("SUBTRACKER_PORT", Some("443")),
                ("SUBTRACKER_DSN", Some("sqlite:///var/lib/subtracker/data.db")),
                ("SUBTRACKER_ENV", Some("production")),
                ("SUBTRACKER_COOKIE_SAMESITE", Some("strict")),
                ("SUBTRACKER_SESSION_IDLE_TIMEOUT_MINUTES", Some("30")),
                ("SUBTRACKER_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["subtracker"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(443));
                assert_eq!(
                    matches.get_one::<String>(ARG_DSN).cloned(),
                    Some("sqlite:///var/lib/subtracker/data.db".to_string())
                );
                assert_eq!(
                    matches.get_one::<Environment>(auth::ARG_ENVIRONMENT).copied(),
                    Some(Environment::Production)
                );
                assert_eq!(
                    matches.get_one::<SameSite>(auth::ARG_COOKIE_SAMESITE).copied(),
                    Some(SameSite::Strict)
                );
                assert_eq!(
                    matches
                        .get_one::<i64>(auth::ARG_SESSION_IDLE_TIMEOUT_MINUTES)
                        .copied(),
                    Some(30)
                );
                assert_eq!(matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(), Some(2));
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars([("SUBTRACKER_LOG_LEVEL", Some(level))], || {
                let matches = new().get_matches_from(vec!["subtracker"]);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        for index in 0..5_usize {
            temp_env::with_vars([("SUBTRACKER_LOG_LEVEL", None::<String>)], || {
                let mut args = vec!["subtracker".to_string()];
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }

                let matches = new().get_matches_from(args);

                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn test_invalid_values_fail() {
        temp_env::with_vars(
            [
                ("SUBTRACKER_COOKIE_SAMESITE", None::<&str>),
                ("SUBTRACKER_ENV", None::<&str>),
            ],
            || {
                let result =
                    new().try_get_matches_from(vec!["subtracker", "--cookie-samesite", "sometimes"]);
                assert_eq!(
                    result.map_err(|e| e.kind()).err(),
                    Some(clap::error::ErrorKind::ValueValidation)
                );

                let result = new().try_get_matches_from(vec!["subtracker", "--environment", "staging"]);
                assert_eq!(
                    result.map_err(|e| e.kind()).err(),
                    Some(clap::error::ErrorKind::ValueValidation)
                );

                let result =
                    new().try_get_matches_from(vec!["subtracker", "--login-attempt-threshold", "0"]);
                assert_eq!(
                    result.map_err(|e| e.kind()).err(),
                    Some(clap::error::ErrorKind::ValueValidation)
                );
            },
        );
    }
}

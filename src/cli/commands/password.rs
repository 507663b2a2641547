use crate::auth::{
    KdfParams,
    config::{DEFAULT_KDF_ITERATIONS, DEFAULT_KDF_MEMORY_KIB, DEFAULT_KDF_PARALLELISM},
};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_KDF_MEMORY_KIB: &str = "kdf-memory-kib";
pub const ARG_KDF_ITERATIONS: &str = "kdf-iterations";
pub const ARG_KDF_PARALLELISM: &str = "kdf-parallelism";
pub const ARG_PASSWORD_PEPPER: &str = "password-pepper";

#[derive(Debug, Clone)]
pub struct Options {
    pub kdf: KdfParams,
    pub pepper: Option<SecretString>,
}

impl Options {
    /// Parse password hashing arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the memory cost is too small for the parallelism.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read = |id: &str, default: u32| matches.get_one::<u32>(id).copied().unwrap_or(default);

        let kdf = KdfParams {
            memory_kib: read(ARG_KDF_MEMORY_KIB, DEFAULT_KDF_MEMORY_KIB),
            iterations: read(ARG_KDF_ITERATIONS, DEFAULT_KDF_ITERATIONS),
            parallelism: read(ARG_KDF_PARALLELISM, DEFAULT_KDF_PARALLELISM),
        };

        // Argon2 needs at least 8 KiB of memory per lane.
        if kdf.memory_kib < 8 * kdf.parallelism {
            anyhow::bail!("--{ARG_KDF_MEMORY_KIB} must be at least 8 x --{ARG_KDF_PARALLELISM}");
        }

        let pepper = matches
            .get_one::<String>(ARG_PASSWORD_PEPPER)
            .filter(|v| !v.is_empty())
            .map(|v| SecretString::from(v.clone()));

        Ok(Self { kdf, pepper })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_KDF_MEMORY_KIB)
                .long(ARG_KDF_MEMORY_KIB)
                .help("Argon2id memory cost in KiB for new password hashes")
                .env("SUBTRACKER_KDF_MEMORY_KIB")
                .default_value("19456")
                .value_parser(clap::value_parser!(u32).range(8..)),
        )
        .arg(
            Arg::new(ARG_KDF_ITERATIONS)
                .long(ARG_KDF_ITERATIONS)
                .help("Argon2id iterations for new password hashes")
                .env("SUBTRACKER_KDF_ITERATIONS")
                .default_value("2")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_KDF_PARALLELISM)
                .long(ARG_KDF_PARALLELISM)
                .help("Argon2id lanes for new password hashes")
                .env("SUBTRACKER_KDF_PARALLELISM")
                .default_value("1")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_PEPPER)
                .long(ARG_PASSWORD_PEPPER)
                .help("Server-side secret mixed into every password hash")
                .long_help(
                    "Server-side secret mixed into every password hash. Changing it invalidates all stored passwords.",
                )
                .env("SUBTRACKER_PASSWORD_PEPPER")
                .hide_env_values(true),
        )
}
